// Copyright (c) 2024 The Spline-CC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(unused_variables)]

//! Congestion control interfaces: the operation set a controller registers
//! with the host transport, the algorithm registry, and the injected
//! randomness source.

use core::str::FromStr;
use std::fmt;

use rand::RngCore;

use crate::transport::{CaEvent, CaState, RateSample, TransportState};
use crate::Config;
use crate::Error;
use crate::Result;
pub use dummy::Dummy;
pub use dummy::DummyConfig;
pub use spline::Spline;
pub use spline::SplineConfig;

/// Available congestion control algorithms.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CongestionControlAlgorithm {
    /// Spline combines model-based probing, bandwidth times minimum RTT,
    /// with loss- and RTT-adaptive heuristics. It targets lossy and jittery
    /// paths such as wireless links and high-variance WANs.
    #[default]
    Spline,

    /// Dummy is a simple congestion controller with a static congestion
    /// window. It is intended to be used for testing and experiments.
    Dummy,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("spline") {
            Ok(CongestionControlAlgorithm::Spline)
        } else if algor.eq_ignore_ascii_case("dummy") {
            Ok(CongestionControlAlgorithm::Dummy)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Non-blocking randomness injected by the host.
///
/// Epoch lengths are randomised to decorrelate competing flows. The host
/// supplies the generator so the core never blocks on entropy inside a
/// callback.
pub trait RandomSource: fmt::Debug {
    /// Next pseudo-random 32-bit value.
    fn next_u32(&mut self) -> u32;
}

/// Default randomness backed by the thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_u32(&mut self) -> u32 {
        rand::thread_rng().next_u32()
    }
}

/// Congestion control operations registered with the host transport.
///
/// The host serialises all calls for one connection. Implementations take
/// no locks, do not allocate per call and never block inside a callback;
/// state lives in the controller and in the host-owned transport block.
pub trait CongestionController {
    /// Name of the congestion control algorithm.
    fn name(&self) -> &str;

    /// Per-connection initialisation.
    fn init(&mut self, host: &mut TransportState);

    /// Main entry: fold one rate sample into the model and write the new
    /// congestion window and pacing rate back into the host block.
    fn on_ack(&mut self, host: &mut TransportState, sample: &RateSample);

    /// Save the current window, then defer to the host threshold.
    fn ssthresh(&mut self, host: &TransportState) -> u32;

    /// Multiplier the host applies when growing the send buffer.
    fn sndbuf_expand(&self) -> u32 {
        2
    }

    /// Transport-level event hook.
    fn cwnd_event(&mut self, host: &mut TransportState, event: CaEvent) {}

    /// Undo a spurious window reduction; returns the window to restore.
    fn undo_cwnd(&mut self, host: &TransportState) -> u32;

    /// Track the host's loss recovery state.
    fn set_state(&mut self, host: &mut TransportState, new_state: CaState) {}
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &Config) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Spline => Box::new(Spline::new(SplineConfig::from(conf))),
        CongestionControlAlgorithm::Dummy => Box::new(Dummy::new(DummyConfig::from(conf))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_control_name() {
        let cases = [
            ("spline", Ok(CongestionControlAlgorithm::Spline)),
            ("Spline", Ok(CongestionControlAlgorithm::Spline)),
            ("SPLINE", Ok(CongestionControlAlgorithm::Spline)),
            ("dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("Dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("DUMMY", Ok(CongestionControlAlgorithm::Dummy)),
            ("splien", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(CongestionControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn congestion_control_build_congestion_controller() {
        let mut config = Config::new();

        let mut cc = build_congestion_controller(&config);
        assert_eq!(cc.name(), "SPLINE");
        assert_eq!(cc.sndbuf_expand(), 3);
        assert_eq!(format!("{:?}", cc), "congestion controller.");

        let mut host = TransportState::default();
        cc.init(&mut host);
        assert_eq!(cc.undo_cwnd(&host), host.snd_cwnd);

        config.set_congestion_control_algorithm(CongestionControlAlgorithm::Dummy);
        let cc = build_congestion_controller(&config);
        assert_eq!(cc.name(), "DUMMY");
        assert_eq!(cc.sndbuf_expand(), 2);
    }
}

mod bandwidth;
mod dummy;
mod fairness;
mod fixed_math;
mod loss;
mod lt_bw;
mod pacing;
mod rtt;
mod spline;
