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

//! Spline is a per-connection congestion control module for transport
//! senders on lossy, jittery network paths (wireless links, high-variance
//! WANs).
//!
//! It pairs BBR-style model-based probing (bandwidth times minimum
//! round-trip time) with loss- and RTT-adaptive heuristics: saturating
//! stability counters vote on the fairness of the path, and an adaptive
//! trust factor derived from those votes gates phase transitions and scales
//! the congestion window.
//!
//! The crate is the numerical core only. It consumes per-ack rate samples
//! from a host transport and writes a congestion window, a pacing rate and
//! a slow-start threshold back into the host-owned state block. It performs
//! no I/O, takes no locks and allocates nothing per ack; the host
//! serialises all callbacks for one connection.
//!
//! ## Usage
//!
//! ```
//! use spline_cc::{build_congestion_controller, Config, RateSample, TransportState};
//!
//! let config = Config::new();
//! let mut cc = build_congestion_controller(&config);
//!
//! let mut host = TransportState::default();
//! cc.init(&mut host);
//!
//! let sample = RateSample {
//!     delivered: 10,
//!     interval_us: 10_000,
//!     rtt_us: 50_000,
//!     acked_sacked: 10,
//!     ..Default::default()
//! };
//! cc.on_ack(&mut host, &sample);
//!
//! assert!(host.snd_cwnd >= 10);
//! ```

use std::time::Duration;

/// Minimal congestion window in segments.
pub const MIN_SND_CWND: u32 = 10;

/// Nominal segment size in bytes, used when the host has no mss estimate.
pub const MIN_SEGMENT_SIZE: u32 = 1448;

/// Floor for bandwidth estimates.
pub const MIN_BW: u64 = 14_480;

/// Nominal RTT in microseconds, used when no sample is available.
pub const MIN_RTT_US: u32 = 100_000;

/// Length of the windowed minimum-RTT filter, seconds.
pub const MIN_RTT_WIN_SEC: u32 = 10;

/// The initial rtt, used before a real rtt is estimated.
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// A specialized [`Result`] type for congestion control operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control.
#[derive(Debug, Clone)]
pub struct Config {
    /// The congestion control algorithm used for the connection.
    pub(crate) congestion_control_algorithm: CongestionControlAlgorithm,

    /// The minimal congestion window in segments.
    pub(crate) min_congestion_window: u32,

    /// The initial congestion window in segments.
    pub(crate) initial_congestion_window: u32,

    /// The maximum segment payload size in bytes.
    pub(crate) max_datagram_size: u32,

    /// The initial rtt, used before a real rtt is estimated.
    pub(crate) initial_rtt: Duration,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the congestion control algorithm.
    /// The default value is `CongestionControlAlgorithm::Spline`.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    /// Set the minimal congestion window in segments.
    /// The default value is 10.
    pub fn set_min_congestion_window(&mut self, cwnd: u32) {
        self.min_congestion_window = cwnd.max(MIN_SND_CWND);
    }

    /// Set the initial congestion window in segments.
    /// The default value is 10.
    pub fn set_initial_congestion_window(&mut self, cwnd: u32) {
        self.initial_congestion_window = cwnd.max(MIN_SND_CWND);
    }

    /// Set the maximum segment payload size in bytes.
    /// The default value is 1448.
    pub fn set_max_datagram_size(&mut self, size: u32) {
        self.max_datagram_size = size.max(1);
    }

    /// Set the initial RTT used before a real rtt is estimated.
    /// The default value is 333 milliseconds.
    pub fn set_initial_rtt(&mut self, rtt: Duration) {
        self.initial_rtt = rtt;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            congestion_control_algorithm: CongestionControlAlgorithm::Spline,
            min_congestion_window: MIN_SND_CWND,
            initial_congestion_window: MIN_SND_CWND,
            max_datagram_size: MIN_SEGMENT_SIZE,
            initial_rtt: INITIAL_RTT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::new();
        assert_eq!(
            config.congestion_control_algorithm,
            CongestionControlAlgorithm::Spline
        );
        assert_eq!(config.min_congestion_window, MIN_SND_CWND);
        assert_eq!(config.initial_congestion_window, MIN_SND_CWND);
        assert_eq!(config.max_datagram_size, MIN_SEGMENT_SIZE);
        assert_eq!(config.initial_rtt, INITIAL_RTT);
    }

    #[test]
    fn config_setters() {
        let mut config = Config::new();

        config.set_congestion_control_algorithm(CongestionControlAlgorithm::Dummy);
        assert_eq!(
            config.congestion_control_algorithm,
            CongestionControlAlgorithm::Dummy
        );

        config.set_min_congestion_window(40);
        assert_eq!(config.min_congestion_window, 40);
        config.set_min_congestion_window(1);
        assert_eq!(config.min_congestion_window, MIN_SND_CWND);

        config.set_initial_congestion_window(80);
        assert_eq!(config.initial_congestion_window, 80);

        config.set_max_datagram_size(1200);
        assert_eq!(config.max_datagram_size, 1200);
        config.set_max_datagram_size(0);
        assert_eq!(config.max_datagram_size, 1);

        config.set_initial_rtt(Duration::from_millis(100));
        assert_eq!(config.initial_rtt, Duration::from_millis(100));
    }
}

pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::Dummy;
pub use crate::congestion_control::DummyConfig;
pub use crate::congestion_control::RandomSource;
pub use crate::congestion_control::Spline;
pub use crate::congestion_control::SplineConfig;
pub use crate::congestion_control::ThreadRandom;
pub use crate::error::Error;
pub use crate::transport::CaEvent;
pub use crate::transport::CaState;
pub use crate::transport::RateSample;
pub use crate::transport::Ticks;
pub use crate::transport::TransportState;
pub use crate::transport::INFINITE_SSTHRESH;

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

pub mod error;
mod transport;
