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

use crate::transport::{RateSample, TransportState, INFINITE_SSTHRESH};
use crate::{Config, MIN_SND_CWND};

use super::CongestionController;

/// Dummy configurable parameters.
#[derive(Debug)]
pub struct DummyConfig {
    /// The static congestion window in segments.
    initial_cwnd: u32,
}

impl DummyConfig {
    pub fn new(initial_cwnd: u32) -> Self {
        Self { initial_cwnd }
    }
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            initial_cwnd: MIN_SND_CWND,
        }
    }
}

impl From<&Config> for DummyConfig {
    fn from(conf: &Config) -> Self {
        Self {
            initial_cwnd: conf.initial_congestion_window,
        }
    }
}

/// Dummy is a simple congestion controller with a static congestion window.
/// It is intended to be used for testing and experiments.
#[derive(Debug)]
pub struct Dummy {
    /// Configurable parameters.
    config: DummyConfig,
}

impl Dummy {
    pub fn new(config: DummyConfig) -> Self {
        Self { config }
    }
}

impl CongestionController for Dummy {
    fn name(&self) -> &str {
        "DUMMY"
    }

    fn init(&mut self, host: &mut TransportState) {
        host.snd_cwnd = self.config.initial_cwnd.min(host.snd_cwnd_clamp);
    }

    fn on_ack(&mut self, host: &mut TransportState, sample: &RateSample) {
        host.snd_cwnd = self.config.initial_cwnd.min(host.snd_cwnd_clamp);
        host.snd_ssthresh = INFINITE_SSTHRESH;
    }

    fn ssthresh(&mut self, host: &TransportState) -> u32 {
        host.snd_ssthresh
    }

    fn undo_cwnd(&mut self, host: &TransportState) -> u32 {
        host.snd_cwnd
    }
}
