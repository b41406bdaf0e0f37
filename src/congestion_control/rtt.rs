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

//! Round-trip time tracking: the smoothed, current and previous RTT plus a
//! windowed minimum that refreshes every ten seconds.

use crate::transport::{RateSample, Ticks};
use crate::{MIN_RTT_US, MIN_RTT_WIN_SEC};

use super::fixed_math::saturating_u32;

/// RTT state for one connection, all in microseconds.
#[derive(Debug, Default)]
pub(crate) struct MinRttEstimator {
    /// Smoothed RTT at the current ack.
    pub(crate) curr_rtt: u32,

    /// Smoothed RTT at the previous ack.
    pub(crate) last_rtt: u32,

    /// Windowed minimum RTT; never 0 once a sample has been folded in.
    pub(crate) min_rtt: u32,

    /// Tick stamp of the last window refresh.
    pub(crate) min_rtt_stamp: Ticks,
}

impl MinRttEstimator {
    pub(crate) fn new(now: Ticks) -> Self {
        Self {
            min_rtt_stamp: now,
            ..Default::default()
        }
    }

    /// Fold one ack into the estimator.
    ///
    /// The minimum tracks the smaller of the smoothed RTT and the raw sample
    /// and is allowed to rise again once the ten second window elapses, as
    /// long as the ack was not receiver-delayed. The minimum never exceeds
    /// the current RTT and never ends up at zero.
    pub(crate) fn update(&mut self, srtt_us: u32, rs: &RateSample, now: Ticks) {
        let window = MIN_RTT_WIN_SEC * Ticks::PER_SEC;
        let window_expired = now.is_after(self.min_rtt_stamp.offset(window));

        self.last_rtt = self.curr_rtt;
        if srtt_us != 0 {
            self.curr_rtt = (srtt_us >> 3).max(1);
            if self.last_rtt == 0 {
                self.last_rtt = self.curr_rtt;
            }
        } else {
            self.curr_rtt = MIN_RTT_US;
        }

        if self.curr_rtt < self.min_rtt || self.min_rtt == 0 {
            self.min_rtt = self.curr_rtt;
        }
        if rs.rtt_us > 0 {
            let sample = saturating_u32(rs.rtt_us as u64);
            if sample < self.min_rtt || (window_expired && !rs.is_ack_delayed) {
                self.min_rtt = sample;
                self.min_rtt_stamp = now;
            }
        }
        if self.min_rtt == 0 {
            self.min_rtt = MIN_RTT_US;
        }
        if self.min_rtt > self.curr_rtt {
            self.min_rtt = self.curr_rtt;
        }
    }

    /// Minimum RTT with the nominal floor applied, safe as a divisor.
    pub(crate) fn min_or_floor(&self) -> u32 {
        if self.min_rtt == 0 {
            MIN_RTT_US
        } else {
            self.min_rtt
        }
    }
}
