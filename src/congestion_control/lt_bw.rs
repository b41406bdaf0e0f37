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

//! Long-term bandwidth detection for policed links.
//!
//! A traffic policer drops everything above a configured rate, which shows
//! up as sustained loss at a near-constant delivery rate. The detector
//! samples delivery over loss-bounded intervals; two consecutive intervals
//! at the same rate switch the connection onto the averaged long-term rate
//! with a unity pacing gain, so the flow stops paying the policer's drop
//! tax while probing.

use log::*;

use crate::transport::{RateSample, TransportState};

use super::fixed_math::{mul_div, saturating_u32, BW_UNIT, GAIN_SCALE, GAIN_UNIT};
use super::pacing;

/// Minimum rounds a sampling interval must span.
const LT_INTERVAL_MIN_RTTS: u8 = 4;

/// Loss threshold for an interval, in 1/256 units of the delivered count.
pub(crate) const LT_LOSS_THRESH: u32 = 50;

/// Rounds spent in the probing mode on the long-term rate before the
/// estimate is dropped and normal probing resumes.
const LT_BW_MAX_RTTS: u32 = 48;

/// Relative tolerance for two intervals to count as the same rate: 1/8.
const LT_BW_RATIO: u64 = GAIN_UNIT >> 3;

/// Absolute tolerance, bytes per second.
const LT_BW_DIFF: u64 = 4000 / 8;

/// Policer detector: `Idle -> Sampling -> Using`.
#[derive(Debug, Default)]
pub(crate) struct LongTermBwDetector {
    /// Long-term delivery rate estimate, 2^24 scale.
    pub(crate) lt_bw: u32,

    /// Whether `lt_bw` currently overrides the max filter.
    pub(crate) use_bw: bool,

    /// Whether a sampling interval is open.
    pub(crate) is_sampling: bool,

    /// Interval start, milliseconds of the host delivery stamp.
    pub(crate) last_stamp_ms: u32,

    /// Host delivered count at interval start.
    pub(crate) last_delivered: u32,

    /// Host lost count at interval start.
    pub(crate) last_lost: u32,

    /// Round trips spanned by the interval so far.
    pub(crate) rtt_cnt: u8,
}

impl LongTermBwDetector {
    fn reset_interval(&mut self, host: &TransportState) {
        self.last_stamp_ms = saturating_u32(host.delivered_mstamp / 1000);
        self.last_delivered = host.delivered;
        self.last_lost = host.lost;
        self.rtt_cnt = 0;
    }

    /// Forget everything and return to idle.
    pub(crate) fn reset(&mut self, host: &TransportState) {
        self.lt_bw = 0;
        self.use_bw = false;
        self.is_sampling = false;
        self.rtt_cnt = 0;
        self.reset_interval(host);
    }

    /// Close the interval with its measured rate. Two matching intervals in
    /// a row engage the long-term estimate; a mismatch restarts sampling
    /// from the new rate.
    fn interval_done(&mut self, host: &TransportState, bw: u64, mss: u32) {
        if self.lt_bw != 0 {
            let diff = (bw as i64 - i64::from(self.lt_bw)).unsigned_abs();
            if diff.saturating_mul(GAIN_UNIT) <= LT_BW_RATIO * u64::from(self.lt_bw)
                || pacing::rate_bytes_per_sec(diff, GAIN_UNIT, mss) <= LT_BW_DIFF
            {
                self.lt_bw = saturating_u32((bw + u64::from(self.lt_bw)) >> 1);
                self.use_bw = true;
                trace!("policed link suspected, long-term bw {} engaged", self.lt_bw);
                return;
            }
        }
        self.lt_bw = saturating_u32(bw);
        self.reset_interval(host);
    }

    /// Feed one rate sample through the detector state machine.
    ///
    /// `in_probe_bw` and `round_start` come from the controller; the
    /// detector counts round trips itself but does not know the phase.
    pub(crate) fn sample(
        &mut self,
        rs: &RateSample,
        host: &TransportState,
        in_probe_bw: bool,
        round_start: bool,
        mss: u32,
    ) {
        if self.use_bw {
            if in_probe_bw && round_start {
                self.rtt_cnt = self.rtt_cnt.saturating_add(1);
                if u32::from(self.rtt_cnt) >= LT_BW_MAX_RTTS {
                    self.reset(host);
                }
            }
            return;
        }

        // Sampling only starts on a lossy sample, so idle links never open
        // an interval.
        if !self.is_sampling {
            if !rs.losses {
                return;
            }
            self.reset_interval(host);
            self.is_sampling = true;
        }

        // An app-limited interval understates the delivery rate.
        if rs.is_app_limited {
            self.reset(host);
            return;
        }

        if round_start {
            self.rtt_cnt = self.rtt_cnt.saturating_add(1);
        }
        if self.rtt_cnt < LT_INTERVAL_MIN_RTTS {
            return;
        }
        if self.rtt_cnt > 4 * LT_INTERVAL_MIN_RTTS {
            self.reset(host);
            return;
        }
        if !rs.losses {
            return;
        }

        let lost = host.lost.saturating_sub(self.last_lost);
        let delivered = host.delivered.saturating_sub(self.last_delivered);
        if delivered == 0
            || (u64::from(lost) << GAIN_SCALE) < u64::from(LT_LOSS_THRESH) * u64::from(delivered)
        {
            return;
        }

        let t_ms = saturating_u32(host.delivered_mstamp / 1000).wrapping_sub(self.last_stamp_ms);
        if (t_ms as i32) < 1 {
            return;
        }
        if t_ms >= u32::MAX / 1000 {
            self.reset(host);
            return;
        }
        let bw = mul_div(u64::from(delivered), BW_UNIT, u64::from(t_ms) * 1000);
        self.interval_done(host, bw, mss);
    }
}
