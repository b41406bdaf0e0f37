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

//! Fairness ratio and path-stability accounting.
//!
//! Three predicates describe whether the path currently looks stable: the
//! RTT sits inside an adaptive tolerance band above its floor, and acked
//! data is growing smoothly. Saturating counters vote on stable versus
//! unfair conditions, and the ratio of ack bandwidth to inflight throughput
//! modulates how aggressively the window machinery behaves.

use crate::{MIN_BW, MIN_SEGMENT_SIZE, MIN_SND_CWND};

use super::fixed_math::{saturating_u32, BW_SCALE};
use super::rtt::MinRttEstimator;

/// Clamp bounds for the fairness ratio, 2^24 scale (about 0.992 and 1.310).
const FAIRNESS_FLOOR: u32 = 16_646_946;
const FAIRNESS_CEIL: u32 = 21_989_530;

/// The stability counters saturate here instead of wrapping.
const FLAG_CAP: u32 = 1 << 16;

/// Consecutive rounds without the high-RTT signature that trigger growth of
/// the tolerance band.
const HIGH_ROUND_LIMIT: u8 = 50;

/// The tolerance band grows in 4 ms steps and saturates at 2^15 us.
const RTT_EPOCH_STEP: u32 = 4000;
const RTT_EPOCH_MAX: u32 = 1 << 15;

#[derive(Debug)]
pub(crate) struct FairnessEstimator {
    /// Ack bandwidth over inflight throughput, 2^24 scale; always inside
    /// the clamp bounds once computed.
    pub(crate) fairness_rat: u32,

    /// Saturating vote counter for stable network conditions.
    pub(crate) stable_flag: u32,

    /// Saturating vote counter for unfair network conditions.
    pub(crate) unfair_flag: u32,

    /// Adaptive RTT tolerance band, microseconds.
    pub(crate) rtt_epoch: u32,

    /// Streak of rounds without the high-RTT signature.
    pub(crate) high_round: u8,
}

impl FairnessEstimator {
    pub(crate) fn new() -> Self {
        Self {
            fairness_rat: FAIRNESS_FLOOR,
            stable_flag: 0,
            unfair_flag: 0,
            rtt_epoch: RTT_EPOCH_STEP,
            high_round: 0,
        }
    }

    /// The current RTT sits 1 ms to a quarter band above the previous RTT.
    pub(crate) fn high_rtt_check(&self, rtt: &MinRttEstimator) -> bool {
        rtt.last_rtt + 1000 < rtt.curr_rtt
            && rtt.last_rtt + self.rtt_epoch - ((self.rtt_epoch * 3) >> 2) > rtt.curr_rtt
    }

    /// The current RTT sits 1 ms to three eighths of the band above the
    /// windowed minimum.
    pub(crate) fn rtt_check(&self, rtt: &MinRttEstimator) -> bool {
        rtt.min_rtt + 1000 < rtt.curr_rtt
            && rtt.min_rtt + self.rtt_epoch - ((self.rtt_epoch * 3) >> 3) > rtt.curr_rtt
    }

    /// Acked data grew, but by less than 7000 bytes, from a non-trivial
    /// base.
    pub(crate) fn ack_check(&self, curr_ack: u32, last_ack: u32) -> bool {
        curr_ack < last_ack.saturating_add(7000)
            && last_ack > MIN_SND_CWND
            && curr_ack > last_ack
    }

    /// Count one unfair vote when no stability predicate holds.
    pub(crate) fn unfair_check(&mut self, rtt: &MinRttEstimator, curr_ack: u32, last_ack: u32) {
        if self.unfair_flag >= FLAG_CAP {
            self.unfair_flag = FLAG_CAP;
        } else if !self.rtt_check(rtt)
            && !self.ack_check(curr_ack, last_ack)
            && !self.high_rtt_check(rtt)
        {
            self.unfair_flag += 1;
        }
    }

    /// Count one stable vote when every stability predicate holds.
    pub(crate) fn stable_check(&mut self, rtt: &MinRttEstimator, curr_ack: u32, last_ack: u32) {
        if self.stable_flag >= FLAG_CAP {
            self.stable_flag = FLAG_CAP;
        } else if self.rtt_check(rtt)
            && self.ack_check(curr_ack, last_ack)
            && self.high_rtt_check(rtt)
        {
            self.stable_flag += 1;
        }
    }

    /// Track rounds without the high-RTT signature. Fifty in a row widen
    /// the tolerance band, provided the path is still acking and the flight
    /// exceeds the window.
    pub(crate) fn high_rtt_round(
        &mut self,
        rtt: &MinRttEstimator,
        curr_ack: u32,
        last_ack: u32,
        inflight: u32,
        curr_cwnd: u32,
    ) {
        if !self.high_rtt_check(rtt) {
            self.high_round = self.high_round.wrapping_add(1);
        }
        if self.high_round == HIGH_ROUND_LIMIT {
            if self.ack_check(curr_ack, last_ack)
                && u64::from(inflight) > u64::from(curr_cwnd) * u64::from(MIN_SEGMENT_SIZE)
            {
                self.rtt_epoch = (self.rtt_epoch + RTT_EPOCH_STEP).min(RTT_EPOCH_MAX);
            }
            self.high_round = 0;
        }
    }

    /// Recompute the fairness ratio from ack bandwidth and inflight
    /// throughput, clamped into its working band. A zero throughput is
    /// substituted by a quarter of the descaled bandwidth.
    pub(crate) fn update_ratio(&mut self, bw: u64, throughput: u32) {
        let beta = if throughput == 0 {
            saturating_u32((bw >> 2) >> BW_SCALE)
        } else {
            throughput
        };
        let rat = bw / (u64::from(beta) + MIN_BW);
        self.fairness_rat = saturating_u32(rat).clamp(FAIRNESS_FLOOR, FAIRNESS_CEIL);
    }
}
