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

//! Bandwidth estimation: the per-sample delivery rate with its max filter,
//! the ack-driven bandwidth that feeds the gain machinery, and the inflight
//! throughput used by the fairness ratio.

use crate::transport::{RateSample, TransportState};
use crate::{MIN_BW, MIN_SEGMENT_SIZE};

use super::fixed_math::{mul_div, saturating_u32, BW_UNIT};

/// Reference interval the ack-driven rates are normalised to, microseconds.
const RATE_WIN_US: u64 = 10_000;

/// Bytes-in-flight substitute when the flight is empty, so throughput stays
/// a usable divisor.
const MIN_INFLIGHT_BYTES: u64 = 448;

/// Packet-timed round trip tracking. A round starts at the transmission of
/// some segment and ends at the ack of a segment sent after it.
#[derive(Debug, Default)]
pub(crate) struct RoundCounter {
    /// Delivered mark that closes the current round.
    pub(crate) delivered: u32,

    /// Count of completed round trips.
    pub(crate) rtt_cnt: u32,

    /// True on the ack that opened a new round.
    pub(crate) round_start: bool,
}

impl RoundCounter {
    /// Declare a new round when the acked packet was sent at or past the
    /// current round mark, and advance the mark.
    pub(crate) fn update(&mut self, rs: &RateSample, total_delivered: u32) {
        if rs.prior_delivered >= self.delivered {
            self.delivered = total_delivered.saturating_mul(MIN_SEGMENT_SIZE);
            self.rtt_cnt = self.rtt_cnt.wrapping_add(1);
            self.round_start = true;
        }
    }
}

/// Max-filtered delivery rate, 2^24 scale.
#[derive(Debug, Default)]
pub(crate) struct BandwidthEstimator {
    /// Latest accepted delivery-rate sample.
    pub(crate) bw: u32,
}

impl BandwidthEstimator {
    /// Fold a valid rate sample into the filter. An application-limited
    /// sample understates the path and may only raise the estimate.
    pub(crate) fn on_sample(&mut self, rs: &RateSample, current_max: u64) {
        let bw = mul_div(rs.delivered as u64, BW_UNIT, rs.interval_us as u64);
        if !rs.is_app_limited || bw >= current_max {
            self.bw = saturating_u32(bw);
        }
    }

    /// The larger of the filtered sample and the ack-driven bandwidth. A
    /// heavily lossy path trusts only the filtered sample.
    pub(crate) fn max_bw(&self, ack_bw: u64, loss_cnt: u8) -> u64 {
        if loss_cnt < 50 {
            u64::from(self.bw).max(ack_bw)
        } else {
            u64::from(self.bw)
        }
    }
}

/// Ack-driven bandwidth: delivered bytes normalised over the minimum RTT,
/// 2^24 scale, floored at `MIN_BW`.
pub(crate) fn ack_bandwidth(curr_ack: u32, min_rtt_us: u32) -> u64 {
    let scaled = u128::from(curr_ack) * u128::from(BW_UNIT) * u128::from(RATE_WIN_US);
    let bw = (scaled / u128::from(min_rtt_us.max(1))).min(u128::from(u64::MAX)) as u64;
    bw.max(MIN_BW)
}

/// Inflight throughput: bytes in flight normalised over the minimum RTT.
pub(crate) fn inflight_throughput(bytes_in_flight: u32, min_rtt_us: u32) -> u32 {
    let inflight = if bytes_in_flight == 0 {
        MIN_INFLIGHT_BYTES
    } else {
        u64::from(bytes_in_flight)
    };
    saturating_u32(inflight * RATE_WIN_US / u64::from(min_rtt_us.max(1)))
}

/// Flight size in bytes, derived from the host's packet count and mss.
pub(crate) fn bytes_in_flight(host: &TransportState) -> u32 {
    let mss = if host.mss_cache != 0 {
        host.mss_cache
    } else {
        MIN_SEGMENT_SIZE
    };
    saturating_u32(u64::from(host.packets_in_flight) * u64::from(mss))
}
