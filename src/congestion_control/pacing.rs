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

//! Pacing-rate conversion from scaled bandwidth and gain to bytes per
//! second. The install policy (rates only ratchet upwards within a call)
//! lives with the controller; this module is pure arithmetic.

use crate::MIN_SEGMENT_SIZE;

use super::fixed_math::{BW_SCALE, GAIN_SCALE, USEC_PER_SEC};

/// Margin kept under the estimated bandwidth, percent.
const PACING_MARGIN_PERCENT: u64 = 1;

/// Convert a 2^24-scale bandwidth and a 2^8-scale gain to bytes per second,
/// keeping a one percent margin under the estimate.
pub(crate) fn rate_bytes_per_sec(bw: u64, gain: u64, mss: u32) -> u64 {
    let mss = if mss != 0 { mss } else { MIN_SEGMENT_SIZE };
    let mut rate = bw.saturating_mul(u64::from(mss));
    rate = rate.saturating_mul(gain) >> GAIN_SCALE;
    rate.saturating_mul(USEC_PER_SEC / 100 * (100 - PACING_MARGIN_PERCENT)) >> BW_SCALE
}

/// Bound the converted rate by the host's pacing cap.
pub(crate) fn bw_to_pacing_rate(bw: u64, gain: u64, mss: u32, max_pacing_rate: u64) -> u64 {
    rate_bytes_per_sec(bw, gain, mss).min(max_pacing_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::fixed_math::{BW_UNIT, GAIN_UNIT};

    #[test]
    fn unity_gain_keeps_margin() {
        // One descaled byte-per-microsecond at unity gain: a second of
        // bytes minus the one percent margin.
        let rate = rate_bytes_per_sec(BW_UNIT, GAIN_UNIT, 1000);
        assert_eq!(rate, 1000 * 990_000);
    }

    #[test]
    fn gain_scales_linearly() {
        let base = rate_bytes_per_sec(BW_UNIT, GAIN_UNIT, 1000);
        let double = rate_bytes_per_sec(BW_UNIT, 2 * GAIN_UNIT, 1000);
        assert_eq!(double, 2 * base);
    }

    #[test]
    fn zero_mss_falls_back_to_nominal() {
        let nominal = rate_bytes_per_sec(BW_UNIT, GAIN_UNIT, MIN_SEGMENT_SIZE);
        assert_eq!(rate_bytes_per_sec(BW_UNIT, GAIN_UNIT, 0), nominal);
    }

    #[test]
    fn host_cap_applies() {
        let uncapped = bw_to_pacing_rate(BW_UNIT, GAIN_UNIT, 1000, u64::MAX);
        assert_eq!(uncapped, 1000 * 990_000);
        assert_eq!(bw_to_pacing_rate(BW_UNIT, GAIN_UNIT, 1000, 12_345), 12_345);
    }
}
