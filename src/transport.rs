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

//! Contract between the host transport and the congestion control core.
//!
//! The core never touches sockets or buffers. The host owns one
//! [`TransportState`] block per connection, fills in a [`RateSample`] for
//! every ack it processes, and reads the updated `snd_cwnd`, `pacing_rate`
//! and `snd_ssthresh` back after each callback.

use crate::{MIN_SEGMENT_SIZE, MIN_SND_CWND};

/// Slow-start threshold value that disables threshold-based behaviour.
pub const INFINITE_SSTHRESH: u32 = 0x7fff_ffff;

/// Coarse monotonic tick clock of the host, kept distinct from the
/// microsecond and nanosecond wall stamps. Comparisons wrap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ticks(pub u32);

impl Ticks {
    /// Tick frequency of the host clock.
    pub const PER_SEC: u32 = 1000;

    /// Wrapping "is strictly after" comparison.
    pub fn is_after(self, other: Ticks) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// The tick `delta` ticks after this one.
    pub fn offset(self, delta: u32) -> Ticks {
        Ticks(self.0.wrapping_add(delta))
    }
}

/// Sender path state mirrored from the host's loss recovery machinery,
/// ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaState {
    /// Nothing bad has been observed on the path.
    #[default]
    Open,

    /// Reordering or duplicate acks were seen recently.
    Disorder,

    /// The sender is reducing the window after a congestion notification.
    Cwr,

    /// Fast retransmit or SACK based loss recovery is in progress.
    Recovery,

    /// A retransmission timeout fired; everything in flight is suspect.
    Loss,
}

/// Transport-level events forwarded to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaEvent {
    /// First transmission when there was nothing in flight.
    TxStart,

    /// The congestion window is being restarted after idle.
    CwndRestart,

    /// The congestion window reduction completed.
    CompleteCwr,

    /// The host entered loss recovery.
    Loss,
}

/// Per-ack feedback record produced by the host's rate sampler.
#[derive(Clone, Copy, Debug, Default)]
pub struct RateSample {
    /// Packets newly delivered since the last sample; negative is invalid.
    pub delivered: i32,

    /// Length of the sampling interval in microseconds; must be positive
    /// for the sample to carry a usable rate.
    pub interval_us: i64,

    /// RTT sample in microseconds, 0 if none was taken.
    pub rtt_us: i64,

    /// Newly acked plus SACKed segments.
    pub acked_sacked: u32,

    /// Bytes that were in flight before this ack was processed.
    pub prior_in_flight: u32,

    /// The connection delivered count when the acked packet was sent, used
    /// to recognise packet-timed round trips.
    pub prior_delivered: u32,

    /// Whether losses were detected within the sample interval.
    pub losses: bool,

    /// Whether the sender was application limited during the interval.
    pub is_app_limited: bool,

    /// Whether the ack was delayed by the receiver.
    pub is_ack_delayed: bool,
}

/// Host-owned per-connection transport state.
///
/// The controller reads most of this block on every callback and writes
/// exactly three fields: `snd_cwnd`, `pacing_rate` and `snd_ssthresh`.
#[derive(Clone, Debug)]
pub struct TransportState {
    /// Smoothed RTT in the host's encoding: microseconds left-shifted by
    /// three; 0 when no sample has been taken yet.
    pub srtt_us: u32,

    /// Congestion window in segments.
    pub snd_cwnd: u32,

    /// Upper bound the host imposes on `snd_cwnd`.
    pub snd_cwnd_clamp: u32,

    /// Slow-start threshold in segments.
    pub snd_ssthresh: u32,

    /// Current maximum segment size; 0 falls back to the nominal segment
    /// size.
    pub mss_cache: u32,

    /// Packets currently in flight.
    pub packets_in_flight: u32,

    /// Total packets delivered over the connection lifetime.
    pub delivered: u32,

    /// Total packets marked lost over the connection lifetime.
    pub lost: u32,

    /// Wall stamp of the most recent delivery, microseconds.
    pub delivered_mstamp: u64,

    /// Earliest-departure stamp of the next transmit, nanoseconds.
    pub wstamp_ns: u64,

    /// Cached wall clock, nanoseconds.
    pub clock_cache: u64,

    /// Whether the sender is currently application limited.
    pub app_limited: bool,

    /// Host cap on the pacing rate, bytes per second.
    pub max_pacing_rate: u64,

    /// Pacing rate in bytes per second, written by the controller.
    pub pacing_rate: u64,

    /// Coarse tick clock.
    pub jiffies: Ticks,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            srtt_us: 0,
            snd_cwnd: MIN_SND_CWND,
            snd_cwnd_clamp: u32::MAX,
            snd_ssthresh: INFINITE_SSTHRESH,
            mss_cache: MIN_SEGMENT_SIZE,
            packets_in_flight: 0,
            delivered: 0,
            lost: 0,
            delivered_mstamp: 0,
            wstamp_ns: 0,
            clock_cache: 0,
            app_limited: false,
            max_pacing_rate: u64::MAX,
            pacing_rate: 0,
            jiffies: Ticks(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_ordering() {
        assert!(Ticks(2).is_after(Ticks(1)));
        assert!(!Ticks(1).is_after(Ticks(1)));
        assert!(!Ticks(1).is_after(Ticks(2)));

        // Wrapping comparison near the top of the range.
        let near_max = Ticks(u32::MAX - 1);
        assert!(near_max.offset(10).is_after(near_max));
        assert!(!near_max.is_after(near_max.offset(10)));
    }

    #[test]
    fn ca_state_severity() {
        assert!(CaState::Open < CaState::Recovery);
        assert!(CaState::Disorder < CaState::Recovery);
        assert!(CaState::Recovery < CaState::Loss);
        assert_eq!(CaState::default(), CaState::Open);
    }

    #[test]
    fn transport_state_defaults() {
        let host = TransportState::default();
        assert_eq!(host.snd_cwnd, MIN_SND_CWND);
        assert_eq!(host.mss_cache, MIN_SEGMENT_SIZE);
        assert_eq!(host.snd_ssthresh, INFINITE_SSTHRESH);
        assert_eq!(host.pacing_rate, 0);
    }
}
