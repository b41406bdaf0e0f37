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

//! Spline Congestion Control.
//!
//! Spline pairs a BBR-style path model, the maximum recent delivery rate
//! times the minimum recent round-trip time, with loss- and RTT-adaptive
//! heuristics
//! built for lossy, jittery paths. Saturating stability counters vote on
//! whether the path looks fair; an adaptive trust factor derived from those
//! votes gates how far the model is believed, bleeds the loss counter down
//! as conditions improve, and pulls the window back when they do not.
//!
//! The controller cycles through four phases. START bootstraps the window
//! exponentially over a randomised epoch; afterwards each epoch ends in a
//! choice between bandwidth probing and RTT probing depending on the trust
//! factor, with a drain phase overriding both when the path shows neither
//! stability signal under heavy policer loss.

use std::time::Duration;

use log::*;

use crate::transport::{CaEvent, CaState, RateSample, TransportState, INFINITE_SSTHRESH};
use crate::{Config, INITIAL_RTT, MIN_BW, MIN_RTT_US, MIN_SEGMENT_SIZE, MIN_SND_CWND};

use super::bandwidth::{self, BandwidthEstimator, RoundCounter};
use super::fairness::FairnessEstimator;
use super::fixed_math::{mul_div, saturating_u32, BW_SCALE, BW_UNIT, GAIN_SCALE, GAIN_UNIT, USEC_PER_SEC};
use super::loss::{self, LossEstimator, MIN_THRESH_TF, THRESH_TF};
use super::lt_bw::{LongTermBwDetector, LT_LOSS_THRESH};
use super::pacing;
use super::rtt::MinRttEstimator;
use super::{CongestionController, RandomSource, ThreadRandom};

/// Spline configurable parameters.
#[derive(Debug)]
pub struct SplineConfig {
    /// Minimal congestion window in segments.
    min_cwnd: u32,

    /// Max datagram size in bytes, used when the host has no mss estimate.
    max_datagram_size: u32,

    /// Initial smoothed rtt.
    initial_rtt: Option<Duration>,
}

impl SplineConfig {
    pub fn new(min_cwnd: u32, max_datagram_size: u32, initial_rtt: Option<Duration>) -> Self {
        Self {
            min_cwnd,
            max_datagram_size,
            initial_rtt,
        }
    }
}

impl Default for SplineConfig {
    fn default() -> Self {
        Self {
            min_cwnd: MIN_SND_CWND,
            max_datagram_size: MIN_SEGMENT_SIZE,
            initial_rtt: Some(INITIAL_RTT),
        }
    }
}

impl From<&Config> for SplineConfig {
    fn from(conf: &Config) -> Self {
        Self {
            min_cwnd: conf.min_congestion_window,
            max_datagram_size: conf.max_datagram_size,
            initial_rtt: Some(conf.initial_rtt),
        }
    }
}

/// Pacing gains per phase, 2^8 scale.
const PROBE_BW_PACING_GAIN: u32 = 550;
const PROBE_RTT_PACING_GAIN: u32 = 250;
const DRAIN_PACING_GAIN: u32 = 100;
const START_PACING_GAIN: u32 = GAIN_UNIT as u32;

/// Cwnd gain while draining, 2^24 scale.
const DRAIN_CWND_GAIN: u32 = 5_646_946;

/// Clamp bounds for the ack-derived cwnd gain, 2^24 scale.
const CWND_GAIN_FLOOR: u64 = 6_646_946;
const CWND_GAIN_CEIL: u64 = 37_390_997;

/// Floor for the composite gain product.
const COMPOSITE_GAIN_FLOOR: u64 = 646_946;

/// Epoch length handed off by the first epoch fire.
const BOOTSTRAP_EPOCH_LEN: u8 = 20;

/// Spline State Machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum SplineStateMachine {
    Start,
    ProbeBW,
    ProbeRTT,
    Drain,
}

/// Spline Congestion Control Algorithm.
#[derive(Debug)]
pub struct Spline {
    /// Configurable parameters.
    config: SplineConfig,

    /// State.
    state: SplineStateMachine,

    /// Last known path state reported by the host.
    prev_ca_state: CaState,

    /// RTT tracking with the windowed minimum.
    rtt: MinRttEstimator,

    /// Packet-timed round trip counter.
    round: RoundCounter,

    /// Max-filtered delivery-rate sample.
    bw: BandwidthEstimator,

    /// Policed-link detector.
    lt: LongTermBwDetector,

    /// Fairness ratio and stability votes.
    fairness: FairnessEstimator,

    /// Adaptive loss counter.
    loss: LossEstimator,

    /// Delivered bytes at the previous and the current ack.
    last_ack: u32,
    curr_ack: u32,

    /// Congestion window under construction, segments.
    curr_cwnd: u32,

    /// Last-known good window saved before recovery or RTT probing.
    prior_cwnd: u32,

    /// Current pacing gain, 2^8 scale.
    pacing_gain: u32,

    /// Current cwnd gain, 2^24 scale.
    cwnd_gain: u32,

    /// Composite gain product driving the window computation.
    gain: u32,

    /// Position inside the current epoch, in acks, and the epoch length.
    epoch_pos: u8,
    epoch_len: u8,

    /// True from init until the first epoch fires.
    start_phase: bool,

    /// Wall stamp of the current cycle phase start, nanoseconds.
    cycle_mstamp: u64,

    /// Whether any RTT sample has been observed.
    has_seen_rtt: bool,

    /// Host-provided randomness for epoch lengths.
    rng: Box<dyn RandomSource>,
}

impl Spline {
    pub fn new(config: SplineConfig) -> Self {
        Self::with_random(config, Box::new(ThreadRandom))
    }

    /// Build the controller around a host-provided randomness source.
    pub fn with_random(config: SplineConfig, rng: Box<dyn RandomSource>) -> Self {
        let min_cwnd = config.min_cwnd;
        Self {
            config,
            state: SplineStateMachine::Start,
            prev_ca_state: CaState::Open,
            rtt: MinRttEstimator::default(),
            round: RoundCounter::default(),
            bw: BandwidthEstimator::default(),
            lt: LongTermBwDetector::default(),
            fairness: FairnessEstimator::new(),
            loss: LossEstimator::default(),
            last_ack: 0,
            curr_ack: 0,
            curr_cwnd: min_cwnd,
            prior_cwnd: 0,
            pacing_gain: START_PACING_GAIN,
            cwnd_gain: 0,
            gain: 0,
            epoch_pos: 0,
            epoch_len: 0,
            start_phase: true,
            cycle_mstamp: 0,
            has_seen_rtt: false,
            rng,
        }
    }

    fn mss(&self, host: &TransportState) -> u32 {
        if host.mss_cache != 0 {
            host.mss_cache
        } else {
            self.config.max_datagram_size
        }
    }

    /// Adaptive trust factor for the current vote and loss state.
    fn trust(&self) -> u64 {
        loss::trust_factor(
            self.lt.last_lost,
            self.fairness.stable_flag,
            self.fairness.unfair_flag,
        )
    }

    /// Ack-driven bandwidth over the current minimum RTT.
    fn ack_bw(&self) -> u64 {
        bandwidth::ack_bandwidth(self.curr_ack, self.rtt.min_or_floor())
    }

    fn max_bw(&self) -> u64 {
        self.bw.max_bw(self.ack_bw(), self.loss.loss_cnt)
    }

    /// Best bandwidth estimate: the long-term rate when a policer is
    /// suspected, else the max-filtered rate.
    fn lt_or_max_bw(&self) -> u64 {
        if self.lt.use_bw {
            u64::from(self.lt.lt_bw)
        } else {
            self.max_bw()
        }
    }

    /// Bandwidth-delay product scaled by a 2^24 gain, in segments, rounded
    /// up.
    fn bdp(&self, bw: u64, gain24: u64) -> u32 {
        let w = bw.saturating_mul(u64::from(self.rtt.min_or_floor()));
        let prod = (u128::from(w) * u128::from(gain24)) >> BW_SCALE;
        let bdp = (prod + u128::from(BW_UNIT) - 1) / u128::from(BW_UNIT);
        bdp.min(u128::from(u32::MAX)) as u32
    }

    /// Inflight at the earliest departure time: what is still in the
    /// network once the sends the pacer already scheduled have left.
    fn packets_in_net_at_edt(&self, host: &TransportState, inflight_now: u32) -> u32 {
        let now_ns = host.clock_cache;
        let edt_ns = host.wstamp_ns.max(now_ns);
        let interval_us = (edt_ns - now_ns) / 1000;
        let interval_delivered =
            saturating_u32(self.lt_or_max_bw().saturating_mul(interval_us) >> BW_SCALE);
        if interval_delivered >= inflight_now {
            return 0;
        }
        inflight_now - interval_delivered
    }

    fn stamp_us_delta(a_ns: u64, b_ns: u64) -> i64 {
        (a_ns as i64).wrapping_sub(b_ns as i64) / 1000
    }

    /// Decide whether the pacing cycle moved on since the last ack.
    ///
    /// At unity pacing gain a full cycle length is enough. Above unity the
    /// phase also needs losses or a flight that reached the scaled BDP;
    /// below unity it ends as soon as the flight drained to the BDP.
    fn is_next_cycle_phase(&mut self, host: &TransportState, rs: &RateSample) -> bool {
        let is_full_length = Self::stamp_us_delta(host.wstamp_ns, self.cycle_mstamp) > 1;
        self.cycle_mstamp = host.wstamp_ns;
        let bw = self.lt_or_max_bw();
        let inflight = self.packets_in_net_at_edt(host, rs.prior_in_flight);

        if u64::from(self.pacing_gain) == GAIN_UNIT {
            return is_full_length;
        }
        if u64::from(self.pacing_gain) > GAIN_UNIT {
            // The coarse pacing gain moves onto the fine scale for the BDP.
            let gain24 = u64::from(self.pacing_gain) << (BW_SCALE - GAIN_SCALE);
            return is_full_length
                && (rs.losses || u64::from(inflight) >= u64::from(self.bdp(bw, gain24)));
        }
        is_full_length || u64::from(inflight) <= u64::from(self.bdp(bw, u64::from(self.cwnd_gain)))
    }

    /// Shift the delivered-bytes pair along by one ack.
    fn update_acked_sacked(&mut self, host: &TransportState, rs: &RateSample) {
        let mss = self.mss(host);
        self.last_ack = self.curr_ack;
        self.curr_ack = if rs.delivered < 0 {
            0
        } else {
            saturating_u32(rs.delivered as u64 * u64::from(mss))
        };
    }

    /// Recompute the fairness ratio from ack bandwidth and inflight
    /// throughput.
    fn refresh_fairness(&mut self, host: &TransportState) {
        let bw = self.ack_bw();
        let throughput = bandwidth::inflight_throughput(
            bandwidth::bytes_in_flight(host),
            self.rtt.min_or_floor(),
        );
        self.fairness.update_ratio(bw, throughput);
    }

    /// Round accounting, policer sampling and the delivery-rate max filter.
    fn update_bw(&mut self, host: &TransportState, rs: &RateSample) {
        self.round.round_start = false;
        if rs.delivered < 0 || rs.interval_us <= 0 {
            return; // Not a valid observation.
        }

        self.round.update(rs, host.delivered);
        let in_probe_bw = self.state == SplineStateMachine::ProbeBW;
        let mss = self.mss(host);
        let round_start = self.round.round_start;
        self.lt.sample(rs, host, in_probe_bw, round_start, mss);
        let current_max = self.max_bw();
        self.bw.on_sample(rs, current_max);
    }

    /// Stability votes, tolerance-band tracking and loss accounting.
    fn update_stability(&mut self, host: &TransportState) {
        self.fairness
            .unfair_check(&self.rtt, self.curr_ack, self.last_ack);
        self.fairness.high_rtt_round(
            &self.rtt,
            self.curr_ack,
            self.last_ack,
            bandwidth::bytes_in_flight(host),
            self.curr_cwnd,
        );
        self.fairness
            .stable_check(&self.rtt, self.curr_ack, self.last_ack);

        let lost = host.lost.saturating_sub(self.lt.last_lost);
        let delivered = host.delivered.saturating_sub(self.lt.last_delivered);
        let trust = self.trust();
        self.loss.on_sample(lost, delivered, trust);
    }

    /// Fire at most one phase decision per epoch.
    ///
    /// The first fire hands off from the randomised start epoch to the
    /// fixed bootstrap length; every later fire randomises the next length
    /// and picks between bandwidth and RTT probing by trust and votes.
    fn check_probes(&mut self) {
        if self.epoch_pos != self.epoch_len {
            return;
        }
        self.epoch_pos = 0;
        if self.start_phase {
            self.epoch_len = BOOTSTRAP_EPOCH_LEN;
            self.start_phase = false;
        } else {
            self.epoch_len = 1 + (self.rng.next_u32() % 30) as u8;
        }

        self.state = if self.trust() < THRESH_TF
            || self.fairness.unfair_flag > self.fairness.stable_flag
        {
            SplineStateMachine::ProbeRTT
        } else {
            SplineStateMachine::ProbeBW
        };
        self.check_drain_probe();
    }

    /// Drain overrides the epoch decision when the path shows neither
    /// stability signal and the policer interval anchors heavy loss.
    fn check_drain_probe(&mut self) {
        if !self.fairness.rtt_check(&self.rtt)
            && !self.fairness.ack_check(self.curr_ack, self.last_ack)
            && self.lt.last_lost > (LT_LOSS_THRESH + 1) * 6
        {
            self.state = SplineStateMachine::Drain;
        }
    }

    /// Per-phase gains. Long-term pacing pins the pacing gain at unity.
    fn gains_mode(&mut self) {
        let pacing_gain = match self.state {
            SplineStateMachine::ProbeBW => PROBE_BW_PACING_GAIN,
            SplineStateMachine::ProbeRTT => PROBE_RTT_PACING_GAIN,
            SplineStateMachine::Drain => DRAIN_PACING_GAIN,
            SplineStateMachine::Start => START_PACING_GAIN,
        };
        self.pacing_gain = if self.lt.use_bw {
            GAIN_UNIT as u32
        } else {
            pacing_gain
        };

        self.cwnd_gain = if self.state == SplineStateMachine::Drain {
            DRAIN_CWND_GAIN
        } else {
            self.ack_cwnd_gain()
        };
    }

    /// Cwnd gain from how much one minimum-RTT's worth of acked data covers
    /// the estimated pipe, clamped into its working band. 2^24 scale.
    fn ack_cwnd_gain(&self) -> u32 {
        let rtt = u64::from(self.rtt.min_or_floor());
        let mut denom = self.ack_bw().saturating_mul(USEC_PER_SEC) / rtt;
        if denom == 0 {
            denom = MIN_BW;
        }
        let gain = mul_div(u64::from(self.curr_ack), BW_UNIT, denom);
        saturating_u32(gain.clamp(CWND_GAIN_FLOOR, CWND_GAIN_CEIL))
    }

    /// Composite gain product; overflow saturates and the floor keeps the
    /// window arithmetic away from zero.
    fn composite_gain(&self, bw_ack: u64, rtt_avg: u32) -> u32 {
        let gain = u64::from(self.cwnd_gain)
            .saturating_mul(bw_ack)
            .saturating_mul(u64::from(rtt_avg))
            .max(COMPOSITE_GAIN_FLOOR);
        saturating_u32(gain)
    }

    fn cwnd_stable_phase(gain: u32, rtt_avg: u32) -> u32 {
        ((u64::from(gain) / u64::from(rtt_avg.max(1))) >> BW_SCALE) as u32
    }

    fn cwnd_loss_phase(&self, gain: u32, rtt_avg: u32) -> u32 {
        let rtt = ((u64::from(rtt_avg) + u64::from(self.rtt.curr_rtt)) >> 1).max(1);
        let cwnd = u64::from(gain) / rtt;
        saturating_u32(u64::from(self.fairness.fairness_rat).saturating_mul(cwnd) >> BW_SCALE)
    }

    /// Window ceiling candidate scaled from the current window by the
    /// fairness ratio, floored at twice the minimal window.
    fn max_could_cwnd(&self) -> u32 {
        let scaled = saturating_u32(
            u64::from(self.fairness.fairness_rat).saturating_mul(u64::from(self.curr_cwnd))
                >> BW_SCALE,
        );
        scaled.max(MIN_SND_CWND << 1)
    }

    /// Exponential window bootstrap while searching for the initial
    /// operating point.
    fn start_probe(&mut self) {
        let doubled = self.curr_cwnd.saturating_mul(2);
        self.curr_cwnd = self
            .config
            .min_cwnd
            .saturating_add(doubled)
            .max(self.config.min_cwnd);
    }

    /// Window computation for the probing phases.
    fn cwnd_next_gain(&mut self, rs: &RateSample) {
        let bw_ack = self.ack_bw();
        let mut rtt_avg =
            ((u64::from(self.rtt.min_rtt) + u64::from(self.rtt.curr_rtt)) / 2) as u32;
        if rtt_avg == 0 {
            rtt_avg = MIN_RTT_US;
        }

        self.gains_mode();
        self.gain = self.composite_gain(bw_ack, rtt_avg);

        let floor_cwnd = self.max_could_cwnd();
        let use_loss_phase = self.fairness.unfair_flag > 2000
            || !self.fairness.high_rtt_check(&self.rtt)
            || self.loss.loss_cnt > 10;

        self.curr_cwnd = if use_loss_phase {
            self.cwnd_loss_phase(self.gain, rtt_avg)
        } else {
            Self::cwnd_stable_phase(self.gain, rtt_avg)
        };

        self.curr_cwnd = self.loss.backoff_cwnd(self.curr_cwnd);

        let trust = self.trust().max(MIN_THRESH_TF);
        self.curr_cwnd = saturating_u32(u64::from(self.curr_cwnd).saturating_mul(trust) >> BW_SCALE);

        self.curr_cwnd = self.curr_cwnd.max(floor_cwnd >> 3);
        self.curr_cwnd = self.curr_cwnd.saturating_add(rs.acked_sacked);
    }

    /// Phase bookkeeping plus the per-phase window step.
    fn update_probes(&mut self, rs: &RateSample) {
        self.check_probes();
        match self.state {
            SplineStateMachine::Start => {
                self.gains_mode();
                self.start_probe();
            }
            _ => self.cwnd_next_gain(rs),
        }
    }

    /// Fuse the computed window with the BDP target.
    fn next_cwnd(&self, trust: u64, target_cwnd: u32, cwnd: u32) -> u32 {
        let unfair = self.fairness.unfair_flag;
        let stable = self.fairness.stable_flag;

        if trust < THRESH_TF && !self.start_phase && self.loss.loss_cnt > 50 {
            return cwnd;
        }
        if ((unfair > 2000 && stable < 300) || unfair > stable + 500) && self.loss.loss_cnt > 5 {
            return saturating_u32((u64::from(target_cwnd) + u64::from(cwnd)) * 7 / 16);
        }
        target_cwnd.max(cwnd)
    }

    /// Clamp and publish the window for this ack.
    fn send_cwnd(&mut self, host: &mut TransportState, rs: &RateSample, bw: u64) {
        let trust = self.trust();
        let target_cwnd = self.bdp(bw, u64::from(self.cwnd_gain));
        let mut cwnd = self.next_cwnd(trust, target_cwnd, self.curr_cwnd);
        cwnd = cwnd.max(self.config.min_cwnd);
        cwnd = cwnd.saturating_add(rs.acked_sacked);
        debug!(
            "cwnd update: trust={} epoch_len={} loss_cnt={} rounds={} cwnd={} curr_cwnd={} target_cwnd={}",
            trust, self.epoch_len, self.loss.loss_cnt, self.round.rtt_cnt, cwnd,
            self.curr_cwnd, target_cwnd
        );
        host.snd_cwnd = cwnd.min(host.snd_cwnd_clamp);
    }

    /// Install the pacing rate. The rate only moves up, except for the
    /// explicit idle-restart reset in `cwnd_event`.
    fn set_pacing_rate(&mut self, host: &mut TransportState, bw: u64, gain: u32) {
        if !self.has_seen_rtt && host.srtt_us != 0 {
            self.init_pacing_rate_from_rtt(host);
        }
        let rate =
            pacing::bw_to_pacing_rate(bw, u64::from(gain), self.mss(host), host.max_pacing_rate);
        if rate > host.pacing_rate {
            host.pacing_rate = rate;
        }
    }

    /// Seed the pacing rate from the window and the smoothed RTT before any
    /// bandwidth estimate exists.
    fn init_pacing_rate_from_rtt(&mut self, host: &mut TransportState) {
        let rtt_us = if host.srtt_us != 0 {
            self.has_seen_rtt = true;
            (host.srtt_us >> 3).max(1)
        } else {
            self.config
                .initial_rtt
                .map_or(1000, |rtt| rtt.as_micros().min(u128::from(u32::MAX)) as u32)
                .max(1)
        };
        let bw = mul_div(u64::from(host.snd_cwnd), BW_UNIT, u64::from(rtt_us));
        host.pacing_rate = pacing::bw_to_pacing_rate(
            bw,
            u64::from(self.pacing_gain),
            self.mss(host),
            host.max_pacing_rate,
        );
    }

    /// Remember the last-known good window before recovery or RTT probing.
    fn save_cwnd(&mut self, host: &TransportState) {
        self.prior_cwnd = if self.prev_ca_state < CaState::Recovery
            && self.state != SplineStateMachine::ProbeRTT
        {
            host.snd_cwnd
        } else {
            self.prior_cwnd.max(MIN_SND_CWND)
        };
    }
}

impl CongestionController for Spline {
    fn name(&self) -> &str {
        "SPLINE"
    }

    fn init(&mut self, host: &mut TransportState) {
        self.rtt = MinRttEstimator::new(host.jiffies);
        self.round = RoundCounter::default();
        self.bw = BandwidthEstimator::default();
        self.fairness = FairnessEstimator::new();
        self.loss = LossEstimator::default();
        self.last_ack = 0;
        self.curr_ack = 0;
        self.curr_cwnd = self.config.min_cwnd;
        self.prior_cwnd = 0;
        self.state = SplineStateMachine::Start;
        self.prev_ca_state = CaState::Open;
        self.pacing_gain = START_PACING_GAIN;
        self.cwnd_gain = 0;
        self.gain = 0;
        self.epoch_pos = 0;
        self.epoch_len = 10 + (self.rng.next_u32() % 30) as u8;
        self.start_phase = true;
        self.cycle_mstamp = 0;
        self.has_seen_rtt = false;
        self.init_pacing_rate_from_rtt(host);
        self.lt.reset(host);
    }

    fn on_ack(&mut self, host: &mut TransportState, sample: &RateSample) {
        self.curr_cwnd = host.snd_cwnd;
        self.rtt.update(host.srtt_us, sample, host.jiffies);
        self.epoch_pos = (self.epoch_pos + 1) & 0x7f;
        self.update_acked_sacked(host, sample);

        if self.is_next_cycle_phase(host, sample) || self.start_phase {
            self.refresh_fairness(host);
        }
        self.update_bw(host, sample);
        self.update_stability(host);
        self.update_probes(sample);

        let bw = self.lt_or_max_bw();
        self.set_pacing_rate(host, bw, self.pacing_gain);
        host.snd_ssthresh = INFINITE_SSTHRESH;
        self.send_cwnd(host, sample, bw);
    }

    fn ssthresh(&mut self, host: &TransportState) -> u32 {
        self.save_cwnd(host);
        host.snd_ssthresh
    }

    fn sndbuf_expand(&self) -> u32 {
        3
    }

    fn cwnd_event(&mut self, host: &mut TransportState, event: CaEvent) {
        if event == CaEvent::TxStart
            && host.app_limited
            && self.state == SplineStateMachine::ProbeBW
        {
            // Restarting from idle: re-pace from the model at unity gain.
            // This install may lower the rate.
            host.pacing_rate = pacing::bw_to_pacing_rate(
                self.lt_or_max_bw(),
                GAIN_UNIT,
                self.mss(host),
                host.max_pacing_rate,
            );
        }
    }

    fn undo_cwnd(&mut self, host: &TransportState) -> u32 {
        self.lt.reset(host);
        host.snd_cwnd
    }

    fn set_state(&mut self, host: &mut TransportState, new_state: CaState) {
        if new_state == CaState::Loss {
            let rs = RateSample {
                losses: true,
                ..Default::default()
            };
            self.prev_ca_state = CaState::Loss;
            self.round.round_start = true;
            let in_probe_bw = self.state == SplineStateMachine::ProbeBW;
            let mss = self.mss(host);
            self.lt.sample(&rs, host, in_probe_bw, true, mss);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Ticks;

    /// Deterministic randomness for epoch lengths.
    #[derive(Debug)]
    struct FixedRandom(u32);

    impl RandomSource for FixedRandom {
        fn next_u32(&mut self) -> u32 {
            self.0
        }
    }

    fn new_spline(seed: u32) -> Spline {
        Spline::with_random(SplineConfig::default(), Box::new(FixedRandom(seed)))
    }

    /// A clean sample on a stable 50 ms path. The raw RTT sits 2 ms under
    /// the smoothed RTT so the minimum-RTT stability predicate holds and
    /// the counters stay balanced.
    fn stable_sample(delivered: i32) -> RateSample {
        RateSample {
            delivered,
            interval_us: 10_000,
            rtt_us: 48_000,
            acked_sacked: 10,
            ..Default::default()
        }
    }

    fn stable_host() -> TransportState {
        TransportState {
            srtt_us: 50_000 << 3,
            snd_cwnd_clamp: 10_000,
            ..Default::default()
        }
    }

    #[test]
    fn init_state() {
        let mut s = new_spline(7);
        let mut host = TransportState::default();
        s.init(&mut host);

        assert_eq!(s.state, SplineStateMachine::Start);
        assert!(s.start_phase);
        assert_eq!(s.curr_cwnd, MIN_SND_CWND);
        assert_eq!(s.epoch_len, 10 + 7);
        assert_eq!(s.pacing_gain, GAIN_UNIT as u32);
        assert_eq!(s.fairness.rtt_epoch, 4000);
        assert_eq!(s.loss.loss_cnt, 0);
        assert!(!s.lt.use_bw);
        // Pacing is seeded from the configured initial RTT.
        assert!(host.pacing_rate > 0);
    }

    #[test]
    fn startup_ramp_reaches_probe_bw() {
        let mut s = new_spline(0);
        let mut host = stable_host();
        s.init(&mut host);
        assert_eq!(s.epoch_len, 10);

        for i in 0..30u32 {
            host.delivered += 10 + i;
            host.wstamp_ns += 10_000_000;
            let rs = stable_sample(10 + i as i32);
            s.on_ack(&mut host, &rs);

            if i < 9 {
                assert_eq!(s.state, SplineStateMachine::Start, "ack {}", i);
            }
            assert!(host.snd_cwnd >= MIN_SND_CWND);
            assert!(host.snd_cwnd <= host.snd_cwnd_clamp);
        }

        // The first fire hands off to the bootstrap epoch and leaves START;
        // balanced votes and a healthy trust factor pick bandwidth probing.
        assert_eq!(s.state, SplineStateMachine::ProbeBW);
        assert!(!s.start_phase);
        assert_eq!(s.fairness.unfair_flag, 0);

        // The second fire randomised the epoch length into its band.
        assert!(s.epoch_len >= 1 && s.epoch_len <= 31);
        assert!(host.snd_cwnd >= MIN_SND_CWND + 200);
        assert!(host.pacing_rate > 0);
    }

    #[test]
    fn epoch_length_bounds_after_bootstrap() {
        let mut s = new_spline(29);
        let mut host = stable_host();
        s.init(&mut host);
        assert_eq!(s.epoch_len, 39);

        // Ride through the start epoch.
        let mut acks = 0;
        while s.start_phase {
            host.delivered += 10;
            s.on_ack(&mut host, &stable_sample(10));
            acks += 1;
            assert!(acks <= 39);
        }
        assert_eq!(s.epoch_len, 20);

        for _ in 0..20 {
            host.delivered += 10;
            s.on_ack(&mut host, &stable_sample(10));
        }
        assert!(s.epoch_len >= 1 && s.epoch_len <= 31);
        assert_eq!(s.epoch_len, 30);
    }

    #[test]
    fn policed_link_engages_long_term_bw() {
        let mut s = new_spline(0);
        let mut host = TransportState {
            srtt_us: 60_000 << 3,
            snd_cwnd_clamp: 10_000,
            max_pacing_rate: 10_000_000,
            ..Default::default()
        };
        s.init(&mut host);

        for i in 0..20u32 {
            let losses = i % 2 == 0;
            host.delivered += 100;
            if losses {
                host.lost += 50;
            }
            host.delivered_mstamp += 100_000;
            host.wstamp_ns += 100_000_000;
            let rs = RateSample {
                delivered: 100,
                interval_us: 100_000,
                rtt_us: 60_000,
                acked_sacked: 10,
                prior_delivered: u32::MAX,
                losses,
                ..Default::default()
            };
            s.on_ack(&mut host, &rs);
        }

        assert!(s.lt.use_bw);
        assert!(s.lt.lt_bw > 0);
        // Long-term pacing pins the gain at unity and honours the cap.
        assert_eq!(s.pacing_gain, GAIN_UNIT as u32);
        assert!(host.pacing_rate <= host.max_pacing_rate);
    }

    #[test]
    fn undo_cwnd_disables_long_term_bw() {
        let mut s = new_spline(0);
        let mut host = TransportState::default();
        s.init(&mut host);

        s.lt.use_bw = true;
        s.lt.lt_bw = 12345;
        host.snd_cwnd = 77;

        assert_eq!(s.undo_cwnd(&host), 77);
        assert!(!s.lt.use_bw);
        assert_eq!(s.lt.lt_bw, 0);
    }

    #[test]
    fn drain_overrides_epoch_decision() {
        let mut s = new_spline(5);
        let mut host = TransportState::default();
        s.init(&mut host);

        // Heavy policer-interval loss with no stability signal.
        s.lt.last_lost = 400;
        s.epoch_pos = s.epoch_len;
        s.check_probes();
        assert_eq!(s.state, SplineStateMachine::Drain);

        s.gains_mode();
        assert_eq!(s.pacing_gain, DRAIN_PACING_GAIN);
        assert_eq!(s.cwnd_gain, DRAIN_CWND_GAIN);
    }

    #[test]
    fn zero_sample_is_a_fixed_point() {
        let mut s = new_spline(0);
        let mut host = stable_host();
        s.init(&mut host);

        // One priming ack pins the minimum RTT 2 ms under the smoothed RTT
        // so the RTT stability predicate keeps holding.
        host.delivered += 10;
        s.on_ack(&mut host, &stable_sample(10));

        // Steady state outside the start phase, epoch far away.
        s.start_phase = false;
        s.state = SplineStateMachine::ProbeRTT;
        s.epoch_len = 31;
        s.epoch_pos = 0;

        let zero = RateSample::default();
        s.on_ack(&mut host, &zero);
        let cwnd = host.snd_cwnd;
        let rate = host.pacing_rate;

        s.on_ack(&mut host, &zero);
        assert_eq!(host.snd_cwnd, cwnd);
        assert_eq!(host.pacing_rate, rate);
    }

    #[test]
    fn ssthresh_saves_prior_cwnd() {
        let mut s = new_spline(0);
        let mut host = TransportState {
            snd_cwnd: 123,
            snd_ssthresh: 77,
            ..Default::default()
        };
        s.init(&mut host);
        host.snd_cwnd = 123;
        host.snd_ssthresh = 77;

        assert_eq!(s.ssthresh(&host), 77);
        assert_eq!(s.prior_cwnd, 123);

        // While probing for RTT the saved value only holds its ground.
        s.state = SplineStateMachine::ProbeRTT;
        host.snd_cwnd = 55;
        assert_eq!(s.ssthresh(&host), 77);
        assert_eq!(s.prior_cwnd, 123);
    }

    #[test]
    fn loss_state_seeds_policer_sampling() {
        let mut s = new_spline(0);
        let mut host = TransportState::default();
        s.init(&mut host);

        s.set_state(&mut host, CaState::Loss);
        assert_eq!(s.prev_ca_state, CaState::Loss);
        assert!(s.round.round_start);
        assert!(s.lt.is_sampling);
    }

    #[test]
    fn tx_start_resets_pacing_in_probe_bw() {
        let mut s = new_spline(0);
        let mut host = TransportState::default();
        s.init(&mut host);

        s.state = SplineStateMachine::ProbeBW;
        host.app_limited = true;
        host.pacing_rate = u64::MAX / 2;

        s.cwnd_event(&mut host, CaEvent::TxStart);
        let expected = pacing::bw_to_pacing_rate(
            s.lt_or_max_bw(),
            GAIN_UNIT,
            MIN_SEGMENT_SIZE,
            host.max_pacing_rate,
        );
        assert_eq!(host.pacing_rate, expected);
        assert!(host.pacing_rate < u64::MAX / 2);

        // Outside the probing phase the event is ignored.
        host.pacing_rate = u64::MAX / 2;
        s.state = SplineStateMachine::ProbeRTT;
        s.cwnd_event(&mut host, CaEvent::TxStart);
        assert_eq!(host.pacing_rate, u64::MAX / 2);
    }

    #[test]
    fn invariants_hold_under_arbitrary_inputs() {
        let mut s = new_spline(11);
        let mut host = TransportState {
            snd_cwnd_clamp: 5_000,
            ..Default::default()
        };
        s.init(&mut host);

        // Deterministic pseudo-random input stream.
        let mut x: u64 = 0x853c_49e6_748f_ea9b;
        let mut next = move || {
            x = x
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            x
        };

        for i in 0..2000u32 {
            let r = next();
            host.srtt_us = (r % 3_000_000) as u32;
            host.delivered = host.delivered.wrapping_add((r % 128) as u32);
            host.lost = host.lost.wrapping_add((r % 7) as u32);
            host.delivered_mstamp += r % 200_000;
            host.wstamp_ns += r % 50_000_000;
            host.clock_cache = host.wstamp_ns.saturating_sub(r % 1_000_000);
            host.packets_in_flight = (r % 4096) as u32;
            host.jiffies = Ticks(i / 4);

            let rs = RateSample {
                delivered: ((r >> 8) % 300) as i32 - 5,
                interval_us: ((r >> 16) % 200_000) as i64 - 10,
                rtt_us: ((r >> 24) % 300_000) as i64 - 10,
                acked_sacked: ((r >> 32) % 64) as u32,
                prior_in_flight: ((r >> 16) % 6_000_000) as u32,
                prior_delivered: (r >> 40) as u32 % 2_000_000,
                losses: r & 1 == 1,
                is_app_limited: r & 2 == 2,
                is_ack_delayed: r & 4 == 4,
            };
            s.on_ack(&mut host, &rs);

            assert!(host.snd_cwnd >= MIN_SND_CWND);
            assert!(host.snd_cwnd <= host.snd_cwnd_clamp);
            assert!(s.fairness.fairness_rat >= 16_646_946);
            assert!(s.fairness.fairness_rat <= 21_989_530);
            assert!(s.rtt.min_rtt > 0);
            assert!(s.rtt.min_rtt <= s.rtt.curr_rtt.max(MIN_RTT_US));
            assert!(s.fairness.stable_flag <= 1 << 16);
            assert!(s.fairness.unfair_flag <= 1 << 16);
            if s.lt.use_bw {
                assert_eq!(s.pacing_gain, GAIN_UNIT as u32);
            }
            if !s.start_phase {
                assert!(s.epoch_len >= 1);
            }
        }
    }
}
