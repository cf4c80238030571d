// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stepped AIMD rate controller.
//!
//! After every completed write (and after each retransmit round), the send
//! path reports the fraction of fragments that had to be retransmitted.
//! This drives a piecewise rate adjustment that backs off quickly on
//! congestion and probes upward slowly, asymmetric by design.

/// Rate adjustment, in percent of current rate, applied for a given loss ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateStep {
    /// Additive probe: +10%.
    ProbeUp,
    /// Additive probe: +1%.
    ProbeUpSmall,
    /// Multiplicative trim: -1%.
    TrimDown,
    /// Multiplicative back-off: -5%.
    BackOff,
    /// Multiplicative back-off: -10%.
    BackOffHard,
    /// Multiplicative back-off: -20%.
    BackOffSevere,
}

impl RateStep {
    /// Signed percentage delta this step applies to the current rate.
    #[must_use]
    pub fn delta_percent(self) -> i32 {
        match self {
            Self::ProbeUp => 10,
            Self::ProbeUpSmall => 1,
            Self::TrimDown => -1,
            Self::BackOff => -5,
            Self::BackOffHard => -10,
            Self::BackOffSevere => -20,
        }
    }

    /// Classify an observed loss ratio (errors / n_datagrams, as a percentage
    /// in `[0, 100]`) into the corresponding stepped rate adjustment.
    #[must_use]
    pub fn from_error_pct(error_pct: f64) -> Self {
        if error_pct <= 1.0 {
            Self::ProbeUp
        } else if error_pct <= 2.0 {
            Self::ProbeUpSmall
        } else if error_pct <= 3.0 {
            Self::TrimDown
        } else if error_pct <= 5.0 {
            Self::BackOff
        } else if error_pct <= 20.0 {
            Self::BackOffHard
        } else {
            Self::BackOffSevere
        }
    }
}

/// Metrics accumulated by [`RateController`] across its lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateControllerMetrics {
    pub probes_up: u64,
    pub trims_down: u64,
    pub backoffs: u64,
    pub peak_rate: u32,
    pub floor_rate: u32,
}

/// Stepped AIMD controller over a transport send-rate ceiling, expressed as
/// a percentage of a nominal base rate so it can be applied directly via
/// `Transport::adapt_send_rate(delta_percent)`.
#[derive(Debug, Clone)]
pub struct RateController {
    min_rate_bps: u32,
    max_rate_bps: u32,
    current_rate_bps: u32,
    metrics: RateControllerMetrics,
}

impl RateController {
    #[must_use]
    pub fn new(initial_rate_bps: u32, min_rate_bps: u32, max_rate_bps: u32) -> Self {
        let current = initial_rate_bps.clamp(min_rate_bps, max_rate_bps);
        Self {
            min_rate_bps,
            max_rate_bps,
            current_rate_bps: current,
            metrics: RateControllerMetrics {
                peak_rate: current,
                floor_rate: current,
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn current_rate_bps(&self) -> u32 {
        self.current_rate_bps
    }

    #[must_use]
    pub fn metrics(&self) -> RateControllerMetrics {
        self.metrics
    }

    /// Compute `error_pct` from a retransmit round and apply the
    /// corresponding step. Returns the step applied and the new rate.
    pub fn on_round_result(&mut self, errors: u64, n_datagrams: u64) -> (RateStep, u32) {
        let error_pct = if n_datagrams == 0 {
            0.0
        } else {
            100.0 * errors as f64 / n_datagrams as f64
        };
        let step = RateStep::from_error_pct(error_pct);
        (step, self.apply(step))
    }

    /// Apply a rate step directly (used by tests and by the event loop when
    /// a step has already been computed).
    pub fn apply(&mut self, step: RateStep) -> u32 {
        let delta = step.delta_percent();
        let change = (i64::from(self.current_rate_bps) * i64::from(delta)) / 100;
        let new_rate = (i64::from(self.current_rate_bps) + change)
            .clamp(i64::from(self.min_rate_bps), i64::from(self.max_rate_bps))
            as u32;
        self.current_rate_bps = new_rate;

        match step {
            RateStep::ProbeUp | RateStep::ProbeUpSmall => self.metrics.probes_up += 1,
            RateStep::TrimDown => self.metrics.trims_down += 1,
            RateStep::BackOff | RateStep::BackOffHard | RateStep::BackOffSevere => {
                self.metrics.backoffs += 1;
            }
        }
        self.metrics.peak_rate = self.metrics.peak_rate.max(new_rate);
        self.metrics.floor_rate = self.metrics.floor_rate.min(new_rate);
        new_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_spec_boundaries() {
        assert_eq!(RateStep::from_error_pct(0.0), RateStep::ProbeUp);
        assert_eq!(RateStep::from_error_pct(1.0), RateStep::ProbeUp);
        assert_eq!(RateStep::from_error_pct(1.5), RateStep::ProbeUpSmall);
        assert_eq!(RateStep::from_error_pct(2.0), RateStep::ProbeUpSmall);
        assert_eq!(RateStep::from_error_pct(2.5), RateStep::TrimDown);
        assert_eq!(RateStep::from_error_pct(3.0), RateStep::TrimDown);
        assert_eq!(RateStep::from_error_pct(4.0), RateStep::BackOff);
        assert_eq!(RateStep::from_error_pct(5.0), RateStep::BackOff);
        assert_eq!(RateStep::from_error_pct(10.0), RateStep::BackOffHard);
        assert_eq!(RateStep::from_error_pct(20.0), RateStep::BackOffHard);
        assert_eq!(RateStep::from_error_pct(50.0), RateStep::BackOffSevere);
    }

    #[test]
    fn four_percent_loss_decreases_rate() {
        let mut rc = RateController::new(1_000_000, 10_000, 100_000_000);
        let before = rc.current_rate_bps();
        let (step, after) = rc.on_round_result(40, 1000);
        assert_eq!(step, RateStep::BackOff);
        assert!(after < before);
    }

    #[test]
    fn rate_never_crosses_bounds() {
        let mut rc = RateController::new(10_000, 10_000, 100_000_000);
        for _ in 0..50 {
            rc.apply(RateStep::BackOffSevere);
        }
        assert!(rc.current_rate_bps() >= 10_000);

        let mut rc = RateController::new(100_000_000, 10_000, 100_000_000);
        for _ in 0..50 {
            rc.apply(RateStep::ProbeUp);
        }
        assert!(rc.current_rate_bps() <= 100_000_000);
    }
}
