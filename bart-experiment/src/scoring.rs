//! Reward arithmetic. The bank starts one `delta` above zero before the first
//! pump decision and grows by `delta` on every pump that does not pop.

use crate::config::BalloonGeometry;
use bart_core::TrialOutcome;

pub fn initial_bank(delta: f64) -> f64 {
    delta
}

pub fn pump(bank: f64, delta: f64) -> f64 {
    bank + delta
}

/// What the participant takes home from a finished balloon.
pub fn payout(outcome: TrialOutcome, bank: f64) -> f64 {
    match outcome {
        TrialOutcome::CashedOut => bank,
        TrialOutcome::Popped | TrialOutcome::TimedOut => 0.0,
    }
}

pub fn balloon_scale(geometry: &BalloonGeometry, pump_count: u32, max_pumps: u32) -> f32 {
    let step = (geometry.max_scale - geometry.initial_scale) / max_pumps.max(1) as f32;
    geometry.initial_scale + pump_count as f32 * step
}

pub fn balloon_size(geometry: &BalloonGeometry, scale: f32) -> (f32, f32) {
    (geometry.base_size.0 * scale, geometry.base_size.1 * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_grows_one_delta_per_pump() {
        let mut bank = initial_bank(5.0);
        for _ in 0..3 {
            bank = pump(bank, 5.0);
        }
        assert_eq!(bank, 20.0);
        assert_eq!(initial_bank(5.0), 5.0);
    }

    #[test]
    fn only_cash_out_pays() {
        assert_eq!(payout(TrialOutcome::CashedOut, 30.0), 30.0);
        assert_eq!(payout(TrialOutcome::Popped, 30.0), 0.0);
        assert_eq!(payout(TrialOutcome::TimedOut, 30.0), 0.0);
    }

    #[test]
    fn balloon_reaches_max_scale_at_max_pumps() {
        let g = BalloonGeometry {
            initial_scale: 0.2,
            max_scale: 1.8,
            base_size: (4.0, 5.0),
        };
        assert_eq!(balloon_scale(&g, 0, 8), 0.2);
        assert!((balloon_scale(&g, 8, 8) - 1.8).abs() < 1e-6);
        assert!((balloon_scale(&g, 4, 8) - 1.0).abs() < 1e-6);
        let (w, h) = balloon_size(&g, 0.5);
        assert_eq!((w, h), (2.0, 2.5));
    }
}
