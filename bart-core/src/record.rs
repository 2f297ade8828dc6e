use crate::trial::{TrialOutcome, TrialRecord};
use serde::{Deserialize, Serialize};

/// Trials of one block, in presentation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_index: usize,
    pub block_id: String,
    /// Seed of the block RNG that ordered conditions and drew explosion points.
    pub seed: u64,
    pub trials: Vec<TrialRecord>,
    pub block_score: f64,
    /// False when the block was cut short by a device failure or an abort.
    pub complete: bool,
}

impl BlockRecord {
    pub fn new(block_index: usize, seed: u64) -> Self {
        Self {
            block_index,
            block_id: format!("block_{block_index}"),
            seed,
            trials: Vec::new(),
            block_score: 0.0,
            complete: false,
        }
    }

    pub fn push(&mut self, trial: TrialRecord) {
        self.block_score += trial.score;
        self.trials.push(trial);
    }

    pub fn seal(mut self) -> Self {
        self.complete = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted,
    DeviceFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub subject_id: Option<String>,
    pub seed: u64,
    pub blocks: Vec<BlockRecord>,
    pub cumulative_score: f64,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn new(subject_id: Option<String>, seed: u64) -> Self {
        Self {
            subject_id,
            seed,
            blocks: Vec::new(),
            cumulative_score: 0.0,
            status: SessionStatus::Running,
        }
    }

    /// Folds a block in and returns the running total.
    pub fn push_block(&mut self, block: BlockRecord) -> f64 {
        self.cumulative_score += block.block_score;
        self.blocks.push(block);
        self.cumulative_score
    }

    pub fn seal(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn is_sealed(&self) -> bool {
        self.status != SessionStatus::Running
    }

    pub fn trials(&self) -> impl Iterator<Item = &TrialRecord> {
        self.blocks.iter().flat_map(|b| b.trials.iter())
    }

    pub fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary::default();
        let mut cashed_pumps = 0u64;
        for trial in self.trials() {
            summary.trials += 1;
            match trial.outcome {
                TrialOutcome::Popped => summary.popped += 1,
                TrialOutcome::CashedOut => {
                    summary.cashed_out += 1;
                    cashed_pumps += u64::from(trial.pump_count);
                }
                TrialOutcome::TimedOut => summary.timed_out += 1,
            }
        }
        // Adjusted BART score: mean pumps over balloons that did not pop.
        summary.adjusted_mean_pumps = (summary.cashed_out > 0)
            .then(|| cashed_pumps as f64 / summary.cashed_out as f64);
        summary.total_score = self.cumulative_score;
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub trials: usize,
    pub popped: usize,
    pub cashed_out: usize,
    pub timed_out: usize,
    pub adjusted_mean_pumps: Option<f64>,
    pub total_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(outcome: TrialOutcome, pump_count: u32, score: f64) -> TrialRecord {
        TrialRecord {
            trial_id: 0,
            block_index: 0,
            condition: "blue".into(),
            explosion_point: 6,
            pump_count,
            outcome,
            score,
            events: Vec::new(),
        }
    }

    #[test]
    fn block_score_tracks_pushed_trials() {
        let mut block = BlockRecord::new(2, 99);
        assert_eq!(block.block_id, "block_2");
        block.push(trial(TrialOutcome::CashedOut, 3, 20.0));
        block.push(trial(TrialOutcome::Popped, 6, 0.0));
        block.push(trial(TrialOutcome::CashedOut, 1, 10.0));
        assert_eq!(block.block_score, 30.0);
        assert!(!block.complete);
        assert!(block.seal().complete);
    }

    #[test]
    fn session_accumulates_and_summarizes() {
        let mut session = SessionRecord::new(Some("s01".into()), 7);
        let mut first = BlockRecord::new(0, 1);
        first.push(trial(TrialOutcome::CashedOut, 2, 15.0));
        first.push(trial(TrialOutcome::TimedOut, 0, 0.0));
        let mut second = BlockRecord::new(1, 2);
        second.push(trial(TrialOutcome::CashedOut, 4, 25.0));
        second.push(trial(TrialOutcome::Popped, 6, 0.0));

        assert_eq!(session.push_block(first.seal()), 15.0);
        assert_eq!(session.push_block(second.seal()), 40.0);
        assert!(!session.is_sealed());
        session.seal(SessionStatus::Completed);
        assert!(session.is_sealed());

        let summary = session.summary();
        assert_eq!(summary.trials, 4);
        assert_eq!(summary.popped, 1);
        assert_eq!(summary.cashed_out, 2);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.adjusted_mean_pumps, Some(3.0));
        assert_eq!(summary.total_score, 40.0);
    }

    #[test]
    fn summary_of_empty_session() {
        let summary = SessionRecord::new(None, 0).summary();
        assert_eq!(summary.trials, 0);
        assert_eq!(summary.adjusted_mean_pumps, None);
    }
}
