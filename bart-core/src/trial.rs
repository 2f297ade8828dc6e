use crate::key::Key;
use crate::phase::PhaseLabel;
use serde::{Deserialize, Serialize};

/// Trial state machine. `Feedback` is the last state; nothing follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialState {
    Fixation,
    Deciding { pump_count: u32, bank: f64 },
    Outcome(TrialOutcome),
    Feedback(TrialOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Popped,
    CashedOut,
    TimedOut,
}

impl TrialOutcome {
    /// Label of the outcome screen shown right after the decision loop.
    pub fn label(&self) -> PhaseLabel {
        match self {
            Self::Popped => PhaseLabel::Pop,
            Self::CashedOut => PhaseLabel::Cash,
            Self::TimedOut => PhaseLabel::Timeout,
        }
    }
}

/// Optional observability tags attached to a phase event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAnnotation {
    pub trial_id: u32,
    pub block_index: usize,
    pub condition: String,
    pub pump_count: u32,
}

/// What happened during one phase of a trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub label: PhaseLabel,
    pub onset_ns: u64,
    pub offset_ns: u64,
    /// Configured maximum duration; `None` when the phase was unbounded.
    pub duration_ms: Option<u64>,
    pub response: Option<Key>,
    /// Relative to `onset_ns`.
    pub reaction_time_ns: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<PhaseAnnotation>,
}

/// Sealed result of one balloon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: u32,
    pub block_index: usize,
    pub condition: String,
    pub explosion_point: u32,
    pub pump_count: u32,
    pub outcome: TrialOutcome,
    pub score: f64,
    pub events: Vec<PhaseEvent>,
}

impl TrialRecord {
    pub fn event(&self, label: PhaseLabel) -> Option<&PhaseEvent> {
        self.events.iter().find(|e| e.label == label)
    }

    /// Reaction time of the response that ended the decision loop, if any.
    pub fn decision_rt_ns(&self) -> Option<u64> {
        self.events
            .iter()
            .rev()
            .find(|e| e.label.is_decision())
            .and_then(|e| e.reaction_time_ns)
    }

    /// Checks the outcome/pump-count/score relations every sealed trial must satisfy.
    pub fn is_consistent(&self) -> bool {
        let pop_matches =
            (self.outcome == TrialOutcome::Popped) == (self.pump_count == self.explosion_point);
        let cash_below = self.outcome != TrialOutcome::CashedOut
            || self.pump_count < self.explosion_point;
        let zero_on_loss = self.outcome == TrialOutcome::CashedOut || self.score == 0.0;
        pop_matches && cash_below && zero_on_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: TrialOutcome, pump_count: u32, score: f64) -> TrialRecord {
        TrialRecord {
            trial_id: 0,
            block_index: 0,
            condition: "blue".into(),
            explosion_point: 4,
            pump_count,
            outcome,
            score,
            events: vec![
                PhaseEvent {
                    label: PhaseLabel::Pump(0),
                    onset_ns: 0,
                    offset_ns: 300,
                    duration_ms: None,
                    response: Some(Key::from("space")),
                    reaction_time_ns: Some(300),
                    annotation: None,
                },
                PhaseEvent {
                    label: PhaseLabel::Pump(1),
                    onset_ns: 400,
                    offset_ns: 900,
                    duration_ms: None,
                    response: Some(Key::from("enter")),
                    reaction_time_ns: Some(500),
                    annotation: None,
                },
            ],
        }
    }

    #[test]
    fn consistency_rules() {
        assert!(record(TrialOutcome::Popped, 4, 0.0).is_consistent());
        assert!(!record(TrialOutcome::Popped, 3, 0.0).is_consistent());
        assert!(record(TrialOutcome::CashedOut, 3, 20.0).is_consistent());
        assert!(!record(TrialOutcome::CashedOut, 4, 25.0).is_consistent());
        assert!(!record(TrialOutcome::TimedOut, 1, 10.0).is_consistent());
        assert!(!record(TrialOutcome::TimedOut, 4, 0.0).is_consistent());
    }

    #[test]
    fn decision_rt_comes_from_last_balloon() {
        let r = record(TrialOutcome::CashedOut, 1, 10.0);
        assert_eq!(r.decision_rt_ns(), Some(500));
        assert_eq!(r.event(PhaseLabel::Pump(0)).map(|e| e.offset_ns), Some(300));
        assert!(r.event(PhaseLabel::Feedback).is_none());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(TrialOutcome::Popped.label(), PhaseLabel::Pop);
        assert_eq!(TrialOutcome::CashedOut.label(), PhaseLabel::Cash);
        assert_eq!(TrialOutcome::TimedOut.label(), PhaseLabel::Timeout);
    }
}
