use serde::{Deserialize, Serialize};

/// Which feedback screen closes a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Win,
    Lose,
}

/// Everything the presentation layer needs to draw one phase.
///
/// The engine never renders; it hands one of these to the response source and
/// the source decides how to show it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum PhaseDescriptor {
    Instructions,
    Countdown {
        seconds: u32,
    },
    Fixation,
    Balloon {
        condition: String,
        scale: f32,
        /// `scale` applied to the configured base size.
        size: (f32, f32),
        bank: f64,
    },
    Pop {
        condition: String,
    },
    Cash {
        condition: String,
    },
    Timeout {
        condition: String,
    },
    Feedback {
        kind: FeedbackKind,
        score: f64,
    },
    BlockBreak {
        block_num: usize,
        total_blocks: usize,
        block_score: f64,
        cumulative_score: f64,
    },
    Goodbye {
        total_score: f64,
    },
}

impl PhaseDescriptor {
    /// Screens that stay up until the participant presses a continue key.
    pub fn waits_for_continue(&self) -> bool {
        matches!(
            self,
            Self::Instructions | Self::BlockBreak { .. } | Self::Goodbye { .. }
        )
    }

    pub fn is_balloon(&self) -> bool {
        matches!(self, Self::Balloon { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_screens() {
        assert!(PhaseDescriptor::Instructions.waits_for_continue());
        assert!(PhaseDescriptor::Goodbye { total_score: 3.0 }.waits_for_continue());
        assert!(!PhaseDescriptor::Fixation.waits_for_continue());
        assert!(!PhaseDescriptor::Countdown { seconds: 3 }.waits_for_continue());
    }

    #[test]
    fn serializes_with_screen_tag() {
        let json = serde_json::to_value(PhaseDescriptor::Pop {
            condition: "blue".into(),
        })
        .unwrap();
        assert_eq!(json["screen"], "pop");
        assert_eq!(json["condition"], "blue");
    }

    #[test]
    fn feedback_kind_sits_beside_the_screen_tag() {
        let feedback = PhaseDescriptor::Feedback {
            kind: FeedbackKind::Win,
            score: 20.0,
        };
        let json = serde_json::to_value(&feedback).unwrap();
        assert_eq!(json["screen"], "feedback");
        assert_eq!(json["kind"], "win");
        let back: PhaseDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, feedback);
    }
}
