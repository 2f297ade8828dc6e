use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a phase inside one trial. Each label owns exactly one `PhaseEvent`
/// in the trial record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PhaseLabel {
    Fixation,
    /// Balloon shown after `n` successful pumps.
    Pump(u32),
    Pop,
    Cash,
    Timeout,
    Feedback,
}

impl PhaseLabel {
    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Pump(_))
    }
}

impl fmt::Display for PhaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixation => f.write_str("fixation"),
            Self::Pump(n) => write!(f, "pump_{n}"),
            Self::Pop => f.write_str("pop"),
            Self::Cash => f.write_str("cash"),
            Self::Timeout => f.write_str("timeout"),
            Self::Feedback => f.write_str("feedback"),
        }
    }
}

impl From<PhaseLabel> for String {
    fn from(label: PhaseLabel) -> Self {
        label.to_string()
    }
}

impl TryFrom<String> for PhaseLabel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(match s.as_str() {
            "fixation" => Self::Fixation,
            "pop" => Self::Pop,
            "cash" => Self::Cash,
            "timeout" => Self::Timeout,
            "feedback" => Self::Feedback,
            other => {
                let n = other
                    .strip_prefix("pump_")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| format!("unknown phase label `{other}`"))?;
                Self::Pump(n)
            }
        })
    }
}
