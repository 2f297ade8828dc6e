pub mod key;
pub mod phase;
pub mod record;
pub mod stimulus;
pub mod trial;

pub use key::Key;
pub use phase::PhaseLabel;
pub use record::{BlockRecord, SessionRecord, SessionStatus, SessionSummary};
pub use stimulus::{FeedbackKind, PhaseDescriptor};
pub use trial::{PhaseAnnotation, PhaseEvent, TrialOutcome, TrialRecord, TrialState};
