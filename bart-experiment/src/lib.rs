pub mod block;
pub mod config;
pub mod error;
pub mod io;
pub mod scoring;
pub mod session;
pub mod sim;
pub mod trial;

pub use block::{BlockEngine, BlockPlan};
pub use config::{ConditionTable, Protocol, TaskSettings};
pub use error::{BlockInterrupted, DeviceError, Interruption, SettingsError, TriggerError};
pub use io::{AbortHandle, Response, ResponseSource, TriggerSink};
pub use session::SessionEngine;
pub use trial::{TrialContext, TrialEngine};
