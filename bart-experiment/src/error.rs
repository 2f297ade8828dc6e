use bart_core::{BlockRecord, Key, SessionStatus};
use std::path::PathBuf;
use thiserror::Error;

/// The response device cannot be queried. Fatal for the running session.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("response device unavailable: {message}")]
pub struct DeviceError {
    pub message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A marker could not be delivered. Logged and dropped, never propagated.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("trigger {code} not delivered: {reason}")]
pub struct TriggerError {
    pub code: u8,
    pub reason: String,
}

/// Settings failed to load or do not describe a runnable task.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings are not valid JSON")]
    Parse(#[from] serde_json::Error),
    #[error("no conditions configured")]
    NoConditions,
    #[error("condition `{0}` has no parameters")]
    UnknownCondition(String),
    #[error("condition `{condition}` must allow at least one pump")]
    ZeroMaxPumps { condition: String },
    #[error("condition `{condition}` has non-positive delta {delta}")]
    InvalidDelta { condition: String, delta: f64 },
    #[error("total_blocks must be at least 1")]
    ZeroBlocks,
    #[error("trials_per_block must be at least 1")]
    ZeroTrials,
    #[error("key `{0}` is bound to more than one action")]
    KeyClash(Key),
    #[error("no continue key configured")]
    NoContinueKey,
    #[error("balloon scale range invalid (initial {initial}, max {max})")]
    ScaleRange { initial: f32, max: f32 },
}

/// Why a trial, block or session stopped before its natural end.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Interruption {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("aborted by operator")]
    Aborted,
}

impl Interruption {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Device(e) => SessionStatus::DeviceFailure {
                message: e.message.clone(),
            },
            Self::Aborted => SessionStatus::Aborted,
        }
    }
}

/// A block that stopped early, with the trials that did finish.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("block interrupted: {cause}")]
pub struct BlockInterrupted {
    pub partial: BlockRecord,
    #[source]
    pub cause: Interruption,
}
