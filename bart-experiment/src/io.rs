use crate::error::{DeviceError, TriggerError};
use bart_core::{Key, PhaseDescriptor};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Result of one response window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `rt_ns` is measured from the onset of the phase being answered.
    Pressed { key: Key, rt_ns: u64 },
    TimedOut,
}

/// The window, keyboard and clock of the running experiment.
///
/// Implementations must keep `now` monotonic across calls.
pub trait ResponseSource {
    /// Puts a phase on screen and returns its onset timestamp in ns.
    fn present(&mut self, phase: &PhaseDescriptor) -> u64;

    /// Keeps the current phase up for `duration`; returns the offset timestamp.
    fn hold(&mut self, duration: Duration) -> u64;

    /// Waits for one of `valid_keys`, or until `timeout` elapses. `None` waits indefinitely.
    fn await_response(
        &mut self,
        valid_keys: &[Key],
        timeout: Option<Duration>,
    ) -> Result<Response, DeviceError>;

    fn now(&self) -> u64;
}

/// Destination of synchronisation markers (parallel port, LSL outlet, ...).
pub trait TriggerSink {
    fn send(&mut self, code: u8) -> Result<(), TriggerError>;
}

/// Fire-and-forget marker delivery. An unset marker is skipped.
pub(crate) fn emit<S: TriggerSink + ?Sized>(sink: &mut S, marker: Option<u8>, what: &str) {
    let Some(code) = marker else {
        return;
    };
    match sink.send(code) {
        Ok(()) => debug!("marker {code} ({what})"),
        Err(e) => warn!("{what}: {e}"),
    }
}

/// Shared operator abort flag, honoured before the next phase is presented.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
