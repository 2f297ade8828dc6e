//! Stand-ins for the window/keyboard and the trigger port, for headless runs
//! and tests.

use crate::config::KeyBindings;
use crate::error::{DeviceError, TriggerError};
use crate::io::{Response, ResponseSource, TriggerSink};
use bart_core::{Key, PhaseDescriptor};
use bart_timing::Timer;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::time::Duration;

/// Delay before a scripted source answers a continue screen.
const CONTINUE_DELAY: Duration = Duration::from_millis(500);

/// One scripted answer to a balloon window.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Press { key: Key, after: Duration },
    /// Let the window run out.
    Wait,
    /// The device breaks when this action is reached.
    Fail(String),
}

impl Action {
    pub fn press(key: &str, after_ms: u64) -> Self {
        Self::Press {
            key: Key::from(key),
            after: Duration::from_millis(after_ms),
        }
    }
}

/// Replays a fixed list of actions against timed response windows.
///
/// Continue screens are answered automatically with the first valid key and do
/// not consume actions. An exhausted script behaves like `Action::Wait`.
pub struct ScriptedResponses<T: Timer> {
    timer: T,
    script: VecDeque<Action>,
    current: Option<PhaseDescriptor>,
    onset_ns: u64,
    presented: Vec<PhaseDescriptor>,
}

impl<T: Timer> ScriptedResponses<T> {
    pub fn new(timer: T, script: impl IntoIterator<Item = Action>) -> Self {
        Self {
            timer,
            script: script.into_iter().collect(),
            current: None,
            onset_ns: 0,
            presented: Vec::new(),
        }
    }

    /// Every phase shown so far, in order.
    pub fn presented(&self) -> &[PhaseDescriptor] {
        &self.presented
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    fn wait_out(&mut self, timeout: Option<Duration>) -> Result<Response, DeviceError> {
        match timeout {
            Some(t) => {
                self.timer.sleep(t);
                Ok(Response::TimedOut)
            }
            None => Err(DeviceError::new("script exhausted on an unbounded window")),
        }
    }
}

impl<T: Timer> ResponseSource for ScriptedResponses<T> {
    fn present(&mut self, phase: &PhaseDescriptor) -> u64 {
        self.onset_ns = self.timer.now();
        self.current = Some(phase.clone());
        self.presented.push(phase.clone());
        self.onset_ns
    }

    fn hold(&mut self, duration: Duration) -> u64 {
        self.timer.sleep(duration);
        self.timer.now()
    }

    fn await_response(
        &mut self,
        valid_keys: &[Key],
        timeout: Option<Duration>,
    ) -> Result<Response, DeviceError> {
        let on_continue_screen = self
            .current
            .as_ref()
            .is_some_and(PhaseDescriptor::waits_for_continue);
        if on_continue_screen {
            let key = valid_keys
                .first()
                .cloned()
                .ok_or_else(|| DeviceError::new("continue screen without keys"))?;
            self.timer.sleep(CONTINUE_DELAY);
            return Ok(Response::Pressed {
                key,
                rt_ns: self.timer.elapsed(self.onset_ns).as_nanos() as u64,
            });
        }

        match self.script.pop_front() {
            Some(Action::Press { key, after }) => match timeout {
                Some(t) if after >= t => {
                    self.timer.sleep(t);
                    Ok(Response::TimedOut)
                }
                _ => {
                    self.timer.sleep(after);
                    Ok(Response::Pressed {
                        key,
                        rt_ns: self.timer.elapsed(self.onset_ns).as_nanos() as u64,
                    })
                }
            },
            Some(Action::Fail(message)) => Err(DeviceError::new(message)),
            Some(Action::Wait) | None => self.wait_out(timeout),
        }
    }

    fn now(&self) -> u64 {
        self.timer.now()
    }
}

/// Seeded synthetic participant: picks a pump target per balloon, pumps until
/// it is reached and cashes out, occasionally letting a window lapse.
pub struct SimulatedParticipant<T: Timer> {
    timer: T,
    rng: ChaCha8Rng,
    keys: KeyBindings,
    max_target: u32,
    miss_rate: f64,
    target: u32,
    pumps: u32,
    current: Option<PhaseDescriptor>,
    onset_ns: u64,
}

impl<T: Timer> SimulatedParticipant<T> {
    pub fn new(timer: T, keys: KeyBindings, seed: u64) -> Self {
        Self {
            timer,
            rng: ChaCha8Rng::seed_from_u64(seed),
            keys,
            max_target: 12,
            miss_rate: 0.0,
            target: 0,
            pumps: 0,
            current: None,
            onset_ns: 0,
        }
    }

    /// Probability of missing any single balloon window; clamped to `0..=1`,
    /// with `NaN` read as never missing.
    pub fn with_miss_rate(mut self, miss_rate: f64) -> Self {
        self.miss_rate = if miss_rate.is_nan() {
            0.0
        } else {
            miss_rate.clamp(0.0, 1.0)
        };
        self
    }

    /// Upper bound of the per-balloon pump target.
    pub fn with_max_target(mut self, max_target: u32) -> Self {
        self.max_target = max_target.max(1);
        self
    }

    fn press(&mut self, key: Key, rt: Duration, timeout: Option<Duration>) -> Response {
        if let Some(t) = timeout {
            if rt >= t {
                self.timer.sleep(t);
                return Response::TimedOut;
            }
        }
        self.timer.sleep(rt);
        Response::Pressed {
            key,
            rt_ns: self.timer.elapsed(self.onset_ns).as_nanos() as u64,
        }
    }
}

impl<T: Timer> ResponseSource for SimulatedParticipant<T> {
    fn present(&mut self, phase: &PhaseDescriptor) -> u64 {
        if *phase == PhaseDescriptor::Fixation {
            self.target = self.rng.random_range(1..=self.max_target);
            self.pumps = 0;
            debug!("simulated participant aims for {} pumps", self.target);
        }
        self.onset_ns = self.timer.now();
        self.current = Some(phase.clone());
        self.onset_ns
    }

    fn hold(&mut self, duration: Duration) -> u64 {
        self.timer.sleep(duration);
        self.timer.now()
    }

    fn await_response(
        &mut self,
        valid_keys: &[Key],
        timeout: Option<Duration>,
    ) -> Result<Response, DeviceError> {
        let on_balloon = self.current.as_ref().is_some_and(PhaseDescriptor::is_balloon);
        if !on_balloon {
            let key = self
                .keys
                .continue_keys
                .iter()
                .find(|k| valid_keys.contains(k))
                .or_else(|| valid_keys.first())
                .cloned()
                .ok_or_else(|| DeviceError::new("no key to answer with"))?;
            let rt = Duration::from_millis(self.rng.random_range(400..1200));
            return Ok(self.press(key, rt, timeout));
        }

        if let Some(window) = timeout {
            if self.rng.random_bool(self.miss_rate) {
                self.timer.sleep(window);
                return Ok(Response::TimedOut);
            }
        }

        let rt = Duration::from_millis(self.rng.random_range(150..900));
        let pumping = self.pumps < self.target;
        let key = if pumping {
            self.keys.pump.clone()
        } else {
            self.keys.cash.clone()
        };
        let response = self.press(key, rt, timeout);
        if pumping && matches!(response, Response::Pressed { .. }) {
            self.pumps += 1;
        }
        Ok(response)
    }

    fn now(&self) -> u64 {
        self.timer.now()
    }
}

/// Keeps every delivered marker; optionally refuses all of them.
#[derive(Debug, Clone, Default)]
pub struct RecordingTriggers {
    pub sent: Vec<u8>,
    failing: bool,
}

impl RecordingTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose port is permanently unavailable.
    pub fn failing() -> Self {
        Self {
            sent: Vec::new(),
            failing: true,
        }
    }
}

impl TriggerSink for RecordingTriggers {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        if self.failing {
            return Err(TriggerError {
                code,
                reason: "port unavailable".into(),
            });
        }
        self.sent.push(code);
        Ok(())
    }
}

/// Writes markers to the log instead of hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTriggers;

impl TriggerSink for LogTriggers {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        debug!(target: "bart::trigger", "{code}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bart_timing::ManualTimer;

    fn balloon() -> PhaseDescriptor {
        PhaseDescriptor::Balloon {
            condition: "blue".into(),
            scale: 0.2,
            size: (0.8, 1.0),
            bank: 1.0,
        }
    }

    #[test]
    fn scripted_press_inside_window() {
        let timer = ManualTimer::new();
        let mut source = ScriptedResponses::new(timer.clone(), [Action::press("f", 300)]);
        timer.advance(Duration::from_millis(100));
        let onset = source.present(&PhaseDescriptor::Fixation);
        let response = source
            .await_response(&[Key::from("f")], Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(
            response,
            Response::Pressed {
                key: Key::from("f"),
                rt_ns: 300_000_000
            }
        );
        assert_eq!(source.now(), onset + 300_000_000);
    }

    #[test]
    fn scripted_late_press_times_out_after_window() {
        let timer = ManualTimer::new();
        let mut source = ScriptedResponses::new(timer.clone(), [Action::press("f", 3000)]);
        source.present(&PhaseDescriptor::Fixation);
        let response = source
            .await_response(&[Key::from("f")], Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(response, Response::TimedOut);
        assert_eq!(timer.now(), 2_000_000_000);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn exhausted_script_on_unbounded_window_is_a_device_error() {
        let mut source = ScriptedResponses::new(ManualTimer::new(), []);
        source.present(&PhaseDescriptor::Fixation);
        assert!(source.await_response(&[Key::from("f")], None).is_err());
    }

    #[test]
    fn continue_screens_do_not_consume_the_script() {
        let mut source = ScriptedResponses::new(ManualTimer::new(), [Action::Wait]);
        source.present(&PhaseDescriptor::Instructions);
        let response = source.await_response(&[Key::from("space")], None).unwrap();
        assert!(matches!(response, Response::Pressed { key, .. } if key == Key::from("space")));
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.presented(), &[PhaseDescriptor::Instructions]);
    }

    #[test]
    fn simulated_participant_is_reproducible() {
        let run = || {
            let mut p = SimulatedParticipant::new(ManualTimer::new(), KeyBindings::default(), 5)
                .with_max_target(4);
            let keys = [Key::from("space"), Key::from("return")];
            p.present(&PhaseDescriptor::Fixation);
            let balloon = PhaseDescriptor::Balloon {
                condition: "blue".into(),
                scale: 0.2,
                size: (0.8, 1.0),
                bank: 1.0,
            };
            (0..6)
                .map(|_| {
                    p.present(&balloon);
                    p.await_response(&keys, Some(Duration::from_secs(2))).unwrap()
                })
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());
        let cash_at = first
            .iter()
            .position(|r| matches!(r, Response::Pressed { key, .. } if key.as_str() == "return"))
            .unwrap();
        assert!((1..=4).contains(&cash_at));
    }

    #[test]
    fn full_miss_rate_never_answers_a_balloon() {
        let mut p = SimulatedParticipant::new(ManualTimer::new(), KeyBindings::default(), 1)
            .with_miss_rate(1.0);
        p.present(&PhaseDescriptor::Balloon {
            condition: "blue".into(),
            scale: 0.2,
            size: (0.8, 1.0),
            bank: 1.0,
        });
        let r = p
            .await_response(&[Key::from("space")], Some(Duration::from_millis(2000)))
            .unwrap();
        assert_eq!(r, Response::TimedOut);
        assert_eq!(p.now(), 2_000_000_000);
    }

    #[test]
    fn nan_miss_rate_means_never_missing() {
        let mut p = SimulatedParticipant::new(ManualTimer::new(), KeyBindings::default(), 1)
            .with_miss_rate(f64::NAN);
        p.present(&PhaseDescriptor::Fixation);
        p.present(&balloon());
        let r = p
            .await_response(&[Key::from("space")], Some(Duration::from_millis(2000)))
            .unwrap();
        assert!(matches!(r, Response::Pressed { .. }));
    }

    #[test]
    fn lapsed_pump_is_not_counted() {
        let mut p = SimulatedParticipant::new(ManualTimer::new(), KeyBindings::default(), 4)
            .with_max_target(1);
        let keys = [Key::from("space"), Key::from("return")];
        p.present(&PhaseDescriptor::Fixation);

        // Every reaction time exceeds a 100 ms window, so the pump never lands.
        for _ in 0..3 {
            p.present(&balloon());
            let r = p.await_response(&keys, Some(Duration::from_millis(100))).unwrap();
            assert_eq!(r, Response::TimedOut);
        }

        p.present(&balloon());
        let r = p.await_response(&keys, Some(Duration::from_secs(2))).unwrap();
        assert!(matches!(r, Response::Pressed { key, .. } if key.as_str() == "space"));
        p.present(&balloon());
        let r = p.await_response(&keys, Some(Duration::from_secs(2))).unwrap();
        assert!(matches!(r, Response::Pressed { key, .. } if key.as_str() == "return"));
    }

    #[test]
    fn failing_sink_records_nothing() {
        let mut sink = RecordingTriggers::failing();
        assert!(sink.send(3).is_err());
        assert!(sink.sent.is_empty());
        let mut ok = RecordingTriggers::new();
        ok.send(3).unwrap();
        assert_eq!(ok.sent, vec![3]);
    }
}
