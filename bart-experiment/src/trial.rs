use crate::config::{BalloonGeometry, ConditionSpec, ConditionTriggers, PhaseDurations, TaskSettings};
use crate::error::Interruption;
use crate::io::{AbortHandle, Response, ResponseSource, TriggerSink, emit};
use crate::scoring;
use bart_core::{
    FeedbackKind, Key, PhaseAnnotation, PhaseDescriptor, PhaseEvent, PhaseLabel, TrialOutcome,
    TrialRecord, TrialState,
};
use log::{debug, warn};
use rand::Rng;
use std::time::Duration;

/// Overrun beyond which a timed phase counts as a missed beat.
const MISSED_BEAT_NS: u64 = 2_000_000;

/// Markers a trial can send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrialMarkers {
    pub fixation_onset: Option<u8>,
    pub feedback_onset: Option<u8>,
    pub condition: ConditionTriggers,
}

/// Immutable parameters of one balloon. Built only by `draw`, so the
/// explosion point always lies within `1..=max_pumps`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialContext {
    trial_id: u32,
    block_index: usize,
    condition: String,
    delta: f64,
    max_pumps: u32,
    /// Hidden from the participant.
    explosion_point: u32,
    balloon: BalloonGeometry,
    pump_key: Key,
    cash_key: Key,
    abort_key: Option<Key>,
    durations: PhaseDurations,
    markers: TrialMarkers,
    annotate: bool,
}

impl TrialContext {
    /// Builds the context for one trial and draws its explosion point from `rng`.
    pub fn draw<R: Rng + ?Sized>(
        trial_id: u32,
        block_index: usize,
        spec: &ConditionSpec,
        settings: &TaskSettings,
        rng: &mut R,
    ) -> Self {
        let max_pumps = spec.max_pumps().max(1);
        let explosion_point = rng.random_range(1..=max_pumps);
        Self {
            trial_id,
            block_index,
            condition: spec.name().to_owned(),
            delta: spec.delta(),
            max_pumps,
            explosion_point,
            balloon: settings.balloon,
            pump_key: settings.keys.pump.clone(),
            cash_key: settings.keys.cash.clone(),
            abort_key: settings.keys.abort.clone(),
            durations: settings.timing,
            markers: TrialMarkers {
                fixation_onset: settings.triggers.fixation_onset,
                feedback_onset: settings.triggers.feedback_onset,
                condition: spec.triggers(),
            },
            annotate: settings.annotate_phases,
        }
    }

    /// Same context with a fixed explosion point, clamped to `1..=max_pumps`.
    pub fn with_explosion_point(mut self, explosion_point: u32) -> Self {
        self.explosion_point = explosion_point.clamp(1, self.max_pumps);
        self
    }

    pub fn trial_id(&self) -> u32 {
        self.trial_id
    }

    pub fn condition(&self) -> &str {
        &self.condition
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn max_pumps(&self) -> u32 {
        self.max_pumps
    }

    pub fn explosion_point(&self) -> u32 {
        self.explosion_point
    }

    fn valid_keys(&self) -> Vec<Key> {
        let mut keys = vec![self.pump_key.clone(), self.cash_key.clone()];
        keys.extend(self.abort_key.iter().cloned());
        keys
    }
}

/// Events collected while a trial is running.
struct TrialDraft {
    events: Vec<PhaseEvent>,
    pump_count: u32,
    bank: f64,
}

impl TrialDraft {
    fn seal(self, ctx: &TrialContext, outcome: TrialOutcome) -> TrialRecord {
        TrialRecord {
            trial_id: ctx.trial_id,
            block_index: ctx.block_index,
            condition: ctx.condition.clone(),
            explosion_point: ctx.explosion_point,
            pump_count: self.pump_count,
            outcome,
            score: scoring::payout(outcome, self.bank),
            events: self.events,
        }
    }
}

/// Runs the pump/cash loop of a single balloon.
pub struct TrialEngine<'a, R: ResponseSource, S: TriggerSink> {
    source: &'a mut R,
    triggers: &'a mut S,
    abort: &'a AbortHandle,
}

impl<'a, R: ResponseSource, S: TriggerSink> TrialEngine<'a, R, S> {
    pub fn new(source: &'a mut R, triggers: &'a mut S, abort: &'a AbortHandle) -> Self {
        Self {
            source,
            triggers,
            abort,
        }
    }

    /// Fixation, then pump decisions until pop, cash-out or timeout, then the
    /// outcome and feedback screens.
    ///
    /// Fails only when the response device breaks or an abort is requested; the
    /// half-finished trial is discarded in both cases.
    pub fn run_trial(&mut self, ctx: &TrialContext) -> Result<TrialRecord, Interruption> {
        debug!(
            "trial {} ({}) explosion point {}/{}",
            ctx.trial_id, ctx.condition, ctx.explosion_point, ctx.max_pumps
        );
        let mut draft = TrialDraft {
            events: Vec::new(),
            pump_count: 0,
            bank: scoring::initial_bank(ctx.delta),
        };
        let mut state = TrialState::Fixation;
        let outcome = loop {
            state = match state {
                TrialState::Fixation => {
                    self.show_timed(
                        ctx,
                        &mut draft,
                        PhaseLabel::Fixation,
                        &PhaseDescriptor::Fixation,
                        ctx.durations.fixation_ms,
                        ctx.markers.fixation_onset,
                    )?;
                    TrialState::Deciding {
                        pump_count: draft.pump_count,
                        bank: draft.bank,
                    }
                }
                TrialState::Deciding { pump_count, bank } => {
                    self.decide(ctx, &mut draft, pump_count, bank)?
                }
                TrialState::Outcome(outcome) => {
                    let (descriptor, marker) = outcome_screen(ctx, outcome);
                    self.show_timed(
                        ctx,
                        &mut draft,
                        outcome.label(),
                        &descriptor,
                        ctx.durations.outcome_ms,
                        marker,
                    )?;
                    TrialState::Feedback(outcome)
                }
                TrialState::Feedback(outcome) => {
                    let score = scoring::payout(outcome, draft.bank);
                    let kind = match outcome {
                        TrialOutcome::CashedOut => FeedbackKind::Win,
                        TrialOutcome::Popped | TrialOutcome::TimedOut => FeedbackKind::Lose,
                    };
                    self.show_timed(
                        ctx,
                        &mut draft,
                        PhaseLabel::Feedback,
                        &PhaseDescriptor::Feedback { kind, score },
                        ctx.durations.feedback_ms,
                        ctx.markers.feedback_onset,
                    )?;
                    break outcome;
                }
            };
        };

        let record = draft.seal(ctx, outcome);
        debug_assert!(record.is_consistent());
        debug!(
            "trial {} sealed: {:?} after {} pumps, score {}",
            record.trial_id, record.outcome, record.pump_count, record.score
        );
        Ok(record)
    }

    /// One balloon presentation and the transition it leads to.
    fn decide(
        &mut self,
        ctx: &TrialContext,
        draft: &mut TrialDraft,
        pump_count: u32,
        bank: f64,
    ) -> Result<TrialState, Interruption> {
        self.check_abort()?;

        let label = PhaseLabel::Pump(pump_count);
        let scale = scoring::balloon_scale(&ctx.balloon, pump_count, ctx.max_pumps);
        let onset_ns = self.source.present(&PhaseDescriptor::Balloon {
            condition: ctx.condition.clone(),
            scale,
            size: scoring::balloon_size(&ctx.balloon, scale),
            bank,
        });
        emit(&mut *self.triggers, ctx.markers.condition.balloon_onset, "balloon onset");

        let window = ctx.durations.balloon_window_ms.map(Duration::from_millis);
        let response = self.source.await_response(&ctx.valid_keys(), window)?;
        let offset_ns = self.source.now();

        let (key, rt_ns) = match response {
            Response::Pressed { key, rt_ns } => (Some(key), Some(rt_ns)),
            Response::TimedOut => (None, None),
        };
        draft.events.push(PhaseEvent {
            label,
            onset_ns,
            offset_ns,
            duration_ms: ctx.durations.balloon_window_ms,
            response: key.clone(),
            reaction_time_ns: rt_ns,
            annotation: annotation(ctx, pump_count),
        });

        let next = match key {
            Some(k) if Some(&k) == ctx.abort_key.as_ref() => {
                self.abort.request();
                return Err(Interruption::Aborted);
            }
            Some(k) if k == ctx.pump_key => {
                emit(&mut *self.triggers, ctx.markers.condition.pump_press, "pump press");
                let pumps = pump_count + 1;
                draft.pump_count = pumps;
                if pumps >= ctx.explosion_point {
                    TrialState::Outcome(TrialOutcome::Popped)
                } else {
                    draft.bank = scoring::pump(bank, ctx.delta);
                    TrialState::Deciding {
                        pump_count: pumps,
                        bank: draft.bank,
                    }
                }
            }
            Some(k) if k == ctx.cash_key => {
                emit(&mut *self.triggers, ctx.markers.condition.cash_press, "cash press");
                TrialState::Outcome(TrialOutcome::CashedOut)
            }
            Some(k) => {
                warn!("trial {}: unexpected key `{k}` treated as no response", ctx.trial_id);
                TrialState::Outcome(TrialOutcome::TimedOut)
            }
            None => TrialState::Outcome(TrialOutcome::TimedOut),
        };
        debug!("trial {} {label}: {:?}", ctx.trial_id, next);
        Ok(next)
    }

    /// Presents a phase for a fixed duration. No response is collected.
    fn show_timed(
        &mut self,
        ctx: &TrialContext,
        draft: &mut TrialDraft,
        label: PhaseLabel,
        descriptor: &PhaseDescriptor,
        duration_ms: u64,
        marker: Option<u8>,
    ) -> Result<(), Interruption> {
        self.check_abort()?;

        let onset_ns = self.source.present(descriptor);
        emit(&mut *self.triggers, marker, "phase onset");
        let offset_ns = self.source.hold(Duration::from_millis(duration_ms));

        let shown_ns = offset_ns.saturating_sub(onset_ns);
        let planned_ns = duration_ms.saturating_mul(1_000_000);
        if shown_ns > planned_ns.saturating_add(MISSED_BEAT_NS) {
            warn!(
                "trial {} {label} overran by {:.3} ms",
                ctx.trial_id,
                (shown_ns - planned_ns) as f64 / 1_000_000.0
            );
        }

        draft.events.push(PhaseEvent {
            label,
            onset_ns,
            offset_ns,
            duration_ms: Some(duration_ms),
            response: None,
            reaction_time_ns: None,
            annotation: annotation(ctx, draft.pump_count),
        });
        Ok(())
    }

    fn check_abort(&self) -> Result<(), Interruption> {
        if self.abort.is_requested() {
            Err(Interruption::Aborted)
        } else {
            Ok(())
        }
    }
}

fn outcome_screen(ctx: &TrialContext, outcome: TrialOutcome) -> (PhaseDescriptor, Option<u8>) {
    let condition = ctx.condition.clone();
    let markers = &ctx.markers.condition;
    match outcome {
        TrialOutcome::Popped => (PhaseDescriptor::Pop { condition }, markers.pop),
        TrialOutcome::CashedOut => (PhaseDescriptor::Cash { condition }, markers.cash),
        TrialOutcome::TimedOut => (PhaseDescriptor::Timeout { condition }, markers.timeout),
    }
}

fn annotation(ctx: &TrialContext, pump_count: u32) -> Option<PhaseAnnotation> {
    ctx.annotate.then(|| PhaseAnnotation {
        trial_id: ctx.trial_id,
        block_index: ctx.block_index,
        condition: ctx.condition.clone(),
        pump_count,
    })
}
