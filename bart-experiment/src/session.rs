use crate::block::BlockEngine;
use crate::config::Protocol;
use crate::error::{DeviceError, Interruption};
use crate::io::{AbortHandle, Response, ResponseSource, TriggerSink, emit};
use bart_core::{Key, PhaseDescriptor, SessionRecord, SessionStatus};
use log::{error, info, warn};
use std::time::Duration;

/// Drives a whole session: instructions, blocks with breaks, goodbye.
pub struct SessionEngine<R: ResponseSource, S: TriggerSink> {
    source: R,
    triggers: S,
    abort: AbortHandle,
}

impl<R: ResponseSource, S: TriggerSink> SessionEngine<R, S> {
    pub fn new(source: R, triggers: S) -> Self {
        Self {
            source,
            triggers,
            abort: AbortHandle::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Handle an operator can use to stop the session from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn source(&self) -> &R {
        &self.source
    }

    pub fn triggers(&self) -> &S {
        &self.triggers
    }

    pub fn into_parts(self) -> (R, S) {
        (self.source, self.triggers)
    }

    /// Runs `protocol.settings().total_blocks` blocks.
    pub fn run(&mut self, protocol: &Protocol) -> SessionRecord {
        self.run_session(protocol.settings().total_blocks, protocol)
    }

    /// Runs `num_blocks` blocks in order and returns the sealed record.
    ///
    /// Never fails: a device failure or an abort seals the record early with
    /// the matching status, keeping every trial that completed. Once the last
    /// block is in, the session counts as completed whatever happens on the
    /// closing screens.
    pub fn run_session(&mut self, num_blocks: usize, protocol: &Protocol) -> SessionRecord {
        let settings = protocol.settings();
        let mut record = SessionRecord::new(settings.subject_id.clone(), settings.seed);
        info!(
            "session start: subject {}, seed {}, {num_blocks} blocks",
            settings.subject_id.as_deref().unwrap_or("-"),
            settings.seed
        );

        let status = match self.run_blocks(num_blocks, protocol, &mut record) {
            Ok(()) => {
                self.close(num_blocks, protocol, &record);
                SessionStatus::Completed
            }
            Err(cause) => {
                error!("session ended early: {cause}");
                cause.status()
            }
        };
        record.seal(status);
        info!(
            "session end ({:?}): {} blocks, cumulative score {}",
            record.status,
            record.blocks.len(),
            record.cumulative_score
        );
        record
    }

    fn run_blocks(
        &mut self,
        num_blocks: usize,
        protocol: &Protocol,
        record: &mut SessionRecord,
    ) -> Result<(), Interruption> {
        let settings = protocol.settings();
        emit(&mut self.triggers, settings.triggers.exp_onset, "experiment onset");
        self.wait_for_continue(
            &PhaseDescriptor::Instructions,
            &settings.keys.continue_keys,
            settings.keys.abort.as_ref(),
        )?;

        let mut next_trial_id = 0u32;
        for block_index in 0..num_blocks {
            self.check_abort()?;
            self.countdown(settings.timing.countdown_s);

            let block = BlockEngine::new(&mut self.source, &mut self.triggers, &self.abort)
                .run_block(block_index, protocol, next_trial_id);
            let block = match block {
                Ok(block) => block,
                Err(interrupted) => {
                    record.push_block(interrupted.partial);
                    return Err(interrupted.cause);
                }
            };

            next_trial_id += block.trials.len() as u32;
            let block_score = block.block_score;
            let cumulative_score = record.push_block(block);
            info!("after block {block_index}: cumulative score {cumulative_score}");

            if block_index + 1 < num_blocks {
                self.block_break(block_index, num_blocks, block_score, cumulative_score, protocol)?;
            }
        }
        Ok(())
    }

    /// Final break and goodbye screens plus the end marker. Failures here are
    /// logged and do not change the outcome of the session.
    fn close(&mut self, num_blocks: usize, protocol: &Protocol, record: &SessionRecord) {
        let settings = protocol.settings();
        let closing = match record.blocks.last() {
            Some(last) => self.block_break(
                num_blocks - 1,
                num_blocks,
                last.block_score,
                record.cumulative_score,
                protocol,
            ),
            None => Ok(()),
        }
        .and_then(|()| {
            self.wait_for_continue(
                &PhaseDescriptor::Goodbye {
                    total_score: record.cumulative_score,
                },
                &settings.keys.continue_keys,
                settings.keys.abort.as_ref(),
            )
        });
        if let Err(cause) = closing {
            warn!("closing screens cut short: {cause}");
        }
        emit(&mut self.triggers, settings.triggers.exp_end, "experiment end");
    }

    fn block_break(
        &mut self,
        block_index: usize,
        num_blocks: usize,
        block_score: f64,
        cumulative_score: f64,
        protocol: &Protocol,
    ) -> Result<(), Interruption> {
        let keys = &protocol.settings().keys;
        self.wait_for_continue(
            &PhaseDescriptor::BlockBreak {
                block_num: block_index + 1,
                total_blocks: num_blocks,
                block_score,
                cumulative_score,
            },
            &keys.continue_keys,
            keys.abort.as_ref(),
        )
    }

    fn countdown(&mut self, seconds: u32) {
        for remaining in (1..=seconds).rev() {
            self.source.present(&PhaseDescriptor::Countdown { seconds: remaining });
            self.source.hold(Duration::from_secs(1));
        }
    }

    /// Shows a screen until a continue key arrives. Other keys are ignored.
    fn wait_for_continue(
        &mut self,
        screen: &PhaseDescriptor,
        continue_keys: &[Key],
        abort_key: Option<&Key>,
    ) -> Result<(), Interruption> {
        self.check_abort()?;
        self.source.present(screen);

        let mut valid = continue_keys.to_vec();
        valid.extend(abort_key.cloned());
        loop {
            match self.source.await_response(&valid, None)? {
                Response::Pressed { key, .. } if Some(&key) == abort_key => {
                    self.abort.request();
                    return Err(Interruption::Aborted);
                }
                Response::Pressed { key, .. } if continue_keys.contains(&key) => return Ok(()),
                Response::Pressed { key, .. } => warn!("ignoring key `{key}` on {screen:?}"),
                Response::TimedOut => {
                    return Err(DeviceError::new("unbounded wait returned a timeout").into());
                }
            }
        }
    }

    fn check_abort(&self) -> Result<(), Interruption> {
        if self.abort.is_requested() {
            Err(Interruption::Aborted)
        } else {
            Ok(())
        }
    }
}
