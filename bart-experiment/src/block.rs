use crate::config::Protocol;
use crate::error::BlockInterrupted;
use crate::io::{AbortHandle, ResponseSource, TriggerSink, emit};
use crate::trial::{TrialContext, TrialEngine};
use bart_core::BlockRecord;
use log::{error, info};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Seed of block `block_index`, mixed from the session seed so that blocks
/// are reproducible independently of one another.
pub fn block_seed(session_seed: u64, block_index: usize) -> u64 {
    let mut z = session_seed ^ (block_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// `trials` condition labels, as evenly balanced as possible, in shuffled order.
/// Leftover trials go to the earliest conditions.
pub fn condition_sequence<R: rand::Rng + ?Sized>(
    conditions: &[String],
    trials: usize,
    rng: &mut R,
) -> Vec<String> {
    if conditions.is_empty() {
        return Vec::new();
    }
    let per_condition = trials / conditions.len();
    let remainder = trials % conditions.len();
    let mut sequence = Vec::with_capacity(trials);
    for (i, condition) in conditions.iter().enumerate() {
        let count = per_condition + usize::from(i < remainder);
        sequence.extend(std::iter::repeat_n(condition.clone(), count));
    }
    sequence.shuffle(rng);
    sequence
}

/// Trial contexts of one block, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPlan {
    pub block_index: usize,
    pub seed: u64,
    pub contexts: Vec<TrialContext>,
}

impl BlockPlan {
    /// Orders conditions and draws every explosion point from one block RNG.
    /// Identical `(protocol, block_index)` always yields an identical plan.
    pub fn generate(protocol: &Protocol, block_index: usize, first_trial_id: u32) -> Self {
        let settings = protocol.settings();
        let seed = block_seed(settings.seed, block_index);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let sequence = condition_sequence(&settings.conditions, settings.trials_per_block, &mut rng);
        let contexts = sequence
            .iter()
            .filter_map(|name| protocol.conditions().get(name))
            .zip(first_trial_id..)
            .map(|(spec, trial_id)| {
                TrialContext::draw(trial_id, block_index, spec, settings, &mut rng)
            })
            .collect();

        Self {
            block_index,
            seed,
            contexts,
        }
    }
}

/// Runs the trials of a block one after another.
pub struct BlockEngine<'a, R: ResponseSource, S: TriggerSink> {
    source: &'a mut R,
    triggers: &'a mut S,
    abort: &'a AbortHandle,
}

impl<'a, R: ResponseSource, S: TriggerSink> BlockEngine<'a, R, S> {
    pub fn new(source: &'a mut R, triggers: &'a mut S, abort: &'a AbortHandle) -> Self {
        Self {
            source,
            triggers,
            abort,
        }
    }

    /// Plans block `block_index` from the protocol and runs it.
    pub fn run_block(
        &mut self,
        block_index: usize,
        protocol: &Protocol,
        first_trial_id: u32,
    ) -> Result<BlockRecord, BlockInterrupted> {
        let plan = BlockPlan::generate(protocol, block_index, first_trial_id);
        let triggers = &protocol.settings().triggers;
        self.run_plan(plan, triggers.block_onset, triggers.block_end)
    }

    /// Runs a prepared plan. Any interruption stops the block at once and hands
    /// back the trials completed so far.
    pub fn run_plan(
        &mut self,
        plan: BlockPlan,
        onset_marker: Option<u8>,
        end_marker: Option<u8>,
    ) -> Result<BlockRecord, BlockInterrupted> {
        info!(
            "block {} onset: {} trials, seed {:#018x}",
            plan.block_index,
            plan.contexts.len(),
            plan.seed
        );
        let mut record = BlockRecord::new(plan.block_index, plan.seed);
        emit(&mut *self.triggers, onset_marker, "block onset");

        for ctx in &plan.contexts {
            let result =
                TrialEngine::new(&mut *self.source, &mut *self.triggers, self.abort).run_trial(ctx);
            match result {
                Ok(trial) => record.push(trial),
                Err(cause) => {
                    error!(
                        "block {} stopped at trial {}: {cause}",
                        plan.block_index, ctx.trial_id()
                    );
                    return Err(BlockInterrupted {
                        partial: record,
                        cause,
                    });
                }
            }
        }

        emit(&mut *self.triggers, end_marker, "block end");
        info!(
            "block {} end: score {}",
            record.block_index, record.block_score
        );
        Ok(record.seal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskSettings;
    use std::collections::HashMap;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sequence_is_balanced_with_remainder_up_front() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let seq = condition_sequence(&names(&["a", "b", "c"]), 8, &mut rng);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for c in &seq {
            *counts.entry(c.as_str()).or_default() += 1;
        }
        assert_eq!(seq.len(), 8);
        assert_eq!(counts["a"], 3);
        assert_eq!(counts["b"], 3);
        assert_eq!(counts["c"], 2);
    }

    #[test]
    fn sequence_of_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(condition_sequence(&[], 5, &mut rng).is_empty());
    }

    #[test]
    fn block_seeds_differ_per_block_and_session() {
        assert_ne!(block_seed(1, 0), block_seed(1, 1));
        assert_ne!(block_seed(1, 0), block_seed(2, 0));
        assert_eq!(block_seed(9, 3), block_seed(9, 3));
    }

    #[test]
    fn plans_are_reproducible() {
        let protocol = TaskSettings::default().into_protocol().unwrap();
        let a = BlockPlan::generate(&protocol, 1, 30);
        let b = BlockPlan::generate(&protocol, 1, 30);
        assert_eq!(a, b);
        assert_eq!(a.contexts.len(), 30);
        assert_eq!(a.contexts[0].trial_id(), 30);
        assert_eq!(a.contexts[29].trial_id(), 59);

        let other = BlockPlan::generate(&protocol, 2, 30);
        let points = |p: &BlockPlan| p.contexts.iter().map(|c| c.explosion_point()).collect::<Vec<_>>();
        assert_ne!(points(&a), points(&other));
    }

    #[test]
    fn explosion_points_stay_in_range() {
        let protocol = TaskSettings::default().into_protocol().unwrap();
        for block in 0..5 {
            for ctx in BlockPlan::generate(&protocol, block, 0).contexts {
                assert!(ctx.explosion_point() >= 1);
                assert!(ctx.explosion_point() <= ctx.max_pumps());
            }
        }
    }

    #[test]
    fn every_trial_slot_resolves_to_a_condition() {
        let protocol = TaskSettings::default().into_protocol().unwrap();
        let plan = BlockPlan::generate(&protocol, 0, 0);
        assert_eq!(plan.contexts.len(), protocol.settings().trials_per_block);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for ctx in &plan.contexts {
            let spec = protocol.conditions().get(ctx.condition()).unwrap();
            assert_eq!(ctx.max_pumps(), spec.max_pumps());
            assert_eq!(ctx.delta(), spec.delta());
            *counts.entry(ctx.condition()).or_default() += 1;
        }
        assert_eq!(counts["blue"], 10);
        assert_eq!(counts["yellow"], 10);
        assert_eq!(counts["orange"], 10);
    }
}
