use crate::error::SettingsError;
use bart_core::Key;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Reward and risk parameters of one balloon colour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionParams {
    pub delta: f64,
    pub max_pumps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub pump: Key,
    pub cash: Key,
    pub continue_keys: Vec<Key>,
    /// Operator key that ends the session at the next phase boundary.
    pub abort: Option<Key>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            pump: Key::from("space"),
            cash: Key::from("return"),
            continue_keys: vec![Key::from("space")],
            abort: Some(Key::from("escape")),
        }
    }
}

/// Visual growth of the balloon. Only forwarded to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalloonGeometry {
    pub initial_scale: f32,
    pub max_scale: f32,
    /// Width and height at scale 1.0, in degrees of visual angle.
    pub base_size: (f32, f32),
}

impl Default for BalloonGeometry {
    fn default() -> Self {
        Self {
            initial_scale: 0.2,
            max_scale: 1.8,
            base_size: (4.0, 5.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseDurations {
    pub fixation_ms: u64,
    /// `None` leaves the balloon up until a key arrives.
    pub balloon_window_ms: Option<u64>,
    /// Pop / cash / timeout screen.
    pub outcome_ms: u64,
    pub feedback_ms: u64,
    pub countdown_s: u32,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            fixation_ms: 800,
            balloon_window_ms: Some(2000),
            outcome_ms: 1000,
            feedback_ms: 1500,
            countdown_s: 3,
        }
    }
}

/// Markers sent for one condition. Missing entries are simply not sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionTriggers {
    pub balloon_onset: Option<u8>,
    pub pump_press: Option<u8>,
    pub cash_press: Option<u8>,
    pub pop: Option<u8>,
    pub cash: Option<u8>,
    pub timeout: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerMap {
    pub exp_onset: Option<u8>,
    pub exp_end: Option<u8>,
    pub block_onset: Option<u8>,
    pub block_end: Option<u8>,
    pub fixation_onset: Option<u8>,
    pub feedback_onset: Option<u8>,
    pub conditions: BTreeMap<String, ConditionTriggers>,
}

/// Everything a session needs to know about the task. Read-only once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub subject_id: Option<String>,
    pub seed: u64,
    pub total_blocks: usize,
    pub trials_per_block: usize,
    /// Conditions mixed into every block, balanced and shuffled.
    pub conditions: Vec<String>,
    pub condition_params: BTreeMap<String, ConditionParams>,
    pub keys: KeyBindings,
    pub balloon: BalloonGeometry,
    pub timing: PhaseDurations,
    pub triggers: TriggerMap,
    /// Attach trial/condition tags to every recorded phase event.
    pub annotate_phases: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        let params = [("blue", 1.0, 32), ("yellow", 2.0, 16), ("orange", 4.0, 8)];
        let mut condition_params = BTreeMap::new();
        let mut condition_triggers = BTreeMap::new();
        for (i, (name, delta, max_pumps)) in params.into_iter().enumerate() {
            condition_params.insert(name.to_string(), ConditionParams { delta, max_pumps });
            let base = 10 * (i as u8 + 1);
            condition_triggers.insert(
                name.to_string(),
                ConditionTriggers {
                    balloon_onset: Some(base),
                    pump_press: Some(base + 1),
                    cash_press: Some(base + 2),
                    pop: Some(base + 3),
                    cash: Some(base + 4),
                    timeout: Some(base + 5),
                },
            );
        }

        Self {
            subject_id: None,
            seed: 2025,
            total_blocks: 3,
            trials_per_block: 30,
            conditions: params.iter().map(|(name, ..)| name.to_string()).collect(),
            condition_params,
            keys: KeyBindings::default(),
            balloon: BalloonGeometry::default(),
            timing: PhaseDurations::default(),
            triggers: TriggerMap {
                exp_onset: Some(98),
                exp_end: Some(99),
                block_onset: Some(100),
                block_end: Some(101),
                fixation_onset: Some(1),
                feedback_onset: Some(60),
                conditions: condition_triggers,
            },
            annotate_phases: false,
        }
    }
}

impl TaskSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Checks the settings and resolves every condition name to its parameters.
    pub fn validate(&self) -> Result<ConditionTable, SettingsError> {
        if self.total_blocks == 0 {
            return Err(SettingsError::ZeroBlocks);
        }
        if self.trials_per_block == 0 {
            return Err(SettingsError::ZeroTrials);
        }
        if self.conditions.is_empty() {
            return Err(SettingsError::NoConditions);
        }

        let b = &self.balloon;
        if !(b.initial_scale > 0.0 && b.max_scale >= b.initial_scale) {
            return Err(SettingsError::ScaleRange {
                initial: b.initial_scale,
                max: b.max_scale,
            });
        }

        let keys = &self.keys;
        if keys.pump == keys.cash {
            return Err(SettingsError::KeyClash(keys.pump.clone()));
        }
        if let Some(abort) = &keys.abort {
            if *abort == keys.pump || *abort == keys.cash || keys.continue_keys.contains(abort) {
                return Err(SettingsError::KeyClash(abort.clone()));
            }
        }
        if keys.continue_keys.is_empty() {
            return Err(SettingsError::NoContinueKey);
        }

        let mut table = BTreeMap::new();
        for name in &self.conditions {
            let params = self
                .condition_params
                .get(name)
                .ok_or_else(|| SettingsError::UnknownCondition(name.clone()))?;
            if params.max_pumps == 0 {
                return Err(SettingsError::ZeroMaxPumps {
                    condition: name.clone(),
                });
            }
            if !(params.delta > 0.0 && params.delta.is_finite()) {
                return Err(SettingsError::InvalidDelta {
                    condition: name.clone(),
                    delta: params.delta,
                });
            }
            let triggers = self
                .triggers
                .conditions
                .get(name)
                .copied()
                .unwrap_or_default();
            table.insert(
                name.clone(),
                ConditionSpec {
                    name: name.clone(),
                    delta: params.delta,
                    max_pumps: params.max_pumps,
                    triggers,
                },
            );
        }

        let listed: HashSet<&String> = self.conditions.iter().collect();
        for name in self.triggers.conditions.keys() {
            if !listed.contains(name) {
                warn!("triggers configured for unused condition `{name}`");
            }
        }

        Ok(ConditionTable { specs: table })
    }

    pub fn into_protocol(self) -> Result<Protocol, SettingsError> {
        let conditions = self.validate()?;
        Ok(Protocol {
            settings: self,
            conditions,
        })
    }
}

/// Resolved parameters of one condition. Only `TaskSettings::validate` builds
/// these, so `delta` is positive and `max_pumps` at least 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSpec {
    name: String,
    delta: f64,
    max_pumps: u32,
    triggers: ConditionTriggers,
}

impl ConditionSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn max_pumps(&self) -> u32 {
        self.max_pumps
    }

    pub fn triggers(&self) -> ConditionTriggers {
        self.triggers
    }
}

/// Explicit condition name → parameters mapping, built by `TaskSettings::validate`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTable {
    specs: BTreeMap<String, ConditionSpec>,
}

impl ConditionTable {
    pub fn get(&self, name: &str) -> Option<&ConditionSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Validated settings: the only form the engines accept. Read-only once
/// built, so every listed condition stays resolvable.
#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    settings: TaskSettings,
    conditions: ConditionTable,
}

impl Protocol {
    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    pub fn conditions(&self) -> &ConditionTable {
        &self.conditions
    }
}
