//! Configuration surface of the update core.
//!
//! All mappings reject unknown keys at deserialization time; `validate()`
//! re-checks value constraints for configurations constructed in code.
//! Violations are configuration errors raised once at construction.
use crate::error::VantageError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Unit in which update scheduling is counted.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum UpdateUnit {
    /// Count environment timesteps.
    Timesteps,

    /// Count finished episodes.
    Episodes,
}

/// Update frequency.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    /// Scheduling disabled: experience is recorded, updates never fire.
    Never,

    /// Fire every `n` units.
    Every(usize),
}

/// When the reward-horizon bootstrap is applied.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum EstimateHorizon {
    /// No bootstrapping.
    Off,

    /// Bootstrap folded in when a record leaves the staging buffer,
    /// using the baseline as of that moment.
    Early,

    /// Bootstrap deferred to reward completion at update time, using the
    /// current baseline.
    Late,
}

/// Timestep-retrieval strategy of [`Memory`](crate::Memory).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Retrieval {
    /// The newest eligible records, deterministically.
    Recent,

    /// Uniform random among eligible records.
    Uniform,
}

/// The `update` mapping: when optimization passes fire.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    /// Scheduling unit.
    pub unit: UpdateUnit,

    /// Number of timesteps or episodes per optimization batch.
    pub batch_size: usize,

    /// Scheduling frequency; defaults to `batch_size` units.
    #[serde(default)]
    pub frequency: Option<UpdateFrequency>,

    /// First unit count at which an update may fire. Clamped upward so
    /// the first batch always has full horizon context.
    #[serde(default)]
    pub start: usize,
}

impl UpdateConfig {
    /// Constructs a configuration with defaults for frequency and start.
    pub fn new(unit: UpdateUnit, batch_size: usize) -> Self {
        Self {
            unit,
            batch_size,
            frequency: None,
            start: 0,
        }
    }

    /// Sets the scheduling frequency.
    pub fn frequency(mut self, v: UpdateFrequency) -> Self {
        self.frequency = Some(v);
        self
    }

    /// Sets the start offset.
    pub fn start(mut self, v: usize) -> Self {
        self.start = v;
        self
    }

    /// Effective frequency in units; `None` means scheduling is disabled.
    pub fn effective_frequency(&self) -> Option<usize> {
        match self.frequency {
            None => Some(self.batch_size),
            Some(UpdateFrequency::Every(n)) => Some(n),
            Some(UpdateFrequency::Never) => None,
        }
    }

    /// Checks value constraints.
    pub fn validate(&self) -> Result<(), VantageError> {
        if self.batch_size == 0 {
            return Err(VantageError::Config(
                "update.batch_size must be at least 1".into(),
            ));
        }
        if let Some(UpdateFrequency::Every(0)) = self.frequency {
            return Err(VantageError::Config(
                "update.frequency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_discount() -> f32 {
    1.0
}

/// The `reward_estimation` mapping: how raw rewards become targets.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct RewardEstimationConfig {
    /// Future horizon of the n-step reward sum.
    pub horizon: usize,

    /// Discount factor per timestep.
    #[serde(default = "default_discount")]
    pub discount: f32,

    /// Bootstrap mode; defaults from the resolved baseline topology.
    #[serde(default)]
    pub estimate_horizon: Option<EstimateHorizon>,

    /// Use action-value instead of state-value estimates.
    #[serde(default)]
    pub estimate_actions: bool,

    /// Still bootstrap from the terminal state at episode timeouts
    /// (terminal kind 2); true terminals never bootstrap.
    #[serde(default)]
    pub estimate_terminal: bool,

    /// Subtract a baseline value estimate to form advantages; defaults
    /// from the resolved baseline topology.
    #[serde(default)]
    pub estimate_advantage: Option<bool>,
}

impl RewardEstimationConfig {
    /// Constructs a configuration with the given horizon and discount.
    pub fn new(horizon: usize, discount: f32) -> Self {
        Self {
            horizon,
            discount,
            estimate_horizon: None,
            estimate_actions: false,
            estimate_terminal: false,
            estimate_advantage: None,
        }
    }

    /// Sets the bootstrap mode explicitly.
    pub fn estimate_horizon(mut self, v: EstimateHorizon) -> Self {
        self.estimate_horizon = Some(v);
        self
    }

    /// Sets action-value estimation.
    pub fn estimate_actions(mut self, v: bool) -> Self {
        self.estimate_actions = v;
        self
    }

    /// Sets timeout-terminal bootstrapping.
    pub fn estimate_terminal(mut self, v: bool) -> Self {
        self.estimate_terminal = v;
        self
    }

    /// Sets advantage estimation explicitly.
    pub fn estimate_advantage(mut self, v: bool) -> Self {
        self.estimate_advantage = Some(v);
        self
    }

    /// Checks value constraints.
    pub fn validate(&self) -> Result<(), VantageError> {
        if self.horizon == 0 {
            return Err(VantageError::Config(
                "reward_estimation.horizon must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(VantageError::Config(format!(
                "reward_estimation.discount must be in [0, 1], got {}",
                self.discount
            )));
        }
        Ok(())
    }
}

/// Configuration of [`Memory`](crate::Memory).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Maximum number of committed records.
    pub capacity: usize,

    /// Timestep-retrieval strategy.
    #[serde(default = "default_retrieval")]
    pub retrieval: Retrieval,

    /// Random seed for uniform retrieval.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_retrieval() -> Retrieval {
    Retrieval::Recent
}

fn default_seed() -> u64 {
    42
}

impl MemoryConfig {
    /// Constructs a configuration with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            retrieval: Retrieval::Recent,
            seed: 42,
        }
    }

    /// Sets the retrieval strategy.
    pub fn retrieval(mut self, v: Retrieval) -> Self {
        self.retrieval = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }
}

/// Configuration of [`Learner`](crate::Learner).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct LearnerConfig {
    /// Update scheduling.
    pub update: UpdateConfig,

    /// Reward estimation.
    pub reward_estimation: RewardEstimationConfig,

    /// Experience memory.
    pub memory: MemoryConfig,

    /// L2 regularization weight over trainable variables.
    #[serde(default)]
    pub l2_regularization: f32,

    /// Entropy regularization weight.
    #[serde(default)]
    pub entropy_regularization: f32,

    /// Upper bound on episode length, used to size memory for
    /// episode-unit updates when known.
    #[serde(default)]
    pub max_episode_timesteps: Option<usize>,
}

impl LearnerConfig {
    /// Constructs a configuration from the three required mappings.
    pub fn new(
        update: UpdateConfig,
        reward_estimation: RewardEstimationConfig,
        memory: MemoryConfig,
    ) -> Self {
        Self {
            update,
            reward_estimation,
            memory,
            l2_regularization: 0.0,
            entropy_regularization: 0.0,
            max_episode_timesteps: None,
        }
    }

    /// Sets the L2 regularization weight.
    pub fn l2_regularization(mut self, v: f32) -> Self {
        self.l2_regularization = v;
        self
    }

    /// Sets the entropy regularization weight.
    pub fn entropy_regularization(mut self, v: f32) -> Self {
        self.entropy_regularization = v;
        self
    }

    /// Sets the episode length bound.
    pub fn max_episode_timesteps(mut self, v: usize) -> Self {
        self.max_episode_timesteps = Some(v);
        self
    }

    /// Checks value constraints of all mappings.
    pub fn validate(&self) -> Result<(), VantageError> {
        self.update.validate()?;
        self.reward_estimation.validate()?;
        if self.l2_regularization < 0.0 || self.entropy_regularization < 0.0 {
            return Err(VantageError::Config(
                "regularization weights must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Constructs [`LearnerConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`LearnerConfig`] as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
