#![warn(missing_docs)]
//! Experience buffering, update scheduling and advantage estimation for
//! reinforcement learning agents.
//!
//! The crate sits between raw environment interaction and an optimizer:
//! it decides when a timestep's reward target is complete enough to
//! commit ([`Estimator`]), stores committed records for batch retrieval
//! ([`Memory`]), decides when enough data has accumulated to fire an
//! optimization pass, and assembles the batch for it ([`Learner`]).
//! Action sampling, loss definitions and the parameter-update rule are
//! capability interfaces ([`Policy`], [`Objective`], [`Optimizer`]); the
//! [`dummy`] module carries minimal reference implementations.
pub mod dummy;
pub mod error;
pub mod record;

mod base;
pub use base::{
    BatchBase, Objective, OptimizationContext, Optimizer, Policy, TrainingBatch, Values,
};

mod config;
pub use config::{
    EstimateHorizon, LearnerConfig, MemoryConfig, Retrieval, RewardEstimationConfig, UpdateConfig,
    UpdateFrequency, UpdateUnit,
};

mod baseline;
pub use baseline::{BaselineOptimizer, BaselineTopology};

mod memory;
pub use memory::Memory;

mod estimator;
pub use estimator::Estimator;

mod learner;
pub use learner::{Checkpoint, Learner};
