//! Capability interfaces and batch types of the update core.
mod batch;
mod objective;
mod optimizer;
mod policy;

pub use batch::{BatchBase, TrainingBatch, Values};
pub use objective::Objective;
pub use optimizer::{OptimizationContext, Optimizer};
pub use policy::Policy;
