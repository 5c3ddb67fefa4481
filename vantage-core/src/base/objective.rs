//! Objective.
use super::{Policy, TrainingBatch};

/// Turns a policy and a training batch into a per-instance loss.
pub trait Objective<S, I, X, A, P: Policy<S, I, X, A> + ?Sized> {
    /// Loss of each batch instance under the given policy.
    fn loss_per_instance(&self, policy: &P, batch: &TrainingBatch<S, I, X, A>) -> Vec<f32>;
}
