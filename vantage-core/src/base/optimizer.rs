//! Optimizer.
use anyhow::Result;

/// Access to one optimization problem: a flat variable vector, a loss
/// probe evaluated at the current variables, and a KL-divergence probe
/// against the variables the pass started from.
///
/// The context owns the wiring between variables and loss; in particular
/// it decides whether value estimates inside the loss are recomputed per
/// probe (gradient flows into the baseline) or cached (detached target).
pub trait OptimizationContext {
    /// Snapshot of the current variables.
    fn variables(&self) -> Vec<f32>;

    /// Overwrites the current variables.
    fn set_variables(&mut self, values: &[f32]);

    /// Loss at the current variables.
    fn loss(&mut self) -> f32;

    /// Divergence between the current variables and the snapshot taken
    /// when the pass started. Trust-region optimizers bound this.
    fn kl_divergence(&mut self) -> f32;
}

/// Performs one parameter-update step on an optimization context.
///
/// The contract is engine-free: derivative-free optimizers probe the loss
/// directly, gradient-based ones may estimate gradients through repeated
/// probes or bring their own machinery.
pub trait Optimizer {
    /// Minimizes the context's loss; returns the loss after the step.
    fn minimize(&mut self, context: &mut dyn OptimizationContext) -> Result<f32>;
}
