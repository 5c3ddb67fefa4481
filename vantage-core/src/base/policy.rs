//! Policy.
use super::TrainingBatch;

/// A policy over batched states, with the value-estimation surface the
/// update core needs from a baseline.
///
/// Implementations own their trainable parameters and expose them as a
/// flat variable vector; the update core never inspects parameter
/// structure, it only snapshots, restores and hands them to an
/// [`Optimizer`](super::Optimizer).
///
/// A single `internals` type covers the recurrent state of the whole
/// agent. When a separate recurrent baseline is used, its state is
/// encoded in the same type by the implementor.
pub trait Policy<S, I, X, A> {
    /// Samples actions for a batch of states and returns the next
    /// internal states. `deterministic` selects mode-seeking behavior;
    /// it is threaded explicitly through every call rather than held as
    /// shared mutable mode state.
    fn act(&mut self, states: &S, internals: &I, auxiliaries: &X, deterministic: bool) -> (A, I);

    /// Initial internal state at the start of an episode.
    fn internals_init(&self) -> I;

    /// Number of preceding timesteps this policy needs as context.
    fn past_horizon(&self, on_policy: bool) -> usize;

    /// State-value estimates, one per horizon window. Each window is a
    /// `(offset, length)` into `states`, the evaluated state being the
    /// last of the window.
    fn states_value(&self, states: &S, horizons: &[(usize, usize)], internals: &I, auxiliaries: &X)
        -> Vec<f32>;

    /// Action-value estimates, one per horizon window.
    fn actions_value(
        &self,
        states: &S,
        horizons: &[(usize, usize)],
        internals: &I,
        auxiliaries: &X,
        actions: &A,
    ) -> Vec<f32>;

    /// Per-instance action-distribution entropy.
    fn entropy(&self, batch: &TrainingBatch<S, I, X, A>) -> Vec<f32>;

    /// Divergence between this policy and the same policy with the given
    /// variable snapshot, evaluated on the batch. Used as a trust-region
    /// probe by optimizers.
    fn kl_divergence(&self, batch: &TrainingBatch<S, I, X, A>, other: &[f32]) -> f32;

    /// Flat snapshot of the trainable variables.
    fn trainable_variables(&self) -> Vec<f32>;

    /// Restores the trainable variables from a flat snapshot.
    fn set_trainable_variables(&mut self, values: &[f32]);
}
