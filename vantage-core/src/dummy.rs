//! Reference implementations of the capability interfaces.
//!
//! These back the crate's tests and serve as minimal examples of the
//! traits: a row-vector batch, a linear policy with a dot-product value
//! head, simple objectives over it, and a derivative-free optimizer.
use crate::base::{BatchBase, Objective, OptimizationContext, Optimizer, Policy, TrainingBatch};
use anyhow::Result;

/// A batch of `f32` row vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VecBatch {
    rows: Vec<Vec<f32>>,
}

impl VecBatch {
    /// Wraps existing rows as a batch.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Self {
        Self { rows }
    }

    /// The rows held.
    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }
}

impl BatchBase for VecBatch {
    fn new(capacity: usize) -> Self {
        Self {
            rows: vec![Vec::new(); capacity],
        }
    }

    fn push(&mut self, ix: usize, data: &Self) {
        let capacity = self.rows.len();
        if capacity == 0 {
            return;
        }
        let mut j = ix % capacity;
        for row in &data.rows {
            self.rows[j] = row.clone();
            j += 1;
            if j == capacity {
                j = 0;
            }
        }
    }

    fn sample(&self, ixs: &[usize]) -> Self {
        Self {
            rows: ixs.iter().map(|&ix| self.rows[ix].clone()).collect(),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

fn dot(w: &[f32], x: &[f32]) -> f32 {
    w.iter().zip(x.iter()).map(|(a, b)| a * b).sum()
}

/// A linear policy: action and value are both `w . x` of the evaluated
/// state, with a configurable past horizon.
#[derive(Debug, Clone)]
pub struct LinearPolicy {
    weights: Vec<f32>,
    past_horizon: usize,
}

impl LinearPolicy {
    /// Creates a policy with the given weights and past horizon.
    pub fn new(weights: Vec<f32>, past_horizon: usize) -> Self {
        Self {
            weights,
            past_horizon,
        }
    }

    fn window_value(&self, states: &VecBatch, horizon: &(usize, usize)) -> f32 {
        let (offset, len) = *horizon;
        dot(&self.weights, &states.rows()[offset + len - 1])
    }
}

impl Policy<VecBatch, VecBatch, VecBatch, VecBatch> for LinearPolicy {
    fn act(
        &mut self,
        states: &VecBatch,
        internals: &VecBatch,
        _auxiliaries: &VecBatch,
        _deterministic: bool,
    ) -> (VecBatch, VecBatch) {
        let actions = states
            .rows()
            .iter()
            .map(|x| vec![dot(&self.weights, x)])
            .collect();
        (VecBatch::from_rows(actions), internals.clone())
    }

    fn internals_init(&self) -> VecBatch {
        VecBatch::from_rows(vec![vec![0.0]])
    }

    fn past_horizon(&self, _on_policy: bool) -> usize {
        self.past_horizon
    }

    fn states_value(
        &self,
        states: &VecBatch,
        horizons: &[(usize, usize)],
        _internals: &VecBatch,
        _auxiliaries: &VecBatch,
    ) -> Vec<f32> {
        horizons.iter().map(|h| self.window_value(states, h)).collect()
    }

    fn actions_value(
        &self,
        states: &VecBatch,
        horizons: &[(usize, usize)],
        _internals: &VecBatch,
        _auxiliaries: &VecBatch,
        actions: &VecBatch,
    ) -> Vec<f32> {
        horizons
            .iter()
            .zip(actions.rows())
            .map(|(h, a)| self.window_value(states, h) + a[0])
            .collect()
    }

    fn entropy(&self, batch: &TrainingBatch<VecBatch, VecBatch, VecBatch, VecBatch>) -> Vec<f32> {
        vec![0.0; batch.len()]
    }

    fn kl_divergence(
        &self,
        _batch: &TrainingBatch<VecBatch, VecBatch, VecBatch, VecBatch>,
        other: &[f32],
    ) -> f32 {
        self.weights
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    fn trainable_variables(&self) -> Vec<f32> {
        self.weights.clone()
    }

    fn set_trainable_variables(&mut self, values: &[f32]) {
        self.weights = values.to_vec();
    }
}

/// Squared error between the policy's state-value estimate and the
/// training reward. The natural baseline objective.
#[derive(Debug, Clone)]
pub struct ValueObjective;

impl<P> Objective<VecBatch, VecBatch, VecBatch, VecBatch, P> for ValueObjective
where
    P: Policy<VecBatch, VecBatch, VecBatch, VecBatch> + ?Sized,
{
    fn loss_per_instance(
        &self,
        policy: &P,
        batch: &TrainingBatch<VecBatch, VecBatch, VecBatch, VecBatch>,
    ) -> Vec<f32> {
        let values = policy.states_value(
            &batch.states,
            &batch.horizons,
            &batch.internals,
            &batch.auxiliaries,
        );
        values
            .iter()
            .zip(batch.reward.iter())
            .map(|(v, r)| (v - r) * (v - r))
            .collect()
    }
}

/// Score-style objective: negated training reward scaled by the
/// action-value estimate. A stand-in for a policy-gradient surrogate.
#[derive(Debug, Clone)]
pub struct ScoreObjective;

impl<P> Objective<VecBatch, VecBatch, VecBatch, VecBatch, P> for ScoreObjective
where
    P: Policy<VecBatch, VecBatch, VecBatch, VecBatch> + ?Sized,
{
    fn loss_per_instance(
        &self,
        policy: &P,
        batch: &TrainingBatch<VecBatch, VecBatch, VecBatch, VecBatch>,
    ) -> Vec<f32> {
        let values = policy.actions_value(
            &batch.states,
            &batch.horizons,
            &batch.internals,
            &batch.auxiliaries,
            &batch.actions,
        );
        values
            .iter()
            .zip(batch.reward.iter())
            .map(|(v, r)| -r * v)
            .collect()
    }
}

/// Coordinate-wise hill climbing over the loss probe. Accepts a step in
/// either direction per coordinate when it lowers the loss.
#[derive(Debug, Clone)]
pub struct HillClimbOptimizer {
    step: f32,
    iterations: usize,
}

impl HillClimbOptimizer {
    /// Creates an optimizer with the given step size and sweep count.
    pub fn new(step: f32, iterations: usize) -> Self {
        Self { step, iterations }
    }
}

impl Optimizer for HillClimbOptimizer {
    fn minimize(&mut self, context: &mut dyn OptimizationContext) -> Result<f32> {
        let mut current = context.variables();
        let mut best = context.loss();
        for _ in 0..self.iterations {
            for i in 0..current.len() {
                for &delta in &[self.step, -self.step] {
                    let mut probe = current.clone();
                    probe[i] += delta;
                    context.set_variables(&probe);
                    let loss = context.loss();
                    if loss < best {
                        best = loss;
                        current = probe;
                        break;
                    }
                }
            }
            context.set_variables(&current);
        }
        context.set_variables(&current);
        Ok(best)
    }
}
