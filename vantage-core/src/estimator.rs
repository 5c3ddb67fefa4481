//! Reward estimation.
//!
//! A timestep's training reward often depends on rewards and value
//! estimates several timesteps ahead. The estimator stages records in a
//! small ring until that future context exists, then flushes them with
//! an n-step discounted reward sum. Terminal records drain the whole
//! stage with truncated sums, so no record ever waits on context from a
//! closed episode.
//!
//! Bootstrapping is governed by the estimate-horizon mode. `Early` folds
//! the discounted baseline value of the window-end state into the reward
//! at flush time, fixing it to the baseline of that moment. `Late` defers
//! it to [`Estimator::complete`] at update time, where the current
//! baseline and the committed successor records are available. `Off`
//! never bootstraps.
use crate::{
    base::{BatchBase, Policy, Values},
    config::EstimateHorizon,
    memory::Memory,
};

/// Staging buffer and reward-estimation engine.
pub struct Estimator<S, I, X, A> {
    horizon: usize,
    discount: f32,
    estimate_horizon: EstimateHorizon,
    estimate_actions: bool,
    estimate_terminal: bool,
    estimate_advantage: bool,
    /// Ring of staged records, capacity `horizon + 1`.
    buffer: Values<S, I, X, A>,
    start: usize,
    size: usize,
}

impl<S, I, X, A> Estimator<S, I, X, A>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
{
    /// Creates an estimator from already-resolved settings.
    pub fn new(
        horizon: usize,
        discount: f32,
        estimate_horizon: EstimateHorizon,
        estimate_actions: bool,
        estimate_terminal: bool,
        estimate_advantage: bool,
    ) -> Self {
        Self {
            horizon,
            discount,
            estimate_horizon,
            estimate_actions,
            estimate_terminal,
            estimate_advantage,
            buffer: Values::new(horizon + 1),
            start: 0,
            size: 0,
        }
    }

    /// Number of staged, not-yet-committed records.
    pub fn staged(&self) -> usize {
        self.size
    }

    /// Staging window length.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Whether advantage estimation is enabled.
    pub fn estimate_advantage(&self) -> bool {
        self.estimate_advantage
    }

    /// Committed future context a batch instance needs at update time.
    /// Only late bootstrapping reads successors out of memory.
    pub fn future_horizon(&self) -> usize {
        match self.estimate_horizon {
            EstimateHorizon::Late => self.horizon,
            _ => 0,
        }
    }

    /// Lower bound of [`Self::future_horizon`] over the estimator's life.
    pub fn min_future_horizon(&self) -> usize {
        self.future_horizon()
    }

    /// Upper bound of [`Self::future_horizon`] over the estimator's life.
    pub fn max_future_horizon(&self) -> usize {
        self.future_horizon()
    }

    /// Largest past horizon any batch instance needs, given the policy
    /// and baseline past horizons. The baseline is evaluated at the
    /// bootstrap state, which lies `future_horizon` ahead, so its window
    /// reaches back that much less.
    pub fn max_past_horizon(&self, policy_past: usize, baseline_past: usize) -> usize {
        policy_past.max(baseline_past.saturating_sub(self.future_horizon()))
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn slot(&self, k: usize) -> usize {
        (self.start + k) % self.capacity()
    }

    /// Stages the given records, flushing entries whose reward window is
    /// complete and draining everything when a terminal record arrives.
    /// Returns whether anything was flushed and the flushed records,
    /// ready to commit, in staging order.
    pub fn enqueue<P>(
        &mut self,
        values: &Values<S, I, X, A>,
        baseline: &P,
    ) -> (bool, Values<S, I, X, A>)
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        let mut flushed = Vec::new();
        for k in 0..values.len() {
            let record = values.get(k);
            let slot = self.slot(self.size);
            self.buffer.push(slot, &record);
            self.size += 1;
            if self.size > self.horizon {
                self.flush_complete(baseline, &mut flushed);
            }
            if record.terminal[0] != 0 {
                self.drain_all(baseline, &mut flushed);
            }
        }
        Self::combine(flushed)
    }

    /// Drains all staged records with truncated reward sums. Called when
    /// the newest staged record is terminal; also usable to abort an
    /// episode externally.
    pub fn reset<P>(&mut self, baseline: &P) -> Values<S, I, X, A>
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        let mut flushed = Vec::new();
        self.drain_all(baseline, &mut flushed);
        Self::combine(flushed).1
    }

    /// Adds the late discounted bootstrap to already-summed rewards of
    /// committed records. A no-op unless the mode is `Late`.
    ///
    /// The walk forward stops at the horizon or at a terminal record.
    /// Non-terminal window ends bootstrap with `discount^steps`; episode
    /// timeouts with `discount^(steps + 1)` when terminal estimation is
    /// enabled, since the timeout record's own reward is already in the
    /// sum; true terminals never bootstrap.
    pub fn complete<P>(
        &self,
        indices: &[usize],
        reward: &[f32],
        baseline: &P,
        memory: &Memory<S, I, X, A>,
    ) -> Vec<f32>
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        if self.estimate_horizon != EstimateHorizon::Late {
            return reward.to_vec();
        }
        let walked = memory.successors(indices, self.horizon);
        let ends: Vec<usize> = walked.iter().map(|&(_, end, _)| end).collect();
        let values = self.committed_values(&ends, baseline, memory);
        walked
            .iter()
            .zip(reward.iter())
            .zip(values.iter())
            .map(|((&(steps, _, kind), &r), &v)| match kind {
                0 => r + self.discount.powi(steps as i32) * v,
                2 if self.estimate_terminal => r + self.discount.powi(steps as i32 + 1) * v,
                _ => r,
            })
            .collect()
    }

    /// Subtracts the baseline value estimate of each instance's own state
    /// to produce an advantage signal. A no-op unless advantage
    /// estimation is enabled.
    pub fn estimate<P>(
        &self,
        indices: &[usize],
        reward: &[f32],
        baseline: &P,
        memory: &Memory<S, I, X, A>,
    ) -> Vec<f32>
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        if !self.estimate_advantage {
            return reward.to_vec();
        }
        let values = self.committed_values(indices, baseline, memory);
        reward
            .iter()
            .zip(values.iter())
            .map(|(r, v)| r - v)
            .collect()
    }

    /// Baseline values of committed records, evaluated with their full
    /// past-horizon windows.
    fn committed_values<P>(
        &self,
        indices: &[usize],
        baseline: &P,
        memory: &Memory<S, I, X, A>,
    ) -> Vec<f32>
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        let past = baseline.past_horizon(true);
        let (horizons, states, internals) = memory.predecessors(indices, past);
        let own = memory.retrieve(indices);
        if self.estimate_actions {
            baseline.actions_value(&states, &horizons, &internals, &own.auxiliaries, &own.actions)
        } else {
            baseline.states_value(&states, &horizons, &internals, &own.auxiliaries)
        }
    }

    /// Baseline value of the newest staged record, evaluated with the
    /// whole stage as its window.
    fn anchor_value<P>(&self, baseline: &P) -> f32
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        let slots: Vec<usize> = (0..self.size).map(|k| self.slot(k)).collect();
        let states = self.buffer.states.sample(&slots);
        let internals = self.buffer.internals.sample(&[self.slot(0)]);
        let newest = self.slot(self.size - 1);
        let auxiliaries = self.buffer.auxiliaries.sample(&[newest]);
        let horizons = [(0, self.size)];
        if self.estimate_actions {
            let actions = self.buffer.actions.sample(&[newest]);
            baseline.actions_value(&states, &horizons, &internals, &auxiliaries, &actions)[0]
        } else {
            baseline.states_value(&states, &horizons, &internals, &auxiliaries)[0]
        }
    }

    /// Flushes the oldest staged record with its full-window reward sum.
    /// The stage holds `horizon + 1` records here; the newest anchors the
    /// early bootstrap.
    fn flush_complete<P>(&mut self, baseline: &P, flushed: &mut Vec<Values<S, I, X, A>>)
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        debug_assert_eq!(self.size, self.horizon + 1);
        let mut reward = 0.0;
        let mut scale = 1.0;
        for k in 0..self.horizon {
            reward += scale * self.buffer.reward[self.slot(k)];
            scale *= self.discount;
        }
        if self.estimate_horizon == EstimateHorizon::Early {
            match self.buffer.terminal[self.slot(self.size - 1)] {
                0 => reward += scale * self.anchor_value(baseline),
                2 if self.estimate_terminal => {
                    reward += scale * self.discount * self.anchor_value(baseline)
                }
                _ => {}
            }
        }
        self.pop_oldest(reward, flushed);
    }

    /// Drains the whole stage with truncated reward sums.
    fn drain_all<P>(&mut self, baseline: &P, flushed: &mut Vec<Values<S, I, X, A>>)
    where
        P: Policy<S, I, X, A> + ?Sized,
    {
        if self.size == 0 {
            return;
        }
        let kind = self.buffer.terminal[self.slot(self.size - 1)];
        let bootstrap = match self.estimate_horizon {
            EstimateHorizon::Early if kind == 2 && self.estimate_terminal => {
                Some(self.anchor_value(baseline))
            }
            _ => None,
        };
        while self.size > 0 {
            let mut reward = 0.0;
            let mut scale = 1.0;
            for k in 0..self.size {
                reward += scale * self.buffer.reward[self.slot(k)];
                scale *= self.discount;
            }
            if let Some(v) = bootstrap {
                reward += scale * v;
            }
            self.pop_oldest(reward, flushed);
        }
    }

    fn pop_oldest(&mut self, reward: f32, flushed: &mut Vec<Values<S, I, X, A>>) {
        let mut record = self.buffer.get(self.start);
        record.reward[0] = reward;
        flushed.push(record);
        self.start = (self.start + 1) % self.capacity();
        self.size -= 1;
    }

    fn combine(flushed: Vec<Values<S, I, X, A>>) -> (bool, Values<S, I, X, A>) {
        let mut iter = flushed.into_iter();
        match iter.next() {
            None => (false, Values::new(0)),
            Some(first) => {
                let combined = iter.fold(first, |acc, v| Values::concat(&acc, &v));
                (true, combined)
            }
        }
    }
}
