//! The learner: experience buffering, update scheduling and batch
//! assembly around one agent.
use crate::{
    base::{BatchBase, Objective, OptimizationContext, Optimizer, Policy, TrainingBatch, Values},
    baseline::{BaselineOptimizer, BaselineTopology},
    config::{LearnerConfig, UpdateUnit},
    error::VantageError,
    estimator::Estimator,
    memory::Memory,
    record::{Record, RecordValue},
};
use anyhow::Result;
use chrono::Local;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Orchestrates experience ingestion and optimization passes.
///
/// Experience flows through the reward estimator's staging window into
/// memory; the scheduler decides after each observed timestep whether an
/// optimization pass fires on the committed records:
///
/// ```mermaid
/// flowchart LR
///     A[act]-->O[observe]
///     O-->E[estimator staging]
///     E-->M[memory ring]
///     O-->S{scheduler}
///     S-->|fires|B[optimize_baseline]
///     B-->P[optimize]
///     M-->P
/// ```
///
/// The baseline topology is resolved once at construction from the
/// optional baseline policy, objective and optimizer; all update-time
/// branching reads the resolved [`BaselineTopology`]. When no separate
/// baseline policy is given, value estimates come from the main policy.
pub struct Learner<S, I, X, A, P> {
    policy: P,
    baseline: Option<P>,
    objective: Box<dyn Objective<S, I, X, A, P>>,
    baseline_objective: Option<Box<dyn Objective<S, I, X, A, P>>>,
    optimizer: Box<dyn Optimizer>,
    baseline_optimizer: Option<Box<dyn Optimizer>>,
    topology: BaselineTopology,
    memory: Memory<S, I, X, A>,
    estimator: Estimator<S, I, X, A>,

    unit: UpdateUnit,
    batch_size: usize,
    /// Effective frequency in units; `None` disables scheduling.
    frequency: Option<usize>,
    /// Clamped start offset in units.
    start: usize,
    /// Unit count relative to `start` at the last update, -1 before any.
    last_update: i64,
    timesteps: usize,
    episodes: usize,
    updates: usize,

    /// Largest past horizon a batch instance needs.
    past_horizon: usize,
    l2_regularization: f32,
    entropy_regularization: f32,
}

/// Persistable learner state: trainable variables and the scheduling
/// counters. Staged-but-uncommitted estimator content is not persisted;
/// the acceptable loss window on restart is the staging buffer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Checkpoint {
    /// Main policy variables.
    pub policy_variables: Vec<f32>,

    /// Separate baseline variables, when the topology has them.
    pub baseline_variables: Option<Vec<f32>>,

    /// Scheduler position of the last update.
    pub last_update: i64,

    /// Global timestep counter.
    pub timesteps: usize,

    /// Global episode counter.
    pub episodes: usize,
}

impl Checkpoint {
    /// Constructs a [`Checkpoint`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let c = serde_yaml::from_reader(rdr)?;
        Ok(c)
    }

    /// Saves the [`Checkpoint`] as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

impl<S, I, X, A, P> Learner<S, I, X, A, P>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
    P: Policy<S, I, X, A>,
{
    /// Builds a learner, resolving the baseline topology and validating
    /// the configuration, including the memory capacity bound.
    pub fn build(
        config: LearnerConfig,
        policy: P,
        objective: Box<dyn Objective<S, I, X, A, P>>,
        optimizer: Box<dyn Optimizer>,
        baseline: Option<P>,
        baseline_objective: Option<Box<dyn Objective<S, I, X, A, P>>>,
        baseline_optimizer: BaselineOptimizer,
    ) -> Result<Self, VantageError> {
        config.validate()?;
        let topology = BaselineTopology::resolve(
            baseline.is_some(),
            baseline_objective.is_some(),
            &baseline_optimizer,
            config.reward_estimation.estimate_advantage,
        )?;

        let estimate_horizon = config
            .reward_estimation
            .estimate_horizon
            .unwrap_or(topology.default_estimate_horizon);
        let estimate_advantage = config
            .reward_estimation
            .estimate_advantage
            .unwrap_or(topology.default_estimate_advantage);
        let estimator = Estimator::new(
            config.reward_estimation.horizon,
            config.reward_estimation.discount,
            estimate_horizon,
            config.reward_estimation.estimate_actions,
            config.reward_estimation.estimate_terminal,
            estimate_advantage,
        );

        let policy_past = policy.past_horizon(true);
        let baseline_past = baseline
            .as_ref()
            .map(|b| b.past_horizon(true))
            .unwrap_or(policy_past);
        let past_horizon = estimator.max_past_horizon(policy_past, baseline_past);
        let future_horizon = estimator.max_future_horizon();

        let batch_size = config.update.batch_size;
        let min_capacity = match config.update.unit {
            UpdateUnit::Timesteps => batch_size + 1 + past_horizon + future_horizon,
            UpdateUnit::Episodes => {
                let max_episode_timesteps =
                    config.max_episode_timesteps.ok_or_else(|| {
                        VantageError::Config(
                            "episode-unit updates require max_episode_timesteps".into(),
                        )
                    })?;
                (batch_size + 1) * max_episode_timesteps
            }
        };
        if config.memory.capacity < min_capacity {
            return Err(VantageError::Config(format!(
                "memory capacity {} below required minimum {}",
                config.memory.capacity, min_capacity
            )));
        }

        // Records commit `horizon` timesteps after they are observed, so
        // the first firing must also cover the staging lag.
        let frequency = config.update.effective_frequency();
        let start = match (config.update.unit, frequency) {
            (_, None) => config.update.start,
            (UpdateUnit::Timesteps, Some(f)) => config.update.start.max(
                f.max(batch_size) + past_horizon + estimator.horizon() + future_horizon + 1,
            ),
            (UpdateUnit::Episodes, Some(f)) => config.update.start.max(f.max(batch_size)),
        };

        let baseline_optimizer = match baseline_optimizer {
            BaselineOptimizer::Module(module) => Some(module),
            _ => None,
        };

        info!(
            "baseline topology: trainable={}, separate_optimizer={}, \
             estimate_horizon={:?}, estimate_advantage={}",
            topology.is_trainable, topology.separate_optimizer, estimate_horizon,
            estimate_advantage
        );
        debug!(
            "scheduling: unit={:?}, frequency={:?}, start={} (past={}, future={})",
            config.update.unit, frequency, start, past_horizon, future_horizon
        );

        Ok(Self {
            policy,
            baseline,
            objective,
            baseline_objective,
            optimizer,
            baseline_optimizer,
            topology,
            memory: Memory::build(&config.memory),
            estimator,
            unit: config.update.unit,
            batch_size,
            frequency,
            start,
            last_update: -1,
            timesteps: 0,
            episodes: 0,
            updates: 0,
            past_horizon,
            l2_regularization: config.l2_regularization,
            entropy_regularization: config.entropy_regularization,
        })
    }

    /// Samples actions from the main policy. Pure with respect to the
    /// learner's counters and buffers.
    pub fn act(&mut self, states: &S, internals: &I, auxiliaries: &X, deterministic: bool) -> (A, I) {
        self.policy.act(states, internals, auxiliaries, deterministic)
    }

    /// Initial internal state for a new episode.
    pub fn internals_init(&self) -> I {
        self.policy.internals_init()
    }

    /// Records one observed timestep and runs an optimization pass if the
    /// scheduler fires. Returns the update's [`Record`] when one ran.
    pub fn observe(&mut self, values: &Values<S, I, X, A>) -> Result<Option<Record>> {
        if values.len() != 1 {
            return Err(VantageError::Precondition(format!(
                "observe takes exactly one record, got {}",
                values.len()
            ))
            .into());
        }
        self.ingest(values)?;
        if self.should_update() {
            self.last_update = self.unit_value() as i64 - self.start as i64;
            let record = self.run_update()?;
            debug!(
                "update at {:?} {}: loss {:?}",
                self.unit,
                self.unit_value(),
                record.get_scalar("loss")
            );
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Records a batch of episode-aligned timesteps without scheduling.
    ///
    /// The batch may contain at most one terminal record, which must be
    /// last, and no episode may be open in the staging buffer.
    pub fn experience(&mut self, values: &Values<S, I, X, A>) -> Result<(), VantageError> {
        if self.estimator.staged() > 0 {
            return Err(VantageError::Precondition(
                "experience while an episode is open in the staging buffer".into(),
            ));
        }
        self.ingest(values)
    }

    /// Runs an optimization pass immediately, regardless of the schedule.
    pub fn update(&mut self) -> Result<Record> {
        let u = self.unit_value() as i64 - self.start as i64;
        if u > self.last_update {
            self.last_update = u;
        }
        self.run_update()
    }

    /// Global timestep counter.
    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Global episode counter.
    pub fn episodes(&self) -> usize {
        self.episodes
    }

    /// Number of optimization passes run so far.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Flat snapshot of all trainable variables, main policy first, then
    /// the separate baseline when the topology has one. For external
    /// variable aggregation across learner instances.
    pub fn variables(&self) -> Vec<f32> {
        let mut vars = self.policy.trainable_variables();
        if let Some(b) = &self.baseline {
            vars.extend(b.trainable_variables());
        }
        vars
    }

    /// Overwrites all trainable variables from a flat snapshot laid out
    /// as [`Self::variables`] returns it. Counters and buffers are left
    /// untouched.
    pub fn set_variables(&mut self, values: &[f32]) -> Result<(), VantageError> {
        let split = self.policy.trainable_variables().len();
        let expected = split
            + self
                .baseline
                .as_ref()
                .map(|b| b.trainable_variables().len())
                .unwrap_or(0);
        if values.len() != expected {
            return Err(VantageError::Precondition(format!(
                "variable snapshot of length {}, topology has {}",
                values.len(),
                expected
            )));
        }
        self.policy.set_trainable_variables(&values[..split]);
        if let Some(b) = &mut self.baseline {
            b.set_trainable_variables(&values[split..]);
        }
        Ok(())
    }

    /// The resolved baseline topology.
    pub fn topology(&self) -> &BaselineTopology {
        &self.topology
    }

    /// The experience memory.
    pub fn memory(&self) -> &Memory<S, I, X, A> {
        &self.memory
    }

    /// The main policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// The separate baseline policy, when the topology has one.
    pub fn baseline(&self) -> Option<&P> {
        self.baseline.as_ref()
    }

    /// Snapshots the persistable state.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            policy_variables: self.policy.trainable_variables(),
            baseline_variables: self.baseline.as_ref().map(|b| b.trainable_variables()),
            last_update: self.last_update,
            timesteps: self.timesteps,
            episodes: self.episodes,
        }
    }

    /// Restores persistable state from a checkpoint.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), VantageError> {
        match (&mut self.baseline, &checkpoint.baseline_variables) {
            (Some(b), Some(vars)) => b.set_trainable_variables(vars),
            (None, None) => {}
            _ => {
                return Err(VantageError::Precondition(
                    "checkpoint baseline variables do not match the topology".into(),
                ))
            }
        }
        self.policy
            .set_trainable_variables(&checkpoint.policy_variables);
        self.last_update = checkpoint.last_update;
        self.timesteps = checkpoint.timesteps;
        self.episodes = checkpoint.episodes;
        Ok(())
    }

    fn unit_value(&self) -> usize {
        match self.unit {
            UpdateUnit::Timesteps => self.timesteps,
            UpdateUnit::Episodes => self.episodes,
        }
    }

    fn should_update(&self) -> bool {
        let frequency = match self.frequency {
            Some(f) => f as i64,
            None => return false,
        };
        let u = self.unit_value() as i64 - self.start as i64;
        u > self.last_update && u.rem_euclid(frequency) == 0
    }

    /// Validates terminal placement, advances counters, stages the
    /// records and commits whatever the estimator flushes.
    fn ingest(&mut self, values: &Values<S, I, X, A>) -> Result<(), VantageError> {
        let n = values.len();
        if n == 0 {
            return Ok(());
        }
        if values.states.len() != n
            || values.internals.len() != n
            || values.auxiliaries.len() != n
            || values.actions.len() != n
            || values.terminal.len() != n
        {
            return Err(VantageError::Precondition(format!(
                "mismatched component lengths in a batch of {} records",
                n
            )));
        }
        let terminals = values.terminal.iter().filter(|&&t| t != 0).count();
        if terminals > 1 {
            return Err(VantageError::Precondition(format!(
                "{} terminal records in one batch",
                terminals
            )));
        }
        if values.terminal[..n - 1].iter().any(|&t| t != 0) {
            return Err(VantageError::Precondition(
                "terminal record not in final position".into(),
            ));
        }
        self.timesteps += n;
        self.episodes += terminals;
        let estimation_policy = self.baseline.as_ref().unwrap_or(&self.policy);
        let (any, flushed) = self.estimator.enqueue(values, estimation_policy);
        if any {
            self.memory.push(&flushed);
        }
        Ok(())
    }

    fn run_update(&mut self) -> Result<Record> {
        let indices = match self.unit {
            UpdateUnit::Timesteps => self.memory.retrieve_timesteps(
                self.batch_size,
                self.past_horizon,
                self.estimator.future_horizon(),
            )?,
            UpdateUnit::Episodes => self.memory.retrieve_episodes(self.batch_size)?,
        };
        let mut record = Record::empty();
        if self.topology.separate_optimizer {
            let baseline_loss = self.optimize_baseline(&indices)?;
            record.insert("baseline_loss", RecordValue::Scalar(baseline_loss));
        }
        let loss = self.optimize(&indices)?;
        self.updates += 1;
        record.insert("loss", RecordValue::Scalar(loss));
        record.insert("num_instances", RecordValue::Scalar(indices.len() as f32));
        record.insert("num_updates", RecordValue::Scalar(self.updates as f32));
        record.insert("datetime", RecordValue::DateTime(Local::now()));
        Ok(record)
    }

    /// The main optimization pass over the batch at `indices`.
    fn optimize(&mut self, indices: &[usize]) -> Result<f32> {
        let joint_baseline = self.topology.is_trainable && self.topology.separate_policy;
        if joint_baseline {
            // Both are evaluated over the same retrieved windows.
            let policy_past = self.policy.past_horizon(true);
            let baseline_past = self
                .baseline
                .as_ref()
                .map(|b| b.past_horizon(true))
                .unwrap_or(policy_past);
            if policy_past != baseline_past {
                return Err(VantageError::Inconsistency(format!(
                    "policy past horizon {} differs from jointly trained baseline's {}",
                    policy_past, baseline_past
                ))
                .into());
            }
        }

        let raw: Vec<f32> = indices.iter().map(|&ix| self.memory.reward(ix)).collect();
        let estimation_policy = self.baseline.as_ref().unwrap_or(&self.policy);
        let completed = self
            .estimator
            .complete(indices, &raw, estimation_policy, &self.memory);
        let cached_reward = self
            .estimator
            .estimate(indices, &completed, estimation_policy, &self.memory);

        let start_policy = self.policy.trainable_variables();
        let policy_len = start_policy.len();
        let start_baseline = if joint_baseline {
            self.baseline.as_ref().map(|b| b.trainable_variables())
        } else {
            None
        };
        let mut context = MainContext {
            policy: &mut self.policy,
            baseline: self.baseline.as_mut(),
            memory: &self.memory,
            estimator: &self.estimator,
            topology: &self.topology,
            objective: self.objective.as_ref(),
            baseline_objective: self.baseline_objective.as_deref(),
            indices,
            completed,
            cached_reward,
            l2: self.l2_regularization,
            entropy_reg: self.entropy_regularization,
            policy_len,
            start_policy,
            start_baseline,
        };
        self.optimizer.minimize(&mut context)
    }

    /// The separate baseline pass. Runs before [`Self::optimize`] so the
    /// main pass completes its rewards against the updated baseline.
    fn optimize_baseline(&mut self, indices: &[usize]) -> Result<f32> {
        let raw: Vec<f32> = indices.iter().map(|&ix| self.memory.reward(ix)).collect();
        let estimation_policy = self.baseline.as_ref().unwrap_or(&self.policy);
        let completed = self
            .estimator
            .complete(indices, &raw, estimation_policy, &self.memory);

        let policy = match self.baseline.as_mut() {
            Some(b) => b,
            None => &mut self.policy,
        };
        let start_variables = policy.trainable_variables();
        let objective = self
            .baseline_objective
            .as_deref()
            .unwrap_or(self.objective.as_ref());
        let mut context = BaselineContext {
            policy,
            memory: &self.memory,
            objective,
            indices,
            reward: completed,
            l2: self.l2_regularization,
            start_variables,
        };
        let optimizer = self.baseline_optimizer.as_mut().ok_or_else(|| {
            VantageError::Inconsistency(
                "separate baseline pass without a baseline optimizer module".into(),
            )
        })?;
        optimizer.minimize(&mut context)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn assemble_batch<S, I, X, A>(
    memory: &Memory<S, I, X, A>,
    indices: &[usize],
    past: usize,
    reward: Vec<f32>,
) -> TrainingBatch<S, I, X, A>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
{
    let (horizons, states, internals) = memory.predecessors(indices, past);
    let own = memory.retrieve(indices);
    TrainingBatch {
        states,
        horizons,
        internals,
        auxiliaries: own.auxiliaries,
        actions: own.actions,
        reward,
    }
}

/// Optimization context of the main pass.
///
/// When the baseline is trained only through the advantage path, the
/// advantage is recomputed on every loss probe so variable changes reach
/// the loss through the baseline's value estimates. Otherwise the
/// advantage is a detached target, computed once when the pass starts.
struct MainContext<'a, S, I, X, A, P> {
    policy: &'a mut P,
    baseline: Option<&'a mut P>,
    memory: &'a Memory<S, I, X, A>,
    estimator: &'a Estimator<S, I, X, A>,
    topology: &'a BaselineTopology,
    objective: &'a dyn Objective<S, I, X, A, P>,
    baseline_objective: Option<&'a dyn Objective<S, I, X, A, P>>,
    indices: &'a [usize],
    completed: Vec<f32>,
    cached_reward: Vec<f32>,
    l2: f32,
    entropy_reg: f32,
    policy_len: usize,
    start_policy: Vec<f32>,
    start_baseline: Option<Vec<f32>>,
}

impl<'a, S, I, X, A, P> MainContext<'a, S, I, X, A, P>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
    P: Policy<S, I, X, A>,
{
    fn joint(&self) -> bool {
        self.topology.is_trainable && self.topology.separate_policy
    }

    fn estimation_policy(&self) -> &P {
        match &self.baseline {
            Some(b) => &**b,
            None => &*self.policy,
        }
    }
}

impl<'a, S, I, X, A, P> OptimizationContext for MainContext<'a, S, I, X, A, P>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
    P: Policy<S, I, X, A>,
{
    fn variables(&self) -> Vec<f32> {
        let mut vars = self.policy.trainable_variables();
        if self.joint() {
            if let Some(b) = &self.baseline {
                vars.extend(b.trainable_variables());
            }
        }
        vars
    }

    fn set_variables(&mut self, values: &[f32]) {
        let n = self.policy_len.min(values.len());
        self.policy.set_trainable_variables(&values[..n]);
        if self.joint() {
            if let Some(b) = &mut self.baseline {
                b.set_trainable_variables(&values[n..]);
            }
        }
    }

    fn loss(&mut self) -> f32 {
        let reward = if self.topology.is_baseline_optimized() {
            self.estimator.estimate(
                self.indices,
                &self.completed,
                self.estimation_policy(),
                self.memory,
            )
        } else {
            self.cached_reward.clone()
        };
        let batch = assemble_batch(
            self.memory,
            self.indices,
            self.policy.past_horizon(true),
            reward,
        );
        let mut loss = mean(&self.objective.loss_per_instance(&*self.policy, &batch));
        if self.entropy_reg != 0.0 {
            loss -= self.entropy_reg * mean(&self.policy.entropy(&batch));
        }
        if self.l2 != 0.0 {
            loss += self.l2 * self.variables().iter().map(|v| v * v).sum::<f32>();
        }
        if self.topology.is_trainable && self.topology.has_objective {
            if let Some(weight) = self.topology.loss_weight {
                let baseline_policy = self.estimation_policy();
                let baseline_objective = self.baseline_objective.unwrap_or(self.objective);
                let baseline_batch = assemble_batch(
                    self.memory,
                    self.indices,
                    baseline_policy.past_horizon(true),
                    self.completed.clone(),
                );
                loss += weight
                    * mean(&baseline_objective.loss_per_instance(baseline_policy, &baseline_batch));
            }
        }
        loss
    }

    fn kl_divergence(&mut self) -> f32 {
        let batch = assemble_batch(
            self.memory,
            self.indices,
            self.policy.past_horizon(true),
            self.cached_reward.clone(),
        );
        let mut kl = self.policy.kl_divergence(&batch, &self.start_policy);
        // The objective-less baseline is trained through the advantage
        // path only; its divergence is not part of the trust region.
        if self.joint() && self.topology.has_objective {
            if let (Some(b), Some(start)) = (&self.baseline, &self.start_baseline) {
                let baseline_batch = assemble_batch(
                    self.memory,
                    self.indices,
                    b.past_horizon(true),
                    self.completed.clone(),
                );
                kl += b.kl_divergence(&baseline_batch, start);
            }
        }
        kl
    }
}

/// Optimization context of the separate baseline pass: the baseline's
/// variables against its objective, with the completed reward as target.
struct BaselineContext<'a, S, I, X, A, P> {
    policy: &'a mut P,
    memory: &'a Memory<S, I, X, A>,
    objective: &'a dyn Objective<S, I, X, A, P>,
    indices: &'a [usize],
    reward: Vec<f32>,
    l2: f32,
    start_variables: Vec<f32>,
}

impl<'a, S, I, X, A, P> OptimizationContext for BaselineContext<'a, S, I, X, A, P>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
    P: Policy<S, I, X, A>,
{
    fn variables(&self) -> Vec<f32> {
        self.policy.trainable_variables()
    }

    fn set_variables(&mut self, values: &[f32]) {
        self.policy.set_trainable_variables(values);
    }

    fn loss(&mut self) -> f32 {
        let batch = assemble_batch(
            self.memory,
            self.indices,
            self.policy.past_horizon(true),
            self.reward.clone(),
        );
        let mut loss = mean(&self.objective.loss_per_instance(&*self.policy, &batch));
        if self.l2 != 0.0 {
            loss += self.l2 * self.variables().iter().map(|v| v * v).sum::<f32>();
        }
        loss
    }

    fn kl_divergence(&mut self) -> f32 {
        let batch = assemble_batch(
            self.memory,
            self.indices,
            self.policy.past_horizon(true),
            self.reward.clone(),
        );
        self.policy.kl_divergence(&batch, &self.start_variables)
    }
}
