use anyhow::Result;
use tempdir::TempDir;
use vantage_core::{
    dummy::{HillClimbOptimizer, LinearPolicy, ScoreObjective, ValueObjective, VecBatch},
    record::RecordValue,
    BaselineOptimizer, Checkpoint, EstimateHorizon, Estimator, Learner, LearnerConfig,
    MemoryConfig, OptimizationContext, Optimizer, Policy, RewardEstimationConfig, UpdateConfig,
    UpdateFrequency, UpdateUnit, Values,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const BATCH_SIZE: usize = 8;
const FREQUENCY: usize = 8;
const HORIZON: usize = 3;
const DISCOUNT: f32 = 0.99;
const CAPACITY: usize = 100;

type TestValues = Values<VecBatch, VecBatch, VecBatch, VecBatch>;
type TestLearner = Learner<VecBatch, VecBatch, VecBatch, VecBatch, LinearPolicy>;

fn record(state: f32, terminal: i8, reward: f32) -> TestValues {
    Values {
        states: VecBatch::from_rows(vec![vec![state]]),
        internals: VecBatch::from_rows(vec![vec![0.0]]),
        auxiliaries: VecBatch::from_rows(vec![vec![0.0]]),
        actions: VecBatch::from_rows(vec![vec![0.0]]),
        terminal: vec![terminal],
        reward: vec![reward],
    }
}

fn timestep_config() -> LearnerConfig {
    LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Timesteps, BATCH_SIZE)
            .frequency(UpdateFrequency::Every(FREQUENCY)),
        RewardEstimationConfig::new(HORIZON, DISCOUNT),
        MemoryConfig::new(CAPACITY),
    )
}

fn build_plain(config: LearnerConfig) -> Result<TestLearner> {
    Ok(Learner::build(
        config,
        LinearPolicy::new(vec![0.5], 0),
        Box::new(ScoreObjective),
        Box::new(HillClimbOptimizer::new(0.1, 3)),
        None,
        None,
        BaselineOptimizer::None,
    )?)
}

#[test]
fn scheduler_fires_at_the_clamped_start_and_every_frequency() -> Result<()> {
    init();
    let mut learner = build_plain(timestep_config())?;

    // Clamped start = frequency + staging horizon + 1 with no past or
    // future context here.
    let mut fired = Vec::new();
    for t in 1..=20 {
        if let Some(update) = learner.observe(&record(t as f32, 0, 1.0))? {
            fired.push(t);
            assert!(matches!(update.get("datetime"), Some(RecordValue::DateTime(_))));
            assert!(update.get_scalar("loss").is_some());
        }
    }
    assert_eq!(fired, vec![12, 20]);
    assert_eq!(learner.timesteps(), 20);
    assert_eq!(learner.updates(), 2);
    Ok(())
}

#[test]
fn never_frequency_disables_updates() -> Result<()> {
    let config = LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Timesteps, BATCH_SIZE).frequency(UpdateFrequency::Never),
        RewardEstimationConfig::new(HORIZON, DISCOUNT),
        MemoryConfig::new(CAPACITY),
    );
    let mut learner = build_plain(config)?;
    for t in 1..=40 {
        assert!(learner.observe(&record(t as f32, 0, 1.0))?.is_none());
    }
    assert!(learner.memory().len() > 0);
    Ok(())
}

#[test]
fn terminal_must_be_unique_and_last() -> Result<()> {
    let mut learner = build_plain(timestep_config())?;

    let two_terminals = TestValues::concat(&record(0.0, 1, 1.0), &record(1.0, 1, 1.0));
    assert!(learner.experience(&two_terminals).is_err());

    let misplaced = TestValues::concat(&record(0.0, 1, 1.0), &record(1.0, 0, 1.0));
    assert!(learner.experience(&misplaced).is_err());

    let episode = TestValues::concat(&record(0.0, 0, 1.0), &record(1.0, 1, 1.0));
    assert!(learner.experience(&episode).is_ok());
    assert_eq!(learner.episodes(), 1);
    Ok(())
}

#[test]
fn mismatched_component_lengths_are_a_precondition_error() -> Result<()> {
    let mut learner = build_plain(timestep_config())?;

    // Two rewards but a single row in every other component.
    let lopsided = TestValues {
        states: VecBatch::from_rows(vec![vec![0.0]]),
        internals: VecBatch::from_rows(vec![vec![0.0]]),
        auxiliaries: VecBatch::from_rows(vec![vec![0.0]]),
        actions: VecBatch::from_rows(vec![vec![0.0]]),
        terminal: vec![0, 0],
        reward: vec![1.0, 1.0],
    };
    assert!(learner.experience(&lopsided).is_err());
    assert_eq!(learner.timesteps(), 0);
    Ok(())
}

#[test]
fn experience_rejects_an_open_staging_episode() -> Result<()> {
    let mut learner = build_plain(timestep_config())?;
    learner.observe(&record(0.0, 0, 1.0))?;

    let episode = TestValues::concat(&record(1.0, 0, 1.0), &record(2.0, 1, 1.0));
    assert!(learner.experience(&episode).is_err());
    Ok(())
}

#[test]
fn undersized_memory_is_a_configuration_error() {
    let config = LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Timesteps, BATCH_SIZE),
        RewardEstimationConfig::new(HORIZON, DISCOUNT),
        MemoryConfig::new(5),
    );
    assert!(build_plain(config).is_err());
}

#[test]
fn baseline_weight_without_objective_is_a_configuration_error() {
    let result: Result<TestLearner, _> = Learner::build(
        timestep_config(),
        LinearPolicy::new(vec![0.5], 0),
        Box::new(ScoreObjective),
        Box::new(HillClimbOptimizer::new(0.1, 3)),
        None,
        None,
        BaselineOptimizer::Weight(0.5),
    );
    assert!(result.is_err());
}

#[test]
fn joint_value_head_trains_at_the_scheduled_update() -> Result<()> {
    // Shared policy with a baseline objective: joint training, late
    // bootstrapping by default.
    let mut learner: TestLearner = Learner::build(
        timestep_config(),
        LinearPolicy::new(vec![0.0], 0),
        Box::new(ScoreObjective),
        Box::new(HillClimbOptimizer::new(0.25, 5)),
        None,
        Some(Box::new(ValueObjective)),
        BaselineOptimizer::None,
    )?;
    let initial = learner.policy().trainable_variables();

    let mut fired = Vec::new();
    for t in 1..=16 {
        if learner.observe(&record(1.0, 0, 1.0))?.is_some() {
            fired.push(t);
        }
    }
    // Late bootstrapping adds the future retrieval margin to the clamp.
    assert_eq!(fired, vec![15]);
    assert_ne!(learner.policy().trainable_variables(), initial);
    Ok(())
}

#[test]
fn separate_baseline_updates_before_the_main_pass() -> Result<()> {
    init();
    let config = LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Timesteps, BATCH_SIZE)
            .frequency(UpdateFrequency::Every(FREQUENCY)),
        RewardEstimationConfig::new(HORIZON, DISCOUNT).estimate_advantage(true),
        MemoryConfig::new(CAPACITY),
    );
    let mut learner: TestLearner = Learner::build(
        config,
        LinearPolicy::new(vec![0.1], 0),
        Box::new(ScoreObjective),
        Box::new(HillClimbOptimizer::new(0.1, 3)),
        Some(LinearPolicy::new(vec![0.0], 0)),
        Some(Box::new(ValueObjective)),
        BaselineOptimizer::Module(Box::new(HillClimbOptimizer::new(0.25, 5))),
    )?;

    for _ in 0..14 {
        learner.observe(&record(1.0, 0, 1.0))?;
    }
    let snapshot = learner.baseline().map(|b| b.trainable_variables());
    let snapshot = match snapshot {
        Some(s) => s,
        None => unreachable!("topology has a separate baseline"),
    };

    let record_out = learner.update()?;
    assert!(record_out.get_scalar("baseline_loss").is_some());
    assert!(record_out.get_scalar("loss").is_some());

    let updated = match learner.baseline() {
        Some(b) => b.trainable_variables(),
        None => unreachable!(),
    };
    assert_ne!(updated, snapshot);

    // The advantage signal of the main pass reflects the post-update
    // baseline: re-estimating with the snapshot gives different values.
    let estimator: Estimator<VecBatch, VecBatch, VecBatch, VecBatch> =
        Estimator::new(HORIZON, DISCOUNT, EstimateHorizon::Late, false, false, true);
    let indices = [learner.memory().oldest()];
    let pre = estimator.estimate(
        &indices,
        &[0.0],
        &LinearPolicy::new(snapshot, 0),
        learner.memory(),
    );
    let post = estimator.estimate(
        &indices,
        &[0.0],
        &LinearPolicy::new(updated, 0),
        learner.memory(),
    );
    assert_ne!(pre, post);
    Ok(())
}

#[test]
fn episode_unit_updates_fire_on_terminals() -> Result<()> {
    let config = LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Episodes, 2).frequency(UpdateFrequency::Every(2)),
        RewardEstimationConfig::new(HORIZON, DISCOUNT),
        MemoryConfig::new(20),
    )
    .max_episode_timesteps(5);
    let mut learner = build_plain(config)?;

    let mut fired = Vec::new();
    let mut t = 0;
    for episode in 0..4 {
        for step in 0..3 {
            t += 1;
            let terminal = if step == 2 { 1 } else { 0 };
            if learner.observe(&record(episode as f32, terminal, 1.0))?.is_some() {
                fired.push(t);
            }
        }
    }
    // Episodes finish at timesteps 3, 6, 9, 12; updates at episode
    // counts 2 and 4.
    assert_eq!(fired, vec![6, 12]);
    Ok(())
}

#[test]
fn episode_unit_requires_a_length_bound() {
    let config = LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Episodes, 2),
        RewardEstimationConfig::new(HORIZON, DISCOUNT),
        MemoryConfig::new(20),
    );
    assert!(build_plain(config).is_err());
}

#[test]
fn checkpoint_roundtrip_restores_variables_and_counters() -> Result<()> {
    let mut learner = build_plain(timestep_config())?;
    for t in 1..=12 {
        learner.observe(&record(t as f32, 0, 1.0))?;
    }
    let checkpoint = learner.checkpoint();

    let dir = TempDir::new("learner_checkpoint")?;
    let path = dir.path().join("checkpoint.yaml");
    checkpoint.save(&path)?;
    let loaded = Checkpoint::load(&path)?;
    assert_eq!(checkpoint, loaded);

    let mut restored = build_plain(timestep_config())?;
    restored.restore(&loaded)?;
    assert_eq!(
        restored.policy().trainable_variables(),
        learner.policy().trainable_variables()
    );
    assert_eq!(restored.timesteps(), 12);
    Ok(())
}

/// Moves only the baseline's slice of the joint variable vector, then
/// reports the resulting divergence as the loss.
struct BaselineNudgeOptimizer;

impl Optimizer for BaselineNudgeOptimizer {
    fn minimize(&mut self, context: &mut dyn OptimizationContext) -> Result<f32> {
        let mut vars = context.variables();
        let n = vars.len();
        assert_eq!(n, 2, "one policy weight plus one baseline weight");
        vars[n - 1] += 1.0;
        context.set_variables(&vars);
        Ok(context.kl_divergence())
    }
}

#[test]
fn advantage_trained_baseline_stays_outside_the_trust_region() -> Result<()> {
    // Separate baseline policy with neither objective nor optimizer
    // module: trained through the advantage path only. Moving its
    // variables must not register as divergence of the main policy.
    let config = LearnerConfig::new(
        UpdateConfig::new(UpdateUnit::Timesteps, BATCH_SIZE).frequency(UpdateFrequency::Never),
        RewardEstimationConfig::new(HORIZON, DISCOUNT),
        MemoryConfig::new(CAPACITY),
    );
    let mut learner: TestLearner = Learner::build(
        config,
        LinearPolicy::new(vec![0.5], 0),
        Box::new(ScoreObjective),
        Box::new(BaselineNudgeOptimizer),
        Some(LinearPolicy::new(vec![0.0], 0)),
        None,
        BaselineOptimizer::None,
    )?;

    for t in 1..=14 {
        learner.observe(&record(t as f32, 0, 1.0))?;
    }
    let update = learner.update()?;
    assert_eq!(update.get_scalar("loss"), Some(0.0));

    // The nudge did reach the baseline through the joint vector.
    let baseline = match learner.baseline() {
        Some(b) => b.trainable_variables(),
        None => unreachable!("topology has a separate baseline"),
    };
    assert_eq!(baseline, vec![1.0]);
    Ok(())
}

#[test]
fn variable_sync_copies_across_learners_without_touching_counters() -> Result<()> {
    let mut source = build_plain(timestep_config())?;
    for t in 1..=12 {
        source.observe(&record(t as f32, 0, 1.0))?;
    }
    let snapshot = source.variables();

    let mut target: TestLearner = Learner::build(
        timestep_config(),
        LinearPolicy::new(vec![0.0], 0),
        Box::new(ScoreObjective),
        Box::new(HillClimbOptimizer::new(0.1, 3)),
        None,
        None,
        BaselineOptimizer::None,
    )?;
    target.set_variables(&snapshot)?;
    assert_eq!(target.variables(), snapshot);
    assert_eq!(target.timesteps(), 0);
    assert_eq!(target.updates(), 0);

    assert!(target.set_variables(&[0.0, 1.0]).is_err());
    Ok(())
}
