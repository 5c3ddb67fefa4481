//! Baseline topology resolution.
//!
//! A baseline setup is given by three independent optional inputs: a
//! separate baseline policy, a baseline objective, and a baseline
//! optimizer (absent, a loss-weight scalar, or a full module). Twelve
//! combinations exist; three are invalid. The combination is resolved
//! once at construction into an immutable [`BaselineTopology`] and all
//! downstream logic switches on the resolved struct, never re-deriving
//! the topology.
//!
//! Resolution table (policy, objective, optimizer):
//!
//! | Policy | Objective | Optimizer | Result                                        |
//! |--------|-----------|-----------|-----------------------------------------------|
//! | n      | n         | none      | no baseline training, no bootstrap            |
//! | n      | n         | weight    | invalid                                       |
//! | n      | n         | module    | invalid                                       |
//! | n      | y         | none      | trainable, joint, weight 1.0                  |
//! | n      | y         | weight    | trainable, joint, given weight                |
//! | n      | y         | module    | separate pass on the main policy              |
//! | y      | n         | none      | trainable through the advantage path          |
//! | y      | n         | weight    | invalid                                       |
//! | y      | n         | module    | separate pass, falls back to main objective   |
//! | y      | y         | none      | trainable, joint, weight 1.0                  |
//! | y      | y         | weight    | trainable, joint, given weight                |
//! | y      | y         | module    | separate pass                                 |
use crate::{
    base::Optimizer,
    config::EstimateHorizon,
    error::VantageError,
};

/// Baseline optimizer input, by shape.
pub enum BaselineOptimizer {
    /// No baseline optimizer.
    None,

    /// Baseline loss folded into the main loss with this weight.
    Weight(f32),

    /// A separate optimization pass with this module.
    Module(Box<dyn Optimizer>),
}

/// Immutable result of baseline topology resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineTopology {
    /// A separate baseline policy instance exists.
    pub separate_policy: bool,

    /// A baseline objective exists.
    pub has_objective: bool,

    /// The baseline is trained as part of the main optimization pass.
    pub is_trainable: bool,

    /// Weight of the baseline loss inside the main loss, when joint.
    pub loss_weight: Option<f32>,

    /// The baseline has its own optimization pass.
    pub separate_optimizer: bool,

    /// Default bootstrap mode when `reward_estimation` leaves it unset.
    pub default_estimate_horizon: EstimateHorizon,

    /// Default advantage estimation when `reward_estimation` leaves it
    /// unset.
    pub default_estimate_advantage: bool,
}

impl BaselineTopology {
    /// Resolves the topology from the three inputs.
    ///
    /// `estimate_advantage_override` is the explicit `reward_estimation`
    /// setting, if any; it participates in validity (a baseline that is
    /// neither given an objective nor allowed to train through the
    /// advantage path would not be part of training at all).
    pub fn resolve(
        separate_policy: bool,
        has_objective: bool,
        optimizer: &BaselineOptimizer,
        estimate_advantage_override: Option<bool>,
    ) -> Result<Self, VantageError> {
        let (separate_optimizer, loss_weight) = match optimizer {
            BaselineOptimizer::None => (false, if has_objective { Some(1.0) } else { None }),
            BaselineOptimizer::Weight(w) => {
                if !has_objective {
                    return Err(VantageError::Config(
                        "baseline optimizer weight given without a baseline objective".into(),
                    ));
                }
                (false, Some(*w))
            }
            BaselineOptimizer::Module(_) => {
                if !has_objective && !separate_policy {
                    return Err(VantageError::Config(
                        "baseline optimizer module given without a baseline objective \
                         or baseline policy"
                            .into(),
                    ));
                }
                (true, None)
            }
        };

        let is_trainable = (separate_policy || has_objective) && !separate_optimizer;
        if is_trainable && !has_objective && !estimate_advantage_override.unwrap_or(true) {
            return Err(VantageError::Config(
                "baseline policy without objective or optimizer requires advantage \
                 estimation to be part of training"
                    .into(),
            ));
        }

        let default_estimate_horizon =
            if !separate_policy && !separate_optimizer && !has_objective {
                EstimateHorizon::Off
            } else {
                EstimateHorizon::Late
            };
        let default_estimate_advantage = separate_policy && !has_objective && !separate_optimizer;

        Ok(Self {
            separate_policy,
            has_objective,
            is_trainable,
            loss_weight,
            separate_optimizer,
            default_estimate_horizon,
            default_estimate_advantage,
        })
    }

    /// True when the baseline is trained only through the advantage path,
    /// so the advantage term must carry gradient into it.
    pub fn is_baseline_optimized(&self) -> bool {
        self.separate_policy && !self.separate_optimizer && !self.has_objective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::OptimizationContext;
    use anyhow::Result;

    struct NoopOptimizer;

    impl Optimizer for NoopOptimizer {
        fn minimize(&mut self, context: &mut dyn OptimizationContext) -> Result<f32> {
            Ok(context.loss())
        }
    }

    fn module() -> BaselineOptimizer {
        BaselineOptimizer::Module(Box::new(NoopOptimizer))
    }

    #[test]
    fn all_twelve_rows() {
        use EstimateHorizon::{Late, Off};

        // (policy, objective, optimizer) -> Ok((is_trainable, horizon, advantage)) or invalid
        let rows: Vec<(bool, bool, BaselineOptimizer, Option<(bool, EstimateHorizon, bool)>)> = vec![
            (false, false, BaselineOptimizer::None, Some((false, Off, false))),
            (false, false, BaselineOptimizer::Weight(0.5), None),
            (false, false, module(), None),
            (false, true, BaselineOptimizer::None, Some((true, Late, false))),
            (false, true, BaselineOptimizer::Weight(0.5), Some((true, Late, false))),
            (false, true, module(), Some((false, Late, false))),
            (true, false, BaselineOptimizer::None, Some((true, Late, true))),
            (true, false, BaselineOptimizer::Weight(0.5), None),
            (true, false, module(), Some((false, Late, false))),
            (true, true, BaselineOptimizer::None, Some((true, Late, false))),
            (true, true, BaselineOptimizer::Weight(0.5), Some((true, Late, false))),
            (true, true, module(), Some((false, Late, false))),
        ];

        for (policy, objective, optimizer, expected) in &rows {
            let resolved = BaselineTopology::resolve(*policy, *objective, optimizer, None);
            match expected {
                None => assert!(
                    resolved.is_err(),
                    "expected invalid: policy={} objective={}",
                    policy,
                    objective
                ),
                Some((is_trainable, horizon, advantage)) => {
                    let t = resolved.expect("expected valid row");
                    assert_eq!(t.is_trainable, *is_trainable);
                    assert_eq!(t.default_estimate_horizon, *horizon);
                    assert_eq!(t.default_estimate_advantage, *advantage);
                }
            }
        }
    }

    #[test]
    fn joint_weights() {
        let t = BaselineTopology::resolve(false, true, &BaselineOptimizer::None, None).unwrap();
        assert_eq!(t.loss_weight, Some(1.0));

        let t =
            BaselineTopology::resolve(true, true, &BaselineOptimizer::Weight(0.25), None).unwrap();
        assert_eq!(t.loss_weight, Some(0.25));

        let t = BaselineTopology::resolve(true, true, &module(), None).unwrap();
        assert_eq!(t.loss_weight, None);
        assert!(t.separate_optimizer);
    }

    #[test]
    fn advantage_opt_out_makes_untrained_baseline_invalid() {
        // Baseline policy alone is trained through the advantage path;
        // explicitly disabling advantage estimation leaves it untrained.
        let resolved =
            BaselineTopology::resolve(true, false, &BaselineOptimizer::None, Some(false));
        assert!(resolved.is_err());

        let resolved =
            BaselineTopology::resolve(true, false, &BaselineOptimizer::None, Some(true));
        assert!(resolved.is_ok());
    }
}
