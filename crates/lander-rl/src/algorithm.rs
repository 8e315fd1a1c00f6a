//! Learning algorithms
//!
//! Both update rules run against a [`ValueStore`] through an
//! [`UpdateContext`] that bundles the learning parameters with the reward
//! formulas of the definition being trained. Rewards are evaluated against
//! the state first and the action second, so a formula such as
//! `-Abs(thrust)` can read action fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use lander_core::{Expression, LanderError, Result};

use crate::definition::MdpDefinition;
use crate::episode::{StateActionPair, Trajectory};
use crate::state::{QuantizedRecord, State};
use crate::store::ValueStore;

/// Weight of the terminal altitude penalty.
pub const OUT_OF_BOUNDS_PENALTY: f64 = 10_000.0;

/// Terminal `|positionZ|` above which the penalty applies.
pub const OUT_OF_BOUNDS_ALTITUDE: f64 = 0.5;

/// Update rule a definition trains with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearningAlgorithm {
    /// Episode-terminal backward update.
    #[serde(rename = "MC", alias = "mc")]
    MonteCarlo,
    /// One-step online update.
    #[serde(rename = "TD0", alias = "td0")]
    TemporalDifference,
}

impl LearningAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            LearningAlgorithm::MonteCarlo => "MC",
            LearningAlgorithm::TemporalDifference => "TD0",
        }
    }
}

impl fmt::Display for LearningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningAlgorithm {
    type Err = LanderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MC" => Ok(LearningAlgorithm::MonteCarlo),
            "TD0" => Ok(LearningAlgorithm::TemporalDifference),
            other => Err(LanderError::Definition(format!("unknown learning method '{other}'"))),
        }
    }
}

/// Hyperparameters of one definition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningParams {
    /// Discount applied per step when walking a trajectory backward (MC).
    pub discount: f64,
    /// Discount of the bootstrapped value (TD0).
    pub step_discount: f64,
    pub alpha: f64,
    /// Probability of a uniformly random action.
    pub exploration: f64,
}

impl Default for LearningParams {
    fn default() -> Self {
        Self {
            discount: 0.999,
            step_discount: 0.9,
            alpha: 0.1,
            exploration: 0.05,
        }
    }
}

impl LearningParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let unit = |name: &str, value: f64| {
            if value.is_finite() && (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(format!("{name} must be within [0, 1], got {value}"))
            }
        };
        unit("discount", self.discount)?;
        unit("step_discount", self.step_discount)?;
        unit("exploration", self.exploration)?;
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(format!("alpha must be within (0, 1], got {}", self.alpha));
        }
        Ok(())
    }
}

/// Everything an update needs besides the trajectory.
#[derive(Clone, Copy)]
pub struct UpdateContext<'a> {
    pub store: &'a ValueStore,
    pub params: &'a LearningParams,
    pub reward: Option<&'a Expression>,
    pub terminal_reward: Option<&'a Expression>,
}

impl<'a> UpdateContext<'a> {
    /// Context wired from a definition's compiled formulas.
    pub fn new(definition: &'a MdpDefinition, store: &'a ValueStore) -> Self {
        Self {
            store,
            params: definition.params(),
            reward: definition.reward(),
            terminal_reward: definition.terminal_reward(),
        }
    }

    /// Step reward of a pair; an absent reward formula contributes 0.
    pub fn reward(&self, pair: &StateActionPair) -> f64 {
        self.reward
            .map_or(0.0, |r| r.evaluate_best_guess(&pair.state, &pair.action))
    }

    pub fn terminal_reward(&self, pair: &StateActionPair) -> Option<f64> {
        self.terminal_reward
            .map(|r| r.evaluate_best_guess(&pair.state, &pair.action))
    }
}

fn out_of_bounds_penalty(state: &State) -> f64 {
    let altitude = state.get_double("positionZ").abs();
    if altitude > OUT_OF_BOUNDS_ALTITUDE {
        OUT_OF_BOUNDS_PENALTY * altitude
    } else {
        0.0
    }
}

/// Monte Carlo terminal update.
///
/// Walks the trajectory backward under one batch lock. Each step moves its
/// value toward the running return `G`, which starts at the terminal reward
/// minus the altitude penalty and then becomes `discount * G + reward(pair)`.
/// Returns the number of updated steps; nothing happens without a terminal
/// reward.
pub fn monte_carlo(ctx: &UpdateContext<'_>, trajectory: &Trajectory) -> Result<usize> {
    let pairs = trajectory.pairs();
    let Some(last) = pairs.last() else {
        return Ok(0);
    };
    let Some(terminal) = ctx.terminal_reward(last) else {
        return Ok(0);
    };

    let mut g = terminal - out_of_bounds_penalty(&last.state);
    let indices: Vec<u64> = pairs.iter().map(|pair| pair.index).collect();
    let alpha = ctx.params.alpha;
    let discount = ctx.params.discount;

    let mut batch = ctx.store.batch(&indices)?;
    for pair in pairs.iter().rev() {
        let value = f64::from(batch.get(pair.index).unwrap_or(0.0));
        batch.set(pair.index, (value + alpha * (g - value)) as f32);
        g = discount * g + ctx.reward(pair);
    }
    drop(batch);

    trace!(key = %trajectory.key(), steps = pairs.len(), "Monte Carlo update applied");
    Ok(pairs.len())
}

/// TD(0) update of the second most recent pair from the most recent one.
///
/// Returns `false` when fewer than two pairs exist or the two states are
/// quantization-equivalent.
pub fn td_zero(ctx: &UpdateContext<'_>, trajectory: &Trajectory) -> Result<bool> {
    let pairs = trajectory.pairs();
    let [.., previous, current] = pairs else {
        return Ok(false);
    };
    if previous.state == current.state {
        return Ok(false);
    }

    let target = ctx.reward(current) + ctx.params.step_discount * f64::from(ctx.store.get(current.index)?);
    let alpha = ctx.params.alpha;
    ctx.store.update(previous.index, |old| {
        let old = f64::from(old);
        (old + alpha * (target - old)) as f32
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!("mc".parse::<LearningAlgorithm>().unwrap(), LearningAlgorithm::MonteCarlo);
        assert_eq!("TD0".parse::<LearningAlgorithm>().unwrap(), LearningAlgorithm::TemporalDifference);
        assert!("sarsa".parse::<LearningAlgorithm>().is_err());
        assert_eq!(LearningAlgorithm::TemporalDifference.to_string(), "TD0");

        let json = serde_json::to_string(&LearningAlgorithm::MonteCarlo).unwrap();
        assert_eq!(json, "\"MC\"");
        let parsed: LearningAlgorithm = serde_json::from_str("\"td0\"").unwrap();
        assert_eq!(parsed, LearningAlgorithm::TemporalDifference);
    }

    #[test]
    fn test_params_validation() {
        assert!(LearningParams::default().validate().is_ok());

        let zero_alpha = LearningParams {
            alpha: 0.0,
            ..Default::default()
        };
        assert!(zero_alpha.validate().is_err());

        let bad_discount = LearningParams {
            discount: 1.5,
            ..Default::default()
        };
        assert!(bad_discount.validate().unwrap_err().contains("discount"));

        let nan = LearningParams {
            exploration: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }
}
