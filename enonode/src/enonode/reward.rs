// reward.rs
use std::collections::VecDeque;

use enolearn::machine_learning::reinforcement_learning::environment::Reward;
use serde::{Deserialize, Serialize};

use super::node_model::Observation;

pub const RECOVERY_REWARD: Reward = -1.0;

/// Timeslots within a day at which a sparse reward is paid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalMarks {
    DayEnd,
    HalfAndEnd,
    Quarters,
}

impl IntervalMarks {
    pub fn contains(&self, slot: usize, slots_per_day: usize) -> bool {
        let end = slots_per_day - 1;
        let half = slots_per_day / 2;
        match self {
            IntervalMarks::DayEnd => slot == end,
            IntervalMarks::HalfAndEnd => slot == half || slot == end,
            IntervalMarks::Quarters => {
                slot == slots_per_day / 4 || slot == half || slot == 3 * slots_per_day / 4 || slot == end
            }
        }
    }
}

/// What a sparse reward pays when the mean charge left the safe band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissPenalty {
    Constant,
    /// Grows with the distance from half charge.
    Graded,
}

/// Everything a reward may depend on. The observation is the one the action was taken in.
#[derive(Clone, Copy, Debug)]
pub struct RewardContext<'a> {
    pub recovery: bool,
    /// Duty cycle of the proposed action, whether or not it was executed.
    pub duty_cycle: f32,
    pub observation: &'a Observation,
    pub slot: usize,
    pub slots_per_day: usize,
    pub min_battery: f32,
    /// Battery charge of the most recent observations, the current one last.
    pub battery_history: &'a VecDeque<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RewardPolicy {
    /// Peaks at half charge and falls linearly to -1 at empty and full.
    DenseLinear { scale: f32 },
    /// Steeper penalty for low than for high charge.
    NonSymmetric,
    /// Serving less than demanded costs, serving more pays the utility.
    UtilityTracking,
    UtilityRatio,
    SparseInterval {
        marks: IntervalMarks,
        /// Safe band is `(low_factor * min_battery, 1 - low_factor * min_battery)`.
        low_factor: f32,
        miss: MissPenalty,
    },
}

impl Default for RewardPolicy {
    fn default() -> Self {
        RewardPolicy::DenseLinear { scale: 1.0 }
    }
}

impl RewardPolicy {
    pub fn requires_utility(&self) -> bool {
        matches!(
            self,
            RewardPolicy::UtilityTracking | RewardPolicy::UtilityRatio
        )
    }

    pub fn reward(&self, ctx: &RewardContext) -> Reward {
        if ctx.recovery {
            return RECOVERY_REWARD;
        }
        let battery = ctx.observation.battery();
        match self {
            RewardPolicy::DenseLinear { scale } => ((0.5 - (battery - 0.5).abs()) * 4.0 - 1.0) * scale,
            RewardPolicy::NonSymmetric => {
                if battery < 0.5 {
                    5.0 * battery - 1.5
                } else {
                    -2.0 * (battery - 1.0)
                }
            }
            RewardPolicy::UtilityTracking => {
                let utility = ctx.observation.utility().unwrap_or(0.0);
                let shortfall = utility - ctx.duty_cycle;
                if shortfall <= 0.0 {
                    utility
                } else {
                    1.0 - shortfall / 0.9
                }
            }
            RewardPolicy::UtilityRatio => {
                let utility = ctx.observation.utility().unwrap_or(0.0);
                (2.0 * ctx.duty_cycle / utility).clamp(0.0, 1.0)
            }
            RewardPolicy::SparseInterval {
                marks,
                low_factor,
                miss,
            } => {
                if !marks.contains(ctx.slot, ctx.slots_per_day) {
                    return 0.0;
                }
                let mean = previous_mean(ctx.battery_history, battery);
                let low = low_factor * ctx.min_battery;
                if low < mean && mean < 1.0 - low {
                    1.0
                } else {
                    match miss {
                        MissPenalty::Constant => -1.0,
                        MissPenalty::Graded => 1.5 - 5.0 * (mean - 0.5).abs(),
                    }
                }
            }
        }
    }
}

/// Mean over the history without its newest entry.
fn previous_mean(history: &VecDeque<f32>, current: f32) -> f32 {
    let previous = history.len().saturating_sub(1);
    if previous == 0 {
        return current;
    }
    history.iter().take(previous).sum::<f32>() / previous as f32
}
