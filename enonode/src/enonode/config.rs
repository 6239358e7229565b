// config.rs
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use clap::ValueEnum;
use enolearn::machine_learning::reinforcement_learning::{
    nstep_buffer::BufferConfig,
    rollout::{ActionPolicy, RolloutConfig},
};
use serde::{Deserialize, Serialize};

use super::{
    battery::BatteryConfig,
    env_error::{EnvError, EnvResult},
    harvester::{DayOrder, HarvesterConfig},
    reward::{IntervalMarks, MissPenalty, RewardPolicy},
    utility::UtilityProfile,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Number of discrete duty cycle levels, the size of the action space.
    pub duty_cycles: u32,
    /// Below this charge the node is forced into recovery.
    pub min_battery: f32,
    /// Scales the harvest into battery charge.
    pub harvest_factor: f32,
    /// Scales a duty cycle into battery drain.
    pub drain_factor: f32,
    pub battery: BatteryConfig,
    pub harvester: HarvesterConfig,
    pub reward: RewardPolicy,
    pub utility: Option<UtilityProfile>,
    pub day_order: DayOrder,
    pub log_data: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            duty_cycles: 10,
            min_battery: 0.1,
            harvest_factor: 0.02,
            drain_factor: 0.01,
            battery: BatteryConfig::default(),
            harvester: HarvesterConfig::default(),
            reward: RewardPolicy::default(),
            utility: None,
            day_order: DayOrder::Sequential,
            log_data: true,
        }
    }
}

impl NodeConfig {
    pub fn min_duty_cycle(&self) -> f32 {
        1.0 / self.duty_cycles.max(1) as f32
    }

    pub fn validate(&self) -> EnvResult<()> {
        if self.duty_cycles == 0 {
            return Err(EnvError::InvalidConfig(
                "at least one duty cycle is needed".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.min_battery) {
            return Err(EnvError::InvalidConfig(format!(
                "minimum battery must be within [0, 1), got {}",
                self.min_battery
            )));
        }
        if !(self.harvest_factor >= 0.0 && self.drain_factor > 0.0) {
            return Err(EnvError::InvalidConfig(format!(
                "harvest factor {} and drain factor {} must be non-negative and positive",
                self.harvest_factor, self.drain_factor
            )));
        }
        if self.reward.requires_utility() && self.utility.is_none() {
            return Err(EnvError::InvalidConfig(format!(
                "{:?} needs a utility profile",
                self.reward
            )));
        }
        self.battery.validate()?;
        self.harvester.validate()
    }
}

/// Node variants used in the experiments.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvPreset {
    Eno,
    EnoG99,
    EnoG999,
    /// Half the drain of `Eno`.
    EnoA,
    EnoB,
    /// `EnoB` with 5 duty cycles.
    EnoC,
    EnoT24,
    EnoT48,
    EnoT120,
    SparseA,
    SparseB,
    SparseC,
    NonSymmetric,
    Utility,
    UtilityRatio,
}

impl EnvPreset {
    pub fn node_config(&self) -> NodeConfig {
        let base = NodeConfig::default();
        let sparse = |marks| NodeConfig {
            reward: RewardPolicy::SparseInterval {
                marks,
                low_factor: 2.0,
                miss: MissPenalty::Constant,
            },
            ..NodeConfig::default()
        };
        let timeslots = |slots| NodeConfig {
            harvester: HarvesterConfig {
                timeslots_per_day: slots,
                prediction_horizon: slots,
                ..HarvesterConfig::default()
            },
            ..NodeConfig::default()
        };
        match self {
            EnvPreset::Eno => base,
            EnvPreset::EnoG99 => NodeConfig {
                reward: RewardPolicy::DenseLinear { scale: 0.1 },
                ..base
            },
            EnvPreset::EnoG999 => NodeConfig {
                reward: RewardPolicy::DenseLinear { scale: 0.01 },
                ..base
            },
            EnvPreset::EnoA => NodeConfig {
                drain_factor: 0.005,
                ..base
            },
            EnvPreset::EnoB => NodeConfig {
                harvest_factor: 0.01,
                drain_factor: 0.005,
                ..base
            },
            EnvPreset::EnoC => NodeConfig {
                duty_cycles: 5,
                harvest_factor: 0.01,
                drain_factor: 0.005,
                ..base
            },
            EnvPreset::EnoT24 => timeslots(24),
            EnvPreset::EnoT48 => timeslots(48),
            EnvPreset::EnoT120 => timeslots(120),
            EnvPreset::SparseA => sparse(IntervalMarks::DayEnd),
            EnvPreset::SparseB => sparse(IntervalMarks::HalfAndEnd),
            EnvPreset::SparseC => sparse(IntervalMarks::Quarters),
            EnvPreset::NonSymmetric => NodeConfig {
                reward: RewardPolicy::NonSymmetric,
                ..base
            },
            EnvPreset::Utility => NodeConfig {
                reward: RewardPolicy::UtilityTracking,
                utility: Some(UtilityProfile::Night),
                ..base
            },
            EnvPreset::UtilityRatio => NodeConfig {
                reward: RewardPolicy::UtilityRatio,
                utility: Some(UtilityProfile::Night),
                ..base
            },
        }
    }
}

/// Return horizon and discount of the learner.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepPreset {
    #[default]
    OneStep,
    FiveStepG95,
    FiveStepG99,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub node: NodeConfig,
    pub buffer: BufferConfig,
    pub rollout: RolloutConfig,
}

impl ExperimentConfig {
    /// Replay and exploration sizes scale with the timeslots per day.
    pub fn preset(env: EnvPreset, steps: StepPreset) -> Self {
        let node = env.node_config();
        let slots = node.harvester.timeslots_per_day;
        let (nsteps, gamma) = match steps {
            StepPreset::OneStep => (1, 0.9),
            StepPreset::FiveStepG95 => (5, 0.95),
            StepPreset::FiveStepG99 => (5, 0.99),
        };
        Self {
            node,
            buffer: BufferConfig {
                capacity: slots * 365 * 2,
                nsteps,
                gamma,
            },
            rollout: RolloutConfig {
                max_steps: slots * 365,
                replay_initial: slots * 10,
                batch_size: 32,
                epsilon_start: 1.0,
                epsilon_final: 0.01,
                epsilon_frames: slots * 30 * 6,
                policy: ActionPolicy::Greedy,
            },
        }
    }

    pub fn validate(&self) -> EnvResult<()> {
        self.node.validate()?;
        self.buffer.validate()?;
        self.rollout.validate()?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> EnvResult<()> {
        let config_str = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> EnvResult<Self> {
        let mut file = File::open(path)?;
        let mut config_str = String::new();
        file.read_to_string(&mut config_str)?;
        let config: ExperimentConfig = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::preset(EnvPreset::Eno, StepPreset::OneStep)
    }
}
