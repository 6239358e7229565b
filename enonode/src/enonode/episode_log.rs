use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use super::env_error::EnvResult;

/// Trajectory of one episode. `observations` holds one more entry than the per step logs, the
/// observation after reset comes first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeLog {
    pub observations: Vec<Vec<f32>>,
    /// Executed duty cycle, -1 while recovering.
    pub actions: Vec<f32>,
    pub eno: Vec<f32>,
    pub recovery: Vec<bool>,
    pub rewards: Vec<f32>,
}

/// One simulated slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Tick<'a> {
    pub observation: &'a [f32],
    pub action: f32,
    pub eno: f32,
    pub recovery: bool,
    pub reward: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub steps: usize,
    pub recovery_steps: usize,
    pub cumulative_reward: f32,
    pub mean_battery: f32,
    pub min_battery: f32,
}

impl EpisodeLog {
    pub fn record_observation(&mut self, observation: &[f32]) {
        self.observations.push(observation.to_vec());
    }

    pub fn record_step(&mut self, action: f32, eno: f32, recovery: bool, reward: f32) {
        self.actions.push(action);
        self.eno.push(eno);
        self.recovery.push(recovery);
        self.rewards.push(reward);
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.observations.is_empty()
    }

    /// Steps paired with the observation they were taken in.
    pub fn ticks(&self) -> impl Iterator<Item = Tick<'_>> {
        self.observations
            .iter()
            .zip(&self.actions)
            .zip(&self.eno)
            .zip(&self.recovery)
            .zip(&self.rewards)
            .map(|((((observation, &action), &eno), &recovery), &reward)| Tick {
                observation,
                action,
                eno,
                recovery,
                reward,
            })
    }

    pub fn summary(&self, battery_index: usize) -> EpisodeSummary {
        let batteries: Vec<f32> = self
            .observations
            .iter()
            .filter_map(|obs| obs.get(battery_index).copied())
            .collect();
        let (mean_battery, min_battery) = if batteries.is_empty() {
            (0.0, 0.0)
        } else {
            (
                batteries.iter().sum::<f32>() / batteries.len() as f32,
                batteries.iter().copied().fold(f32::INFINITY, f32::min),
            )
        };
        EpisodeSummary {
            steps: self.len(),
            recovery_steps: self.recovery.iter().filter(|&&r| r).count(),
            cumulative_reward: self.rewards.iter().sum(),
            mean_battery,
            min_battery,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> EnvResult<()> {
        let log_str = serde_json::to_string(self)?;
        let mut file = File::create(path)?;
        file.write_all(log_str.as_bytes())?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> EnvResult<Self> {
        let mut file = File::open(path)?;
        let mut log_str = String::new();
        file.read_to_string(&mut log_str)?;
        let log: EpisodeLog = serde_json::from_str(&log_str)?;
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> EpisodeLog {
        let mut log = EpisodeLog::default();
        log.record_observation(&[0.0, 0.1, 0.1, 0.7]);
        log.record_step(0.4, 0.002, false, 0.2);
        log.record_observation(&[0.1, 0.0, 0.1, 0.702]);
        log.record_step(-1.0, 0.0, true, -1.0);
        log.record_observation(&[0.2, 0.0, 0.1, 0.05]);
        log
    }

    #[test]
    fn test_ticks_pair_steps_with_observations() {
        let log = log();
        let ticks: Vec<Tick> = log.ticks().collect();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[1].observation, &[0.1, 0.0, 0.1, 0.702]);
        assert!(ticks[1].recovery);
        assert_eq!(ticks[0].action, 0.4);
    }

    #[test]
    fn test_summary() {
        let summary = log().summary(3);
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.recovery_steps, 1);
        assert!((summary.cumulative_reward + 0.8).abs() < 1e-6);
        assert_eq!(summary.min_battery, 0.05);
        assert!((summary.mean_battery - 1.452 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.json");
        let log = log();
        log.save(&path).unwrap();
        assert_eq!(EpisodeLog::load(&path).unwrap(), log);
        assert!(EpisodeLog::load(dir.path().join("missing.json")).is_err());
    }
}
