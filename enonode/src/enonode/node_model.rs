extern crate enolearn;

use std::{collections::VecDeque, sync::Arc};

use enolearn::machine_learning::reinforcement_learning::{
    environment::{RLEnvironment, RLState, Reward, Step},
    rl_error::{RLError, RLResult},
};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    battery::Battery,
    config::NodeConfig,
    env_error::EnvResult,
    episode_log::EpisodeLog,
    harvester::{HarvestReading, Harvester},
    reward::RewardContext,
    solar_data::{InMemorySolarArchive, SolarArchive},
};

/// Executed duty cycle logged for a recovery step.
pub const RECOVERY_ACTION: f32 = -1.0;

/// `[time, harvested, predicted, battery]`, followed by the utility when the node has a demand
/// profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation(Vec<f32>);

impl Observation {
    pub fn new(time: f32, harvested: f32, predicted: f32, battery: f32, utility: Option<f32>) -> Self {
        let mut values = vec![time, harvested, predicted, battery];
        values.extend(utility);
        Self(values)
    }

    pub fn time(&self) -> f32 {
        self.0[0]
    }

    pub fn harvested(&self) -> f32 {
        self.0[1]
    }

    pub fn predicted(&self) -> f32 {
        self.0[2]
    }

    pub fn battery(&self) -> f32 {
        self.0[3]
    }

    pub fn utility(&self) -> Option<f32> {
        self.0.get(4).copied()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl AsRef<[f32]> for Observation {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

impl RLState for Observation {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub recovery: bool,
    /// Duty cycle the node ran with, [`RECOVERY_ACTION`] when it was recharging.
    pub executed: f32,
    /// Net energy that went into the battery.
    pub eno: f32,
    pub day_end: bool,
    pub day: usize,
}

/// Sensor node with a solar harvester and a battery.
///
/// In normal mode a proposed duty cycle is run if the battery can cover its deficit. Otherwise,
/// or once the charge drops below `min_battery`, the node stops sensing and recharges until the
/// charge exceeds the initial charge again.
pub struct NodeEnvironment {
    config: NodeConfig,
    archive: Arc<dyn SolarArchive>,
    rng: XorShiftRng,
    harvester: Harvester,
    battery: Battery,
    reading: HarvestReading,
    observation: Observation,
    recovery: bool,
    finished: bool,
    battery_history: VecDeque<f32>,
    log: EpisodeLog,
    cumulative_reward: Reward,
}

impl NodeEnvironment {
    /// Loads the solar data of `location` and `year` and resets to its first slot.
    pub fn new(
        config: NodeConfig,
        archive: Arc<dyn SolarArchive>,
        location: &str,
        year: u32,
        seed: u64,
    ) -> EnvResult<Self> {
        config.validate()?;
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let harvester = Self::load_harvester(&config, archive.as_ref(), location, year, &mut rng)?;
        Self::with_harvester(config, archive, harvester, rng)
    }

    /// Runs on prepared streams, e.g. synthetic ones.
    pub fn from_harvester(config: NodeConfig, harvester: Harvester, seed: u64) -> EnvResult<Self> {
        config.validate()?;
        let archive = Arc::new(InMemorySolarArchive::new());
        Self::with_harvester(config, archive, harvester, XorShiftRng::seed_from_u64(seed))
    }

    fn with_harvester(
        config: NodeConfig,
        archive: Arc<dyn SolarArchive>,
        harvester: Harvester,
        rng: XorShiftRng,
    ) -> EnvResult<Self> {
        let battery = Battery::new(&config.battery)?;
        let reading = harvester.current();
        let observation = Observation::new(0.0, 0.0, 0.0, battery.state(), None);
        let mut env = Self {
            config,
            archive,
            rng,
            harvester,
            battery,
            reading,
            observation,
            recovery: false,
            finished: false,
            battery_history: VecDeque::new(),
            log: EpisodeLog::default(),
            cumulative_reward: 0.0,
        };
        env.rewind()?;
        Ok(env)
    }

    fn load_harvester(
        config: &NodeConfig,
        archive: &dyn SolarArchive,
        location: &str,
        year: u32,
        rng: &mut XorShiftRng,
    ) -> EnvResult<Harvester> {
        let harvester_config = &config.harvester;
        let readings = archive.load(
            location,
            year,
            harvester_config.readings_per_day,
            harvester_config.max_radiation,
        )?;
        Harvester::from_readings(
            &readings,
            harvester_config,
            config.day_order,
            XorShiftRng::seed_from_u64(rng.gen()),
        )
    }

    /// Loads fresh, newly noised data and starts a new episode.
    pub fn reset(&mut self, location: &str, year: u32) -> EnvResult<Observation> {
        self.harvester = Self::load_harvester(
            &self.config,
            self.archive.as_ref(),
            location,
            year,
            &mut self.rng,
        )?;
        debug!(location, year, days = self.harvester.days(), "node reset");
        self.rewind()
    }

    /// Starts a new episode on the current data.
    pub fn rewind(&mut self) -> EnvResult<Observation> {
        self.harvester.reset();
        self.battery = Battery::new(&self.config.battery)?;
        self.recovery = false;
        self.finished = false;
        self.cumulative_reward = 0.0;
        self.battery_history.clear();
        self.log = EpisodeLog::default();
        self.reading = self.harvester.step();
        self.finished = self.reading.horizon_end;
        self.observe();
        Ok(self.observation.clone())
    }

    fn observe(&mut self) {
        let time = self.reading.time;
        let utility = self.config.utility.map(|profile| profile.utility(time));
        self.observation = Observation::new(
            time / self.config.harvester.readings_per_day as f32,
            self.reading.harvested,
            self.reading.predicted,
            self.battery.state(),
            utility,
        );
        if self.battery_history.len() == self.harvester.slots_per_day() {
            self.battery_history.pop_front();
        }
        self.battery_history.push_back(self.observation.battery());
        if self.config.log_data {
            self.log.record_observation(self.observation.as_ref());
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    pub fn battery(&self) -> f32 {
        self.battery.state()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn harvester(&self) -> &Harvester {
        &self.harvester
    }

    pub fn log(&self) -> &EpisodeLog {
        &self.log
    }

    pub fn take_log(&mut self) -> EpisodeLog {
        std::mem::take(&mut self.log)
    }

    pub fn duty_cycle(&self, action: u32) -> f32 {
        action as f32 / self.config.duty_cycles as f32 + self.config.min_duty_cycle()
    }

    /// Net energy of running `action` for one slot with the current harvest.
    pub fn surplus(&self, action: u32) -> f32 {
        self.observation.harvested() * self.config.harvest_factor
            - self.duty_cycle(action) * self.config.drain_factor
    }

    /// Whether the battery covers the deficit of `action`. An uncovered action puts the node
    /// into recovery.
    pub fn verify_action(&mut self, action: u32) -> bool {
        let valid = -self.surplus(action) < self.observation.battery();
        if !valid {
            trace!(action, battery = self.observation.battery(), "action not covered, recovering");
            self.recovery = true;
        }
        valid
    }

    fn execute_action(&mut self, action: u32) -> EnvResult<f32> {
        let surplus = self.surplus(action);
        if surplus >= 0.0 {
            self.battery.charge(surplus)?;
        } else {
            self.battery.discharge(surplus)?;
        }
        Ok(surplus)
    }

    fn recovery_action(&mut self) -> EnvResult<f32> {
        let energy = self.observation.harvested() * self.config.harvest_factor;
        self.battery.charge(energy)?;
        Ok(energy)
    }

    fn transition(&mut self, action: u32) -> EnvResult<Step<Self>> {
        let duty_cycles = self.config.duty_cycles;
        if action >= duty_cycles {
            return Err(RLError::ActionOutOfRange {
                value: action,
                max: duty_cycles,
            }
            .into());
        }
        if self.finished {
            // nothing left to harvest, the episode stays over
            let info = self.info(RECOVERY_ACTION, 0.0);
            return Ok((self.observation.clone(), 0.0, true, info));
        }

        if self.observation.battery() < self.config.min_battery && !self.recovery {
            trace!(battery = self.observation.battery(), "battery low, recovering");
            self.recovery = true;
        }
        let (executed, eno) = if !self.recovery && self.verify_action(action) {
            (self.duty_cycle(action), self.execute_action(action)?)
        } else {
            (RECOVERY_ACTION, self.recovery_action()?)
        };

        let reward = self.config.reward.reward(&RewardContext {
            recovery: self.recovery,
            duty_cycle: self.duty_cycle(action),
            observation: &self.observation,
            slot: self.harvester.cursor() % self.harvester.slots_per_day(),
            slots_per_day: self.harvester.slots_per_day(),
            min_battery: self.config.min_battery,
            battery_history: &self.battery_history,
        });
        self.cumulative_reward += reward;
        if self.config.log_data {
            self.log.record_step(executed, eno, self.recovery, reward);
        }
        let info = self.info(executed, eno);

        self.reading = self.harvester.step();
        let done = self.reading.horizon_end;
        if !done && self.recovery && self.battery.state() > self.config.battery.initial {
            trace!(battery = self.battery.state(), "recovered");
            self.recovery = false;
        }
        self.observe();
        if done {
            self.finished = true;
            debug!(
                cumulative_reward = self.cumulative_reward,
                steps = self.harvester.cursor(),
                "horizon reached"
            );
        }
        Ok((self.observation.clone(), reward, done, info))
    }

    fn info(&self, executed: f32, eno: f32) -> StepInfo {
        StepInfo {
            recovery: self.recovery,
            executed,
            eno,
            day_end: self.reading.day_end,
            day: self.harvester.day(),
        }
    }
}

impl RLEnvironment for NodeEnvironment {
    type State = Observation;
    type Action = u32;
    type Info = StepInfo;

    fn step(&mut self, action: u32) -> RLResult<Step<Self>> {
        Ok(self.transition(action)?)
    }

    fn state(&self) -> Observation {
        self.observation.clone()
    }

    fn action_count(&self) -> u32 {
        self.config.duty_cycles
    }

    fn cumulative_reward(&self) -> Reward {
        self.cumulative_reward
    }

    /// Highest duty cycle whose drain the current harvest pays for.
    fn greedy_action(&self) -> Option<u32> {
        let covered = (0..self.config.duty_cycles)
            .rev()
            .find(|&action| self.surplus(action) >= 0.0)
            .unwrap_or(0);
        Some(covered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enonode::{
        env_error::EnvError,
        harvester::{DayOrder, HarvesterConfig},
        reward::{IntervalMarks, MissPenalty, RewardPolicy},
        utility::UtilityProfile,
    };
    use enolearn::machine_learning::linspace;
    use float_cmp::approx_eq;

    fn harvester(harvested: Vec<f32>, slots: usize) -> Harvester {
        let predicted = harvested.clone();
        Harvester::from_streams(
            linspace(0.0, 23.0, slots),
            harvested,
            predicted,
            DayOrder::Sequential,
            XorShiftRng::seed_from_u64(0),
        )
        .unwrap()
    }

    fn node(config: NodeConfig, harvested: Vec<f32>, slots: usize) -> NodeEnvironment {
        NodeEnvironment::from_harvester(config, harvester(harvested, slots), 0).unwrap()
    }

    fn config_with_battery(initial: f32) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.battery.initial = initial;
        config
    }

    /// Hourly slots over `days` synthetic days stored as location "x", 2001.
    fn archived_node(config: NodeConfig, days: usize) -> NodeEnvironment {
        let readings = InMemorySolarArchive::synthetic_days(days, 24);
        let archive = InMemorySolarArchive::new().with_series("x", 2001, readings);
        NodeEnvironment::new(config, Arc::new(archive), "x", 2001, 4).unwrap()
    }

    fn hourly_config() -> NodeConfig {
        NodeConfig {
            harvester: HarvesterConfig {
                timeslots_per_day: 24,
                prediction_horizon: 24,
                ..HarvesterConfig::default()
            },
            ..NodeConfig::default()
        }
    }

    fn steps_until_done(env: &mut NodeEnvironment) -> usize {
        let mut steps = 0;
        loop {
            let (_, _, done, _) = env.step(0).unwrap();
            steps += 1;
            if done {
                return steps;
            }
        }
    }

    #[test]
    fn test_reset_reloads_the_archive() {
        let mut config = hourly_config();
        config.drain_factor = 1.0;
        let mut env = archived_node(config, 2);
        // dark first hours, a full duty cycle isn't covered
        env.step(9).unwrap();
        assert!(env.is_recovering());
        assert_eq!(env.cumulative_reward(), -1.0);

        let observation = env.reset("x", 2001).unwrap();
        assert!(!env.is_recovering());
        assert!(!env.is_finished());
        assert_eq!(observation.battery(), 0.7);
        assert_eq!(env.battery(), 0.7);
        assert_eq!(env.cumulative_reward(), 0.0);
        assert_eq!(env.harvester().cursor(), 1);
        assert_eq!(env.harvester().days(), 2);
        assert_eq!(env.log().observations.len(), 1);
        assert!(env.log().actions.is_empty());

        let missing = env.reset("nowhere", 2001).unwrap_err();
        assert!(matches!(
            missing,
            EnvError::MissingData { ref location, year: 2001 } if location == "nowhere"
        ));
    }

    #[test]
    fn test_random_days_keep_the_horizon_length() {
        let mut sequential = archived_node(hourly_config(), 3);
        assert_eq!(steps_until_done(&mut sequential), 3 * 24 - 2);

        let mut config = hourly_config();
        config.day_order = DayOrder::Random;
        let mut random = archived_node(config, 3);
        assert!(random.harvester().day() < 3);
        assert_eq!(steps_until_done(&mut random), 3 * 24 - 2);
        assert!(random.is_finished());

        random.reset("x", 2001).unwrap();
        assert_eq!(steps_until_done(&mut random), 3 * 24 - 2);
    }

    #[test]
    fn test_dark_node_recovers_without_charging() {
        let mut env = node(config_with_battery(0.05), vec![0.0; 24], 12);
        let start = env.battery();
        let mut rewards = Vec::new();
        for _ in 0..10 {
            let (state, reward, done, info) = env.step(9).unwrap();
            assert!(info.recovery);
            assert_eq!(info.executed, RECOVERY_ACTION);
            assert_eq!(info.eno, 0.0);
            assert_eq!(state.battery(), start);
            assert!(!done);
            rewards.push(reward);
        }
        assert_eq!(rewards, vec![-1.0; 10]);
        assert_eq!(env.cumulative_reward(), -10.0);
    }

    #[test]
    fn test_low_battery_recovers_on_first_step() {
        let mut env = node(config_with_battery(0.05), vec![0.5; 24], 12);
        assert!(!env.is_recovering());
        let (_, reward, _, info) = env.step(0).unwrap();
        assert!(info.recovery);
        assert_eq!(reward, -1.0);
        // recovery charges with the harvest only
        assert!(approx_eq!(f32, env.battery(), 0.05 + 0.5 * 0.02, epsilon = 1e-6));
    }

    #[test]
    fn test_valid_action_moves_energy() {
        let mut env = node(NodeConfig::default(), vec![0.5; 24], 12);
        let surplus = env.surplus(9);
        // 0.5 * 0.02 - 1.0 * 0.01
        assert!(approx_eq!(f32, surplus, 0.0, epsilon = 1e-6));
        let surplus = env.surplus(3);
        assert!(approx_eq!(f32, surplus, 0.006, epsilon = 1e-6));
        let (state, reward, _, info) = env.step(3).unwrap();
        assert!(!info.recovery);
        assert!(approx_eq!(f32, info.executed, 0.4, epsilon = 1e-6));
        assert!(approx_eq!(f32, state.battery(), 0.706, epsilon = 1e-6));
        // reward is taken on the charge before the action
        assert!(approx_eq!(f32, reward, (0.5 - 0.2) * 4.0 - 1.0, epsilon = 1e-6));
    }

    #[test]
    fn test_verify_action_threshold() {
        let mut env = node(config_with_battery(0.005), vec![0.0; 24], 12);
        // no harvest: level 0 drains 0.001, level 9 drains 0.01
        assert!(env.verify_action(0));
        assert!(!env.is_recovering());
        assert!(!env.verify_action(6));
        assert!(env.is_recovering());
    }

    #[test]
    fn test_verify_action_matches_surplus_everywhere() {
        for initial in [0.0, 0.001, 0.004, 0.0051, 0.01, 0.5] {
            for harvest in [0.0, 0.1, 0.5, 1.0] {
                for action in 0..10 {
                    let mut env = node(config_with_battery(initial), vec![harvest; 24], 12);
                    let expected = -env.surplus(action) < env.observation().battery();
                    assert_eq!(env.verify_action(action), expected);
                    assert_eq!(env.is_recovering(), !expected);
                }
            }
        }
    }

    #[test]
    fn test_uncovered_action_costs_a_recovery_tick() {
        let mut config = config_with_battery(0.105);
        config.drain_factor = 0.2;
        let mut env = node(config, vec![0.0; 24], 12);
        let (state, reward, _, info) = env.step(9).unwrap();
        assert!(info.recovery);
        assert_eq!(reward, -1.0);
        assert_eq!(state.battery(), 0.105);
        assert!(env.is_recovering());
    }

    #[test]
    fn test_recovery_exits_above_initial_charge() {
        let mut config = config_with_battery(0.7);
        config.harvest_factor = 0.5;
        config.drain_factor = 1.0;
        // two discharges in the dark, then a full harvest
        let mut harvested = vec![0.0; 4];
        harvested.extend(vec![1.0; 20]);
        let mut env = node(config, harvested, 12);
        env.step(0).unwrap(); // 0.7 - 0.1
        env.step(0).unwrap(); // 0.6 - 0.1
        env.step(9).unwrap(); // 1.0 needed, recovery
        assert!(env.is_recovering());
        // 0.5 is not above the initial charge yet
        let (_, reward, _, info) = env.step(0).unwrap();
        assert!(info.recovery);
        assert_eq!(reward, -1.0);
        assert!(approx_eq!(f32, env.battery(), 1.0, epsilon = 1e-6));
        assert!(!env.is_recovering());
    }

    #[test]
    fn test_out_of_range_action_fails_in_both_modes() {
        let mut env = node(NodeConfig::default(), vec![0.5; 24], 12);
        assert_eq!(
            env.step(10).unwrap_err(),
            RLError::ActionOutOfRange { value: 10, max: 10 }
        );
        let mut env = node(config_with_battery(0.0), vec![0.5; 24], 12);
        assert!(env.step(11).is_err());
        assert!(!env.is_recovering());
    }

    #[test]
    fn test_episode_ends_with_the_horizon() {
        let mut env = node(NodeConfig::default(), vec![0.3; 24], 12);
        let mut steps = 0;
        loop {
            let (_, _, done, _) = env.step(0).unwrap();
            steps += 1;
            if done {
                break;
            }
        }
        // the first slot is consumed by the reset
        assert_eq!(steps, 22);
        assert!(env.is_finished());
        let battery = env.battery();
        let (state, reward, done, _) = env.step(5).unwrap();
        assert!(done);
        assert_eq!(reward, 0.0);
        assert_eq!(state.battery(), battery);

        env.rewind().unwrap();
        assert!(!env.is_finished());
        assert_eq!(env.cumulative_reward(), 0.0);
    }

    #[test]
    fn test_battery_stays_bounded_under_random_actions() {
        let mut rng = XorShiftRng::seed_from_u64(3);
        let harvested: Vec<f32> = (0..240).map(|_| rng.gen_range(0.0..1.0)).collect();
        let mut env = node(NodeConfig::default(), harvested, 24);
        for _ in 0..239 {
            let (state, _, _, _) = env.step(rng.gen_range(0..10)).unwrap();
            assert!((0.0..=1.0).contains(&state.battery()));
        }
    }

    #[test]
    fn test_observation_layout_with_utility() {
        let mut config = NodeConfig::default();
        config.utility = Some(UtilityProfile::Night);
        config.reward = RewardPolicy::UtilityTracking;
        let env = node(config, vec![0.25; 24], 12);
        let observation = env.observation();
        assert_eq!(observation.size(), 5);
        // first slot after reset is 23/11 hours
        assert!(approx_eq!(f32, observation.time(), 23.0 / 11.0 / 24.0, epsilon = 1e-6));
        assert_eq!(observation.harvested(), 0.25);
        assert_eq!(observation.battery(), 0.7);
        assert_eq!(observation.utility(), Some(0.8));
    }

    #[test]
    fn test_sparse_reward_pays_at_day_end() {
        let mut config = NodeConfig::default();
        config.reward = RewardPolicy::SparseInterval {
            marks: IntervalMarks::DayEnd,
            low_factor: 2.0,
            miss: MissPenalty::Constant,
        };
        let mut env = node(config, vec![0.5; 24], 4);
        // observations at slots 1, 2, 3 then the next day
        let rewards: Vec<Reward> = (0..6).map(|_| env.step(9).unwrap().1).collect();
        assert_eq!(rewards, vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_greedy_action_is_paid_by_harvest() {
        let env = node(NodeConfig::default(), vec![0.33; 24], 12);
        // 0.33 * 0.02 covers a duty cycle of 0.6 but not 0.7
        assert_eq!(env.greedy_action(), Some(5));
        let dark = node(NodeConfig::default(), vec![0.0; 24], 12);
        assert_eq!(dark.greedy_action(), Some(0));
    }

    #[test]
    fn test_logs_follow_the_episode() {
        let mut env = node(NodeConfig::default(), vec![0.5; 24], 12);
        for action in [0, 3, 9] {
            env.step(action).unwrap();
        }
        let log = env.log();
        assert_eq!(log.observations.len(), 4);
        assert_eq!(log.actions.len(), 3);
        assert!(approx_eq!(f32, log.actions[1], 0.4, epsilon = 1e-6));
        assert_eq!(log.recovery, vec![false; 3]);
        let mut quiet = NodeConfig::default();
        quiet.log_data = false;
        let mut env = node(quiet, vec![0.5; 24], 12);
        env.step(0).unwrap();
        assert!(env.log().is_empty());
    }
}
