// rollout.rs
use rand::{seq::IteratorRandom, Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::machine_learning::reinforcement_learning::{
    environment::{RLEnvironment, Reward},
    nstep_buffer::{NStepBatch, NStepBuffer},
    rl_error::{RLError, RLResult},
};

/// Which action the driver takes when it is not exploring.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionPolicy {
    Random,
    Constant(u32),
    Greedy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub max_steps: usize,
    /// Stored records required before the first batch is drawn.
    pub replay_initial: usize,
    pub batch_size: usize,
    pub epsilon_start: f32,
    pub epsilon_final: f32,
    pub epsilon_frames: usize,
    pub policy: ActionPolicy,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            max_steps: 240 * 365,
            replay_initial: 240 * 10,
            batch_size: 32,
            epsilon_start: 1.0,
            epsilon_final: 0.01,
            epsilon_frames: 240 * 30 * 6,
            policy: ActionPolicy::Greedy,
        }
    }
}

impl RolloutConfig {
    pub fn validate(&self) -> RLResult<()> {
        if self.batch_size == 0 {
            return Err(RLError::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }
        for epsilon in [self.epsilon_start, self.epsilon_final] {
            if !(0.0..=1.0).contains(&epsilon) {
                return Err(RLError::InvalidConfig(format!(
                    "exploration rate must be within [0, 1], got {epsilon}"
                )));
            }
        }
        Ok(())
    }
}

/// Linear decay of the exploration rate.
pub struct ExplorationSchedule {
    start: f32,
    end: f32,
    frames: usize,
    curr_step: usize,
}

impl ExplorationSchedule {
    pub fn new(start: f32, end: f32, frames: usize) -> Self {
        Self {
            start,
            end,
            frames,
            curr_step: 0,
        }
    }

    pub fn epsilon(&self) -> f32 {
        if self.frames == 0 || self.curr_step >= self.frames {
            self.end
        } else {
            let progress = self.curr_step as f32 / self.frames as f32;
            self.start + (self.end - self.start) * progress
        }
    }

    pub fn step(&mut self) -> f32 {
        let epsilon = self.epsilon();
        self.curr_step += 1;
        epsilon
    }
}

impl Default for ExplorationSchedule {
    fn default() -> Self {
        Self::new(1.0, 0.01, 240 * 30 * 6)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutSummary {
    pub steps: usize,
    pub done: bool,
    pub cumulative_reward: Reward,
    pub records: usize,
    pub batches: usize,
    pub mean_batch_return: f32,
}

/// Drives one environment and feeds its transitions into an n-step buffer.
pub struct Rollout<E: RLEnvironment> {
    env: E,
    buffer: NStepBuffer<E::State, E::Action>,
    config: RolloutConfig,
    schedule: ExplorationSchedule,
    rng: XorShiftRng,
}

impl<E: RLEnvironment> Rollout<E> {
    pub fn new(
        env: E,
        buffer: NStepBuffer<E::State, E::Action>,
        config: RolloutConfig,
    ) -> RLResult<Self> {
        Self::with_rng(env, buffer, config, XorShiftRng::from_entropy())
    }

    pub fn with_seed(
        env: E,
        buffer: NStepBuffer<E::State, E::Action>,
        config: RolloutConfig,
        seed: u64,
    ) -> RLResult<Self> {
        Self::with_rng(env, buffer, config, XorShiftRng::seed_from_u64(seed))
    }

    fn with_rng(
        env: E,
        buffer: NStepBuffer<E::State, E::Action>,
        config: RolloutConfig,
        rng: XorShiftRng,
    ) -> RLResult<Self> {
        config.validate()?;
        let schedule = ExplorationSchedule::new(
            config.epsilon_start,
            config.epsilon_final,
            config.epsilon_frames,
        );
        Ok(Self {
            env,
            buffer,
            config,
            schedule,
            rng,
        })
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn buffer(&self) -> &NStepBuffer<E::State, E::Action> {
        &self.buffer
    }

    pub fn into_parts(self) -> (E, NStepBuffer<E::State, E::Action>) {
        (self.env, self.buffer)
    }

    /// Steps until the environment reports the end of its horizon or `max_steps` is reached.
    /// `on_batch` receives every batch drawn once the warm-up is over.
    pub fn run<F>(&mut self, mut on_batch: F) -> RLResult<RolloutSummary>
    where
        F: FnMut(usize, &NStepBatch<E::State, E::Action>),
    {
        let mut summary = RolloutSummary::default();
        let mut batch_return_sum = 0.0;
        let warmup = self.config.replay_initial.max(self.config.batch_size);

        for step in 0..self.config.max_steps {
            let epsilon = self.schedule.step();
            let action = self.action_policy(epsilon);
            let (experience, _info) = self.env.record_step(action)?;
            let done = experience.done;
            summary.cumulative_reward += experience.reward;
            summary.records += self.buffer.append(experience);
            summary.steps = step + 1;

            if self.buffer.len() >= warmup {
                let batch = self.buffer.sample(self.config.batch_size)?;
                batch_return_sum +=
                    batch.nstep_returns.iter().sum::<f32>() / batch.len() as f32;
                summary.batches += 1;
                on_batch(step, &batch);
            }
            if done {
                summary.done = true;
                break;
            }
        }
        if summary.batches > 0 {
            summary.mean_batch_return = batch_return_sum / summary.batches as f32;
        }
        debug!(
            steps = summary.steps,
            records = summary.records,
            batches = summary.batches,
            "rollout finished"
        );
        Ok(summary)
    }

    fn action_policy(&mut self, exploration: f32) -> E::Action {
        let action_space = self.env.action_count();
        let policy_action: u32 = match self.config.policy {
            ActionPolicy::Random => self.rng.gen_range(0..action_space.max(1)),
            ActionPolicy::Constant(level) => level.min(action_space.saturating_sub(1)),
            ActionPolicy::Greedy => match self.env.greedy_action() {
                Some(action) => action.into(),
                None => self.rng.gen_range(0..action_space.max(1)),
            },
        };
        let explore = self.rng.gen_bool(f64::from(exploration.clamp(0.0, 1.0)));
        if explore {
            // get a random action not chosen by the policy
            (0..action_space)
                .filter(|&i| i != policy_action)
                .choose(&mut self.rng)
                .unwrap_or(policy_action)
                .into()
        } else {
            policy_action.into()
        }
    }
}

/// Runs independent rollouts side by side, one worker per rollout.
pub fn parallel_rollouts<E: RLEnvironment>(
    rollouts: &mut [Rollout<E>],
) -> Vec<RLResult<RolloutSummary>> {
    rollouts
        .par_iter_mut()
        .map(|rollout| rollout.run(|_, _| {}))
        .collect()
}
