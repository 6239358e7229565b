// wrappers.rs
use super::environment::{RLEnvironment, Reward, Step};
use super::rl_error::RLResult;

use serde::{Deserialize, Serialize};

/// Pure stages applied to every observation leaving the wrapped environment, in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObservationTransform {
    /// Appends `0.5 - obs[battery_index]`, the distance from energy neutral operation.
    AddEnergyNeutralityGap { battery_index: usize },
    /// Drops the leading time component.
    RemoveTime,
    /// Maps `[0, 1]` to `[-1, 1]`.
    SymmetricNormalize,
}

impl ObservationTransform {
    pub fn apply(&self, mut observation: Vec<f32>) -> Vec<f32> {
        match self {
            ObservationTransform::AddEnergyNeutralityGap { battery_index } => {
                let battery = observation.get(*battery_index).copied().unwrap_or(0.0);
                observation.push(0.5 - battery);
                observation
            }
            ObservationTransform::RemoveTime => {
                if !observation.is_empty() {
                    observation.remove(0);
                }
                observation
            }
            ObservationTransform::SymmetricNormalize => {
                observation.iter_mut().for_each(|x| *x = (*x - 0.5) * 2.0);
                observation
            }
        }
    }
}

/// Maps an agent side action to the value the environment understands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionTransform {
    /// `[-1, 1]` to a duty cycle in `[min_dc, 1]`.
    SymmetricNormalize { min_dc: f32 },
    /// A duty cycle in `[min_dc, 1]` to the index of the closest of `levels + 1` discrete
    /// actions.
    DutyCycleLevel { min_dc: f32, levels: u32 },
}

impl ActionTransform {
    pub fn apply(&self, action: f32) -> f32 {
        match self {
            ActionTransform::SymmetricNormalize { min_dc } => {
                (action + 1.0) * (1.0 - min_dc) / 2.0 + min_dc
            }
            ActionTransform::DutyCycleLevel { min_dc, levels } => {
                (action - min_dc) * *levels as f32 / (1.0 - min_dc)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RewardTransform {
    Scale(f32),
    Clip { low: f32, high: f32 },
}

impl RewardTransform {
    pub fn apply(&self, reward: Reward) -> Reward {
        match self {
            RewardTransform::Scale(factor) => reward * factor,
            RewardTransform::Clip { low, high } => reward.clamp(*low, *high),
        }
    }
}

/// Runs an environment through observation, action and reward pipelines without touching
/// its state machine.
pub struct Wrapped<E: RLEnvironment> {
    inner: E,
    observation: Vec<ObservationTransform>,
    action: Vec<ActionTransform>,
    reward: Vec<RewardTransform>,
    cumulative_reward: Reward,
}

impl<E: RLEnvironment> Wrapped<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            observation: Vec::new(),
            action: Vec::new(),
            reward: Vec::new(),
            cumulative_reward: 0.0,
        }
    }

    pub fn observation(mut self, transform: ObservationTransform) -> Self {
        self.observation.push(transform);
        self
    }

    pub fn action(mut self, transform: ActionTransform) -> Self {
        self.action.push(transform);
        self
    }

    pub fn reward(mut self, transform: RewardTransform) -> Self {
        self.reward.push(transform);
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Forget the reward accumulated so far, used after the inner environment was reset.
    pub fn restart(&mut self) {
        self.cumulative_reward = 0.0;
    }

    /// Steps with an agent side value, the action stages turn it into a discrete action.
    /// The result is rounded and floored at 0; levels past the end are left for the inner
    /// environment to reject.
    pub fn step_value(&mut self, action: f32) -> RLResult<Step<Self>> {
        let value = self.action.iter().fold(action, |a, t| t.apply(a));
        let level = value.round().max(0.0) as u32;
        let (next_state, reward, done, info) = self.inner.step(level.into())?;
        let reward = self.transform_reward(reward);
        self.cumulative_reward += reward;
        Ok((self.transform_observation(&next_state), reward, done, info))
    }

    fn transform_observation(&self, state: &E::State) -> Vec<f32> {
        self.observation
            .iter()
            .fold(state.as_ref().to_vec(), |obs, t| t.apply(obs))
    }

    fn transform_reward(&self, reward: Reward) -> Reward {
        self.reward.iter().fold(reward, |r, t| t.apply(r))
    }
}

impl<E: RLEnvironment> RLEnvironment for Wrapped<E> {
    type State = Vec<f32>;
    type Action = E::Action;
    type Info = E::Info;

    fn step(&mut self, action: Self::Action) -> RLResult<Step<Self>> {
        self.step_value(Into::<u32>::into(action) as f32)
    }

    fn state(&self) -> Self::State {
        self.transform_observation(&self.inner.state())
    }

    fn action_count(&self) -> u32 {
        self.inner.action_count()
    }

    fn cumulative_reward(&self) -> Reward {
        self.cumulative_reward
    }

    fn greedy_action(&self) -> Option<Self::Action> {
        self.inner.greedy_action()
    }
}
