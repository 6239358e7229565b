use super::rl_error::RLResult;

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

// envrionment.rs
pub type Reward = f32;

/// A single raw transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Experience<S, A> {
    pub state: S,
    pub action: A,
    pub reward: Reward,
    pub done: bool,
    pub next_state: S,
}

/// A transition folded over a window of `nsteps` raw transitions. `last_state` is the state the
/// learner bootstraps from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NStepExperience<S, A> {
    pub state: S,
    pub action: A,
    pub nstep_return: Reward,
    pub done: bool,
    pub last_state: S,
}

pub type Step<E> = (
    <E as RLEnvironment>::State,
    Reward,
    bool,
    <E as RLEnvironment>::Info,
);

pub trait RLAction: Clone + Debug + Copy + From<u32> + Into<u32> + Sync + Send {}

impl RLAction for u32 {}

pub trait RLState: Clone + Debug + AsRef<[f32]> + Sync + Send {
    fn size(&self) -> usize {
        self.as_ref().len()
    }
}

impl RLState for Vec<f32> {}

pub trait RLEnvironment: Send {
    type State: RLState;
    type Action: RLAction;
    type Info: Clone + Debug + Send;

    fn record_step(
        &mut self,
        action: Self::Action,
    ) -> RLResult<(Experience<Self::State, Self::Action>, Self::Info)> {
        let state = self.state();
        let (next_state, reward, done, info) = self.step(action)?;
        let experience = Experience {
            state,
            action,
            reward,
            done,
            next_state,
        };
        Ok((experience, info))
    }
    fn step(&mut self, action: Self::Action) -> RLResult<Step<Self>>;
    fn state(&self) -> Self::State;
    fn action_count(&self) -> u32;
    fn cumulative_reward(&self) -> Reward;
    /// The largest action the environment can currently afford, if it knows one.
    fn greedy_action(&self) -> Option<Self::Action> {
        None
    }
}
