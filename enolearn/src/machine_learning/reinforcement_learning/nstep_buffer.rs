use super::environment::{Experience, NStepExperience, RLAction, RLState, Reward};
use super::rl_error::{RLError, RLResult};

use itertools::Itertools;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum number of aggregated records kept, oldest are evicted first.
    pub capacity: usize,
    /// Length of the return window.
    pub nsteps: usize,
    /// Discount factor (gamma)
    pub gamma: f32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 240 * 365 * 2,
            nsteps: 1,
            gamma: 0.9,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> RLResult<()> {
        if self.capacity == 0 {
            return Err(RLError::InvalidConfig(
                "replay capacity must be positive".to_string(),
            ));
        }
        if self.nsteps == 0 {
            return Err(RLError::InvalidConfig("nsteps must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(RLError::InvalidConfig(format!(
                "gamma must be within [0, 1], got {}",
                self.gamma
            )));
        }
        Ok(())
    }
}

/// Parallel arrays of sampled records, in the order they were drawn.
#[derive(Clone, Debug)]
pub struct NStepBatch<S, A> {
    pub states: Vec<S>,
    pub actions: Vec<A>,
    pub nstep_returns: Vec<f32>,
    pub dones: Vec<u8>,
    pub last_states: Vec<S>,
}

impl<S: RLState, A: RLAction> NStepBatch<S, A> {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn state_batch(&self) -> Vec<f32> {
        self.states
            .iter()
            .flat_map(|s| s.as_ref())
            .copied()
            .collect()
    }

    pub fn last_state_batch(&self) -> Vec<f32> {
        self.last_states
            .iter()
            .flat_map(|s| s.as_ref())
            .copied()
            .collect()
    }

    pub fn action_batch(&self) -> Vec<f32> {
        self.actions
            .iter()
            .map(|&a| {
                let a: u32 = a.into();
                a as f32
            })
            .collect()
    }

    /// Multiplier for the bootstrapped value, zero for terminal records.
    pub fn terminal_mask(&self) -> Vec<f32> {
        self.dones
            .iter()
            .map(|&done| if done != 0 { 0.0 } else { 1.0 })
            .collect()
    }
}

pub struct NStepBuffer<S, A> {
    window: VecDeque<Experience<S, A>>,
    memory: VecDeque<NStepExperience<S, A>>,
    config: BufferConfig,
    rng: XorShiftRng,
}

impl<S: RLState, A: RLAction> NStepBuffer<S, A> {
    pub fn new(config: BufferConfig) -> RLResult<Self> {
        Self::with_rng(config, XorShiftRng::from_entropy())
    }

    pub fn with_seed(config: BufferConfig, seed: u64) -> RLResult<Self> {
        Self::with_rng(config, XorShiftRng::seed_from_u64(seed))
    }

    fn with_rng(config: BufferConfig, rng: XorShiftRng) -> RLResult<Self> {
        config.validate()?;
        Ok(Self {
            window: VecDeque::with_capacity(config.nsteps + 1),
            memory: VecDeque::with_capacity(config.capacity.min(1 << 16)),
            config,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Raw transitions currently waiting in the return window.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NStepExperience<S, A>> {
        self.memory.iter()
    }

    fn window_len(&self) -> usize {
        self.config.nsteps + 1
    }

    /// Pushes a raw transition and folds the window into aggregated records once it is full.
    /// Returns the number of records emitted by this call.
    pub fn append(&mut self, experience: Experience<S, A>) -> usize {
        if self.window.len() == self.window_len() {
            self.window.pop_front();
        }
        self.window.push_back(experience);
        if self.window.len() < self.window_len() {
            return 0;
        }
        self.populate()
    }

    fn populate(&mut self) -> usize {
        let Some(newest) = self.window.back() else {
            return 0;
        };
        // A negative reward flushes exactly like a terminal transition.
        if newest.done || newest.reward < 0.0 {
            let last_state = newest.state.clone();
            let nsteps = self.config.nsteps;
            trace!(
                done = newest.done,
                reward = newest.reward,
                "flushing the return window"
            );
            // the sum carries over from one emission to the next
            let mut nstep_return = 0.0;
            for _ in 0..nsteps {
                nstep_return = self.discounted_return(nstep_return, self.window.len());
                let Some(oldest) = self.window.pop_front() else {
                    break;
                };
                self.store(NStepExperience {
                    state: oldest.state,
                    action: oldest.action,
                    nstep_return,
                    done: true,
                    last_state: last_state.clone(),
                });
            }
            nsteps
        } else {
            let nstep_return = self.discounted_return(0.0, self.config.nsteps);
            let last_state = newest.state.clone();
            let oldest = &self.window[0];
            let record = NStepExperience {
                state: oldest.state.clone(),
                action: oldest.action,
                nstep_return,
                done: false,
                last_state,
            };
            self.store(record);
            1
        }
    }

    /// Folds the first `count` window entries into `init`, newest to oldest.
    fn discounted_return(&self, init: Reward, count: usize) -> Reward {
        let gamma = self.config.gamma;
        self.window
            .iter()
            .take(count)
            .rev()
            .fold(init, |acc, exp| acc * gamma + exp.reward)
    }

    fn store(&mut self, record: NStepExperience<S, A>) {
        if self.memory.len() >= self.config.capacity {
            self.memory.pop_front();
        }
        self.memory.push_back(record);
    }

    pub fn sample(&mut self, batch_size: usize) -> RLResult<NStepBatch<S, A>> {
        Self::draw(&self.memory, batch_size, &mut self.rng)
    }

    /// Draws `batch_size` distinct records uniformly. The store itself is left untouched.
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> RLResult<NStepBatch<S, A>> {
        Self::draw(&self.memory, batch_size, rng)
    }

    fn draw<R: Rng + ?Sized>(
        memory: &VecDeque<NStepExperience<S, A>>,
        batch_size: usize,
        rng: &mut R,
    ) -> RLResult<NStepBatch<S, A>> {
        if batch_size > memory.len() {
            return Err(RLError::InsufficientData {
                requested: batch_size,
                available: memory.len(),
            });
        }
        let (states, actions, nstep_returns, dones, last_states) =
            index::sample(rng, memory.len(), batch_size)
                .iter()
                .map(|i| {
                    let record = &memory[i];
                    (
                        record.state.clone(),
                        record.action,
                        record.nstep_return,
                        u8::from(record.done),
                        record.last_state.clone(),
                    )
                })
                .multiunzip();
        Ok(NStepBatch {
            states,
            actions,
            nstep_returns,
            dones,
            last_states,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::{ApproxEq, F32Margin};
    use std::collections::HashSet;

    fn margin() -> F32Margin {
        F32Margin {
            epsilon: 1e-6,
            ulps: 8,
        }
    }

    fn experience(id: usize, reward: f32, done: bool) -> Experience<Vec<f32>, u32> {
        Experience {
            state: vec![id as f32],
            action: id as u32,
            reward,
            done,
            next_state: vec![(id + 1) as f32],
        }
    }

    fn buffer(capacity: usize, nsteps: usize, gamma: f32) -> NStepBuffer<Vec<f32>, u32> {
        NStepBuffer::with_seed(
            BufferConfig {
                capacity,
                nsteps,
                gamma,
            },
            7,
        )
        .unwrap()
    }

    #[test]
    fn test_nothing_emitted_until_window_full() {
        let mut buffer = buffer(100, 3, 0.9);
        for id in 0..3 {
            assert_eq!(buffer.append(experience(id, 1.0, false)), 0);
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.pending(), 3);
    }

    #[test]
    fn test_three_step_return() {
        let mut buffer = buffer(100, 3, 0.9);
        let rewards = [0.5, 0.25, 0.125];
        for (id, &r) in rewards.iter().enumerate() {
            buffer.append(experience(id, r, false));
        }
        // bootstrap element, its reward is not part of the return
        assert_eq!(buffer.append(experience(3, 100.0, false)), 1);

        let record = buffer.iter().next().unwrap();
        let expected = 0.5 + 0.9 * 0.25 + 0.81 * 0.125;
        assert!(record.nstep_return.approx_eq(expected, margin()));
        assert_eq!(record.state, vec![0.0]);
        assert_eq!(record.action, 0);
        assert_eq!(record.last_state, vec![3.0]);
        assert!(!record.done);
    }

    #[test]
    fn test_window_slides_one_record_per_append() {
        let mut buffer = buffer(100, 2, 0.5);
        for id in 0..6 {
            buffer.append(experience(id, 1.0, false));
        }
        // records emitted on the 3rd, 4th, 5th and 6th append
        assert_eq!(buffer.len(), 4);
        let anchors: Vec<u32> = buffer.iter().map(|r| r.action).collect();
        assert_eq!(anchors, vec![0, 1, 2, 3]);
        for record in buffer.iter() {
            assert!(record.nstep_return.approx_eq(1.5, margin()));
            assert_eq!(record.last_state, vec![(record.action + 2) as f32]);
        }
    }

    #[test]
    fn test_terminal_flushes_window() {
        let mut buffer = buffer(100, 3, 0.5);
        buffer.append(experience(0, 1.0, false));
        buffer.append(experience(1, 2.0, false));
        buffer.append(experience(2, 4.0, false));
        assert_eq!(buffer.append(experience(3, 8.0, true)), 3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.pending(), 1);

        let records: Vec<_> = buffer.iter().collect();
        // each emission keeps discounting the previous one
        let first = 1.0 + 0.5 * 2.0 + 0.25 * 4.0 + 0.125 * 8.0;
        let second = first * 0.125 + 2.0 + 0.5 * 4.0 + 0.25 * 8.0;
        let third = second * 0.25 + 4.0 + 0.5 * 8.0;
        let expected = [first, second, third];
        assert_eq!(expected, [4.0, 6.5, 9.625]);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.action, i as u32);
            assert!(record.done);
            assert_eq!(record.last_state, vec![3.0]);
            assert!(record.nstep_return.approx_eq(expected[i], margin()));
        }
    }

    #[test]
    fn test_negative_reward_flushes_like_terminal() {
        let mut buffer = buffer(100, 2, 0.9);
        buffer.append(experience(0, 1.0, false));
        buffer.append(experience(1, 1.0, false));
        assert_eq!(buffer.append(experience(2, -1.0, false)), 2);
        assert!(buffer.iter().all(|r| r.done));
        let returns: Vec<f32> = buffer.iter().map(|r| r.nstep_return).collect();
        assert!(returns[0].approx_eq(1.0 + 0.9 * 1.0 - 0.81, margin()));
        // (1.09 * 0.9 - 1) * 0.9 + 1
        assert!(returns[1].approx_eq(0.9829, margin()));
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut buffer = buffer(5, 1, 0.9);
        for id in 0..20 {
            buffer.append(experience(id, 1.0, false));
        }
        assert_eq!(buffer.len(), 5);
        let anchors: Vec<u32> = buffer.iter().map(|r| r.action).collect();
        assert_eq!(anchors, vec![14, 15, 16, 17, 18]);
    }

    #[test]
    fn test_sample_full_store_is_a_permutation() {
        let mut buffer = buffer(50, 1, 0.9);
        for id in 0..11 {
            buffer.append(experience(id, 1.0, false));
        }
        assert_eq!(buffer.len(), 10);
        let batch = buffer.sample(10).unwrap();
        assert_eq!(batch.len(), 10);
        let drawn: HashSet<u32> = batch.actions.iter().copied().collect();
        assert_eq!(drawn, (0..10).collect::<HashSet<u32>>());
        // sampling is read only
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_sample_more_than_stored_fails() {
        let mut buffer = buffer(50, 1, 0.9);
        buffer.append(experience(0, 1.0, false));
        buffer.append(experience(1, 1.0, false));
        assert_eq!(
            buffer.sample(2).unwrap_err(),
            RLError::InsufficientData {
                requested: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_batch_arrays_are_parallel() {
        let mut buffer = buffer(50, 1, 0.9);
        buffer.append(experience(0, 1.0, false));
        buffer.append(experience(1, 1.0, false));
        buffer.append(experience(2, 1.0, true));
        let batch = buffer.sample(2).unwrap();
        for i in 0..batch.len() {
            let action = batch.actions[i];
            assert_eq!(batch.states[i], vec![action as f32]);
            assert_eq!(batch.dones[i], u8::from(action == 1));
        }
        assert_eq!(batch.state_batch().len(), 2);
        assert_eq!(batch.action_batch(), batch.state_batch());
        let mask = batch.terminal_mask();
        for i in 0..batch.len() {
            assert_eq!(mask[i], 1.0 - f32::from(batch.dones[i]));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BufferConfig {
            capacity: 10,
            nsteps: 0,
            gamma: 0.9,
        };
        assert!(NStepBuffer::<Vec<f32>, u32>::new(config).is_err());
        let config = BufferConfig {
            capacity: 10,
            nsteps: 1,
            gamma: 1.5,
        };
        assert!(NStepBuffer::<Vec<f32>, u32>::new(config).is_err());
    }
}
