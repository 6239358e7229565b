// reinforcement_learning.rs
pub mod environment;
pub mod nstep_buffer;
pub mod rl_error;
pub mod rollout;
pub mod wrappers;
