#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RLError {
    #[error("Action out of range got: {value} when max action value is {max}.")]
    ActionOutOfRange { value: u32, max: u32 },
    #[error("Insufficient data: requested a batch of {requested} but only {available} records are stored.")]
    InsufficientData { requested: usize, available: usize },
    #[error("Invalid configuration: {0}.")]
    InvalidConfig(String),
    #[error("Environment error: {0}")]
    Environment(String),
}

pub type RLResult<T> = std::result::Result<T, RLError>;
