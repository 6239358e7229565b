use enolearn::machine_learning::reinforcement_learning::rl_error::RLError;
use serde_json::Error as SerdeError;
use std::io::Error as IOError;

use super::battery::BatteryError;

#[derive(thiserror::Error, Debug)]
pub enum EnvError {
    #[error("Battery error")]
    Battery(#[from] BatteryError),
    #[error("Learning error")]
    Learning(#[from] RLError),
    #[error("Couldn't read the solar data.")]
    Csv(#[from] csv::Error),
    #[error("IO error")]
    IOError(#[from] IOError),
    #[error("Couldn't (de)serialize the configuration.")]
    Serialization(#[from] SerdeError),
    #[error("No solar data for `{location}` in {year}.")]
    MissingData { location: String, year: u32 },
    #[error("The solar data doesn't cover a single full day.")]
    EmptySeries,
    #[error("Invalid configuration: {0}.")]
    InvalidConfig(String),
}

impl From<EnvError> for RLError {
    fn from(value: EnvError) -> Self {
        match value {
            EnvError::Learning(err) => err,
            other => RLError::Environment(other.to_string()),
        }
    }
}

pub type EnvResult<T> = std::result::Result<T, EnvError>;
