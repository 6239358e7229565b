// predictor.rs
use enolearn::machine_learning::convolve_same;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::warn;

use crate::enonode::env_error::{EnvError, EnvResult};

/// Forecast of the harvested energy: a centered rolling average over `horizon` slots with
/// gaussian noise, normalized by its maximum.
#[derive(Clone, Debug, PartialEq)]
pub struct RollingPredictor {
    horizon: usize,
    noise: f32,
}

impl RollingPredictor {
    pub fn new(horizon: usize, noise: f32) -> EnvResult<Self> {
        if horizon == 0 {
            return Err(EnvError::InvalidConfig(
                "prediction horizon must be positive".to_string(),
            ));
        }
        if !(noise >= 0.0 && noise.is_finite()) {
            return Err(EnvError::InvalidConfig(format!(
                "prediction noise must be a non-negative number, got {noise}"
            )));
        }
        Ok(Self { horizon, noise })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Output has the length of `harvested`. The only randomness comes from `rng`.
    pub fn predict<R: Rng + ?Sized>(&self, harvested: &[f32], rng: &mut R) -> EnvResult<Vec<f32>> {
        if harvested.len() < self.horizon {
            return Err(EnvError::InvalidConfig(format!(
                "prediction horizon {} exceeds the series length {}",
                self.horizon,
                harvested.len()
            )));
        }
        let noise = Normal::new(0.0, self.noise)
            .map_err(|err| EnvError::InvalidConfig(err.to_string()))?;
        let weights = vec![1.0 / self.horizon as f32; self.horizon];
        let mut predicted: Vec<f32> = convolve_same(harvested, &weights)
            .into_iter()
            .map(|average| average + noise.sample(rng))
            .collect();

        let max = predicted.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if max > 0.0 {
            predicted.iter_mut().for_each(|p| *p /= max);
        } else {
            warn!("forecast has no positive value, predicting no energy");
            predicted.iter_mut().for_each(|p| *p = 0.0);
        }
        Ok(predicted)
    }
}
