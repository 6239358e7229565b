// harvester.rs
pub mod predictor;

use enolearn::machine_learning::linspace;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use self::predictor::RollingPredictor;
use super::env_error::{EnvError, EnvResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// Raw readings per day in the data feed.
    pub readings_per_day: usize,
    pub timeslots_per_day: usize,
    /// Radiation mapped to a harvest of 1.
    pub max_radiation: f32,
    /// Standard deviation of the multiplicative harvest noise.
    pub harvest_noise: f32,
    /// Harvest and forecast values below this are zeroed.
    pub min_threshold: f32,
    pub prediction_horizon: usize,
    pub prediction_noise: f32,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            readings_per_day: 24,
            timeslots_per_day: 240,
            max_radiation: 4.0,
            harvest_noise: 0.1,
            min_threshold: 1e-5,
            prediction_horizon: 240,
            prediction_noise: 0.005,
        }
    }
}

impl HarvesterConfig {
    pub fn validate(&self) -> EnvResult<()> {
        if self.readings_per_day < 3 || self.timeslots_per_day < 3 {
            return Err(EnvError::InvalidConfig(format!(
                "a day needs at least 3 readings and 3 timeslots, got {} and {}",
                self.readings_per_day, self.timeslots_per_day
            )));
        }
        if !(self.max_radiation > 0.0) {
            return Err(EnvError::InvalidConfig(format!(
                "max radiation must be positive, got {}",
                self.max_radiation
            )));
        }
        if self.prediction_horizon == 0 || self.prediction_horizon > self.timeslots_per_day {
            return Err(EnvError::InvalidConfig(format!(
                "prediction horizon must be within [1, {}], got {}",
                self.timeslots_per_day, self.prediction_horizon
            )));
        }
        if !(self.harvest_noise >= 0.0 && self.prediction_noise >= 0.0) {
            return Err(EnvError::InvalidConfig(
                "noise levels must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Hour of day of every timeslot.
    pub fn time_slots(&self) -> Vec<f32> {
        linspace(
            0.0,
            (self.readings_per_day - 1) as f32,
            self.timeslots_per_day,
        )
    }
}

/// Order in which the days of the series are replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayOrder {
    #[default]
    Sequential,
    /// A day is drawn uniformly at every day start, the first one included: a reset already
    /// lands on a random day instead of day 0.
    Random,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarvestReading {
    /// Hour of day.
    pub time: f32,
    pub harvested: f32,
    pub predicted: f32,
    pub day_end: bool,
    pub horizon_end: bool,
}

impl HarvestReading {
    /// Returned once every timeslot of the horizon was visited.
    pub const EXHAUSTED: HarvestReading = HarvestReading {
        time: -1.0,
        harvested: -1.0,
        predicted: -1.0,
        day_end: true,
        horizon_end: true,
    };
}

/// Interpolates through the three samples around `x`.
fn quadratic_interpolate(samples: &[f32], x: f32) -> f32 {
    let i = (x.max(0.0).floor() as usize).min(samples.len() - 3);
    let x0 = i as f32;
    let (y0, y1, y2) = (samples[i], samples[i + 1], samples[i + 2]);
    let (d0, d1, d2) = (x - x0, x - x0 - 1.0, x - x0 - 2.0);
    y0 * d1 * d2 / 2.0 - y1 * d0 * d2 + y2 * d0 * d1 / 2.0
}

/// Resamples every day of `readings` onto `time_slots`.
pub fn upsample(readings: &[f32], readings_per_day: usize, time_slots: &[f32]) -> Vec<f32> {
    readings
        .chunks_exact(readings_per_day)
        .flat_map(|day| time_slots.iter().map(move |&t| quadratic_interpolate(day, t)))
        .collect()
}

/// Aligned harvest and forecast streams with a single time cursor.
#[derive(Clone, Debug)]
pub struct Harvester {
    time_slots: Vec<f32>,
    harvested: Vec<f32>,
    predicted: Vec<f32>,
    cursor: usize,
    day: usize,
    day_order: DayOrder,
    rng: XorShiftRng,
}

impl Harvester {
    /// Builds the noisy high resolution streams from normalized hourly readings.
    pub fn from_readings(
        readings: &[f32],
        config: &HarvesterConfig,
        day_order: DayOrder,
        mut rng: XorShiftRng,
    ) -> EnvResult<Self> {
        config.validate()?;
        let days = readings.len() / config.readings_per_day;
        if days == 0 {
            return Err(EnvError::EmptySeries);
        }
        let time_slots = config.time_slots();
        let noise = Normal::new(1.0, config.harvest_noise)
            .map_err(|err| EnvError::InvalidConfig(err.to_string()))?;

        // multiplicative so that dark slots stay dark
        let harvested: Vec<f32> = upsample(readings, config.readings_per_day, &time_slots)
            .into_iter()
            .map(|h| {
                let h = h * noise.sample(&mut rng);
                if h < config.min_threshold {
                    0.0
                } else {
                    h.min(1.0)
                }
            })
            .collect();

        let predictor = RollingPredictor::new(config.prediction_horizon, config.prediction_noise)?;
        let predicted = predictor
            .predict(&harvested, &mut rng)?
            .into_iter()
            .map(|p| if p < config.min_threshold { 0.0 } else { p })
            .collect();

        debug!(days, slots = harvested.len(), ?day_order, "harvester ready");
        Self::from_streams(time_slots, harvested, predicted, day_order, rng)
    }

    /// Uses the given streams as they are. Both must cover whole days of `time_slots`.
    pub fn from_streams(
        time_slots: Vec<f32>,
        harvested: Vec<f32>,
        predicted: Vec<f32>,
        day_order: DayOrder,
        rng: XorShiftRng,
    ) -> EnvResult<Self> {
        if time_slots.is_empty() || harvested.is_empty() {
            return Err(EnvError::EmptySeries);
        }
        if harvested.len() != predicted.len() || harvested.len() % time_slots.len() != 0 {
            return Err(EnvError::InvalidConfig(format!(
                "streams of {} and {} values don't cover whole days of {} slots",
                harvested.len(),
                predicted.len(),
                time_slots.len()
            )));
        }
        let mut harvester = Self {
            time_slots,
            harvested,
            predicted,
            cursor: 0,
            day: 0,
            day_order,
            rng,
        };
        harvester.reset();
        Ok(harvester)
    }

    pub fn with_seed(
        readings: &[f32],
        config: &HarvesterConfig,
        day_order: DayOrder,
        seed: u64,
    ) -> EnvResult<Self> {
        Self::from_readings(readings, config, day_order, XorShiftRng::seed_from_u64(seed))
    }

    /// Rewinds to the first slot of the horizon.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.day = match self.day_order {
            DayOrder::Sequential => 0,
            DayOrder::Random => self.rng.gen_range(0..self.days()),
        };
    }

    pub fn slots_per_day(&self) -> usize {
        self.time_slots.len()
    }

    pub fn days(&self) -> usize {
        self.harvested.len() / self.slots_per_day()
    }

    pub fn len(&self) -> usize {
        self.harvested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harvested.is_empty()
    }

    pub fn time_slots(&self) -> &[f32] {
        &self.time_slots
    }

    pub fn harvested(&self) -> &[f32] {
        &self.harvested
    }

    pub fn predicted(&self) -> &[f32] {
        &self.predicted
    }

    /// Global index of the current slot.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Day the current slot is read from.
    pub fn day(&self) -> usize {
        match self.day_order {
            DayOrder::Sequential => self.cursor / self.slots_per_day(),
            DayOrder::Random => self.day,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor + 1 >= self.len()
    }

    /// Reading at the current cursor without moving it.
    pub fn current(&self) -> HarvestReading {
        let slots = self.slots_per_day();
        let slot = self.cursor % slots;
        let index = match self.day_order {
            DayOrder::Sequential => self.cursor,
            DayOrder::Random => self.day * slots + slot,
        };
        HarvestReading {
            time: self.time_slots[slot],
            harvested: self.harvested[index],
            predicted: self.predicted[index],
            day_end: slot == slots - 1,
            horizon_end: self.cursor == self.len() - 1,
        }
    }

    /// Moves to the next slot and reads it.
    pub fn step(&mut self) -> HarvestReading {
        if self.is_exhausted() {
            return HarvestReading::EXHAUSTED;
        }
        self.cursor += 1;
        if self.day_order == DayOrder::Random && self.cursor % self.slots_per_day() == 0 {
            self.day = self.rng.gen_range(0..self.days());
            trace!(day = self.day, "drew a new day");
        }
        self.current()
    }
}
