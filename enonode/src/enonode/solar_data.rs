// solar_data.rs
use std::{collections::HashMap, path::PathBuf};

use tracing::{debug, warn};

use super::env_error::{EnvError, EnvResult};

/// Records before the header row in the radiation exports.
const PREAMBLE_LINES: usize = 4;
/// Column holding the global solar radiation.
const RADIATION_COLUMN: usize = 4;

/// Source of raw hourly radiation readings, keyed by location and year.
///
/// Readings are normalized by `max_radiation`; the returned series always holds a whole number
/// of days.
pub trait SolarArchive: Send + Sync {
    fn load(
        &self,
        location: &str,
        year: u32,
        readings_per_day: usize,
        max_radiation: f32,
    ) -> EnvResult<Vec<f32>>;
}

fn whole_days(mut readings: Vec<f32>, readings_per_day: usize) -> EnvResult<Vec<f32>> {
    let days = readings.len() / readings_per_day.max(1);
    if days == 0 {
        return Err(EnvError::EmptySeries);
    }
    if readings.len() != days * readings_per_day {
        warn!(
            readings = readings.len(),
            days, "dropping readings of an incomplete trailing day"
        );
        readings.truncate(days * readings_per_day);
    }
    Ok(readings)
}

/// Reads `<root>/<location>/<year>.csv`.
#[derive(Clone, Debug)]
pub struct CsvSolarArchive {
    root: PathBuf,
}

impl CsvSolarArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, location: &str, year: u32) -> PathBuf {
        self.root.join(location).join(format!("{year}.csv"))
    }
}

impl SolarArchive for CsvSolarArchive {
    fn load(
        &self,
        location: &str,
        year: u32,
        readings_per_day: usize,
        max_radiation: f32,
    ) -> EnvResult<Vec<f32>> {
        let path = self.path(location, year);
        if !path.is_file() {
            return Err(EnvError::MissingData {
                location: location.to_string(),
                year,
            });
        }
        // the exports aren't UTF-8 encoded, only the numeric cells are decoded
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;

        let mut readings = Vec::new();
        for record in reader.byte_records().skip(PREAMBLE_LINES + 1) {
            let record = record?;
            // missing or malformed cells count as no radiation
            let value = record
                .get(RADIATION_COLUMN)
                .and_then(|cell| std::str::from_utf8(cell).ok())
                .and_then(|cell| cell.trim().parse::<f32>().ok())
                .filter(|value| value.is_finite())
                .unwrap_or(0.0);
            readings.push(value / max_radiation);
        }
        debug!(location, year, readings = readings.len(), "loaded solar data");
        whole_days(readings, readings_per_day)
    }
}

/// Series kept in memory, used for synthetic runs.
#[derive(Clone, Debug, Default)]
pub struct InMemorySolarArchive {
    series: HashMap<(String, u32), Vec<f32>>,
}

impl InMemorySolarArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores already normalized readings.
    pub fn insert(&mut self, location: &str, year: u32, readings: Vec<f32>) {
        self.series.insert((location.to_string(), year), readings);
    }

    pub fn with_series(mut self, location: &str, year: u32, readings: Vec<f32>) -> Self {
        self.insert(location, year, readings);
        self
    }

    /// A clear sky bell curve peaking at noon, repeated for `days` days.
    pub fn synthetic_days(days: usize, readings_per_day: usize) -> Vec<f32> {
        let half = readings_per_day as f32 / 2.0;
        (0..days * readings_per_day)
            .map(|i| {
                let hour = (i % readings_per_day) as f32;
                let distance = (hour - half).abs() / (half / 2.0);
                (1.0 - distance * distance).max(0.0)
            })
            .collect()
    }
}

impl SolarArchive for InMemorySolarArchive {
    fn load(
        &self,
        location: &str,
        year: u32,
        readings_per_day: usize,
        _max_radiation: f32,
    ) -> EnvResult<Vec<f32>> {
        let readings = self
            .series
            .get(&(location.to_string(), year))
            .cloned()
            .ok_or_else(|| EnvError::MissingData {
                location: location.to_string(),
                year,
            })?;
        whole_days(readings, readings_per_day)
    }
}
