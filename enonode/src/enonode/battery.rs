use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BatteryError {
    #[error("Charging energy should be >= 0, got {0}.")]
    NegativeCharge(f32),
    #[error("Discharging energy should be < 0, got {0}.")]
    NonNegativeDischarge(f32),
    #[error("Initial charge must be within [0, 1], got {0}.")]
    InvalidInitialCharge(f32),
    #[error("Efficiency must be within (0, 1], got {0}.")]
    InvalidEfficiency(f32),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Starting state of charge, also the level recovery mode has to exceed.
    pub initial: f32,
    /// Fraction of harvested energy that ends up stored.
    pub efficiency: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            initial: 0.7,
            efficiency: 1.0,
        }
    }
}

impl BatteryConfig {
    pub fn validate(&self) -> Result<(), BatteryError> {
        if !(0.0..=1.0).contains(&self.initial) {
            return Err(BatteryError::InvalidInitialCharge(self.initial));
        }
        if !(self.efficiency > 0.0 && self.efficiency <= 1.0) {
            return Err(BatteryError::InvalidEfficiency(self.efficiency));
        }
        Ok(())
    }
}

/// Normalized state of charge, always kept within `[0, 1]`.
///
/// Efficiency only applies when charging: conversion losses are one way.
#[derive(Clone, Debug, PartialEq)]
pub struct Battery {
    charge: f32,
    efficiency: f32,
}

impl Battery {
    pub fn new(config: &BatteryConfig) -> Result<Self, BatteryError> {
        config.validate()?;
        Ok(Self {
            charge: config.initial,
            efficiency: config.efficiency,
        })
    }

    pub fn charge(&mut self, energy: f32) -> Result<(), BatteryError> {
        if energy.is_nan() || energy < 0.0 {
            return Err(BatteryError::NegativeCharge(energy));
        }
        self.charge = (self.charge + energy * self.efficiency).clamp(0.0, 1.0);
        Ok(())
    }

    /// `energy` is a debit and has to be negative.
    pub fn discharge(&mut self, energy: f32) -> Result<(), BatteryError> {
        if energy.is_nan() || energy >= 0.0 {
            return Err(BatteryError::NonNegativeDischarge(energy));
        }
        self.charge = (self.charge + energy).clamp(0.0, 1.0);
        Ok(())
    }

    pub fn state(&self) -> f32 {
        self.charge
    }
}
