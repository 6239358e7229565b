use serde::{Deserialize, Serialize};

const DAY_LENGTH: f32 = 24.0;

/// Time dependent value of sensed data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtilityProfile {
    /// Peaks at midnight, vanishes at noon.
    Cosine,
    /// High during the night, low during the day.
    Night,
}

impl UtilityProfile {
    /// `hour` is the time of day in `[0, 24)`.
    pub fn utility(&self, hour: f32) -> f32 {
        match self {
            UtilityProfile::Cosine => {
                let utility = ((2.0 * std::f32::consts::PI * hour / DAY_LENGTH).cos() + 1.0) * 0.4;
                utility.clamp(0.0, 1.0)
            }
            UtilityProfile::Night => {
                let night = (0.0..6.0).contains(&hour) || (hour > 18.0 && hour < DAY_LENGTH);
                let utility: f32 = if night {
                    0.8
                } else {
                    0.2
                };
                utility.clamp(0.1, 1.0)
            }
        }
    }
}
