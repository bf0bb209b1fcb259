//! Radioactive decay model: `A(t) = A0 * 0.5^(t / T½)`.
//!
//! Time and half-life share whatever unit the caller picks (the fit works
//! in minutes, the emulator in seconds).

use crate::error::ConfigError;

#[inline]
pub(crate) fn eval(elapsed: f64, initial_activity: f64, half_life: f64) -> f64 {
    initial_activity * 0.5f64.powf(elapsed / half_life)
}

fn check_half_life(half_life: f64) -> Result<f64, ConfigError> {
    if half_life.is_finite() && half_life > 0.0 {
        Ok(half_life)
    } else {
        Err(ConfigError::HalfLife(half_life))
    }
}

/// Activity after `elapsed`. A zero, negative or non-finite half-life is a
/// configuration error rather than an infinity/NaN result.
pub fn activity(elapsed: f64, initial_activity: f64, half_life: f64) -> Result<f64, ConfigError> {
    let half_life = check_half_life(half_life)?;
    Ok(eval(elapsed, initial_activity, half_life))
}

/// Decay curve with a validated half-life.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayModel {
    half_life: f64,
}

impl DecayModel {
    pub fn new(half_life: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            half_life: check_half_life(half_life)?,
        })
    }

    pub fn half_life(&self) -> f64 {
        self.half_life
    }

    pub fn activity(&self, elapsed: f64, initial_activity: f64) -> f64 {
        eval(elapsed, initial_activity, self.half_life)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_elapsed_returns_initial() {
        assert_eq!(activity(0.0, 42.0, 109.7).unwrap(), 42.0);
    }

    #[test]
    fn one_half_life_halves() {
        let a = activity(20.0, 100.0, 20.0).unwrap();
        assert!((a - 50.0).abs() < 1e-12);
        let m = DecayModel::new(20.0).unwrap();
        assert!((m.activity(40.0, 100.0) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn bad_half_life_is_config_error() {
        assert_eq!(activity(1.0, 1.0, 0.0), Err(ConfigError::HalfLife(0.0)));
        assert!(DecayModel::new(-3.0).is_err());
        assert!(DecayModel::new(f64::NAN).is_err());
        assert!(DecayModel::new(f64::INFINITY).is_err());
    }
}
