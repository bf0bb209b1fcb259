//! Rolling window of accepted samples.
//!
//! Activities and timestamps live in two parallel ring buffers of equal
//! length. Appending at capacity evicts the oldest sample. A rejected
//! append leaves the window untouched.

use crate::error::{ConfigError, WindowError};
use crate::types::Sample;
use crate::util::SECS_PER_MIN;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    activities: VecDeque<f64>,
    timestamps: VecDeque<i64>,
    capacity: usize,
}

/// Capacity needed to hold the longest window at the shortest interval.
pub fn capacity_for(max_window_min: f64, min_interval_s: f64, slack: usize) -> usize {
    if !(max_window_min > 0.0 && min_interval_s > 0.0) {
        return slack.max(1);
    }
    (max_window_min * SECS_PER_MIN / min_interval_s).ceil() as usize + slack
}

impl RollingWindow {
    pub fn with_capacity(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            activities: VecDeque::with_capacity(capacity),
            timestamps: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Drop all samples and resize.
    pub fn reset(&mut self, capacity: usize) -> Result<(), ConfigError> {
        *self = Self::with_capacity(capacity)?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.activities.clear();
        self.timestamps.clear();
    }

    /// Append one sample. Timestamps must be non-decreasing.
    pub fn append(&mut self, activity: f64, timestamp: i64) -> Result<(), WindowError> {
        if !activity.is_finite() {
            return Err(WindowError::NonFinite(activity));
        }
        if let Some(&newest) = self.timestamps.back()
            && timestamp < newest
        {
            return Err(WindowError::OutOfOrder { timestamp, newest });
        }
        if self.activities.len() == self.capacity {
            self.activities.pop_front();
            self.timestamps.pop_front();
        }
        self.activities.push_back(activity);
        self.timestamps.push_back(timestamp);
        Ok(())
    }

    /// The most recent `n` samples, oldest first. Fewer if the window is
    /// shorter than `n`.
    pub fn window(&self, n: usize) -> Vec<Sample> {
        let skip = self.len().saturating_sub(n);
        self.timestamps
            .iter()
            .zip(self.activities.iter())
            .skip(skip)
            .map(|(&timestamp, &activity)| Sample {
                timestamp,
                activity,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<Sample> {
        Some(Sample {
            timestamp: *self.timestamps.front()?,
            activity: *self.activities.front()?,
        })
    }

    pub fn newest(&self) -> Option<Sample> {
        Some(Sample {
            timestamp: *self.timestamps.back()?,
            activity: *self.activities.back()?,
        })
    }

    /// Seconds between the oldest and newest sample; 0 when fewer than two.
    pub fn span_secs(&self) -> i64 {
        match (self.timestamps.front(), self.timestamps.back()) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }
}
