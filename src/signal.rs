//! Signal smoothing for orientation readings.
//!
//! This module provides the low-level per-cycle signal processing:
//! - Fixed-window rolling mean per axis (the only smoothing applied)
//! - Optional per-axis wrap correction for sensors that report angles
//!   across a discontinuity
//! - A two-sample slope tracker reporting the tracked axis trend
//!
//! Design note: the filter only smooths. Validity filtering belongs to the
//! sensor reader; there is no outlier rejection and no interpolation.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{Axis, FilteredOrientation, MotionTrend, SensorSample};

/// Adds a fixed offset to a filtered average that falls below a threshold.
///
/// Used to unwrap headings that cross the sensor's 0/360 seam so that bounds
/// can be expressed as a single interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCorrection {
    /// Averages strictly below this value are shifted.
    pub below: f32,
    /// Offset added to shifted averages, in degrees.
    pub add: f32,
}

impl AxisCorrection {
    pub fn apply(&self, value: f32) -> f32 {
        if value < self.below {
            value + self.add
        } else {
            value
        }
    }
}

/// Largest accepted rolling window, in samples.
pub const MAX_WINDOW_SIZE: usize = 1_000;

/// Parameters for signal smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Rolling window length per axis, in samples.
    pub window_size: usize,

    /// Wrap correction for the X average.
    pub x_correction: Option<AxisCorrection>,

    /// Wrap correction for the Z average.
    pub z_correction: Option<AxisCorrection>,

    /// Slope magnitude in degrees per cycle above which the tracked axis
    /// counts as rising or falling.
    pub trend_threshold_deg: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            window_size: 10,          // 5s of history at 0.5s cadence
            x_correction: None,
            z_correction: None,
            trend_threshold_deg: 5.0,
        }
    }
}

/// Fixed-capacity FIFO of raw values for one axis.
///
/// Invariant: `0 <= len <= capacity`. The oldest value is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    values: VecDeque<f32>,
    capacity: usize,
    sum: f64,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::new(),
            capacity,
            sum: 0.0,
        }
    }

    /// Appends a value, evicting the oldest once the buffer is full.
    pub fn push(&mut self, value: f32) {
        if self.values.len() == self.capacity {
            if let Some(evicted) = self.values.pop_front() {
                self.sum -= evicted as f64;
            }
        }
        self.values.push_back(value);
        self.sum += value as f64;
    }

    /// Arithmetic mean of the buffered values, `None` when empty.
    pub fn average(&self) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }
        // Recompute instead of trusting the running sum once a non-finite
        // value has poisoned it.
        if !self.sum.is_finite() {
            let sum: f64 = self.values.iter().map(|&v| v as f64).sum();
            return Some((sum / self.values.len() as f64) as f32);
        }
        Some((self.sum / self.values.len() as f64) as f32)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

/// Per-axis rolling mean filter.
///
/// Owned exclusively by the control loop; pushes are the only mutation.
#[derive(Debug, Clone)]
pub struct RollingFilter {
    buffers: [RollingBuffer; 3],
    config: FilterConfig,
}

impl RollingFilter {
    pub fn new(config: FilterConfig) -> Self {
        let w = config.window_size;
        Self {
            buffers: [RollingBuffer::new(w), RollingBuffer::new(w), RollingBuffer::new(w)],
            config,
        }
    }

    /// Appends one raw value to an axis buffer.
    pub fn push(&mut self, axis: Axis, value: f32) {
        self.buffers[axis.index()].push(value);
    }

    /// Pushes the three angle readings of a sample.
    pub fn push_sample(&mut self, sample: &SensorSample) {
        for axis in Axis::ALL {
            self.push(axis, sample.angle(axis));
        }
    }

    /// Mean of the buffered values for `axis`, or `None` (insufficient) when empty.
    pub fn average(&self, axis: Axis) -> Option<f32> {
        self.buffers[axis.index()].average()
    }

    /// All three averages with axis corrections applied.
    ///
    /// Returns `None` until every axis has at least one value.
    pub fn orientation(&self) -> Option<FilteredOrientation> {
        let x = self.average(Axis::X)?;
        let y = self.average(Axis::Y)?;
        let z = self.average(Axis::Z)?;
        Some(FilteredOrientation {
            x: self.config.x_correction.map_or(x, |c| c.apply(x)),
            y,
            z: self.config.z_correction.map_or(z, |c| c.apply(z)),
        })
    }

    pub fn len(&self, axis: Axis) -> usize {
        self.buffers[axis.index()].len()
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    /// Drops all buffered history.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }
}

/// Tracks the change between consecutive raw readings of one axis.
#[derive(Debug, Clone)]
pub struct SlopeTracker {
    previous: Option<f32>,
    slope: f32,
    threshold: f32,
}

impl SlopeTracker {
    pub fn new(threshold_deg: f32) -> Self {
        Self {
            previous: None,
            slope: 0.0,
            threshold: threshold_deg,
        }
    }

    /// Records a raw reading and returns the updated trend.
    pub fn update(&mut self, value: f32) -> MotionTrend {
        self.slope = match self.previous {
            Some(prev) => value - prev,
            None => 0.0,
        };
        self.previous = Some(value);
        self.trend()
    }

    pub fn slope(&self) -> f32 {
        self.slope
    }

    pub fn trend(&self) -> MotionTrend {
        if self.slope > self.threshold {
            MotionTrend::Rising
        } else if self.slope < -self.threshold {
            MotionTrend::Falling
        } else {
            MotionTrend::Steady
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.slope = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn test_empty_buffer_is_insufficient() {
        let filter = RollingFilter::new(FilterConfig::default());
        assert_eq!(filter.average(Axis::Y), None);
        assert!(filter.orientation().is_none());
    }

    #[test]
    fn test_average_of_partial_window() {
        let mut filter = RollingFilter::new(FilterConfig::default());
        filter.push(Axis::Y, 10.0);
        filter.push(Axis::Y, 20.0);
        assert_abs_diff_eq!(filter.average(Axis::Y).unwrap(), 15.0, epsilon = 1e-5);
        // Other axes untouched
        assert_eq!(filter.average(Axis::X), None);
    }

    #[test]
    fn test_oldest_value_evicted() {
        let config = FilterConfig {
            window_size: 3,
            ..FilterConfig::default()
        };
        let mut filter = RollingFilter::new(config);
        for v in [100.0, 1.0, 2.0, 3.0] {
            filter.push(Axis::Z, v);
        }
        assert_eq!(filter.len(Axis::Z), 3);
        assert_abs_diff_eq!(filter.average(Axis::Z).unwrap(), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_huge_capacity_allocates_lazily() {
        let mut buffer = RollingBuffer::new(usize::MAX);
        buffer.push(4.0);
        buffer.push(6.0);
        assert_eq!(buffer.capacity(), usize::MAX);
        assert_abs_diff_eq!(buffer.average().unwrap(), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_push_sample_fills_all_axes() {
        let mut filter = RollingFilter::new(FilterConfig::default());
        filter.push_sample(&SensorSample::new(0, [300.0, -40.0, 90.0], 0.0, 0.0));
        let orientation = filter.orientation().expect("all axes filled");
        assert_eq!(orientation.x, 300.0);
        assert_eq!(orientation.y, -40.0);
        assert_eq!(orientation.z, 90.0);
    }

    #[test]
    fn test_axis_correction_unwraps_heading() {
        let config = FilterConfig {
            x_correction: Some(AxisCorrection { below: 130.0, add: 360.0 }),
            ..FilterConfig::default()
        };
        let mut filter = RollingFilter::new(config);
        filter.push_sample(&SensorSample::new(0, [20.0, 0.0, 0.0], 0.0, 0.0));
        let orientation = filter.orientation().unwrap();
        assert_eq!(orientation.x, 380.0);
        // Raw average stays uncorrected
        assert_eq!(filter.average(Axis::X), Some(20.0));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = RollingFilter::new(FilterConfig::default());
        filter.push(Axis::X, 1.0);
        filter.reset();
        assert_eq!(filter.average(Axis::X), None);
    }

    #[test]
    fn test_slope_tracker_trend() {
        let mut tracker = SlopeTracker::new(5.0);
        assert_eq!(tracker.update(10.0), MotionTrend::Steady);
        assert_eq!(tracker.update(20.0), MotionTrend::Rising);
        assert_abs_diff_eq!(tracker.slope(), 10.0);
        assert_eq!(tracker.update(12.0), MotionTrend::Falling);
        assert_eq!(tracker.update(14.0), MotionTrend::Steady);
    }

    proptest! {
        #[test]
        fn prop_average_is_mean_of_last_window(
            values in proptest::collection::vec(-360.0f32..360.0, 0..40),
            window in 1usize..16,
        ) {
            let mut buffer = RollingBuffer::new(window);
            for &v in &values {
                buffer.push(v);
            }
            let tail = &values[values.len().saturating_sub(window)..];
            match buffer.average() {
                None => prop_assert!(values.is_empty()),
                Some(avg) => {
                    prop_assert!(!values.is_empty());
                    let expected = tail.iter().map(|&v| v as f64).sum::<f64>() / tail.len() as f64;
                    prop_assert!((avg as f64 - expected).abs() < 1e-2);
                }
            }
            prop_assert!(buffer.len() <= window);
        }
    }
}
