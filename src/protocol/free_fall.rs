//! Free-fall detection over the filtered accelerometer stream
//!
//! A sample is "landed" when the squared magnitude of the filtered
//! acceleration is at or above the threshold. Free fall is declared once
//! enough consecutive sub-threshold samples have been seen and at least the
//! configured time has passed since the last landed sample. One event per
//! fall: the detector re-arms on the next landed sample.

use super::dispatcher::FreeFallEvent;
use crate::codec::SensorFrame;
use crate::config::FreeFallConfig;
use std::time::Duration;
use tokio::time::Instant;

pub struct FreeFallDetector {
    threshold: f64,
    min_duration: Duration,
    debounce: u32,
    last_landed: Option<Instant>,
    below: u32,
    falling: bool,
}

impl FreeFallDetector {
    pub fn new(config: &FreeFallConfig) -> Self {
        Self {
            threshold: config.acceleration_squared_threshold,
            min_duration: Duration::from_millis(config.time_threshold_ms),
            debounce: config.debounce_samples.max(1),
            last_landed: None,
            below: 0,
            falling: false,
        }
    }

    /// Forget the landed baseline (streaming restarted)
    pub fn reset(&mut self) {
        self.last_landed = None;
        self.below = 0;
        self.falling = false;
    }

    /// Feed one sample received at `now`
    pub fn observe(&mut self, frame: &SensorFrame, now: Instant) -> Option<FreeFallEvent> {
        let magnitude = frame.filtered_acceleration()?.magnitude_squared()?;

        if magnitude >= self.threshold {
            self.last_landed = Some(now);
            self.below = 0;
            self.falling = false;
            return None;
        }

        let landed = self.last_landed?;
        self.below = self.below.saturating_add(1);
        let since_landed = now.saturating_duration_since(landed);

        if !self.falling && self.below >= self.debounce && since_landed >= self.min_duration {
            self.falling = true;
            return Some(FreeFallEvent { since_landed });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AccelerometerData, ThreeAxis};

    fn sample(z: f64) -> SensorFrame {
        SensorFrame {
            accelerometer: Some(AccelerometerData {
                filtered: Some(ThreeAxis {
                    x: Some(0.0),
                    y: Some(0.0),
                    z: Some(z),
                }),
                raw: None,
            }),
            ..Default::default()
        }
    }

    fn detector() -> FreeFallDetector {
        FreeFallDetector::new(&FreeFallConfig::default())
    }

    #[test]
    fn test_fires_after_threshold_time() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(d.observe(&sample(1.0), t0).is_none());
        assert!(d.observe(&sample(0.1), t0 + Duration::from_millis(50)).is_none());
        assert!(d.observe(&sample(0.1), t0 + Duration::from_millis(100)).is_none());
        let event = d.observe(&sample(0.1), t0 + Duration::from_millis(175)).unwrap();
        assert_eq!(event.since_landed, Duration::from_millis(175));
    }

    #[test]
    fn test_no_baseline_no_event() {
        let mut d = detector();
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(d
                .observe(&sample(0.0), t0 + Duration::from_millis(100 * i))
                .is_none());
        }
    }

    #[test]
    fn test_single_noisy_sample_is_debounced() {
        let mut d = detector();
        let t0 = Instant::now();
        d.observe(&sample(1.0), t0);
        // One low sample long after landing is not enough
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(300)).is_none());
        d.observe(&sample(1.0), t0 + Duration::from_millis(310));
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(600)).is_none());
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(650)).is_some());
    }

    #[test]
    fn test_one_event_per_fall() {
        let mut d = detector();
        let t0 = Instant::now();
        d.observe(&sample(1.0), t0);
        d.observe(&sample(0.0), t0 + Duration::from_millis(100));
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(200)).is_some());
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(300)).is_none());

        // Landing re-arms
        d.observe(&sample(1.0), t0 + Duration::from_millis(400));
        d.observe(&sample(0.0), t0 + Duration::from_millis(500));
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(600)).is_some());
    }

    #[test]
    fn test_threshold_boundary_counts_as_landed() {
        let mut d = detector();
        let t0 = Instant::now();
        let at_threshold = 0.2f64.sqrt();
        d.observe(&sample(1.0), t0);
        d.observe(&sample(at_threshold + 1e-9), t0 + Duration::from_millis(100));
        d.observe(&sample(0.0), t0 + Duration::from_millis(200));
        // Last landed was at 100ms, only 150ms ago
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(250)).is_none());
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(280)).is_some());
    }

    #[test]
    fn test_frames_without_accelerometer_are_ignored() {
        let mut d = detector();
        let t0 = Instant::now();
        d.observe(&sample(1.0), t0);
        assert!(d
            .observe(&SensorFrame::default(), t0 + Duration::from_millis(500))
            .is_none());
    }

    #[test]
    fn test_reset_drops_baseline() {
        let mut d = detector();
        let t0 = Instant::now();
        d.observe(&sample(1.0), t0);
        d.reset();
        d.observe(&sample(0.0), t0 + Duration::from_millis(200));
        assert!(d.observe(&sample(0.0), t0 + Duration::from_millis(400)).is_none());
    }
}
