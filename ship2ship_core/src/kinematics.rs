//! The Kinematic Window Estimator
//!
//! Bounds how far apart in time two observations may be while their
//! buffered regions could still overlap, assuming straight-line
//! constant-velocity motion.
//!
//! The closing speed is the magnitude of the **sum** of the two velocity
//! vectors, i.e. the speed at which two vessels would approach if each were
//! heading at the other. The bound is a pruning heuristic: it may admit
//! pairs that never meet (the geometry check discards them) but it must
//! not reject pairs that could.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// km/h to m/s.
pub const KMPH_TO_MPS: f64 = 1000.0 / 3600.0;

/// Closing speeds below this (m/s) are treated as zero.
pub const MIN_CLOSING_SPEED_MPS: f64 = 1e-9;

/// Speed and heading of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    /// Speed over ground in km/h
    pub speed_kmph: f64,

    /// Heading in degrees
    pub heading_deg: f64,
}

impl MotionState {
    pub fn new(speed_kmph: f64, heading_deg: f64) -> Self {
        Self {
            speed_kmph,
            heading_deg,
        }
    }

    pub fn stationary() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Velocity components (km/h), heading taken as the direction angle.
    pub fn velocity(&self) -> Vector2<f64> {
        let (sin, cos) = self.heading_deg.to_radians().sin_cos();
        Vector2::new(self.speed_kmph * cos, self.speed_kmph * sin)
    }
}

/// Maximum time separation (seconds) admitted for a pair of observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicWindow {
    seconds: f64,
}

impl KinematicWindow {
    /// Window for degenerate kinematics: every finite separation is admitted.
    pub fn unbounded() -> Self {
        Self {
            seconds: f64::INFINITY,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn is_unbounded(&self) -> bool {
        self.seconds.is_infinite()
    }

    /// True if two observations `dt_secs` apart fall strictly inside the window.
    pub fn admits(&self, dt_secs: f64) -> bool {
        dt_secs.abs() < self.seconds
    }
}

/// Closing speed (km/h) of two motion states: `|v_a + v_b|`.
pub fn closing_speed_kmph(a: MotionState, b: MotionState) -> f64 {
    (a.velocity() + b.velocity()).norm()
}

/// Time window for two observations with buffers of `radius_m` metres.
///
/// A zero (or non-finite) closing speed yields [`KinematicWindow::unbounded`]
/// instead of dividing by zero.
pub fn kinematic_window(a: MotionState, b: MotionState, radius_m: f64) -> KinematicWindow {
    let closing_mps = closing_speed_kmph(a, b) * KMPH_TO_MPS;
    if !closing_mps.is_finite() || closing_mps < MIN_CLOSING_SPEED_MPS {
        return KinematicWindow::unbounded();
    }
    KinematicWindow {
        seconds: radius_m / closing_mps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parallel_vessels_add_speeds() {
        let a = MotionState::new(18.0, 90.0);
        let b = MotionState::new(18.0, 90.0);

        assert_relative_eq!(closing_speed_kmph(a, b), 36.0, epsilon = 1e-9);
        // 36 km/h = 10 m/s, 100 m buffer
        assert_relative_eq!(kinematic_window(a, b, 100.0).seconds(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_orthogonal_headings() {
        let a = MotionState::new(30.0, 0.0);
        let b = MotionState::new(40.0, 90.0);
        assert_relative_eq!(closing_speed_kmph(a, b), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stationary_pair_is_unbounded() {
        let w = kinematic_window(MotionState::stationary(), MotionState::stationary(), 100.0);
        assert!(w.is_unbounded());
        assert!(w.admits(7200.0));
        assert!(w.admits(1e12));
    }

    #[test]
    fn test_opposite_headings_cancel() {
        let a = MotionState::new(10.0, 0.0);
        let b = MotionState::new(10.0, 180.0);
        let w = kinematic_window(a, b, 100.0);
        assert!(w.is_unbounded());
    }

    #[test]
    fn test_non_finite_speed_is_unbounded() {
        let a = MotionState::new(f64::NAN, 0.0);
        let w = kinematic_window(a, MotionState::stationary(), 100.0);
        assert!(w.is_unbounded());
    }

    #[test]
    fn test_admits_is_strict() {
        let a = MotionState::new(36.0, 0.0);
        let w = kinematic_window(a, MotionState::stationary(), 100.0);
        assert_relative_eq!(w.seconds(), 10.0, epsilon = 1e-9);
        assert!(w.admits(0.0));
        assert!(w.admits(-9.9));
        assert!(!w.admits(10.5));
    }

    proptest! {
        #[test]
        fn prop_window_is_symmetric(
            s1 in 0.0f64..60.0, h1 in 0.0f64..360.0,
            s2 in 0.0f64..60.0, h2 in 0.0f64..360.0,
        ) {
            let a = MotionState::new(s1, h1);
            let b = MotionState::new(s2, h2);
            let ab = kinematic_window(a, b, 100.0).seconds();
            let ba = kinematic_window(b, a, 100.0).seconds();
            prop_assert!(ab == ba || (ab - ba).abs() <= 1e-9 * ab.abs());
        }

        #[test]
        fn prop_window_grows_with_radius(
            s1 in 0.0f64..60.0, h1 in 0.0f64..360.0,
            s2 in 0.0f64..60.0, h2 in 0.0f64..360.0,
            r in 1.0f64..1000.0, extra in 0.0f64..1000.0,
        ) {
            let a = MotionState::new(s1, h1);
            let b = MotionState::new(s2, h2);
            let small = kinematic_window(a, b, r).seconds();
            let large = kinematic_window(a, b, r + extra).seconds();
            prop_assert!(large >= small);
        }

        #[test]
        fn prop_closing_speed_bounded_by_sum_of_speeds(
            s1 in 0.0f64..60.0, h1 in 0.0f64..360.0,
            s2 in 0.0f64..60.0, h2 in 0.0f64..360.0,
        ) {
            let v = closing_speed_kmph(MotionState::new(s1, h1), MotionState::new(s2, h2));
            prop_assert!(v <= s1 + s2 + 1e-9);
        }
    }
}
