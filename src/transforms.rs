// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Rigid-transform bookkeeping for odometry and pose publication.
//!
//! The camera tracks its own sensor frame; the bus wants everything in
//! the robot base frame. [`TrackingChain`] keeps the two published
//! transforms:
//!
//! - `base_to_odom` accumulates each tick's incremental motion. It is
//!   continuous, may drift, and only resets on an explicit pose set or
//!   tracking restart.
//! - `odom_to_map` is recomputed every tick from the absolute pose and
//!   the current `base_to_odom`. It absorbs relocalization corrections
//!   and may jump.
//!
//! Both conjugate the sensor-frame motion by the externally supplied
//! sensor-to-base mount transform.

use crate::camera::SdkPose;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use std::time::{Duration, Instant};

/// Build a rigid transform from translation and x,y,z,w quaternion parts.
pub fn iso_from_parts(t: [f64; 3], q: [f64; 4]) -> Isometry3<f64> {
    let rot = UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]));
    Isometry3::from_parts(Translation3::new(t[0], t[1], t[2]), rot)
}

/// Decompose a rigid transform into translation and x,y,z,w quaternion.
pub fn parts_from_iso(iso: &Isometry3<f64>) -> ([f64; 3], [f64; 4]) {
    let t = iso.translation.vector;
    let q = iso.rotation.coords;
    ([t.x, t.y, t.z], [q.x, q.y, q.z, q.w])
}

/// Rigid transform from an x,y,z translation and roll/pitch/yaw angles.
pub fn iso_from_xyzrpy(pose: &[f64; 6]) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(pose[0], pose[1], pose[2]),
        UnitQuaternion::from_euler_angles(pose[3], pose[4], pose[5]),
    )
}

/// SDK-side rendition of a bus-frame transform.
pub fn sdk_pose_from_iso(iso: &Isometry3<f64>) -> SdkPose {
    let (translation, orientation) = parts_from_iso(iso);
    SdkPose {
        translation,
        orientation,
    }
}

/// External source of the static sensor-to-base mount transform.
///
/// `None` means the transform cannot be resolved; callers substitute
/// identity and warn through a [`WarnThrottle`].
pub trait FrameLookup: Send + Sync {
    fn sensor_to_base(&self) -> Option<Isometry3<f64>>;
}

/// Mount transform fixed at startup from configuration.
pub struct StaticLookup {
    sensor_to_base: Isometry3<f64>,
}

impl StaticLookup {
    pub fn new(tf_vec: [f64; 3], tf_quat: [f64; 4]) -> Self {
        Self {
            sensor_to_base: iso_from_parts(tf_vec, tf_quat),
        }
    }
}

impl FrameLookup for StaticLookup {
    fn sensor_to_base(&self) -> Option<Isometry3<f64>> {
        Some(self.sensor_to_base)
    }
}

/// Lookup that never resolves. Test aid for the identity fallback path.
pub struct UnresolvedLookup;

impl FrameLookup for UnresolvedLookup {
    fn sensor_to_base(&self) -> Option<Isometry3<f64>> {
        None
    }
}

/// The two chained transforms published for odometry and pose.
#[derive(Clone, Copy, Debug)]
pub struct TrackingChain {
    pub base_to_odom: Isometry3<f64>,
    pub odom_to_map: Isometry3<f64>,
}

impl Default for TrackingChain {
    fn default() -> Self {
        Self {
            base_to_odom: Isometry3::identity(),
            odom_to_map: Isometry3::identity(),
        }
    }
}

impl TrackingChain {
    /// Reset both transforms to the given pose. Used at startup, on an
    /// explicit pose set and when tracking (re)starts.
    pub fn set_pose(&mut self, pose: Isometry3<f64>) {
        self.base_to_odom = pose;
        self.odom_to_map = pose;
    }

    /// Fold one tick's incremental sensor motion into `base_to_odom`.
    pub fn apply_delta(
        &mut self,
        sensor_to_base: &Isometry3<f64>,
        delta_sensor: &Isometry3<f64>,
    ) -> Isometry3<f64> {
        let delta_base = sensor_to_base * delta_sensor * sensor_to_base.inverse();
        self.base_to_odom *= delta_base;
        self.base_to_odom
    }

    /// Recompute `odom_to_map` from the absolute sensor pose. Always a
    /// full recomputation against the current `base_to_odom`, never an
    /// increment of the previous value.
    pub fn update_map(
        &mut self,
        sensor_to_base: &Isometry3<f64>,
        world_sensor: &Isometry3<f64>,
    ) -> Isometry3<f64> {
        let base_to_map = sensor_to_base * world_sensor * sensor_to_base.inverse();
        self.odom_to_map = base_to_map * self.base_to_odom.inverse();
        self.odom_to_map
    }
}

/// Rate limiter for repeated warnings, one message per window.
pub struct WarnThrottle {
    window: Duration,
    last: Option<Instant>,
}

impl WarnThrottle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True when a message may be emitted now; arms the window if so.
    pub fn ready(&mut self) -> bool {
        match self.last {
            Some(at) if at.elapsed() < self.window => false,
            _ => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn translation(x: f64, y: f64, z: f64) -> Isometry3<f64> {
        Isometry3::translation(x, y, z)
    }

    #[test]
    fn odom_accumulates_as_left_to_right_product() {
        let mut chain = TrackingChain::default();
        let s2b = Isometry3::identity();
        let deltas = [
            translation(0.1, 0.0, 0.0),
            translation(0.0, 0.2, 0.0),
            Isometry3::from_parts(
                Translation3::new(0.05, 0.0, 0.0),
                UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3),
            ),
        ];
        let mut expected = Isometry3::identity();
        for d in &deltas {
            expected *= *d;
            chain.apply_delta(&s2b, d);
        }
        assert_relative_eq!(chain.base_to_odom, expected, epsilon = 1e-12);
    }

    #[test]
    fn map_is_recomputed_not_drifted() {
        let mut chain = TrackingChain::default();
        let s2b = translation(0.3, 0.0, 0.2);
        let mut world = Isometry3::identity();
        let delta = Isometry3::from_parts(
            Translation3::new(0.1, 0.02, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.05),
        );
        for _ in 0..10 {
            world *= delta;
            chain.apply_delta(&s2b, &delta);
            chain.update_map(&s2b, &world);
            let base_to_map = s2b * world * s2b.inverse();
            let expected = base_to_map * chain.base_to_odom.inverse();
            assert_relative_eq!(chain.odom_to_map, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn drift_free_tracking_keeps_map_correction_identity() {
        // When odometry and the absolute pose agree, the map correction
        // must stay identity regardless of the mount transform.
        let mut chain = TrackingChain::default();
        let s2b = Isometry3::from_parts(
            Translation3::new(0.1, -0.2, 0.5),
            UnitQuaternion::from_euler_angles(0.1, 0.0, 1.2),
        );
        let delta = translation(0.07, 0.0, 0.01);
        let mut world = Isometry3::identity();
        for _ in 0..20 {
            world *= delta;
            chain.apply_delta(&s2b, &delta);
            chain.update_map(&s2b, &world);
        }
        assert_relative_eq!(chain.odom_to_map, Isometry3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn set_pose_overrides_accumulation() {
        let mut chain = TrackingChain::default();
        let s2b = Isometry3::identity();
        for _ in 0..5 {
            chain.apply_delta(&s2b, &translation(1.0, 0.0, 0.0));
        }
        let pose = iso_from_xyzrpy(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.5]);
        chain.set_pose(pose);
        assert_relative_eq!(chain.base_to_odom, pose, epsilon = 1e-12);
        assert_relative_eq!(chain.odom_to_map, pose, epsilon = 1e-12);
    }

    #[test]
    fn xyzrpy_round_trip() {
        let iso = iso_from_xyzrpy(&[0.5, -1.0, 0.25, 0.1, -0.2, 0.3]);
        let (r, p, y) = iso.rotation.euler_angles();
        assert_relative_eq!(r, 0.1, epsilon = 1e-12);
        assert_relative_eq!(p, -0.2, epsilon = 1e-12);
        assert_relative_eq!(y, 0.3, epsilon = 1e-12);
        assert_relative_eq!(iso.translation.vector, Vector3::new(0.5, -1.0, 0.25));
    }

    #[test]
    fn warn_throttle_arms_once_per_window() {
        let mut throttle = WarnThrottle::new(Duration::from_secs(3600));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn parts_round_trip() {
        let iso = iso_from_xyzrpy(&[1.0, 2.0, 3.0, 0.4, 0.5, 0.6]);
        let (t, q) = parts_from_iso(&iso);
        let back = iso_from_parts(t, q);
        assert_relative_eq!(iso, back, epsilon = 1e-12);
    }
}
