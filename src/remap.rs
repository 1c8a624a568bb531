// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Axis remapping from SDK coordinate conventions to the bus convention.
//!
//! The bus convention is right-handed, Z-up, X-forward. Depending on the
//! SDK generation the camera reports data in one of three coordinate
//! families; the mapping between them is a fixed permutation-and-sign of
//! the three axes, selected once at startup and applied to every vector,
//! quaternion and covariance block that leaves the SDK.

use crate::camera::{CoordinateConvention, SdkPose};
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};

/// A signed axis permutation.
///
/// `idx[k]` selects which SDK component feeds bus axis `k`, `sign[k]`
/// flips it. The scalar component of a quaternion is never remapped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisMap {
    pub idx: [usize; 3],
    pub sign: [f64; 3],
}

impl AxisMap {
    /// Remap for the given SDK coordinate family.
    ///
    /// Selection is total: every supported convention has a fixed tuple
    /// and unknown future families are expected to report the newest one.
    pub fn for_convention(convention: CoordinateConvention) -> Self {
        match convention {
            CoordinateConvention::CameraOptical => Self {
                idx: [2, 0, 1],
                sign: [1.0, -1.0, -1.0],
            },
            CoordinateConvention::RightHandedZUp => Self {
                idx: [1, 0, 2],
                sign: [1.0, -1.0, 1.0],
            },
            CoordinateConvention::RightHandedZUpXFwd => Self {
                idx: [0, 1, 2],
                sign: [1.0, 1.0, 1.0],
            },
        }
    }

    /// The inverse mapping, taking bus axes back to SDK axes.
    pub fn inverse(&self) -> Self {
        let mut idx = [0usize; 3];
        let mut sign = [0.0f64; 3];
        for k in 0..3 {
            idx[self.idx[k]] = k;
            sign[self.idx[k]] = self.sign[k];
        }
        Self { idx, sign }
    }

    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        [
            self.sign[0] * v[self.idx[0]],
            self.sign[1] * v[self.idx[1]],
            self.sign[2] * v[self.idx[2]],
        ]
    }

    pub fn apply_f32(&self, v: [f32; 3]) -> [f32; 3] {
        [
            self.sign[0] as f32 * v[self.idx[0]],
            self.sign[1] as f32 * v[self.idx[1]],
            self.sign[2] as f32 * v[self.idx[2]],
        ]
    }

    /// Remap an x,y,z,w quaternion. Only the axis components are
    /// permuted and signed; w passes through.
    pub fn apply_quat(&self, q: [f64; 4]) -> [f64; 4] {
        [
            self.sign[0] * q[self.idx[0]],
            self.sign[1] * q[self.idx[1]],
            self.sign[2] * q[self.idx[2]],
            q[3],
        ]
    }

    /// Remap a row-major 3x3 covariance block as a signed-permutation
    /// similarity transform: rows and columns are both permuted, signs
    /// cancel on the diagonal.
    pub fn apply_cov(&self, cov: &[f64; 9]) -> [f64; 9] {
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[3 * r + c] = self.sign[r] * self.sign[c] * cov[3 * self.idx[r] + self.idx[c]];
            }
        }
        out
    }

    /// Convert an SDK pose into a bus-frame rigid transform.
    pub fn pose_to_iso(&self, pose: &SdkPose) -> Isometry3<f64> {
        let t = self.apply(pose.translation);
        let q = self.apply_quat(pose.orientation);
        let rot = UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]));
        Isometry3::from_parts(Translation3::new(t[0], t[1], t[2]), rot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CoordinateConvention; 3] = [
        CoordinateConvention::CameraOptical,
        CoordinateConvention::RightHandedZUp,
        CoordinateConvention::RightHandedZUpXFwd,
    ];

    #[test]
    fn maps_are_signed_bijections() {
        for convention in ALL {
            let map = AxisMap::for_convention(convention);
            let mut seen = [false; 3];
            for k in 0..3 {
                assert!(!seen[map.idx[k]], "{:?} repeats an axis", convention);
                seen[map.idx[k]] = true;
                assert!(map.sign[k] == 1.0 || map.sign[k] == -1.0);
            }
        }
    }

    #[test]
    fn inverse_round_trips() {
        let v = [1.0, -2.0, 3.0];
        for convention in ALL {
            let map = AxisMap::for_convention(convention);
            let inv = map.inverse();
            assert_eq!(inv.apply(map.apply(v)), v);
            assert_eq!(map.apply(inv.apply(v)), v);
        }
    }

    #[test]
    fn camera_optical_reference_mapping() {
        // Optical frame: z forward, x right, y down. Bus: x forward,
        // y left, z up.
        let map = AxisMap::for_convention(CoordinateConvention::CameraOptical);
        assert_eq!(map.apply([1.0, 2.0, 3.0]), [3.0, -1.0, -2.0]);
    }

    #[test]
    fn newest_convention_is_identity() {
        let map = AxisMap::for_convention(CoordinateConvention::RightHandedZUpXFwd);
        assert_eq!(map.apply([4.0, 5.0, 6.0]), [4.0, 5.0, 6.0]);
        assert_eq!(map.apply_quat([0.1, 0.2, 0.3, 0.9]), [0.1, 0.2, 0.3, 0.9]);
    }

    #[test]
    fn quaternion_scalar_never_remapped() {
        for convention in ALL {
            let map = AxisMap::for_convention(convention);
            let q = map.apply_quat([0.5, -0.5, 0.5, 0.7]);
            assert_eq!(q[3], 0.7);
        }
    }

    #[test]
    fn covariance_diagonal_is_permuted_without_sign() {
        let map = AxisMap::for_convention(CoordinateConvention::CameraOptical);
        let mut cov = [0.0; 9];
        cov[0] = 1.0; // var(x_sdk)
        cov[4] = 2.0; // var(y_sdk)
        cov[8] = 3.0; // var(z_sdk)
        let out = map.apply_cov(&cov);
        assert_eq!(out[0], 3.0);
        assert_eq!(out[4], 1.0);
        assert_eq!(out[8], 2.0);
    }
}
