// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bus message construction.
//!
//! Conversions from SDK buffers and rigid transforms into the
//! ROS2-compatible CDR message types published on the bus. The common
//! types come from `edgefirst_schemas`; the stereo/odometry/inertial
//! messages the schema set does not cover are defined here with the
//! standard field layout so subscribers decode them with stock ROS 2
//! definitions.

use crate::camera::{Calibration, CloudFrame, ImageFrame, ImuSample, MeasureFrame};
use crate::remap::AxisMap;
use edgefirst_schemas::{
    builtin_interfaces::Time,
    geometry_msgs::{Quaternion, Transform, TransformStamped, Vector3},
    sensor_msgs::{CameraInfo, Image, PointField, RegionOfInterest},
    std_msgs::Header,
};
use nalgebra::{Isometry3, Rotation3, Vector3 as NVector3};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

/// geometry_msgs/msg/Point
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// geometry_msgs/msg/Pose
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

/// geometry_msgs/msg/PoseStamped
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

/// geometry_msgs/msg/PoseWithCovariance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    #[serde(with = "BigArray")]
    pub covariance: [f64; 36],
}

/// geometry_msgs/msg/Twist
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

/// geometry_msgs/msg/TwistWithCovariance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwistWithCovariance {
    pub twist: Twist,
    #[serde(with = "BigArray")]
    pub covariance: [f64; 36],
}

/// nav_msgs/msg/Odometry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

/// sensor_msgs/msg/Imu
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: Vector3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vector3,
    pub linear_acceleration_covariance: [f64; 9],
}

/// stereo_msgs/msg/DisparityImage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisparityImage {
    pub header: Header,
    pub image: Image,
    pub f: f32,
    pub t: f32,
    pub valid_window: RegionOfInterest,
    pub min_disparity: f32,
    pub max_disparity: f32,
    pub delta_d: f32,
}

/// Get current timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn now_ns() -> Result<u64, std::io::Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn now_ns() -> Result<u64, std::io::Error> {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(duration.as_nanos() as u64)
}

/// Bus timestamp from a nanosecond clock value.
pub fn stamp_from_ns(ns: u64) -> Time {
    Time {
        sec: (ns / 1_000_000_000) as i32,
        nanosec: (ns % 1_000_000_000) as u32,
    }
}

pub fn header(stamp: Time, frame_id: &str) -> Header {
    Header {
        stamp,
        frame_id: frame_id.to_string(),
    }
}

fn empty_roi() -> RegionOfInterest {
    RegionOfInterest {
        x_offset: 0,
        y_offset: 0,
        height: 0,
        width: 0,
        do_rectify: false,
    }
}

/// Color image message. The SDK delivers RGBA; the alpha plane is
/// stripped so the wire carries `rgb8`.
pub fn image_message(frame: &ImageFrame, frame_id: &str, stamp: Time) -> Image {
    let data = if frame.channels == 4 {
        frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect()
    } else {
        frame.data.clone()
    };
    Image {
        header: header(stamp, frame_id),
        height: frame.height,
        width: frame.width,
        encoding: "rgb8".to_string(),
        is_bigendian: 0,
        step: frame.width * 3,
        data,
    }
}

/// Single-channel float measure as a `32FC1` image.
pub fn measure_message(frame: &MeasureFrame, frame_id: &str, stamp: Time) -> Image {
    let data = frame.data.iter().flat_map(|v| v.to_le_bytes()).collect();
    Image {
        header: header(stamp, frame_id),
        height: frame.height,
        width: frame.width,
        encoding: "32FC1".to_string(),
        is_bigendian: 0,
        step: frame.width * 4,
        data,
    }
}

/// Depth image message.
///
/// In OpenNI mode depth is rounded to 16-bit millimeters (`mono16`),
/// otherwise it stays 32-bit float meters.
pub fn depth_message(frame: &MeasureFrame, openni_mode: bool, frame_id: &str, stamp: Time) -> Image {
    if !openni_mode {
        return measure_message(frame, frame_id, stamp);
    }
    let data = frame
        .data
        .iter()
        .map(|m| {
            let mm = (m * 1000.0).round();
            if mm.is_finite() && mm > 0.0 {
                mm.min(u16::MAX as f32) as u16
            } else {
                0
            }
        })
        .flat_map(|v| v.to_le_bytes())
        .collect();
    Image {
        header: header(stamp, frame_id),
        height: frame.height,
        width: frame.width,
        encoding: "mono16".to_string(),
        is_bigendian: 0,
        step: frame.width * 2,
        data,
    }
}

/// Disparity message with bounds derived from the stereo geometry.
///
/// The SDK reports the disparity measure with inverted sign; the values
/// are flipped here so the published image is positive.
/// TODO: confirm the flip against the SDK's documented disparity sign
/// convention instead of relying on observed output.
pub fn disparity_message(
    frame: &MeasureFrame,
    calib: &Calibration,
    depth_range: (f64, f64),
    frame_id: &str,
    stamp: Time,
) -> DisparityImage {
    let flipped = MeasureFrame {
        width: frame.width,
        height: frame.height,
        data: frame.data.iter().map(|v| -v).collect(),
    };
    let image = measure_message(&flipped, frame_id, stamp);
    let f = calib.left.fx as f32;
    let t = calib.baseline as f32;
    let (min_depth, max_depth) = depth_range;
    DisparityImage {
        header: image.header.clone(),
        image,
        f,
        t,
        valid_window: empty_roi(),
        min_disparity: f * t / max_depth as f32,
        max_disparity: f * t / min_depth as f32,
        delta_d: 0.0,
    }
}

/// Camera info pair for the left and right eyes.
///
/// Distortion goes out in plumb_bob order (k1, k2, k3, p1, p2), reordered
/// from the SDK's k1, k2, p1, p2, k3. The rectified pair carries identity
/// rectification; the raw pair derives the right rotation from the SDK's
/// axis-angle stereo extrinsics. The right projection carries the stereo
/// offset `-fx_left * baseline`.
pub fn camera_info_pair(
    calib: &Calibration,
    width: u32,
    height: u32,
    left_frame: &str,
    right_frame: &str,
    raw: bool,
) -> (CameraInfo, CameraInfo) {
    let mut right_r = [0.0f64; 9];
    let mut left_r = [0.0f64; 9];
    for i in 0..3 {
        left_r[i + i * 3] = 1.0;
        right_r[i + i * 3] = 1.0;
    }
    if raw {
        let rot = Rotation3::from_scaled_axis(NVector3::new(
            calib.rotation[0],
            calib.rotation[1],
            calib.rotation[2],
        ));
        let m = rot.matrix();
        for row in 0..3 {
            for col in 0..3 {
                right_r[3 * row + col] = m[(row, col)];
            }
        }
    }

    let eye = |intr: &crate::camera::Intrinsics, frame: &str, r: [f64; 9], p3: f64| CameraInfo {
        header: header(Time { sec: 0, nanosec: 0 }, frame),
        height,
        width,
        distortion_model: "plumb_bob".to_string(),
        d: vec![
            intr.disto[0], // k1
            intr.disto[1], // k2
            intr.disto[4], // k3
            intr.disto[2], // p1
            intr.disto[3], // p2
        ],
        k: [
            intr.fx, 0.0, intr.cx, //
            0.0, intr.fy, intr.cy, //
            0.0, 0.0, 1.0,
        ],
        r,
        p: [
            intr.fx, 0.0, intr.cx, p3, //
            0.0, intr.fy, intr.cy, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ],
        binning_x: 0,
        binning_y: 0,
        roi: empty_roi(),
    };

    let left = eye(&calib.left, left_frame, left_r, 0.0);
    let right = eye(
        &calib.right,
        right_frame,
        right_r,
        -calib.left.fx * calib.baseline,
    );
    (left, right)
}

fn vector3(v: [f64; 3]) -> Vector3 {
    Vector3 {
        x: v[0],
        y: v[1],
        z: v[2],
    }
}

fn quaternion(q: [f64; 4]) -> Quaternion {
    Quaternion {
        x: q[0],
        y: q[1],
        z: q[2],
        w: q[3],
    }
}

/// Inertial message with every vector and covariance block remapped to
/// bus axes. The raw variant omits orientation and flags it with the
/// REP-145 covariance sentinel.
pub fn imu_message(
    sample: &ImuSample,
    map: &AxisMap,
    frame_id: &str,
    stamp: Time,
    raw: bool,
) -> Imu {
    let mut orientation_covariance = map.apply_cov(&sample.orientation_cov);
    let orientation = if raw {
        orientation_covariance = [0.0; 9];
        // Orientation is not available on the raw topic (REP-145)
        orientation_covariance[0] = -1.0;
        quaternion([0.0, 0.0, 0.0, 1.0])
    } else {
        quaternion(map.apply_quat(sample.orientation))
    };
    Imu {
        header: header(stamp, frame_id),
        orientation,
        orientation_covariance,
        angular_velocity: vector3(map.apply(sample.angular_velocity)),
        angular_velocity_covariance: map.apply_cov(&sample.angular_velocity_cov),
        linear_acceleration: vector3(map.apply(sample.linear_acceleration)),
        linear_acceleration_covariance: map.apply_cov(&sample.linear_acceleration_cov),
    }
}

fn pose_from_iso(iso: &Isometry3<f64>) -> Pose {
    let t = iso.translation.vector;
    let q = iso.rotation.coords;
    Pose {
        position: Point {
            x: t.x,
            y: t.y,
            z: t.z,
        },
        orientation: Quaternion {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        },
    }
}

pub fn odometry_message(
    iso: &Isometry3<f64>,
    odom_frame: &str,
    base_frame: &str,
    stamp: Time,
) -> Odometry {
    Odometry {
        header: header(stamp, odom_frame),
        child_frame_id: base_frame.to_string(),
        pose: PoseWithCovariance {
            pose: pose_from_iso(iso),
            covariance: [0.0; 36],
        },
        twist: TwistWithCovariance {
            twist: Twist {
                linear: vector3([0.0; 3]),
                angular: vector3([0.0; 3]),
            },
            covariance: [0.0; 36],
        },
    }
}

pub fn pose_message(iso: &Isometry3<f64>, map_frame: &str, stamp: Time) -> PoseStamped {
    PoseStamped {
        header: header(stamp, map_frame),
        pose: pose_from_iso(iso),
    }
}

pub fn transform_message(
    iso: &Isometry3<f64>,
    parent: &str,
    child: &str,
    stamp: Time,
) -> TransformStamped {
    let t = iso.translation.vector;
    let q = iso.rotation.coords;
    TransformStamped {
        header: header(stamp, parent),
        child_frame_id: child.to_string(),
        transform: Transform {
            translation: Vector3 {
                x: t.x,
                y: t.y,
                z: t.z,
            },
            rotation: Quaternion {
                x: q.x,
                y: q.y,
                z: q.z,
                w: q.w,
            },
        },
    }
}

/// Point fields for the colored cloud (x, y, z, rgb as f32, 16-byte
/// stride).
pub fn cloud_fields() -> Vec<PointField> {
    const FLOAT32: u8 = 7;
    ["x", "y", "z", "rgb"]
        .iter()
        .enumerate()
        .map(|(i, name)| PointField {
            name: name.to_string(),
            offset: 4 * i as u32,
            datatype: FLOAT32,
            count: 1,
        })
        .collect()
}

/// Pack an organized cloud into the 16-byte wire layout, applying the
/// axis map to the coordinates. The packed color float passes through
/// untouched.
pub fn pack_cloud(points: &[[f32; 4]], map: &AxisMap) -> Vec<u8> {
    let mut data = Vec::with_capacity(points.len() * 16);
    for pt in points {
        let xyz = map.apply_f32([pt[0], pt[1], pt[2]]);
        data.extend_from_slice(&xyz[0].to_le_bytes());
        data.extend_from_slice(&xyz[1].to_le_bytes());
        data.extend_from_slice(&xyz[2].to_le_bytes());
        data.extend_from_slice(&pt[3].to_le_bytes());
    }
    data
}

/// Assemble the cloud message from pre-packed data.
pub fn cloud_message(
    frame: &CloudFrame,
    data: Vec<u8>,
    frame_id: &str,
    stamp: Time,
) -> edgefirst_schemas::sensor_msgs::PointCloud2 {
    edgefirst_schemas::sensor_msgs::PointCloud2 {
        header: header(stamp, frame_id),
        height: frame.height,
        width: frame.width,
        fields: cloud_fields(),
        is_bigendian: false,
        point_step: 16,
        row_step: 16 * frame.width,
        data,
        is_dense: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CoordinateConvention, Intrinsics};
    use approx::assert_relative_eq;

    fn test_calib() -> Calibration {
        Calibration {
            left: Intrinsics {
                fx: 700.0,
                fy: 701.0,
                cx: 640.0,
                cy: 360.0,
                disto: [0.1, 0.2, 0.3, 0.4, 0.5],
            },
            right: Intrinsics {
                fx: 702.0,
                fy: 703.0,
                cx: 641.0,
                cy: 361.0,
                disto: [0.0; 5],
            },
            baseline: 0.12,
            rotation: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn stamp_splits_nanoseconds() {
        let t = stamp_from_ns(1_500_000_123);
        assert_eq!(t.sec, 1);
        assert_eq!(t.nanosec, 500_000_123);
    }

    #[test]
    fn rgba_is_stripped_to_rgb() {
        let frame = ImageFrame {
            width: 2,
            height: 1,
            channels: 4,
            data: vec![1, 2, 3, 255, 4, 5, 6, 255],
        };
        let msg = image_message(&frame, "cam", stamp_from_ns(0));
        assert_eq!(msg.encoding, "rgb8");
        assert_eq!(msg.step, 6);
        assert_eq!(msg.data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn depth_openni_mode_rounds_to_millimeters() {
        let frame = MeasureFrame {
            width: 3,
            height: 1,
            data: vec![1.5, 0.0004, f32::NAN],
        };
        let msg = depth_message(&frame, true, "depth", stamp_from_ns(0));
        assert_eq!(msg.encoding, "mono16");
        assert_eq!(msg.step, 6);
        let vals: Vec<u16> = msg
            .data
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(vals, vec![1500, 0, 0]);
    }

    #[test]
    fn depth_float_mode_keeps_meters() {
        let frame = MeasureFrame {
            width: 1,
            height: 1,
            data: vec![2.25],
        };
        let msg = depth_message(&frame, false, "depth", stamp_from_ns(0));
        assert_eq!(msg.encoding, "32FC1");
        assert_eq!(f32::from_le_bytes(msg.data[..4].try_into().unwrap()), 2.25);
    }

    #[test]
    fn disparity_bounds_from_stereo_geometry() {
        let frame = MeasureFrame {
            width: 1,
            height: 1,
            data: vec![-32.0],
        };
        let msg = disparity_message(&frame, &test_calib(), (0.5, 20.0), "disp", stamp_from_ns(0));
        assert_relative_eq!(msg.min_disparity, 700.0 * 0.12 / 20.0);
        assert_relative_eq!(msg.max_disparity, 700.0 * 0.12 / 0.5);
        assert_eq!(msg.f, 700.0);
        assert_eq!(msg.t, 0.12);
        // Retrieved measure is sign-flipped on the way out
        assert_eq!(
            f32::from_le_bytes(msg.image.data[..4].try_into().unwrap()),
            32.0
        );
    }

    #[test]
    fn camera_info_reorders_distortion() {
        let (left, _right) = camera_info_pair(&test_calib(), 1280, 720, "l", "r", false);
        // SDK order k1,k2,p1,p2,k3 -> plumb_bob k1,k2,k3,p1,p2
        assert_eq!(left.d, vec![0.1, 0.2, 0.5, 0.3, 0.4]);
        assert_eq!(left.width, 1280);
        assert_eq!(left.height, 720);
    }

    #[test]
    fn right_projection_carries_stereo_offset() {
        let (left, right) = camera_info_pair(&test_calib(), 1280, 720, "l", "r", false);
        assert_relative_eq!(left.p[3], 0.0);
        assert_relative_eq!(right.p[3], -700.0 * 0.12);
        assert_relative_eq!(right.p[0], 702.0);
    }

    #[test]
    fn rectified_rotation_is_identity_raw_is_not() {
        let mut calib = test_calib();
        calib.rotation = [0.0, 0.0, 0.3];
        let (_, right) = camera_info_pair(&calib, 640, 360, "l", "r", false);
        assert_eq!(right.r, [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let (left_raw, right_raw) = camera_info_pair(&calib, 640, 360, "l", "r", true);
        assert_eq!(left_raw.r[0], 1.0);
        // Rotation about z by 0.3 rad
        assert_relative_eq!(right_raw.r[0], 0.3f64.cos(), epsilon = 1e-12);
        assert_relative_eq!(right_raw.r[1], -(0.3f64.sin()), epsilon = 1e-12);
    }

    #[test]
    fn raw_imu_flags_missing_orientation() {
        let map = AxisMap::for_convention(CoordinateConvention::RightHandedZUpXFwd);
        let sample = ImuSample {
            orientation: [0.1, 0.2, 0.3, 0.9],
            angular_velocity: [1.0, 2.0, 3.0],
            ..Default::default()
        };
        let msg = imu_message(&sample, &map, "imu", stamp_from_ns(0), true);
        assert_eq!(msg.orientation_covariance[0], -1.0);
        assert_eq!(msg.orientation.w, 1.0);
        assert_eq!(msg.angular_velocity.x, 1.0);
        let fused = imu_message(&sample, &map, "imu", stamp_from_ns(0), false);
        assert_eq!(fused.orientation.x, 0.1);
        assert_eq!(fused.orientation.w, 0.9);
    }

    #[test]
    fn cloud_packing_applies_axis_map() {
        let map = AxisMap::for_convention(CoordinateConvention::CameraOptical);
        let color = f32::from_bits(0xdead_beef);
        let points = [[1.0f32, 2.0, 3.0, color]];
        let data = pack_cloud(&points, &map);
        assert_eq!(data.len(), 16);
        let x = f32::from_le_bytes(data[0..4].try_into().unwrap());
        let y = f32::from_le_bytes(data[4..8].try_into().unwrap());
        let z = f32::from_le_bytes(data[8..12].try_into().unwrap());
        let c = u32::from_le_bytes(data[12..16].try_into().unwrap());
        assert_eq!((x, y, z), (3.0, -1.0, -2.0));
        assert_eq!(c, 0xdead_beef);
    }

    #[test]
    fn locally_defined_messages_round_trip_through_cdr() {
        // Published with the schema-set encoder, decoded with the stock
        // cdr crate, the same pairing the middleware samples rely on.
        let odom = odometry_message(
            &crate::transforms::iso_from_xyzrpy(&[1.0, -2.0, 0.5, 0.0, 0.0, 0.7]),
            "odom",
            "base_link",
            stamp_from_ns(42_000_000_123),
        );
        let bytes = edgefirst_schemas::serde_cdr::serialize(&odom).unwrap();
        let back: Odometry = cdr::deserialize(&bytes).unwrap();
        assert_eq!(back.header.frame_id, "odom");
        assert_eq!(back.child_frame_id, "base_link");
        assert_eq!(back.pose.pose.position.x, odom.pose.pose.position.x);
        assert_eq!(back.pose.covariance.len(), 36);

        let map = AxisMap::for_convention(CoordinateConvention::RightHandedZUpXFwd);
        let imu = imu_message(
            &ImuSample {
                orientation: [0.0, 0.0, 0.0, 1.0],
                linear_acceleration: [0.1, 0.2, 9.8],
                ..Default::default()
            },
            &map,
            "imu_link",
            stamp_from_ns(0),
            false,
        );
        let bytes = edgefirst_schemas::serde_cdr::serialize(&imu).unwrap();
        let back: Imu = cdr::deserialize(&bytes).unwrap();
        assert_eq!(back.linear_acceleration.z, 9.8);
    }

    #[test]
    fn cloud_fields_layout() {
        let fields = cloud_fields();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3].name, "rgb");
        assert_eq!(fields[3].offset, 12);
    }
}
