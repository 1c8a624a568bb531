// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Inertial publication timer.
//!
//! The IMU runs on its own timer, decoupled from the grab rate. Each
//! period the task samples demand on the fused and raw topics, skips
//! entirely when nobody listens, and otherwise publishes the remapped
//! sample. When frame broadcasting is enabled the base-to-imu rotation
//! is derived from the fused orientation against the current base-to-map
//! estimate and broadcast regardless of message demand.

use crate::context::Context;
use crate::msg::{imu_message, stamp_from_ns, transform_message};
use crate::publish::{declare_publisher, has_subscribers, put_cdr, Topics};
use crate::camera::TimeReference;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use std::time::Duration;
use tracing::{debug, info, warn};
use zenoh::qos::Priority;
use zenoh::Session;

/// Rotation-only base-to-imu transform: the difference between the fused
/// IMU orientation (already remapped to bus axes) and the base-to-map
/// orientation estimate.
pub fn imu_frame_transform(orientation: [f64; 4], base_to_map: &Isometry3<f64>) -> Isometry3<f64> {
    let imu_q = UnitQuaternion::from_quaternion(Quaternion::new(
        orientation[3],
        orientation[0],
        orientation[1],
        orientation[2],
    ));
    let delta = imu_q * base_to_map.rotation.inverse();
    Isometry3::from_parts(Translation3::identity(), delta)
}

/// Timer task body. Returns immediately when the rate is zero or the
/// camera model carries no IMU.
pub async fn run(session: Session, ctx: Context, topics: Topics, rate_hz: f64) -> zenoh::Result<()> {
    if rate_hz <= 0.0 {
        return Ok(());
    }
    if !ctx.camera.has_imu() {
        warn!(
            "imu rate set to {} Hz but this camera model does not provide IMU data",
            rate_hz
        );
        return Ok(());
    }

    let pub_imu = declare_publisher(&session, &topics.imu, Priority::DataHigh).await?;
    let pub_imu_raw = declare_publisher(&session, &topics.imu_raw, Priority::DataHigh).await?;
    let pub_tf = declare_publisher(&session, &topics.tf, Priority::Background).await?;
    info!("publishing inertial data at {} Hz", rate_hz);

    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / rate_hz));
    loop {
        interval.tick().await;
        if ctx.is_shutdown() {
            break;
        }
        if !ctx.camera.is_open() {
            continue;
        }

        let want_fused = has_subscribers(&pub_imu);
        let want_raw = has_subscribers(&pub_imu_raw);
        if !want_fused && !want_raw && !ctx.publish_tf {
            continue;
        }

        let sample = match ctx.camera.imu_sample() {
            Ok(sample) => sample,
            Err(e) => {
                debug!("imu sample unavailable: {}", e);
                continue;
            }
        };
        let stamp = stamp_from_ns(ctx.camera.timestamp_ns(TimeReference::Image));

        if want_fused {
            let msg = imu_message(&sample, &ctx.axis_map, &ctx.frames.imu, stamp.clone(), false);
            put_cdr(&pub_imu, &msg, "sensor_msgs/msg/Imu");
        }
        if want_raw {
            let msg = imu_message(&sample, &ctx.axis_map, &ctx.frames.imu, stamp.clone(), true);
            put_cdr(&pub_imu_raw, &msg, "sensor_msgs/msg/Imu");
        }

        if ctx.publish_tf {
            let base_to_map = {
                let state = ctx.state.lock().unwrap();
                state.chain.odom_to_map * state.chain.base_to_odom
            };
            let orientation = ctx.axis_map.apply_quat(sample.orientation);
            let iso = imu_frame_transform(orientation, &base_to_map);
            put_cdr(
                &pub_tf,
                &transform_message(&iso, &ctx.frames.base, &ctx.frames.imu, stamp.clone()),
                "geometry_msgs/msg/TransformStamped",
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn imu_frame_is_rotation_only() {
        let base_to_map = Isometry3::from_parts(
            Translation3::new(5.0, 6.0, 7.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0),
        );
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, 1.3);
        let iso = imu_frame_transform([q.coords.x, q.coords.y, q.coords.z, q.coords.w], &base_to_map);
        assert_eq!(iso.translation.vector.norm(), 0.0);
        let (_, _, yaw) = iso.rotation.euler_angles();
        assert_relative_eq!(yaw, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn matching_orientation_gives_identity() {
        let base_to_map = Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let q = base_to_map.rotation;
        let iso = imu_frame_transform([q.coords.x, q.coords.y, q.coords.z, q.coords.w], &base_to_map);
        assert_relative_eq!(iso, Isometry3::identity(), epsilon = 1e-12);
    }
}
