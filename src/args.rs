// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{ArgAction, Parser};
use serde_json::json;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use zenoh::config::{Config, WhatAmI};

use crate::camera::{CameraSelector, DepthQuality, OpenOptions, Resolution, SensingMode};
use crate::context::{FrameIds, TrackingSettings};
use crate::poll::LoopOptions;
use crate::publish::Topics;
use crate::settings::{CameraControls, SettingChange};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera resolution mode.
    #[arg(long, env, value_enum, default_value = "hd720")]
    pub resolution: Resolution,

    /// Depth estimation quality preset.
    #[arg(long, env, value_enum, default_value = "performance")]
    pub quality: DepthQuality,

    /// Depth sensing mode.
    #[arg(long, env, value_enum, default_value = "standard")]
    pub sensing_mode: SensingMode,

    /// Target grab rate in frames per second.
    #[arg(long, env, default_value = "30")]
    pub frame_rate: f64,

    /// GPU selection for the SDK, -1 for automatic.
    #[arg(long, env, default_value = "-1", allow_hyphen_values = true)]
    pub gpu_id: i32,

    /// Camera selection by local enumeration index.
    #[arg(long, env, default_value = "0")]
    pub camera_id: i32,

    /// Camera selection by serial number. Takes precedence over the
    /// index; startup waits until this serial is connected.
    #[arg(long, env, default_value = "0")]
    pub serial_number: u32,

    /// Play back a recorded capture file instead of opening live
    /// hardware.
    #[arg(long, env)]
    pub replay: Option<PathBuf>,

    /// Publish depth as 16-bit millimeters instead of 32-bit float
    /// meters.
    #[arg(long, env)]
    pub openni_depth_mode: bool,

    /// Keep tracking enabled to stabilize the depth map even without
    /// pose subscribers.
    #[arg(long, env, action = ArgAction::Set, default_value_t = true)]
    pub depth_stabilization: bool,

    /// Broadcast the odometry and map coordinate frames.
    #[arg(long, env, action = ArgAction::Set, default_value_t = true)]
    pub publish_tf: bool,

    /// Inertial publish rate in Hz, 0 disables.
    #[arg(long, env, default_value = "100")]
    pub imu_rate: f64,

    /// Initial tracking pose as x y z roll pitch yaw.
    #[arg(
        long,
        env,
        default_value = "0 0 0 0 0 0",
        value_delimiter = ' ',
        num_args = 6,
        allow_hyphen_values = true
    )]
    pub initial_pose: Vec<f64>,

    /// Spatial-memory database file. Ignored with a warning when the
    /// path does not exist.
    #[arg(long, env)]
    pub odometry_db: Option<PathBuf>,

    /// Enable SDK pose smoothing.
    #[arg(long, env)]
    pub pose_smoothing: bool,

    /// Enable SDK spatial memory.
    #[arg(long, env)]
    pub spatial_memory: bool,

    /// Output resolution scale factor, clamped to [0.1, 1.0].
    #[arg(long, env, default_value = "1.0")]
    pub resize_factor: f64,

    #[arg(long, env, default_value = "4")]
    pub brightness: i32,

    #[arg(long, env, default_value = "4")]
    pub contrast: i32,

    #[arg(long, env, default_value = "0")]
    pub hue: i32,

    #[arg(long, env, default_value = "4")]
    pub saturation: i32,

    #[arg(long, env, default_value = "100")]
    pub exposure: i32,

    #[arg(long, env, default_value = "100")]
    pub gain: i32,

    #[arg(long, env, default_value = "4700")]
    pub whitebalance: i32,

    /// Depth confidence threshold.
    #[arg(long, env, default_value = "100")]
    pub confidence: i32,

    #[arg(long, env, action = ArgAction::Set, default_value_t = true)]
    pub auto_exposure: bool,

    #[arg(long, env, action = ArgAction::Set, default_value_t = true)]
    pub auto_whitebalance: bool,

    /// Flip the camera image upside down.
    #[arg(long, env)]
    pub flip: bool,

    /// The name of the map frame
    #[arg(long, env, default_value = "map")]
    pub map_frame: String,

    /// The name of the odometry frame
    #[arg(long, env, default_value = "odom")]
    pub odom_frame: String,

    /// The name of the base frame
    #[arg(long, env, default_value = "base_link")]
    pub base_frame: String,

    /// The name of the imu frame
    #[arg(long, env, default_value = "imu_link")]
    pub imu_frame: String,

    #[arg(long, env, default_value = "stereo_left_camera")]
    pub left_camera_frame: String,

    #[arg(long, env, default_value = "stereo_left_optical")]
    pub left_camera_optical_frame: String,

    #[arg(long, env, default_value = "stereo_right_camera")]
    pub right_camera_frame: String,

    #[arg(long, env, default_value = "stereo_right_optical")]
    pub right_camera_optical_frame: String,

    /// Frame transformation vector from the base_link
    #[arg(
        long,
        env,
        default_value = "0 0 0",
        value_delimiter = ' ',
        num_args = 3,
        allow_hyphen_values = true
    )]
    pub tf_vec: Vec<f64>,

    /// Frame transformation quaternion from the base_link
    #[arg(
        long,
        env,
        default_value = "0 0 0 1",
        value_delimiter = ' ',
        num_args = 4,
        allow_hyphen_values = true
    )]
    pub tf_quat: Vec<f64>,

    /// Base namespace for every published topic.
    #[arg(long, env, default_value = "rt/stereo")]
    pub topic_ns: String,

    #[arg(long, env)]
    pub rgb_topic: Option<String>,
    #[arg(long, env)]
    pub rgb_raw_topic: Option<String>,
    #[arg(long, env)]
    pub rgb_info_topic: Option<String>,
    #[arg(long, env)]
    pub rgb_info_raw_topic: Option<String>,
    #[arg(long, env)]
    pub left_topic: Option<String>,
    #[arg(long, env)]
    pub left_raw_topic: Option<String>,
    #[arg(long, env)]
    pub left_info_topic: Option<String>,
    #[arg(long, env)]
    pub left_info_raw_topic: Option<String>,
    #[arg(long, env)]
    pub right_topic: Option<String>,
    #[arg(long, env)]
    pub right_raw_topic: Option<String>,
    #[arg(long, env)]
    pub right_info_topic: Option<String>,
    #[arg(long, env)]
    pub right_info_raw_topic: Option<String>,
    #[arg(long, env)]
    pub depth_topic: Option<String>,
    #[arg(long, env)]
    pub depth_info_topic: Option<String>,
    #[arg(long, env)]
    pub disparity_topic: Option<String>,
    #[arg(long, env)]
    pub conf_image_topic: Option<String>,
    #[arg(long, env)]
    pub conf_map_topic: Option<String>,
    #[arg(long, env)]
    pub cloud_topic: Option<String>,
    #[arg(long, env)]
    pub odom_topic: Option<String>,
    #[arg(long, env)]
    pub pose_topic: Option<String>,
    #[arg(long, env)]
    pub imu_topic: Option<String>,
    #[arg(long, env)]
    pub imu_raw_topic: Option<String>,
    #[arg(long, env)]
    pub control_topic: Option<String>,
    #[arg(long, env)]
    pub set_pose_service: Option<String>,
    #[arg(long, env)]
    pub reset_tracking_service: Option<String>,

    /// Coordinate frame broadcast topic.
    #[arg(long, env, default_value = "rt/tf")]
    pub tf_topic: String,

    /// Static mount transform broadcast topic.
    #[arg(long, env, default_value = "rt/tf_static")]
    pub tf_static_topic: String,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl Args {
    fn topic(&self, override_: &Option<String>, default: &str) -> String {
        match override_ {
            Some(name) => name.clone(),
            None => format!("{}/{}", self.topic_ns, default),
        }
    }

    /// Resolved topic names for every channel, services included.
    pub fn topics(&self) -> Topics {
        let depth_default = if self.openni_depth_mode {
            "depth/depth_raw_registered"
        } else {
            "depth/depth_registered"
        };
        Topics {
            rgb: self.topic(&self.rgb_topic, "rgb/image_rect_color"),
            rgb_raw: self.topic(&self.rgb_raw_topic, "rgb/image_raw_color"),
            rgb_info: self.topic(&self.rgb_info_topic, "rgb/camera_info"),
            rgb_info_raw: self.topic(&self.rgb_info_raw_topic, "rgb/camera_info_raw"),
            left: self.topic(&self.left_topic, "left/image_rect_color"),
            left_raw: self.topic(&self.left_raw_topic, "left/image_raw_color"),
            left_info: self.topic(&self.left_info_topic, "left/camera_info"),
            left_info_raw: self.topic(&self.left_info_raw_topic, "left/camera_info_raw"),
            right: self.topic(&self.right_topic, "right/image_rect_color"),
            right_raw: self.topic(&self.right_raw_topic, "right/image_raw_color"),
            right_info: self.topic(&self.right_info_topic, "right/camera_info"),
            right_info_raw: self.topic(&self.right_info_raw_topic, "right/camera_info_raw"),
            depth: self.topic(&self.depth_topic, depth_default),
            depth_info: self.topic(&self.depth_info_topic, "depth/camera_info"),
            disparity: self.topic(&self.disparity_topic, "disparity/disparity_image"),
            conf_image: self.topic(&self.conf_image_topic, "confidence/confidence_image"),
            conf_map: self.topic(&self.conf_map_topic, "confidence/confidence_map"),
            cloud: self.topic(&self.cloud_topic, "point_cloud/cloud_registered"),
            odom: self.topic(&self.odom_topic, "odom"),
            pose: self.topic(&self.pose_topic, "map"),
            imu: self.topic(&self.imu_topic, "imu/data"),
            imu_raw: self.topic(&self.imu_raw_topic, "imu/data_raw"),
            tf: self.tf_topic.clone(),
            tf_static: self.tf_static_topic.clone(),
            control: self.topic(&self.control_topic, "control"),
            set_initial_pose: self.topic(&self.set_pose_service, "set_initial_pose"),
            reset_tracking: self.topic(&self.reset_tracking_service, "reset_tracking"),
        }
    }

    pub fn frame_ids(&self) -> FrameIds {
        FrameIds {
            map: self.map_frame.clone(),
            odom: self.odom_frame.clone(),
            base: self.base_frame.clone(),
            imu: self.imu_frame.clone(),
            left_optical: self.left_camera_optical_frame.clone(),
            right_optical: self.right_camera_optical_frame.clone(),
            // rgb, depth and confidence all reference the left eye
            optical: self.left_camera_optical_frame.clone(),
            camera: self.left_camera_frame.clone(),
        }
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            resolution: self.resolution,
            fps: self.frame_rate.max(0.0) as u32,
            quality: self.quality,
            gpu_id: self.gpu_id,
            selector: if self.serial_number > 0 {
                CameraSelector::Serial(self.serial_number)
            } else {
                CameraSelector::Index(self.camera_id)
            },
            replay: self.replay.clone(),
            depth_stabilization: self.depth_stabilization,
            flip: self.flip,
        }
    }

    pub fn controls(&self) -> CameraControls {
        let mut controls = CameraControls {
            brightness: self.brightness,
            contrast: self.contrast,
            hue: self.hue,
            saturation: self.saturation,
            exposure: self.exposure,
            gain: self.gain,
            whitebalance: self.whitebalance,
            confidence: self.confidence,
            ..CameraControls::default()
        };
        controls.apply(&SettingChange::AutoExposure(self.auto_exposure));
        controls.apply(&SettingChange::AutoWhiteBalance(self.auto_whitebalance));
        controls.set_resize_factor(self.resize_factor);
        controls
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        let area_db = match &self.odometry_db {
            Some(path) if path.exists() => Some(path.clone()),
            Some(path) => {
                warn!(
                    "odometry database {} does not exist, ignored",
                    path.display()
                );
                None
            }
            None => None,
        };
        TrackingSettings {
            area_db,
            pose_smoothing: self.pose_smoothing,
            spatial_memory: self.spatial_memory,
            initial_pose: self.initial_pose.clone(),
        }
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            rate_hz: self.frame_rate,
            ..LoopOptions::default()
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let mut config = Config::default();

        config
            .insert_json5("mode", &json!(args.mode).to_string())
            .unwrap();

        if !args.connect.is_empty() {
            config
                .insert_json5("connect/endpoints", &json!(args.connect).to_string())
                .unwrap();
        }

        if !args.listen.is_empty() {
            config
                .insert_json5("listen/endpoints", &json!(args.listen).to_string())
                .unwrap();
        }

        if args.no_multicast_scouting {
            config
                .insert_json5("scouting/multicast/enabled", &json!(false).to_string())
                .unwrap();
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics_derive_from_namespace() {
        let args = Args::try_parse_from(["stereopub"]).unwrap();
        let topics = args.topics();
        assert_eq!(topics.left, "rt/stereo/left/image_rect_color");
        assert_eq!(topics.cloud, "rt/stereo/point_cloud/cloud_registered");
        assert_eq!(topics.depth, "rt/stereo/depth/depth_registered");
        assert_eq!(topics.reset_tracking, "rt/stereo/reset_tracking");
        assert_eq!(topics.tf, "rt/tf");
    }

    #[test]
    fn openni_mode_switches_depth_topic() {
        let args = Args::try_parse_from(["stereopub", "--openni-depth-mode"]).unwrap();
        assert_eq!(args.topics().depth, "rt/stereo/depth/depth_raw_registered");
    }

    #[test]
    fn topic_overrides_win() {
        let args = Args::try_parse_from(["stereopub", "--depth-topic", "rt/custom/depth"]).unwrap();
        assert_eq!(args.topics().depth, "rt/custom/depth");
    }

    #[test]
    fn serial_number_takes_precedence_over_index() {
        let args = Args::try_parse_from(["stereopub", "--camera-id", "2"]).unwrap();
        assert_eq!(args.open_options().selector, CameraSelector::Index(2));
        let args =
            Args::try_parse_from(["stereopub", "--camera-id", "2", "--serial-number", "4242"])
                .unwrap();
        assert_eq!(args.open_options().selector, CameraSelector::Serial(4242));
    }

    #[test]
    fn resize_factor_is_clamped_at_parse_time() {
        let args = Args::try_parse_from(["stereopub", "--resize-factor", "7.5"]).unwrap();
        assert_eq!(args.controls().resize_factor, 1.0);
    }

    #[test]
    fn missing_odometry_db_is_cleared() {
        let args =
            Args::try_parse_from(["stereopub", "--odometry-db", "/nonexistent/area.db"]).unwrap();
        assert_eq!(args.tracking_settings().area_db, None);
    }
}
