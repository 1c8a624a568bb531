// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Long-lived shared state for the publisher.
//!
//! One [`Context`] is built at startup and handed (cheaply cloned) to the
//! acquisition loop, the bus service handlers, the control subscriber and
//! the IMU task. All cross-thread mutable state lives behind the single
//! [`SharedState`] mutex: camera controls, output dimensions, the
//! regenerated camera-info messages and the tracking transform chain.
//! Bus callbacks never touch that state directly; they go through the
//! command methods on [`Context`], which serialize against the
//! acquisition loop's per-tick settings-and-publish block.

use crate::camera::{
    Calibration, Error, OpenOptions, SensingMode, StereoCamera, TrackingOptions,
};
use crate::msg::camera_info_pair;
use crate::remap::AxisMap;
use crate::settings::{CameraControls, SettingChange};
use crate::transforms::{iso_from_xyzrpy, sdk_pose_from_iso, FrameLookup, TrackingChain};
use edgefirst_schemas::sensor_msgs::CameraInfo;
use nalgebra::Isometry3;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Coordinate frame identifiers resolved from configuration.
#[derive(Clone, Debug)]
pub struct FrameIds {
    pub map: String,
    pub odom: String,
    pub base: String,
    pub imu: String,
    pub left_optical: String,
    pub right_optical: String,
    /// Optical frame for rgb, depth and confidence output.
    pub optical: String,
    /// Camera body frame for disparity and point cloud output.
    pub camera: String,
}

/// Tracking configuration fixed at startup.
#[derive(Clone, Debug, Default)]
pub struct TrackingSettings {
    pub area_db: Option<PathBuf>,
    pub pose_smoothing: bool,
    pub spatial_memory: bool,
    /// Configured initial pose as x,y,z,roll,pitch,yaw.
    pub initial_pose: Vec<f64>,
}

/// State shared between the acquisition loop and bus callbacks, guarded
/// by one mutex.
pub struct SharedState {
    pub controls: CameraControls,
    pub cam_width: u32,
    pub cam_height: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub left_info: CameraInfo,
    pub right_info: CameraInfo,
    pub left_info_raw: CameraInfo,
    pub right_info_raw: CameraInfo,
    pub rgb_info: CameraInfo,
    pub rgb_info_raw: CameraInfo,
    pub depth_info: CameraInfo,
    pub chain: TrackingChain,
    pub tracking_active: bool,
    /// Current initial pose, re-settable through the pose service.
    pub initial_pose: Vec<f64>,
}

impl SharedState {
    pub fn new(controls: CameraControls, initial_pose: Vec<f64>) -> Self {
        let (left, right) = camera_info_pair(&Calibration::default(), 0, 0, "", "", false);
        Self {
            controls,
            cam_width: 0,
            cam_height: 0,
            out_width: 0,
            out_height: 0,
            left_info: left.clone(),
            right_info: right.clone(),
            left_info_raw: left.clone(),
            right_info_raw: right,
            rgb_info: left.clone(),
            rgb_info_raw: left.clone(),
            depth_info: left,
            chain: TrackingChain::default(),
            tracking_active: false,
            initial_pose,
        }
    }

    /// Re-read the native resolution and regenerate the output dimensions
    /// and camera-info messages. Called after every (re)open and resize.
    pub fn refresh_dimensions(&mut self, camera: &dyn StereoCamera, frames: &FrameIds) {
        let (cw, ch) = camera.resolution();
        self.cam_width = cw;
        self.cam_height = ch;
        self.out_width = (cw as f64 * self.controls.resize_factor).floor() as u32;
        self.out_height = (ch as f64 * self.controls.resize_factor).floor() as u32;
        self.regenerate_camera_info(camera, frames);
    }

    /// Clamp and apply a new resize factor, returning the resulting
    /// output dimensions.
    pub fn set_resize_factor(
        &mut self,
        factor: f64,
        camera: &dyn StereoCamera,
        frames: &FrameIds,
    ) -> (u32, u32) {
        self.controls.set_resize_factor(factor);
        self.refresh_dimensions(camera, frames);
        (self.out_width, self.out_height)
    }

    fn regenerate_camera_info(&mut self, camera: &dyn StereoCamera, frames: &FrameIds) {
        let (w, h) = (self.out_width, self.out_height);
        let calib = camera.calibration(w, h, false);
        let (left, right) =
            camera_info_pair(&calib, w, h, &frames.left_optical, &frames.right_optical, false);
        let calib_raw = camera.calibration(w, h, true);
        let (left_raw, right_raw) = camera_info_pair(
            &calib_raw,
            w,
            h,
            &frames.left_optical,
            &frames.right_optical,
            true,
        );
        // The reference camera is the left one: rgb and depth reuse its
        // intrinsics.
        self.rgb_info = left.clone();
        self.rgb_info_raw = left_raw.clone();
        self.depth_info = left.clone();
        self.left_info = left;
        self.right_info = right;
        self.left_info_raw = left_raw;
        self.right_info_raw = right_raw;
    }

    /// The configured initial pose as a rigid transform; `None` when the
    /// vector is malformed.
    pub fn initial_pose_iso(&self) -> Option<Isometry3<f64>> {
        pose_from_vec(&self.initial_pose)
    }
}

fn pose_from_vec(pose: &[f64]) -> Option<Isometry3<f64>> {
    let fixed: &[f64; 6] = pose.try_into().ok()?;
    Some(iso_from_xyzrpy(fixed))
}

/// Everything the long-running tasks share. Cloning is cheap.
#[derive(Clone)]
pub struct Context {
    pub camera: Arc<dyn StereoCamera>,
    pub state: Arc<Mutex<SharedState>>,
    pub shutdown: Arc<AtomicBool>,
    pub axis_map: AxisMap,
    pub lookup: Arc<dyn FrameLookup>,
    pub frames: Arc<FrameIds>,
    pub open_opts: OpenOptions,
    pub tracking: TrackingSettings,
    pub sensing_mode: SensingMode,
    pub openni_depth_mode: bool,
    pub publish_tf: bool,
    pub depth_stabilization: bool,
}

impl Context {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Activate SDK tracking from the current initial pose.
    ///
    /// The caller already holds the shared-state lock; both transforms
    /// reset to the initial pose as part of activation.
    pub fn start_tracking(&self, state: &mut SharedState) -> Result<(), Error> {
        let pose = match state.initial_pose_iso() {
            Some(pose) => pose,
            None => {
                warn!(
                    "invalid initial pose size ({}), using identity",
                    state.initial_pose.len()
                );
                Isometry3::identity()
            }
        };
        state.chain.set_pose(pose);

        let mut area_db = self.tracking.area_db.clone();
        if let Some(path) = &area_db {
            if !path.exists() {
                warn!("tracking database {} does not exist, ignored", path.display());
                area_db = None;
            }
        }

        self.camera.enable_tracking(&TrackingOptions {
            area_db,
            pose_smoothing: self.tracking.pose_smoothing,
            spatial_memory: self.tracking.spatial_memory,
            initial_pose: sdk_pose_from_iso(&pose),
        })?;
        state.tracking_active = true;
        info!("tracking started");
        Ok(())
    }

    /// Pose service: store a new initial pose, reset both transforms and
    /// re-seed SDK tracking when active. Always succeeds.
    pub fn set_initial_pose(&self, pose: [f64; 6]) {
        let mut state = self.state.lock().unwrap();
        state.initial_pose = pose.to_vec();
        let iso = iso_from_xyzrpy(&pose);
        state.chain.set_pose(iso);
        if state.tracking_active {
            if let Err(e) = self.camera.reset_tracking(&sdk_pose_from_iso(&iso)) {
                warn!("tracking reset after pose change failed: {}", e);
            }
        }
    }

    /// Reset service: fails when tracking is inactive, otherwise re-reads
    /// the configured initial pose (identity when malformed) and resets
    /// both the transform chain and the SDK tracking state.
    pub fn reset_tracking(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if !state.tracking_active {
            return Err(Error::Tracking("tracking is not active".into()));
        }
        state.initial_pose = self.tracking.initial_pose.clone();
        let pose = match state.initial_pose_iso() {
            Some(pose) => pose,
            None => {
                warn!(
                    "invalid initial pose size ({}), using identity",
                    state.initial_pose.len()
                );
                Isometry3::identity()
            }
        };
        state.chain.set_pose(pose);
        self.camera.reset_tracking(&sdk_pose_from_iso(&pose))
    }

    /// Control subscriber entry point: apply one settings change.
    ///
    /// The resize factor recomputes the output dimensions and regenerates
    /// the stereo camera-info pairs synchronously, still under the shared
    /// mutex so it cannot interleave with a publish block.
    pub fn apply_setting(&self, change: SettingChange) {
        info!("reconfigure {:?}", change);
        let mut state = self.state.lock().unwrap();
        match change {
            SettingChange::ResizeFactor(factor) => {
                let (w, h) = state.set_resize_factor(factor, &*self.camera, &self.frames);
                info!("output size {}x{}", w, h);
            }
            other => state.controls.apply(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraSelector, Resolution};
    use crate::sim::SimCamera;
    use crate::transforms::StaticLookup;
    use approx::assert_relative_eq;

    fn test_frames() -> FrameIds {
        FrameIds {
            map: "map".into(),
            odom: "odom".into(),
            base: "base_link".into(),
            imu: "imu_link".into(),
            left_optical: "left_optical".into(),
            right_optical: "right_optical".into(),
            optical: "optical".into(),
            camera: "camera".into(),
        }
    }

    fn test_context() -> (Context, Arc<SimCamera>) {
        let camera = Arc::new(SimCamera::new(1000));
        camera.open(&OpenOptions::default()).unwrap();
        let mut state = SharedState::new(CameraControls::default(), vec![0.0; 6]);
        let frames = test_frames();
        state.refresh_dimensions(&*camera, &frames);
        let ctx = Context {
            camera: camera.clone(),
            state: Arc::new(Mutex::new(state)),
            shutdown: Arc::new(AtomicBool::new(false)),
            axis_map: AxisMap::for_convention(camera.coordinate_convention()),
            lookup: Arc::new(StaticLookup::new([0.0; 3], [0.0, 0.0, 0.0, 1.0])),
            frames: Arc::new(frames),
            open_opts: OpenOptions {
                selector: CameraSelector::Serial(1000),
                ..OpenOptions::default()
            },
            tracking: TrackingSettings {
                initial_pose: vec![0.0; 6],
                ..TrackingSettings::default()
            },
            sensing_mode: SensingMode::Standard,
            openni_depth_mode: false,
            publish_tf: true,
            depth_stabilization: false,
        };
        (ctx, camera)
    }

    #[test]
    fn resize_updates_dimensions_and_intrinsics() {
        let (ctx, _camera) = test_context();
        let mut state = ctx.state.lock().unwrap();
        assert_eq!((state.out_width, state.out_height), (1280, 720));
        let (w, h) = state.set_resize_factor(0.5, &*ctx.camera, &ctx.frames);
        assert_eq!((w, h), (640, 360));
        assert_eq!(state.left_info.width, 640);
        assert_eq!(state.left_info.height, 360);
        assert_eq!(state.rgb_info.width, 640);
        // Out-of-range factors clamp to the boundaries
        assert_eq!(
            state.set_resize_factor(0.01, &*ctx.camera, &ctx.frames),
            (128, 72)
        );
        assert_eq!(
            state.set_resize_factor(5.0, &*ctx.camera, &ctx.frames),
            (1280, 720)
        );
    }

    #[test]
    fn resolution_mode_feeds_output_dimensions() {
        let camera = SimCamera::new(1);
        camera
            .open(&OpenOptions {
                resolution: Resolution::Vga,
                ..OpenOptions::default()
            })
            .unwrap();
        let mut state = SharedState::new(CameraControls::default(), vec![0.0; 6]);
        state.controls.set_resize_factor(0.5);
        state.refresh_dimensions(&camera, &test_frames());
        assert_eq!((state.out_width, state.out_height), (336, 188));
    }

    #[test]
    fn set_initial_pose_overrides_chain_and_always_applies() {
        let (ctx, _camera) = test_context();
        ctx.set_initial_pose([1.0, 2.0, 3.0, 0.0, 0.0, 0.5]);
        let state = ctx.state.lock().unwrap();
        let expected = iso_from_xyzrpy(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.5]);
        assert_relative_eq!(state.chain.base_to_odom, expected, epsilon = 1e-12);
        assert_relative_eq!(state.chain.odom_to_map, expected, epsilon = 1e-12);
        assert_eq!(state.initial_pose, vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn reset_tracking_requires_active_tracking() {
        let (ctx, camera) = test_context();
        ctx.set_initial_pose([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let before = ctx.state.lock().unwrap().chain.base_to_odom;
        assert!(ctx.reset_tracking().is_err());
        // State untouched on failure
        let state = ctx.state.lock().unwrap();
        assert_relative_eq!(state.chain.base_to_odom, before, epsilon = 1e-12);
        drop(state);

        ctx.start_tracking(&mut ctx.state.lock().unwrap()).unwrap();
        assert!(camera.tracking_enabled());
        assert!(ctx.reset_tracking().is_ok());
        // Reset re-reads the configured pose, which is identity here
        let state = ctx.state.lock().unwrap();
        assert_relative_eq!(
            state.chain.base_to_odom,
            Isometry3::identity(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn malformed_initial_pose_falls_back_to_identity() {
        let (mut ctx, _camera) = test_context();
        ctx.tracking.initial_pose = vec![1.0, 2.0];
        ctx.state.lock().unwrap().initial_pose = vec![1.0, 2.0];
        ctx.start_tracking(&mut ctx.state.lock().unwrap()).unwrap();
        let state = ctx.state.lock().unwrap();
        assert_relative_eq!(
            state.chain.base_to_odom,
            Isometry3::identity(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn apply_setting_routes_resize_through_shared_state() {
        let (ctx, _camera) = test_context();
        ctx.apply_setting(SettingChange::ResizeFactor(0.5));
        let state = ctx.state.lock().unwrap();
        assert_eq!(state.out_width, 640);
        drop(state);
        ctx.apply_setting(SettingChange::Gain(42));
        assert_eq!(ctx.state.lock().unwrap().controls.gain, 42);
    }
}
