// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Stereo camera session abstraction.
//!
//! The vendor SDK performs all of the heavy lifting (stereo matching,
//! visual-inertial tracking, point cloud generation) behind an opaque
//! session handle. This module captures the slice of that API the
//! publisher actually drives as the [`StereoCamera`] trait so the rest of
//! the crate is hardware-agnostic:
//!
//! - Live operation: an SDK-backed implementation linked on target
//! - Testing and replay: [`crate::sim::SimCamera`]
//!
//! The handle is internally synchronized by the SDK, so every method takes
//! `&self` and implementations are expected to be `Send + Sync`. The grab
//! call is synchronous and blocks the calling thread for up to one frame
//! period.

use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

/// Common error type for camera session operations.
#[derive(Debug)]
pub enum Error {
    /// No new frame is available yet. Benign, retried on the next tick.
    NoNewFrame,
    /// No camera matched the requested index or serial number.
    CameraNotDetected,
    /// Operation requires an open session.
    NotOpen,
    /// The session is already open.
    AlreadyOpen,
    /// Tracking feature failure (enable/reset without support or state).
    Tracking(String),
    /// Replay input could not be used.
    Replay(String),
    /// I/O error (replay files, device nodes)
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoNewFrame => write!(f, "no new frame available"),
            Error::CameraNotDetected => write!(f, "camera not detected"),
            Error::NotOpen => write!(f, "camera session is not open"),
            Error::AlreadyOpen => write!(f, "camera session is already open"),
            Error::Tracking(msg) => write!(f, "tracking error: {}", msg),
            Error::Replay(msg) => write!(f, "replay error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Sensor resolution modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Resolution {
    /// 2208x1242
    Hd2k,
    /// 1920x1080
    Hd1080,
    /// 1280x720
    #[default]
    Hd720,
    /// 672x376
    Vga,
}

impl Resolution {
    /// Per-eye image dimensions for this mode.
    pub fn dims(&self) -> (u32, u32) {
        match self {
            Resolution::Hd2k => (2208, 1242),
            Resolution::Hd1080 => (1920, 1080),
            Resolution::Hd720 => (1280, 720),
            Resolution::Vga => (672, 376),
        }
    }
}

/// Depth estimation quality preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DepthQuality {
    #[default]
    Performance,
    Medium,
    Quality,
    Ultra,
}

/// Depth sensing mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SensingMode {
    /// Raw depth, occlusions left invalid.
    #[default]
    Standard,
    /// Occlusions filled from neighbourhood.
    Fill,
}

/// Coordinate-system family reported by the SDK.
///
/// Older SDK generations used a camera-optical frame, then a right-handed
/// Z-up frame with Y forward; current ones are right-handed, Z-up,
/// X-forward which matches the bus convention directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinateConvention {
    CameraOptical,
    RightHandedZUp,
    RightHandedZUpXFwd,
}

/// Image views retrievable after a successful grab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Left,
    Right,
    LeftUnrectified,
    RightUnrectified,
    Confidence,
}

/// Float measures retrievable after a grab with depth enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measure {
    Depth,
    Disparity,
    Confidence,
}

/// Reference frame for a position query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoseReference {
    /// Motion since the previous grab, in the sensor frame.
    Incremental,
    /// Pose relative to the tracking origin.
    World,
}

/// Clock selection for [`StereoCamera::timestamp_ns`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeReference {
    /// Capture time of the last grabbed frame.
    Image,
    /// Current sensor time.
    Current,
}

/// Video controls mirrored between configuration and the SDK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraControl {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Exposure,
    Gain,
    WhiteBalance,
}

/// Camera selection, by local enumeration index or serial number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraSelector {
    Index(i32),
    Serial(u32),
}

/// Session open parameters.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub resolution: Resolution,
    pub fps: u32,
    pub quality: DepthQuality,
    pub gpu_id: i32,
    pub selector: CameraSelector,
    /// Recorded-sequence playback path. Overrides live capture when set.
    pub replay: Option<PathBuf>,
    pub depth_stabilization: bool,
    pub flip: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: 30,
            quality: DepthQuality::default(),
            gpu_id: -1,
            selector: CameraSelector::Index(0),
            replay: None,
            depth_stabilization: false,
            flip: false,
        }
    }
}

/// Per-grab parameters.
#[derive(Clone, Copy, Debug)]
pub struct GrabOptions {
    pub compute_depth: bool,
    pub compute_cloud: bool,
    pub sensing_mode: SensingMode,
}

/// Tracking activation parameters.
#[derive(Clone, Debug, Default)]
pub struct TrackingOptions {
    /// Spatial-memory database file, absent for a fresh area.
    pub area_db: Option<PathBuf>,
    pub pose_smoothing: bool,
    pub spatial_memory: bool,
    pub initial_pose: SdkPose,
}

/// A pose as the SDK reports it: translation plus an x,y,z,w quaternion,
/// both still in SDK axes.
#[derive(Clone, Copy, Debug)]
pub struct SdkPose {
    pub translation: [f64; 3],
    pub orientation: [f64; 4],
}

impl Default for SdkPose {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// An 8-bit image buffer retrieved from the SDK.
///
/// `channels` is 4 for the RGBA views the SDK hands back; conversion to
/// the 3-channel bus encoding happens at message construction.
#[derive(Clone, Debug)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

/// A 32-bit float measure buffer (depth, disparity, confidence).
#[derive(Clone, Debug)]
pub struct MeasureFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// An organized point cloud: one x,y,z,color quad per pixel, SDK axes,
/// color packed into the float bits as the SDK delivers it.
#[derive(Clone, Debug)]
pub struct CloudFrame {
    pub width: u32,
    pub height: u32,
    pub points: Vec<[f32; 4]>,
}

/// Inertial sample with covariance blocks, SDK axes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImuSample {
    /// x,y,z,w orientation quaternion.
    pub orientation: [f64; 4],
    pub angular_velocity: [f64; 3],
    pub linear_acceleration: [f64; 3],
    pub orientation_cov: [f64; 9],
    pub angular_velocity_cov: [f64; 9],
    pub linear_acceleration_cov: [f64; 9],
}

/// Pinhole parameters for one eye.
///
/// Distortion coefficients are in the SDK's native order
/// (k1, k2, p1, p2, k3).
#[derive(Clone, Copy, Debug, Default)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub disto: [f64; 5],
}

/// Stereo calibration at a given output resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct Calibration {
    pub left: Intrinsics,
    pub right: Intrinsics,
    /// Stereo baseline in meters.
    pub baseline: f64,
    /// Left-to-right rotation as an axis-angle vector. Zero for the
    /// rectified calibration, non-zero for the raw one.
    pub rotation: [f64; 3],
}

/// The SDK session surface the publisher drives.
///
/// Implementations own the vendor handle and its internal locking; all
/// methods are callable from any thread. Retrieval methods are only
/// meaningful after a successful [`StereoCamera::grab`] and return
/// buffers resampled to the requested output dimensions.
pub trait StereoCamera: Send + Sync {
    /// Open the session. Fails with [`Error::CameraNotDetected`] when the
    /// selected camera is absent; callers retry with backoff.
    fn open(&self, opts: &OpenOptions) -> Result<(), Error>;

    /// Close the session. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Look for a camera matching the selector, returning its local index
    /// when present and ready.
    fn probe(&self, selector: &CameraSelector) -> Option<i32>;

    fn serial_number(&self) -> u32;

    /// Whether this camera model carries an IMU.
    fn has_imu(&self) -> bool;

    /// Native sensor resolution of the open session.
    fn resolution(&self) -> (u32, u32);

    fn coordinate_convention(&self) -> CoordinateConvention;

    fn timestamp_ns(&self, reference: TimeReference) -> u64;

    /// Capture and process one stereo frame.
    fn grab(&self, opts: &GrabOptions) -> Result<(), Error>;

    fn retrieve_image(&self, view: View, width: u32, height: u32) -> Result<ImageFrame, Error>;

    fn retrieve_measure(
        &self,
        measure: Measure,
        width: u32,
        height: u32,
    ) -> Result<MeasureFrame, Error>;

    fn retrieve_cloud(&self, width: u32, height: u32) -> Result<CloudFrame, Error>;

    fn position(&self, reference: PoseReference) -> Result<SdkPose, Error>;

    fn imu_sample(&self) -> Result<ImuSample, Error>;

    fn enable_tracking(&self, opts: &TrackingOptions) -> Result<(), Error>;

    fn disable_tracking(&self);

    fn reset_tracking(&self, pose: &SdkPose) -> Result<(), Error>;

    /// Current value of a video control as the SDK reports it.
    fn control(&self, control: CameraControl) -> i32;

    fn set_control(&self, control: CameraControl, value: i32);

    /// Switch a control to automatic mode. Called once per transition;
    /// the SDK does not report auto state back.
    fn set_control_auto(&self, control: CameraControl);

    fn confidence_threshold(&self) -> i32;

    fn set_confidence_threshold(&self, value: i32);

    /// Valid depth range (min, max) in meters.
    fn depth_range(&self) -> (f64, f64);

    /// Stereo calibration resampled to the given dimensions. `raw` selects
    /// the unrectified calibration.
    fn calibration(&self, width: u32, height: u32, raw: bool) -> Calibration;
}
