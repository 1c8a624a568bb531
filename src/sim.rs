// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Simulated stereo camera for tests, benches and replay operation.
//!
//! [`SimCamera`] implements [`StereoCamera`] over a deterministic internal
//! state: a fixed per-frame motion, synthetic image and measure buffers,
//! and scripted open/grab failures for exercising the reconnect path.
//! The instrumentation accessors (`grab_count`, `set_calls`, `auto_calls`)
//! let tests assert exactly which SDK calls the acquisition loop issued.

use crate::camera::{
    Calibration, CameraControl, CameraSelector, CloudFrame, CoordinateConvention, Error,
    GrabOptions, ImageFrame, ImuSample, Intrinsics, Measure, MeasureFrame, OpenOptions,
    PoseReference, SdkPose, StereoCamera, TimeReference, TrackingOptions, View,
};
use crate::transforms::{iso_from_parts, parts_from_iso};
use nalgebra::Isometry3;
use std::sync::Mutex;

const NUM_CONTROLS: usize = 7;

fn control_index(control: CameraControl) -> usize {
    match control {
        CameraControl::Brightness => 0,
        CameraControl::Contrast => 1,
        CameraControl::Hue => 2,
        CameraControl::Saturation => 3,
        CameraControl::Exposure => 4,
        CameraControl::Gain => 5,
        CameraControl::WhiteBalance => 6,
    }
}

struct SimState {
    open: bool,
    width: u32,
    height: u32,
    clock_ns: u64,
    frame_period_ns: u64,
    last_image_ns: u64,
    grab_count: u64,
    open_failures: u32,
    probe_failures: u32,
    grab_failures: u32,
    grab_failures_benign: bool,
    tracking: Option<TrackingOptions>,
    world: Isometry3<f64>,
    delta: Isometry3<f64>,
    last_grab: Option<GrabOptions>,
    controls: [i32; NUM_CONTROLS],
    set_calls: Vec<(CameraControl, i32)>,
    auto_calls: Vec<CameraControl>,
    confidence: i32,
    imu: ImuSample,
}

/// Deterministic in-memory stand-in for the vendor camera session.
pub struct SimCamera {
    serial: u32,
    has_imu: bool,
    depth_range: (f64, f64),
    state: Mutex<SimState>,
}

impl SimCamera {
    /// Create a simulated camera with the given serial number.
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            has_imu: true,
            depth_range: (0.5, 20.0),
            state: Mutex::new(SimState {
                open: false,
                width: 1280,
                height: 720,
                clock_ns: 0,
                frame_period_ns: 33_333_333,
                last_image_ns: 0,
                grab_count: 0,
                open_failures: 0,
                probe_failures: 0,
                grab_failures: 0,
                grab_failures_benign: false,
                tracking: None,
                world: Isometry3::identity(),
                delta: Isometry3::identity(),
                last_grab: None,
                controls: [0; NUM_CONTROLS],
                set_calls: Vec::new(),
                auto_calls: Vec::new(),
                confidence: 100,
                imu: ImuSample {
                    orientation: [0.0, 0.0, 0.0, 1.0],
                    ..ImuSample::default()
                },
            }),
        }
    }

    /// Camera without an inertial unit (first-generation model).
    pub fn without_imu(serial: u32) -> Self {
        let mut cam = Self::new(serial);
        cam.has_imu = false;
        cam
    }

    /// Script the next `n` open attempts to fail with camera-not-detected.
    pub fn fail_opens(&self, n: u32) {
        self.state.lock().unwrap().open_failures = n;
    }

    /// Script the next `n` probe attempts to report no camera present.
    pub fn fail_probes(&self, n: u32) {
        self.state.lock().unwrap().probe_failures = n;
    }

    /// Script the next `n` grabs to fail. `benign` selects the
    /// no-new-frame outcome instead of a hard failure.
    pub fn fail_grabs(&self, n: u32, benign: bool) {
        let mut st = self.state.lock().unwrap();
        st.grab_failures = n;
        st.grab_failures_benign = benign;
    }

    /// Rigid motion applied to the tracked pose on every successful grab.
    pub fn set_motion(&self, delta: SdkPose) {
        self.state.lock().unwrap().delta = iso_from_parts(delta.translation, delta.orientation);
    }

    /// Override the simulated frame period (default 33.3 ms).
    pub fn set_frame_period_ns(&self, period: u64) {
        self.state.lock().unwrap().frame_period_ns = period;
    }

    /// Inertial sample returned by [`StereoCamera::imu_sample`].
    pub fn set_imu_sample(&self, sample: ImuSample) {
        self.state.lock().unwrap().imu = sample;
    }

    pub fn grab_count(&self) -> u64 {
        self.state.lock().unwrap().grab_count
    }

    /// Options of the most recent successful grab.
    pub fn last_grab(&self) -> Option<GrabOptions> {
        self.state.lock().unwrap().last_grab
    }

    pub fn tracking_enabled(&self) -> bool {
        self.state.lock().unwrap().tracking.is_some()
    }

    /// Every `set_control` call issued so far, in order.
    pub fn set_calls(&self) -> Vec<(CameraControl, i32)> {
        self.state.lock().unwrap().set_calls.clone()
    }

    /// Every `set_control_auto` call issued so far, in order.
    pub fn auto_calls(&self) -> Vec<CameraControl> {
        self.state.lock().unwrap().auto_calls.clone()
    }
}

impl StereoCamera for SimCamera {
    fn open(&self, opts: &OpenOptions) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if st.open {
            return Err(Error::AlreadyOpen);
        }
        if st.open_failures > 0 {
            st.open_failures -= 1;
            return Err(Error::CameraNotDetected);
        }
        if let Some(path) = &opts.replay {
            if !path.exists() {
                return Err(Error::Replay(format!("{} not found", path.display())));
            }
        }
        let (w, h) = opts.resolution.dims();
        st.width = w;
        st.height = h;
        if opts.fps > 0 {
            st.frame_period_ns = 1_000_000_000 / opts.fps as u64;
        }
        st.open = true;
        Ok(())
    }

    fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.open = false;
        st.tracking = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn probe(&self, selector: &CameraSelector) -> Option<i32> {
        let mut st = self.state.lock().unwrap();
        if st.probe_failures > 0 {
            st.probe_failures -= 1;
            return None;
        }
        match selector {
            CameraSelector::Index(id) => Some(*id),
            CameraSelector::Serial(sn) if *sn == self.serial => Some(0),
            CameraSelector::Serial(_) => None,
        }
    }

    fn serial_number(&self) -> u32 {
        self.serial
    }

    fn has_imu(&self) -> bool {
        self.has_imu
    }

    fn resolution(&self) -> (u32, u32) {
        let st = self.state.lock().unwrap();
        (st.width, st.height)
    }

    fn coordinate_convention(&self) -> CoordinateConvention {
        CoordinateConvention::RightHandedZUpXFwd
    }

    fn timestamp_ns(&self, reference: TimeReference) -> u64 {
        let st = self.state.lock().unwrap();
        match reference {
            TimeReference::Image => st.last_image_ns,
            TimeReference::Current => st.clock_ns,
        }
    }

    fn grab(&self, opts: &GrabOptions) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::NotOpen);
        }
        st.clock_ns += st.frame_period_ns;
        if st.grab_failures > 0 {
            st.grab_failures -= 1;
            return if st.grab_failures_benign {
                Err(Error::NoNewFrame)
            } else {
                Err(Error::CameraNotDetected)
            };
        }
        st.last_image_ns = st.clock_ns;
        st.grab_count += 1;
        st.last_grab = Some(*opts);
        if st.tracking.is_some() {
            st.world = st.world * st.delta;
        }
        Ok(())
    }

    fn retrieve_image(&self, view: View, width: u32, height: u32) -> Result<ImageFrame, Error> {
        let st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::NotOpen);
        }
        let seed = match view {
            View::Left => 10u8,
            View::Right => 20,
            View::LeftUnrectified => 30,
            View::RightUnrectified => 40,
            View::Confidence => 50,
        };
        let mut data = vec![0u8; (width * height * 4) as usize];
        for (i, px) in data.chunks_exact_mut(4).enumerate() {
            px[0] = seed.wrapping_add(i as u8);
            px[1] = seed;
            px[2] = seed.wrapping_mul(3);
            px[3] = 255;
        }
        Ok(ImageFrame {
            width,
            height,
            channels: 4,
            data,
        })
    }

    fn retrieve_measure(
        &self,
        measure: Measure,
        width: u32,
        height: u32,
    ) -> Result<MeasureFrame, Error> {
        let st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::NotOpen);
        }
        let n = (width * height) as usize;
        let data = match measure {
            Measure::Depth => (0..n).map(|i| 1.0 + (i % 64) as f32 * 0.1).collect(),
            // The SDK hands disparity back negative; see the publisher.
            Measure::Disparity => (0..n).map(|i| -(1.0 + (i % 32) as f32)).collect(),
            Measure::Confidence => (0..n).map(|i| (i % 100) as f32).collect(),
        };
        Ok(MeasureFrame {
            width,
            height,
            data,
        })
    }

    fn retrieve_cloud(&self, width: u32, height: u32) -> Result<CloudFrame, Error> {
        let st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::NotOpen);
        }
        let n = (width * height) as usize;
        let points = (0..n)
            .map(|i| {
                let x = (i % width as usize) as f32 * 0.01;
                let y = (i / width as usize) as f32 * 0.01;
                let color = f32::from_bits(u32::from_le_bytes([128, 64, 32, 255]));
                [x, y, 2.0, color]
            })
            .collect();
        Ok(CloudFrame {
            width,
            height,
            points,
        })
    }

    fn position(&self, reference: PoseReference) -> Result<SdkPose, Error> {
        let st = self.state.lock().unwrap();
        if st.tracking.is_none() {
            return Err(Error::Tracking("tracking is not enabled".into()));
        }
        let iso = match reference {
            PoseReference::Incremental => st.delta,
            PoseReference::World => st.world,
        };
        let (translation, orientation) = parts_from_iso(&iso);
        Ok(SdkPose {
            translation,
            orientation,
        })
    }

    fn imu_sample(&self) -> Result<ImuSample, Error> {
        if !self.has_imu {
            return Err(Error::Tracking("camera model has no IMU".into()));
        }
        Ok(self.state.lock().unwrap().imu)
    }

    fn enable_tracking(&self, opts: &TrackingOptions) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::NotOpen);
        }
        st.world = iso_from_parts(
            opts.initial_pose.translation,
            opts.initial_pose.orientation,
        );
        st.tracking = Some(opts.clone());
        Ok(())
    }

    fn disable_tracking(&self) {
        self.state.lock().unwrap().tracking = None;
    }

    fn reset_tracking(&self, pose: &SdkPose) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if st.tracking.is_none() {
            return Err(Error::Tracking("tracking is not enabled".into()));
        }
        st.world = iso_from_parts(pose.translation, pose.orientation);
        Ok(())
    }

    fn control(&self, control: CameraControl) -> i32 {
        self.state.lock().unwrap().controls[control_index(control)]
    }

    fn set_control(&self, control: CameraControl, value: i32) {
        let mut st = self.state.lock().unwrap();
        st.controls[control_index(control)] = value;
        st.set_calls.push((control, value));
    }

    fn set_control_auto(&self, control: CameraControl) {
        self.state.lock().unwrap().auto_calls.push(control);
    }

    fn confidence_threshold(&self) -> i32 {
        self.state.lock().unwrap().confidence
    }

    fn set_confidence_threshold(&self, value: i32) {
        self.state.lock().unwrap().confidence = value;
    }

    fn depth_range(&self) -> (f64, f64) {
        self.depth_range
    }

    fn calibration(&self, width: u32, height: u32, raw: bool) -> Calibration {
        let st = self.state.lock().unwrap();
        let scale = width as f64 / st.width as f64;
        let eye = |cx: f64| Intrinsics {
            fx: 700.0 * scale,
            fy: 700.0 * scale,
            cx: cx * scale,
            cy: st.height as f64 / 2.0 * scale,
            disto: if raw {
                // SDK order: k1, k2, p1, p2, k3
                [-0.17, 0.027, 0.0002, -0.0001, 0.0095]
            } else {
                [0.0; 5]
            },
        };
        let _ = height;
        Calibration {
            left: eye(st.width as f64 / 2.0),
            right: eye(st.width as f64 / 2.0 + 2.0),
            baseline: 0.12,
            rotation: if raw { [0.001, -0.002, 0.0005] } else { [0.0; 3] },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_cycle() {
        let cam = SimCamera::new(1234);
        assert!(!cam.is_open());
        cam.open(&OpenOptions::default()).unwrap();
        assert!(cam.is_open());
        assert!(matches!(
            cam.open(&OpenOptions::default()),
            Err(Error::AlreadyOpen)
        ));
        cam.close();
        assert!(!cam.is_open());
    }

    #[test]
    fn scripted_open_failures() {
        let cam = SimCamera::new(1);
        cam.fail_opens(2);
        assert!(cam.open(&OpenOptions::default()).is_err());
        assert!(cam.open(&OpenOptions::default()).is_err());
        assert!(cam.open(&OpenOptions::default()).is_ok());
    }

    #[test]
    fn probe_by_serial() {
        let cam = SimCamera::new(42);
        assert_eq!(cam.probe(&CameraSelector::Serial(42)), Some(0));
        assert_eq!(cam.probe(&CameraSelector::Serial(7)), None);
        assert_eq!(cam.probe(&CameraSelector::Index(3)), Some(3));
    }

    #[test]
    fn grab_advances_clock_even_on_failure() {
        let cam = SimCamera::new(1);
        cam.open(&OpenOptions::default()).unwrap();
        cam.set_frame_period_ns(1_000_000);
        cam.fail_grabs(1, true);
        let opts = GrabOptions {
            compute_depth: false,
            compute_cloud: false,
            sensing_mode: Default::default(),
        };
        assert!(matches!(cam.grab(&opts), Err(Error::NoNewFrame)));
        assert_eq!(cam.timestamp_ns(TimeReference::Current), 1_000_000);
        // Image timestamp only moves on success
        assert_eq!(cam.timestamp_ns(TimeReference::Image), 0);
        cam.grab(&opts).unwrap();
        assert_eq!(cam.timestamp_ns(TimeReference::Image), 2_000_000);
    }

    #[test]
    fn world_pose_integrates_motion() {
        let cam = SimCamera::new(1);
        cam.open(&OpenOptions::default()).unwrap();
        cam.set_motion(SdkPose {
            translation: [0.1, 0.0, 0.0],
            orientation: [0.0, 0.0, 0.0, 1.0],
        });
        cam.enable_tracking(&TrackingOptions::default()).unwrap();
        let opts = GrabOptions {
            compute_depth: true,
            compute_cloud: false,
            sensing_mode: Default::default(),
        };
        for _ in 0..5 {
            cam.grab(&opts).unwrap();
        }
        let world = cam.position(PoseReference::World).unwrap();
        assert!((world.translation[0] - 0.5).abs() < 1e-9);
    }
}
