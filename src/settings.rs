// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Runtime-adjustable camera controls.
//!
//! Each control keeps a desired value in memory; the acquisition loop
//! reconciles desired against the value the SDK reports and only issues
//! a settings call when they differ. Switching a control to automatic
//! mode is a one-shot SDK call armed by a trigger latch, because the SDK
//! cannot report auto state back.

use crate::camera::{CameraControl, StereoCamera};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lower clamp for the output-resolution scale factor.
pub const MIN_RESIZE_FACTOR: f64 = 0.1;
/// Upper clamp for the output-resolution scale factor.
pub const MAX_RESIZE_FACTOR: f64 = 1.0;

/// A named settings change carrying its new value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "snake_case")]
pub enum SettingChange {
    Confidence(i32),
    Exposure(i32),
    Gain(i32),
    AutoExposure(bool),
    ResizeFactor(f64),
    Brightness(i32),
    Contrast(i32),
    Hue(i32),
    Saturation(i32),
    WhiteBalance(i32),
    AutoWhiteBalance(bool),
}

/// Desired control values plus the auto-mode trigger latches.
#[derive(Clone, Debug)]
pub struct CameraControls {
    pub brightness: i32,
    pub contrast: i32,
    pub hue: i32,
    pub saturation: i32,
    pub exposure: i32,
    pub gain: i32,
    pub whitebalance: i32,
    pub auto_exposure: bool,
    pub auto_whitebalance: bool,
    pub confidence: i32,
    pub resize_factor: f64,
    /// Armed whenever auto exposure mode is (re)entered; cleared once
    /// the auto-mode SDK call has been issued.
    pub trigger_auto_exposure: bool,
    /// Same latch for auto white balance.
    pub trigger_auto_whitebalance: bool,
}

impl Default for CameraControls {
    fn default() -> Self {
        Self {
            brightness: 4,
            contrast: 4,
            hue: 0,
            saturation: 4,
            exposure: 100,
            gain: 100,
            whitebalance: 4700,
            auto_exposure: true,
            auto_whitebalance: true,
            confidence: 100,
            resize_factor: 1.0,
            trigger_auto_exposure: true,
            trigger_auto_whitebalance: true,
        }
    }
}

impl CameraControls {
    /// Clamp and store the resize factor, returning the stored value.
    pub fn set_resize_factor(&mut self, factor: f64) -> f64 {
        let clamped = factor.clamp(MIN_RESIZE_FACTOR, MAX_RESIZE_FACTOR);
        if clamped != factor {
            warn!(
                "resize factor {} out of range, clamped to {}",
                factor, clamped
            );
        }
        self.resize_factor = clamped;
        clamped
    }

    /// Apply a settings change to the desired state.
    ///
    /// The resize factor is accepted here for completeness but the
    /// output-dimension recomputation it implies is the shared-state
    /// owner's job.
    pub fn apply(&mut self, change: &SettingChange) {
        match *change {
            SettingChange::Confidence(v) => self.confidence = v,
            SettingChange::Exposure(v) => self.exposure = v,
            SettingChange::Gain(v) => self.gain = v,
            SettingChange::AutoExposure(v) => {
                self.auto_exposure = v;
                if v {
                    self.trigger_auto_exposure = true;
                }
            }
            SettingChange::ResizeFactor(v) => {
                self.set_resize_factor(v);
            }
            SettingChange::Brightness(v) => self.brightness = v,
            SettingChange::Contrast(v) => self.contrast = v,
            SettingChange::Hue(v) => self.hue = v,
            SettingChange::Saturation(v) => self.saturation = v,
            SettingChange::WhiteBalance(v) => self.whitebalance = v,
            SettingChange::AutoWhiteBalance(v) => {
                self.auto_whitebalance = v;
                if v {
                    self.trigger_auto_whitebalance = true;
                }
            }
        }
    }

    /// Push desired values to the SDK where they differ from the actual
    /// ones it reports.
    pub fn reconcile(&mut self, camera: &dyn StereoCamera) {
        if self.auto_exposure {
            // The SDK cannot report auto state; fire the switch once per
            // transition.
            if self.trigger_auto_exposure {
                camera.set_control_auto(CameraControl::Exposure);
                self.trigger_auto_exposure = false;
            }
        } else {
            self.push(camera, CameraControl::Exposure, self.exposure);
            self.push(camera, CameraControl::Gain, self.gain);
        }

        self.push(camera, CameraControl::Brightness, self.brightness);
        self.push(camera, CameraControl::Contrast, self.contrast);
        self.push(camera, CameraControl::Hue, self.hue);
        self.push(camera, CameraControl::Saturation, self.saturation);

        if self.auto_whitebalance {
            if self.trigger_auto_whitebalance {
                camera.set_control_auto(CameraControl::WhiteBalance);
                self.trigger_auto_whitebalance = false;
            }
        } else {
            self.push(camera, CameraControl::WhiteBalance, self.whitebalance);
        }
    }

    /// Push the confidence threshold before a depth-enabled grab.
    pub fn reconcile_confidence(&self, camera: &dyn StereoCamera) {
        if camera.confidence_threshold() != self.confidence {
            camera.set_confidence_threshold(self.confidence);
        }
    }

    fn push(&self, camera: &dyn StereoCamera, control: CameraControl, desired: i32) {
        if camera.control(control) != desired {
            camera.set_control(control, desired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::OpenOptions;
    use crate::sim::SimCamera;

    fn manual_controls() -> CameraControls {
        CameraControls {
            auto_exposure: false,
            auto_whitebalance: false,
            trigger_auto_exposure: false,
            trigger_auto_whitebalance: false,
            ..CameraControls::default()
        }
    }

    #[test]
    fn resize_factor_clamps_and_warns_only() {
        let mut controls = CameraControls::default();
        assert_eq!(controls.set_resize_factor(0.01), 0.1);
        assert_eq!(controls.set_resize_factor(5.0), 1.0);
        assert_eq!(controls.set_resize_factor(0.1), 0.1);
        assert_eq!(controls.set_resize_factor(1.0), 1.0);
        assert_eq!(controls.set_resize_factor(0.5), 0.5);
    }

    #[test]
    fn reconcile_pushes_only_differences() {
        let cam = SimCamera::new(1);
        cam.open(&OpenOptions::default()).unwrap();
        let mut controls = manual_controls();
        controls.brightness = 6;
        controls.exposure = 80;
        controls.reconcile(&cam);
        let first = cam.set_calls().len();
        assert!(first > 0);
        // Second pass: everything already matches, no further calls
        controls.reconcile(&cam);
        assert_eq!(cam.set_calls().len(), first);
        // One change, one extra call
        controls.apply(&SettingChange::Brightness(7));
        controls.reconcile(&cam);
        assert_eq!(cam.set_calls().len(), first + 1);
        assert_eq!(
            cam.set_calls().last().unwrap(),
            &(CameraControl::Brightness, 7)
        );
    }

    #[test]
    fn auto_exposure_latch_fires_once_per_transition() {
        let cam = SimCamera::new(1);
        cam.open(&OpenOptions::default()).unwrap();
        let mut controls = manual_controls();
        controls.apply(&SettingChange::AutoExposure(true));
        controls.reconcile(&cam);
        controls.reconcile(&cam);
        controls.reconcile(&cam);
        let autos: Vec<_> = cam
            .auto_calls()
            .into_iter()
            .filter(|c| *c == CameraControl::Exposure)
            .collect();
        assert_eq!(autos.len(), 1);
        // Leaving and re-entering auto mode re-arms the latch
        controls.apply(&SettingChange::AutoExposure(false));
        controls.reconcile(&cam);
        controls.apply(&SettingChange::AutoExposure(true));
        controls.reconcile(&cam);
        let autos: Vec<_> = cam
            .auto_calls()
            .into_iter()
            .filter(|c| *c == CameraControl::Exposure)
            .collect();
        assert_eq!(autos.len(), 2);
    }

    #[test]
    fn confidence_reconciles_against_actual() {
        let cam = SimCamera::new(1);
        cam.open(&OpenOptions::default()).unwrap();
        let mut controls = manual_controls();
        controls.apply(&SettingChange::Confidence(80));
        controls.reconcile_confidence(&cam);
        assert_eq!(cam.confidence_threshold(), 80);
    }

    #[test]
    fn setting_change_json_round_trip() {
        let change = SettingChange::ResizeFactor(0.5);
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"setting":"resize_factor","value":0.5}"#);
        let back: SettingChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }
}
