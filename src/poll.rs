// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The acquisition loop.
//!
//! One dedicated thread owns the camera session for the life of the
//! process. Each tick it samples subscriber demand, decides whether a
//! grab is needed at all, whether depth must be computed and whether
//! tracking must be toggled, then fans the grabbed frame out to exactly
//! the channels that have subscribers. With no demand the loop idles,
//! only re-broadcasting the last known coordinate frames so downstream
//! transform lookups stay resolvable.
//!
//! Grab failures other than the benign no-new-frame outcome start a
//! staleness clock; once the camera has been silent for longer than
//! [`LoopOptions::staleness`] the session is closed and reopened in a
//! shutdown-aware retry loop.

use crate::camera::{CameraSelector, Error, GrabOptions, Measure, PoseReference, TimeReference, View};
use crate::context::Context;
use crate::msg;
use crate::publish::{BusOutputs, Channel, Demand, DemandProbe};
use crate::transforms::WarnThrottle;
use edgefirst_schemas::{builtin_interfaces::Time, sensor_msgs::CameraInfo};
use nalgebra::Isometry3;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Loop pacing and recovery parameters.
#[derive(Clone, Debug)]
pub struct LoopOptions {
    /// Target grab rate in Hz.
    pub rate_hz: f64,
    /// Sleep between ticks while no channel has subscribers.
    pub idle_sleep: Duration,
    /// Sleep after a benign no-new-frame grab.
    pub no_frame_sleep: Duration,
    /// Backoff between open/reconnect attempts.
    pub reconnect_backoff: Duration,
    /// Silent-camera threshold that triggers the reconnect sequence.
    pub staleness: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            idle_sleep: Duration::from_millis(10),
            no_frame_sleep: Duration::from_millis(2),
            reconnect_backoff: Duration::from_secs(2),
            staleness: Duration::from_secs(5),
        }
    }
}

/// What a single tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// No subscribers; nothing grabbed.
    Idle,
    /// Frame grabbed and fanned out.
    Published,
    /// Benign no-new-frame grab outcome.
    NoNewFrame,
    /// Grab failed but the staleness threshold has not elapsed yet.
    GrabFailed,
    /// The reconnect sequence ran.
    Reconnected,
    /// Shutdown was requested.
    Shutdown,
}

/// Mutable per-loop bookkeeping.
pub struct LoopState {
    last_good_ns: u64,
    frames: u64,
    grab_error_logged: bool,
    lookup_warn: WarnThrottle,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            last_good_ns: 0,
            frames: 0,
            grab_error_logged: false,
            lookup_warn: WarnThrottle::new(Duration::from_secs(10)),
        }
    }

    /// Frames grabbed since the loop started.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the configured camera and open it, retrying until shutdown.
///
/// Serial-number selection first waits for the serial to enumerate, then
/// opens by the resolved local index. Returns false when shutdown was
/// requested while waiting.
pub fn open_camera(ctx: &Context, backoff: Duration) -> bool {
    let mut opts = ctx.open_opts.clone();

    if opts.replay.is_none() {
        if let CameraSelector::Serial(sn) = opts.selector {
            loop {
                if ctx.is_shutdown() {
                    return false;
                }
                match ctx.camera.probe(&CameraSelector::Serial(sn)) {
                    Some(id) => {
                        opts.selector = CameraSelector::Index(id);
                        break;
                    }
                    None => info!("camera SN{} not detected, please connect it", sn),
                }
                thread::sleep(backoff);
            }
        }
    }

    loop {
        if ctx.is_shutdown() {
            return false;
        }
        match ctx.camera.open(&opts) {
            Ok(()) => {
                info!("camera opened, SN {}", ctx.camera.serial_number());
                return true;
            }
            Err(e) => info!("camera open failed: {}", e),
        }
        thread::sleep(backoff);
    }
}

/// Close the session and reopen it, retrying until success or shutdown,
/// then restart tracking when the current demand requires it.
fn reconnect(ctx: &Context, demand: &Demand, opts: &LoopOptions, ls: &mut LoopState) {
    warn!("camera unresponsive, re-opening");
    ctx.camera.close();
    ctx.state.lock().unwrap().tracking_active = false;

    loop {
        if ctx.is_shutdown() {
            return;
        }
        match ctx.camera.probe(&ctx.open_opts.selector) {
            Some(id) => {
                let mut open_opts = ctx.open_opts.clone();
                open_opts.selector = CameraSelector::Index(id);
                match ctx.camera.open(&open_opts) {
                    Ok(()) => {
                        info!("camera re-opened");
                        break;
                    }
                    Err(e) => info!("re-open failed: {}", e),
                }
            }
            None => info!("waiting for the camera to be re-connected"),
        }
        thread::sleep(opts.reconnect_backoff);
    }

    let mut state = ctx.state.lock().unwrap();
    state.refresh_dimensions(&*ctx.camera, &ctx.frames);
    ls.last_good_ns = ctx.camera.timestamp_ns(TimeReference::Current);
    ls.grab_error_logged = false;
    if demand.needs_tracking(ctx.depth_stabilization) {
        if let Err(e) = ctx.start_tracking(&mut state) {
            warn!("could not restart tracking: {}", e);
        }
    }
}

fn stamped_info(info: &CameraInfo, stamp: Time) -> CameraInfo {
    let mut info = info.clone();
    info.header.stamp = stamp;
    info
}

/// One pass of the acquisition state machine.
pub fn tick<O>(ctx: &Context, outputs: &mut O, opts: &LoopOptions, ls: &mut LoopState) -> TickOutcome
where
    O: BusOutputs + DemandProbe,
{
    if ctx.is_shutdown() {
        return TickOutcome::Shutdown;
    }

    let demand = outputs.demand();

    if !demand.any() {
        // Keep the frame graph resolvable while idle.
        if ctx.publish_tf {
            let stamp = msg::stamp_from_ns(ctx.camera.timestamp_ns(TimeReference::Current));
            let state = ctx.state.lock().unwrap();
            outputs.frame(msg::transform_message(
                &state.chain.odom_to_map,
                &ctx.frames.map,
                &ctx.frames.odom,
                stamp.clone(),
            ));
            outputs.frame(msg::transform_message(
                &state.chain.base_to_odom,
                &ctx.frames.odom,
                &ctx.frames.base,
                stamp.clone(),
            ));
        }
        return TickOutcome::Idle;
    }

    // Tracking transitions happen before the grab so the frame already
    // carries pose data when a consumer just appeared.
    {
        let mut state = ctx.state.lock().unwrap();
        let want = demand.needs_tracking(ctx.depth_stabilization);
        if want && !state.tracking_active {
            if let Err(e) = ctx.start_tracking(&mut state) {
                warn!("could not start tracking: {}", e);
            }
        } else if !want && state.tracking_active {
            ctx.camera.disable_tracking();
            state.tracking_active = false;
            info!("tracking stopped");
        }
    }

    let compute_depth = demand.needs_depth();
    if compute_depth {
        let state = ctx.state.lock().unwrap();
        state.controls.reconcile_confidence(&*ctx.camera);
    }

    let grab = GrabOptions {
        compute_depth,
        compute_cloud: demand.cloud,
        sensing_mode: ctx.sensing_mode,
    };
    match ctx.camera.grab(&grab) {
        Ok(()) => {}
        Err(Error::NoNewFrame) => {
            debug!("waiting for a new frame");
            return TickOutcome::NoNewFrame;
        }
        Err(e) => {
            if !ls.grab_error_logged {
                warn!("grab failed: {}", e);
                ls.grab_error_logged = true;
            }
            let now = ctx.camera.timestamp_ns(TimeReference::Current);
            if now.saturating_sub(ls.last_good_ns) > opts.staleness.as_nanos() as u64 {
                reconnect(ctx, &demand, opts, ls);
                return if ctx.is_shutdown() {
                    TickOutcome::Shutdown
                } else {
                    TickOutcome::Reconnected
                };
            }
            return TickOutcome::GrabFailed;
        }
    }

    ls.grab_error_logged = false;
    ls.last_good_ns = ctx.camera.timestamp_ns(TimeReference::Current);
    ls.frames += 1;
    let stamp = msg::stamp_from_ns(ctx.camera.timestamp_ns(TimeReference::Image));

    let sensor_to_base = match ctx.lookup.sensor_to_base() {
        Some(iso) => iso,
        None => {
            if ls.lookup_warn.ready() {
                warn!(
                    "transform from '{}' to '{}' unavailable, assuming identity",
                    ctx.frames.camera, ctx.frames.base
                );
            }
            Isometry3::identity()
        }
    };

    let mut state = ctx.state.lock().unwrap();
    let state = &mut *state;
    state.controls.reconcile(&*ctx.camera);
    let (w, h) = (state.out_width, state.out_height);
    let frames = &ctx.frames;

    // Fixed fan-out precedence; channels stay independent of each other.
    if demand.left || demand.rgb {
        match ctx.camera.retrieve_image(View::Left, w, h) {
            Ok(img) => {
                let image = msg::image_message(&img, &frames.left_optical, stamp.clone());
                if demand.left {
                    outputs.camera_info(Channel::Left, stamped_info(&state.left_info, stamp.clone()));
                    outputs.image(Channel::Left, image.clone());
                }
                if demand.rgb {
                    let mut image = image;
                    image.header.frame_id = frames.optical.clone();
                    outputs.camera_info(Channel::Rgb, stamped_info(&state.rgb_info, stamp.clone()));
                    outputs.image(Channel::Rgb, image);
                }
            }
            Err(e) => error!("left image retrieval failed: {}", e),
        }
    }

    if demand.left_raw || demand.rgb_raw {
        match ctx.camera.retrieve_image(View::LeftUnrectified, w, h) {
            Ok(img) => {
                let image = msg::image_message(&img, &frames.left_optical, stamp.clone());
                if demand.left_raw {
                    outputs
                        .camera_info(Channel::LeftRaw, stamped_info(&state.left_info_raw, stamp.clone()));
                    outputs.image(Channel::LeftRaw, image.clone());
                }
                if demand.rgb_raw {
                    let mut image = image;
                    image.header.frame_id = frames.optical.clone();
                    outputs.camera_info(Channel::RgbRaw, stamped_info(&state.rgb_info_raw, stamp.clone()));
                    outputs.image(Channel::RgbRaw, image);
                }
            }
            Err(e) => error!("left raw image retrieval failed: {}", e),
        }
    }

    if demand.right {
        match ctx.camera.retrieve_image(View::Right, w, h) {
            Ok(img) => {
                outputs.camera_info(Channel::Right, stamped_info(&state.right_info, stamp.clone()));
                outputs.image(
                    Channel::Right,
                    msg::image_message(&img, &frames.right_optical, stamp.clone()),
                );
            }
            Err(e) => error!("right image retrieval failed: {}", e),
        }
    }

    if demand.right_raw {
        match ctx.camera.retrieve_image(View::RightUnrectified, w, h) {
            Ok(img) => {
                outputs.camera_info(Channel::RightRaw, stamped_info(&state.right_info_raw, stamp.clone()));
                outputs.image(
                    Channel::RightRaw,
                    msg::image_message(&img, &frames.right_optical, stamp.clone()),
                );
            }
            Err(e) => error!("right raw image retrieval failed: {}", e),
        }
    }

    if demand.depth || demand.disparity {
        match ctx.camera.retrieve_measure(Measure::Depth, w, h) {
            Ok(depth) => {
                if demand.depth {
                    outputs.camera_info(Channel::Depth, stamped_info(&state.depth_info, stamp.clone()));
                    outputs.image(
                        Channel::Depth,
                        msg::depth_message(&depth, ctx.openni_depth_mode, &frames.optical, stamp.clone()),
                    );
                }
            }
            Err(e) => error!("depth retrieval failed: {}", e),
        }
    }

    if demand.disparity {
        match ctx.camera.retrieve_measure(Measure::Disparity, w, h) {
            Ok(disparity) => {
                let calib = ctx.camera.calibration(w, h, false);
                outputs.disparity(msg::disparity_message(
                    &disparity,
                    &calib,
                    ctx.camera.depth_range(),
                    &frames.camera,
                    stamp.clone(),
                ));
            }
            Err(e) => error!("disparity retrieval failed: {}", e),
        }
    }

    if demand.conf_image {
        match ctx.camera.retrieve_image(View::Confidence, w, h) {
            Ok(img) => outputs.image(
                Channel::ConfImage,
                msg::image_message(&img, &frames.optical, stamp.clone()),
            ),
            Err(e) => error!("confidence image retrieval failed: {}", e),
        }
    }

    if demand.conf_map {
        match ctx.camera.retrieve_measure(Measure::Confidence, w, h) {
            Ok(map) => outputs.image(
                Channel::ConfMap,
                msg::measure_message(&map, &frames.optical, stamp.clone()),
            ),
            Err(e) => error!("confidence map retrieval failed: {}", e),
        }
    }

    if demand.cloud {
        match ctx.camera.retrieve_cloud(w, h) {
            Ok(cloud) => outputs.cloud(cloud, stamp.clone()),
            Err(e) => error!("cloud retrieval failed: {}", e),
        }
    }

    if demand.needs_chain() {
        match ctx.camera.position(PoseReference::Incremental) {
            Ok(delta) => {
                let delta = ctx.axis_map.pose_to_iso(&delta);
                state.chain.apply_delta(&sensor_to_base, &delta);
                if demand.odom {
                    outputs.odometry(msg::odometry_message(
                        &state.chain.base_to_odom,
                        &frames.odom,
                        &frames.base,
                        stamp.clone(),
                    ));
                }
            }
            Err(e) => debug!("incremental pose unavailable: {}", e),
        }
    }

    if demand.needs_map() {
        match ctx.camera.position(PoseReference::World) {
            Ok(world) => {
                let world = ctx.axis_map.pose_to_iso(&world);
                state.chain.update_map(&sensor_to_base, &world);
                if demand.pose {
                    outputs.pose(msg::pose_message(&state.chain.odom_to_map, &frames.map, stamp.clone()));
                }
            }
            Err(e) => debug!("world pose unavailable: {}", e),
        }
    }

    if ctx.publish_tf {
        outputs.frame(msg::transform_message(
            &state.chain.odom_to_map,
            &frames.map,
            &frames.odom,
            stamp.clone(),
        ));
        outputs.frame(msg::transform_message(
            &state.chain.base_to_odom,
            &frames.odom,
            &frames.base,
            stamp.clone(),
        ));
    }

    TickOutcome::Published
}

/// Thread entry point: open the camera, then run the tick loop at the
/// configured rate until shutdown. Joins cleanly with the session closed.
pub fn run<O>(ctx: Context, mut outputs: O, opts: LoopOptions)
where
    O: BusOutputs + DemandProbe,
{
    if !open_camera(&ctx, opts.reconnect_backoff) {
        info!("shutdown requested before the camera opened");
        return;
    }

    {
        let mut state = ctx.state.lock().unwrap();
        state.refresh_dimensions(&*ctx.camera, &ctx.frames);
        debug!(
            "camera frame size: {}x{}, output size: {}x{}",
            state.cam_width, state.cam_height, state.out_width, state.out_height
        );
    }

    let mut ls = LoopState::new();
    ls.last_good_ns = ctx.camera.timestamp_ns(TimeReference::Current);
    let period = Duration::from_secs_f64(1.0 / opts.rate_hz.max(0.1));

    loop {
        let started = Instant::now();
        match tick(&ctx, &mut outputs, &opts, &mut ls) {
            TickOutcome::Shutdown => break,
            TickOutcome::Idle => thread::sleep(opts.idle_sleep),
            TickOutcome::NoNewFrame | TickOutcome::GrabFailed => thread::sleep(opts.no_frame_sleep),
            TickOutcome::Reconnected => {}
            TickOutcome::Published => {
                if let Some(rest) = period.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
            }
        }
    }

    ctx.camera.close();
    info!("acquisition loop stopped after {} frames", ls.frames());
}
