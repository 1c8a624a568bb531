// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use stereopub::args::Args;
use stereopub::camera::StereoCamera;
use stereopub::cloud_thread;
use stereopub::context::{Context, SharedState};
use stereopub::msg;
use stereopub::publish::{declare_publisher, put_cdr, ZenohOutputs};
use stereopub::remap::AxisMap;
use stereopub::sim::SimCamera;
use stereopub::transforms::StaticLookup;
use stereopub::{imu, poll, services};
use tracing::{debug, error, info};
use zenoh::qos::Priority;

// Serial reported by the simulated backend when none is configured.
const SIM_SERIAL: u32 = 40_125_347;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .init();

    let session = zenoh::open(args.clone()).await.unwrap();
    debug!("opened zenoh session");

    let topics = args.topics();
    let frames = args.frame_ids();

    // Hardware sessions plug in behind the StereoCamera trait; this
    // build drives the simulated/replay backend.
    let serial = if args.serial_number > 0 {
        args.serial_number
    } else {
        SIM_SERIAL
    };
    let camera: Arc<dyn StereoCamera> = Arc::new(SimCamera::new(serial));
    let axis_map = AxisMap::for_convention(camera.coordinate_convention());

    let ctx = Context {
        camera,
        state: Arc::new(Mutex::new(SharedState::new(
            args.controls(),
            args.initial_pose.clone(),
        ))),
        shutdown: Arc::new(AtomicBool::new(false)),
        axis_map,
        lookup: Arc::new(StaticLookup::new(
            [args.tf_vec[0], args.tf_vec[1], args.tf_vec[2]],
            [
                args.tf_quat[0],
                args.tf_quat[1],
                args.tf_quat[2],
                args.tf_quat[3],
            ],
        )),
        frames: Arc::new(frames),
        open_opts: args.open_options(),
        tracking: args.tracking_settings(),
        sensing_mode: args.sensing_mode,
        openni_depth_mode: args.openni_depth_mode,
        publish_tf: args.publish_tf,
        depth_stabilization: args.depth_stabilization,
    };

    spawn_tf_static(&session, &args, &ctx).await?;

    // The cloud publisher is shared between the demand probe and the
    // formatting thread fed by the acquisition loop.
    let cloud_publisher =
        Arc::new(declare_publisher(&session, &topics.cloud, Priority::DataHigh).await?);
    let (cloud_tx, cloud_rx) = kanal::bounded(2);
    {
        let publisher = cloud_publisher.clone();
        let frame_id = ctx.frames.camera.clone();
        thread::Builder::new()
            .name("cloud".to_string())
            .spawn(move || cloud_thread::run(cloud_rx, publisher, frame_id, axis_map))?;
    }

    let outputs = ZenohOutputs::declare(&session, &topics, cloud_publisher, cloud_tx).await?;

    tokio::spawn(services::serve_set_initial_pose(
        session.clone(),
        topics.set_initial_pose.clone(),
        ctx.clone(),
    ));
    tokio::spawn(services::serve_reset_tracking(
        session.clone(),
        topics.reset_tracking.clone(),
        ctx.clone(),
    ));
    tokio::spawn(services::control_loop(
        session.clone(),
        topics.control.clone(),
        ctx.clone(),
    ));
    tokio::spawn(imu::run(
        session.clone(),
        ctx.clone(),
        topics.clone(),
        args.imu_rate,
    ));

    let acquisition = {
        let ctx = ctx.clone();
        let opts = args.loop_options();
        thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || poll::run(ctx, outputs, opts))?
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    ctx.request_shutdown();
    if acquisition.join().is_err() {
        error!("acquisition thread panicked");
    }
    session.close().await?;

    Ok(())
}

/// Broadcast the static base-to-camera mount transform once a second so
/// transform consumers can resolve the sensor frame.
async fn spawn_tf_static(
    session: &zenoh::Session,
    args: &Args,
    ctx: &Context,
) -> zenoh::Result<()> {
    let publisher = declare_publisher(session, &args.tf_static_topic, Priority::Background).await?;
    let base = ctx.frames.base.clone();
    let child = ctx.frames.camera.clone();
    let mount = stereopub::transforms::iso_from_parts(
        [args.tf_vec[0], args.tf_vec[1], args.tf_vec[2]],
        [
            args.tf_quat[0],
            args.tf_quat[1],
            args.tf_quat[2],
            args.tf_quat[3],
        ],
    );
    let shutdown = ctx.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if shutdown.is_shutdown() {
                break;
            }
            let stamp = msg::stamp_from_ns(msg::now_ns().unwrap_or(0));
            let tf = msg::transform_message(&mount, &base, &child, stamp);
            put_cdr(&publisher, &tf, "geometry_msgs/msg/TransformStamped");
        }
    });

    Ok(())
}
