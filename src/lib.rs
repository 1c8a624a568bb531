// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Stereo Camera Publisher Library
//!
//! This library bridges a stereo depth/tracking camera into the EdgeFirst
//! Perception Middleware: images, depth, disparity, confidence, colored
//! point clouds, inertial data, odometry, pose and coordinate-frame
//! transforms are published as ROS2-compatible CDR messages over Zenoh.
//!
//! The stereo matching, visual-inertial tracking and cloud generation all
//! happen inside the vendor SDK, which the crate only drives through the
//! [`camera::StereoCamera`] session trait. What lives here is the
//! bookkeeping around it:
//!
//! ```text
//! ┌──────────────┐   demand    ┌──────────────┐   grab/retrieve   ┌─────────────┐
//! │ ZenohOutputs │ ──────────► │  poll::run   │ ────────────────► │ StereoCamera│
//! │ (bus side)   │ ◄────────── │ (acquisition │ ◄──────────────── │ (SDK / sim) │
//! └──────────────┘   messages  │    loop)     │      buffers      └─────────────┘
//!        ▲                     └──────┬───────┘
//!        │                            │ shared mutex
//!        │                     ┌──────▼───────┐
//!        └──── services ─────► │ SharedState  │ ◄── control / IMU tasks
//!                              └──────────────┘
//! ```
//!
//! Publication is demand driven: every tick samples per-channel
//! subscriber matching and only grabs, computes depth and retrieves the
//! buffers somebody is listening for. SDK axes are remapped to the bus
//! convention once by [`remap::AxisMap`], and the odometry/pose
//! transform chain is maintained by [`transforms::TrackingChain`].
//!
//! # Modules
//!
//! - [`camera`]: SDK session trait, buffer and calibration types
//! - [`sim`]: deterministic simulated camera for tests and replay
//! - [`remap`]: SDK-to-bus axis remapping
//! - [`transforms`]: odometry/pose transform chain and frame lookup
//! - [`msg`]: message construction and cloud packing
//! - [`settings`]: runtime camera controls with desired/actual reconcile
//! - [`context`]: shared state behind the single cross-thread mutex
//! - [`publish`]: channel fan-out and subscriber-demand probes
//! - [`cloud_thread`]: off-thread cloud packing and publication
//! - [`poll`]: the acquisition loop
//! - [`services`]: set-initial-pose / reset-tracking / control handlers
//! - [`imu`]: inertial publication timer
//! - [`args`]: command line and environment configuration

pub mod args;
pub mod camera;
pub mod cloud_thread;
pub mod context;
pub mod imu;
pub mod msg;
pub mod poll;
pub mod publish;
pub mod remap;
pub mod services;
pub mod settings;
pub mod sim;
pub mod transforms;

// Re-exports for convenience
pub use camera::{Error, StereoCamera};
pub use context::Context;
pub use publish::{BusOutputs, Channel, Demand, DemandProbe};
pub use remap::AxisMap;
pub use sim::SimCamera;
pub use transforms::TrackingChain;
