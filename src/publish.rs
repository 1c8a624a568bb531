// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bus output channels and subscriber-demand sampling.
//!
//! The acquisition loop publishes through the [`BusOutputs`] trait and
//! samples per-channel demand through [`DemandProbe`]; [`ZenohOutputs`]
//! implements both over declared Zenoh publishers, using each publisher's
//! matching status as the demand signal. [`RecordingOutputs`] is the test
//! double, mirroring the packet-source test aids elsewhere in the
//! EdgeFirst publishers.

use crate::cloud_thread::CloudJob;
use crate::camera::CloudFrame;
use crate::msg::{DisparityImage, Odometry, PoseStamped};
use edgefirst_schemas::{
    builtin_interfaces::Time,
    geometry_msgs::TransformStamped,
    sensor_msgs::{CameraInfo, Image},
    serde_cdr,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use zenoh::bytes::{Encoding, ZBytes};
use zenoh::pubsub::Publisher;
use zenoh::qos::{CongestionControl, Priority};
use zenoh::{Session, Wait};

/// Output channels with per-tick subscriber demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Rgb,
    RgbRaw,
    Left,
    LeftRaw,
    Right,
    RightRaw,
    Depth,
    Disparity,
    ConfImage,
    ConfMap,
    Cloud,
    Odom,
    Pose,
}

/// Per-channel subscriber snapshot, sampled fresh each tick and never
/// persisted.
#[derive(Clone, Copy, Debug, Default)]
pub struct Demand {
    pub rgb: bool,
    pub rgb_raw: bool,
    pub left: bool,
    pub left_raw: bool,
    pub right: bool,
    pub right_raw: bool,
    pub depth: bool,
    pub disparity: bool,
    pub conf_image: bool,
    pub conf_map: bool,
    pub cloud: bool,
    pub odom: bool,
    pub pose: bool,
}

impl Demand {
    /// Any data channel has a subscriber.
    pub fn any(&self) -> bool {
        self.rgb
            || self.rgb_raw
            || self.left
            || self.left_raw
            || self.right
            || self.right_raw
            || self.depth
            || self.disparity
            || self.conf_image
            || self.conf_map
            || self.cloud
            || self.odom
            || self.pose
    }

    /// Depth must be computed during the grab.
    pub fn needs_depth(&self) -> bool {
        self.depth
            || self.disparity
            || self.cloud
            || self.pose
            || self.odom
            || self.conf_image
            || self.conf_map
    }

    /// SDK tracking must be enabled.
    pub fn needs_tracking(&self, depth_stabilization: bool) -> bool {
        depth_stabilization || self.pose || self.odom || self.depth || self.cloud
    }

    /// The odometry chain must accumulate this tick.
    pub fn needs_chain(&self) -> bool {
        self.pose || self.odom || self.cloud || self.depth
    }

    /// The map correction must be recomputed this tick.
    pub fn needs_map(&self) -> bool {
        self.pose || self.cloud || self.depth
    }
}

/// Per-tick demand source.
pub trait DemandProbe {
    fn demand(&self) -> Demand;
}

/// Outbound message fan-out used by the acquisition loop.
pub trait BusOutputs: Send {
    fn image(&mut self, channel: Channel, msg: Image);
    fn camera_info(&mut self, channel: Channel, msg: CameraInfo);
    fn disparity(&mut self, msg: DisparityImage);
    /// Hand a cloud off for asynchronous packing and publication.
    fn cloud(&mut self, frame: CloudFrame, stamp: Time);
    fn odometry(&mut self, msg: Odometry);
    fn pose(&mut self, msg: PoseStamped);
    /// Coordinate-frame broadcast (odom->base, map->odom).
    fn frame(&mut self, msg: TransformStamped);
}

/// CDR-encode and publish a message with its ROS 2 schema tag.
pub fn put_cdr<T: Serialize>(publisher: &Publisher<'static>, msg: &T, schema: &str) {
    let buf = match serde_cdr::serialize(msg) {
        Ok(buf) => buf,
        Err(e) => {
            error!("could not encode {}: {:?}", schema, e);
            return;
        }
    };
    let enc = Encoding::APPLICATION_CDR.with_schema(schema);
    if let Err(e) = publisher.put(ZBytes::from(buf)).encoding(enc).wait() {
        error!("{} publish error: {:?}", publisher.key_expr(), e);
    }
}

/// Whether at least one subscriber currently matches the publisher.
pub fn has_subscribers(publisher: &Publisher<'static>) -> bool {
    publisher
        .matching_status()
        .wait()
        .map(|status| status.matching())
        .unwrap_or(false)
}

/// Declare a data publisher with the house QoS and startup banner.
pub async fn declare_publisher(
    session: &Session,
    topic: &str,
    priority: Priority,
) -> zenoh::Result<Publisher<'static>> {
    match session
        .declare_publisher(topic.to_owned())
        .priority(priority)
        .congestion_control(CongestionControl::Drop)
        .await
    {
        Ok(publisher) => {
            info!("advertised on topic {}", topic);
            Ok(publisher)
        }
        Err(e) => {
            error!("failed to create publisher {}: {:?}", topic, e);
            Err(e)
        }
    }
}

/// Resolved topic names for every outbound channel.
#[derive(Clone, Debug)]
pub struct Topics {
    pub rgb: String,
    pub rgb_raw: String,
    pub rgb_info: String,
    pub rgb_info_raw: String,
    pub left: String,
    pub left_raw: String,
    pub left_info: String,
    pub left_info_raw: String,
    pub right: String,
    pub right_raw: String,
    pub right_info: String,
    pub right_info_raw: String,
    pub depth: String,
    pub depth_info: String,
    pub disparity: String,
    pub conf_image: String,
    pub conf_map: String,
    pub cloud: String,
    pub odom: String,
    pub pose: String,
    pub imu: String,
    pub imu_raw: String,
    pub tf: String,
    pub tf_static: String,
    pub control: String,
    pub set_initial_pose: String,
    pub reset_tracking: String,
}

/// Zenoh-backed outputs: one declared publisher per channel, demand
/// sampled from matching status.
pub struct ZenohOutputs {
    rgb: Publisher<'static>,
    rgb_raw: Publisher<'static>,
    rgb_info: Publisher<'static>,
    rgb_info_raw: Publisher<'static>,
    left: Publisher<'static>,
    left_raw: Publisher<'static>,
    left_info: Publisher<'static>,
    left_info_raw: Publisher<'static>,
    right: Publisher<'static>,
    right_raw: Publisher<'static>,
    right_info: Publisher<'static>,
    right_info_raw: Publisher<'static>,
    depth: Publisher<'static>,
    depth_info: Publisher<'static>,
    disparity: Publisher<'static>,
    conf_image: Publisher<'static>,
    conf_map: Publisher<'static>,
    cloud: Arc<Publisher<'static>>,
    odom: Publisher<'static>,
    pose: Publisher<'static>,
    tf: Publisher<'static>,
    cloud_tx: kanal::Sender<CloudJob>,
}

impl ZenohOutputs {
    /// Declare every outbound publisher up front. The cloud publisher is
    /// shared with the formatting thread, which receives work through
    /// `cloud_tx`.
    pub async fn declare(
        session: &Session,
        topics: &Topics,
        cloud: Arc<Publisher<'static>>,
        cloud_tx: kanal::Sender<CloudJob>,
    ) -> zenoh::Result<Self> {
        let p = Priority::DataHigh;
        Ok(Self {
            rgb: declare_publisher(session, &topics.rgb, p).await?,
            rgb_raw: declare_publisher(session, &topics.rgb_raw, p).await?,
            rgb_info: declare_publisher(session, &topics.rgb_info, p).await?,
            rgb_info_raw: declare_publisher(session, &topics.rgb_info_raw, p).await?,
            left: declare_publisher(session, &topics.left, p).await?,
            left_raw: declare_publisher(session, &topics.left_raw, p).await?,
            left_info: declare_publisher(session, &topics.left_info, p).await?,
            left_info_raw: declare_publisher(session, &topics.left_info_raw, p).await?,
            right: declare_publisher(session, &topics.right, p).await?,
            right_raw: declare_publisher(session, &topics.right_raw, p).await?,
            right_info: declare_publisher(session, &topics.right_info, p).await?,
            right_info_raw: declare_publisher(session, &topics.right_info_raw, p).await?,
            depth: declare_publisher(session, &topics.depth, p).await?,
            depth_info: declare_publisher(session, &topics.depth_info, p).await?,
            disparity: declare_publisher(session, &topics.disparity, p).await?,
            conf_image: declare_publisher(session, &topics.conf_image, p).await?,
            conf_map: declare_publisher(session, &topics.conf_map, p).await?,
            cloud,
            odom: declare_publisher(session, &topics.odom, p).await?,
            pose: declare_publisher(session, &topics.pose, p).await?,
            tf: declare_publisher(session, &topics.tf, Priority::Background).await?,
            cloud_tx,
        })
    }

    fn image_publisher(&self, channel: Channel) -> Option<&Publisher<'static>> {
        match channel {
            Channel::Rgb => Some(&self.rgb),
            Channel::RgbRaw => Some(&self.rgb_raw),
            Channel::Left => Some(&self.left),
            Channel::LeftRaw => Some(&self.left_raw),
            Channel::Right => Some(&self.right),
            Channel::RightRaw => Some(&self.right_raw),
            Channel::Depth => Some(&self.depth),
            Channel::ConfImage => Some(&self.conf_image),
            Channel::ConfMap => Some(&self.conf_map),
            _ => None,
        }
    }

    fn info_publisher(&self, channel: Channel) -> Option<&Publisher<'static>> {
        match channel {
            Channel::Rgb => Some(&self.rgb_info),
            Channel::RgbRaw => Some(&self.rgb_info_raw),
            Channel::Left => Some(&self.left_info),
            Channel::LeftRaw => Some(&self.left_info_raw),
            Channel::Right => Some(&self.right_info),
            Channel::RightRaw => Some(&self.right_info_raw),
            Channel::Depth => Some(&self.depth_info),
            _ => None,
        }
    }
}

impl BusOutputs for ZenohOutputs {
    fn image(&mut self, channel: Channel, msg: Image) {
        match self.image_publisher(channel) {
            Some(publisher) => put_cdr(publisher, &msg, "sensor_msgs/msg/Image"),
            None => debug!("no image publisher for {:?}", channel),
        }
    }

    fn camera_info(&mut self, channel: Channel, msg: CameraInfo) {
        match self.info_publisher(channel) {
            Some(publisher) => put_cdr(publisher, &msg, "sensor_msgs/msg/CameraInfo"),
            None => debug!("no camera info publisher for {:?}", channel),
        }
    }

    fn disparity(&mut self, msg: DisparityImage) {
        put_cdr(&self.disparity, &msg, "stereo_msgs/msg/DisparityImage");
    }

    fn cloud(&mut self, frame: CloudFrame, stamp: Time) {
        // Keep only the most recent frame when the formatter lags.
        let _ = self.cloud_tx.try_send(CloudJob { frame, stamp });
    }

    fn odometry(&mut self, msg: Odometry) {
        put_cdr(&self.odom, &msg, "nav_msgs/msg/Odometry");
    }

    fn pose(&mut self, msg: PoseStamped) {
        put_cdr(&self.pose, &msg, "geometry_msgs/msg/PoseStamped");
    }

    fn frame(&mut self, msg: TransformStamped) {
        put_cdr(&self.tf, &msg, "geometry_msgs/msg/TransformStamped");
    }
}

impl DemandProbe for ZenohOutputs {
    fn demand(&self) -> Demand {
        Demand {
            rgb: has_subscribers(&self.rgb),
            rgb_raw: has_subscribers(&self.rgb_raw),
            left: has_subscribers(&self.left),
            left_raw: has_subscribers(&self.left_raw),
            right: has_subscribers(&self.right),
            right_raw: has_subscribers(&self.right_raw),
            depth: has_subscribers(&self.depth),
            disparity: has_subscribers(&self.disparity),
            conf_image: has_subscribers(&self.conf_image),
            conf_map: has_subscribers(&self.conf_map),
            cloud: has_subscribers(&self.cloud),
            odom: has_subscribers(&self.odom),
            pose: has_subscribers(&self.pose),
        }
    }
}

/// What a [`RecordingOutputs`] captured.
#[derive(Clone, Debug)]
pub enum Event {
    /// An image publication with its pixel width.
    Image(Channel, u32),
    CameraInfo(Channel),
    Disparity,
    Cloud { points: usize },
    Odometry(Odometry),
    Pose(PoseStamped),
    Frame(TransformStamped),
}

/// In-memory outputs with scripted demand, for driving the acquisition
/// loop in tests.
#[derive(Default)]
pub struct RecordingOutputs {
    pub demand: Demand,
    pub events: Vec<Event>,
}

impl RecordingOutputs {
    pub fn new(demand: Demand) -> Self {
        Self {
            demand,
            events: Vec::new(),
        }
    }

    /// Channels of every captured image event, in order.
    pub fn image_channels(&self) -> Vec<Channel> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Image(c, _) => Some(*c),
                _ => None,
            })
            .collect()
    }
}

impl BusOutputs for RecordingOutputs {
    fn image(&mut self, channel: Channel, msg: Image) {
        self.events.push(Event::Image(channel, msg.width));
    }

    fn camera_info(&mut self, channel: Channel, _msg: CameraInfo) {
        self.events.push(Event::CameraInfo(channel));
    }

    fn disparity(&mut self, _msg: DisparityImage) {
        self.events.push(Event::Disparity);
    }

    fn cloud(&mut self, frame: CloudFrame, _stamp: Time) {
        self.events.push(Event::Cloud {
            points: frame.points.len(),
        });
    }

    fn odometry(&mut self, msg: Odometry) {
        self.events.push(Event::Odometry(msg));
    }

    fn pose(&mut self, msg: PoseStamped) {
        self.events.push(Event::Pose(msg));
    }

    fn frame(&mut self, msg: TransformStamped) {
        self.events.push(Event::Frame(msg));
    }
}

impl DemandProbe for RecordingOutputs {
    fn demand(&self) -> Demand {
        self.demand
    }
}
