// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point-cloud formatting thread.
//!
//! Packing a full-resolution colored cloud is the most expensive
//! marshalling step, so it runs off the acquisition thread: the loop
//! hands frames over a bounded channel and this thread packs and
//! publishes the most recent one, dropping stale backlog.

use crate::msg::{cloud_message, pack_cloud};
use crate::publish::put_cdr;
use crate::remap::AxisMap;
use crate::camera::CloudFrame;
use edgefirst_schemas::builtin_interfaces::Time;
use kanal::Receiver;
use std::sync::Arc;
use tracing::debug;
use zenoh::pubsub::Publisher;

/// One cloud handoff from the acquisition loop.
pub struct CloudJob {
    pub frame: CloudFrame,
    pub stamp: Time,
}

// If the receiver is empty, waits for the next message, otherwise returns
// the most recent message on this receiver. Returns None when closed.
fn drain_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut msg = rx.recv().ok()?;
    while let Ok(Some(v)) = rx.try_recv() {
        msg = v;
    }
    Some(msg)
}

/// Thread body: pack and publish clouds until the channel closes.
pub fn run(rx: Receiver<CloudJob>, publisher: Arc<Publisher<'static>>, frame_id: String, map: AxisMap) {
    while let Some(job) = drain_latest(&rx) {
        let data = pack_cloud(&job.frame.points, &map);
        let msg = cloud_message(&job.frame, data, &frame_id, job.stamp);
        put_cdr(&publisher, &msg, "sensor_msgs/msg/PointCloud2");
    }
    debug!("cloud thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_latest_keeps_most_recent() {
        let (tx, rx) = kanal::bounded(8);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(drain_latest(&rx), Some(3));
        drop(tx);
        assert_eq!(drain_latest(&rx), None);
    }
}
