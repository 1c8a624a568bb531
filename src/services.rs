// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bus services and the runtime control channel.
//!
//! Two queryables expose the tracking services (set-initial-pose,
//! reset-tracking) and a subscriber accepts [`SettingChange`] commands as
//! JSON. All three are thin parsers over the command methods on
//! [`Context`]; the shared-state mutex serializes them against the
//! acquisition loop.

use crate::context::Context;
use crate::settings::SettingChange;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use zenoh::bytes::Encoding;
use zenoh::Session;

/// set-initial-pose request payload.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SetPoseRequest {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl SetPoseRequest {
    fn as_pose(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.roll, self.pitch, self.yaw]
    }
}

fn parse_pose(payload: Option<&[u8]>) -> Result<SetPoseRequest, String> {
    let payload = payload.ok_or_else(|| "missing request payload".to_string())?;
    serde_json::from_slice(payload).map_err(|e| e.to_string())
}

/// Serve set-initial-pose requests. Always reports success for a
/// well-formed pose; tracking is re-seeded when it is active.
pub async fn serve_set_initial_pose(
    session: Session,
    topic: String,
    ctx: Context,
) -> zenoh::Result<()> {
    let queryable = session.declare_queryable(topic.clone()).await?;
    info!("serving {}", topic);
    while let Ok(query) = queryable.recv_async().await {
        let payload = query.payload().map(|p| p.to_bytes().to_vec());
        let reply = match parse_pose(payload.as_deref()) {
            Ok(req) => {
                ctx.set_initial_pose(req.as_pose());
                json!({ "done": true })
            }
            Err(e) => {
                warn!("set_initial_pose rejected: {}", e);
                json!({ "done": false, "error": e })
            }
        };
        let key = query.key_expr().clone();
        if let Err(e) = query
            .reply(key, reply.to_string())
            .encoding(Encoding::APPLICATION_JSON)
            .await
        {
            error!("set_initial_pose reply error: {:?}", e);
        }
    }
    Ok(())
}

/// Serve reset-tracking requests. Fails when tracking is inactive.
pub async fn serve_reset_tracking(
    session: Session,
    topic: String,
    ctx: Context,
) -> zenoh::Result<()> {
    let queryable = session.declare_queryable(topic.clone()).await?;
    info!("serving {}", topic);
    while let Ok(query) = queryable.recv_async().await {
        let reply = match ctx.reset_tracking() {
            Ok(()) => json!({ "reset_done": true }),
            Err(e) => {
                warn!("reset_tracking rejected: {}", e);
                json!({ "reset_done": false, "error": e.to_string() })
            }
        };
        let key = query.key_expr().clone();
        if let Err(e) = query
            .reply(key, reply.to_string())
            .encoding(Encoding::APPLICATION_JSON)
            .await
        {
            error!("reset_tracking reply error: {:?}", e);
        }
    }
    Ok(())
}

/// Apply JSON settings changes arriving on the control topic.
pub async fn control_loop(session: Session, topic: String, ctx: Context) -> zenoh::Result<()> {
    let subscriber = session.declare_subscriber(topic.clone()).await?;
    info!("listening for settings on {}", topic);
    while let Ok(sample) = subscriber.recv_async().await {
        match serde_json::from_slice::<SettingChange>(&sample.payload().to_bytes()) {
            Ok(change) => ctx.apply_setting(change),
            Err(e) => warn!("ignoring malformed control message: {}", e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_request_parses_six_floats() {
        let req = parse_pose(Some(
            br#"{"x":1.0,"y":2.0,"z":3.0,"roll":0.1,"pitch":0.2,"yaw":0.3}"#,
        ))
        .unwrap();
        assert_eq!(req.as_pose(), [1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn pose_request_rejects_missing_fields() {
        assert!(parse_pose(Some(br#"{"x":1.0}"#)).is_err());
        assert!(parse_pose(None).is_err());
    }

    #[test]
    fn control_payload_parses_setting_change() {
        let change: SettingChange =
            serde_json::from_slice(br#"{"setting":"exposure","value":42}"#).unwrap();
        assert_eq!(change, SettingChange::Exposure(42));
    }
}
