//! Server-Sent-Events framing
//!
//! ```text
//! event: update\n
//! data: {"type":"update","data":[...],"timestamp":1700000000000}\n
//! \n
//! ```

use crate::error::BroadcastError;
use serde::Serialize;

/// Keep-alive comment frame
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

/// Event pushed to dashboard subscribers
#[derive(Debug, Clone, Serialize)]
pub struct DashboardEvent<T: Serialize> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: T,
    pub timestamp: u64,
}

impl<T: Serialize> DashboardEvent<T> {
    pub fn init(data: T, timestamp: u64) -> Self {
        DashboardEvent {
            kind: "init",
            data,
            timestamp,
        }
    }

    pub fn update(data: T, timestamp: u64) -> Self {
        DashboardEvent {
            kind: "update",
            data,
            timestamp,
        }
    }

    /// Serialize to one SSE frame. JSON output never contains a raw newline,
    /// so a single `data:` line is always enough.
    pub fn to_frame(&self) -> Result<String, BroadcastError> {
        let json = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.kind, json))
    }
}
