// Wire messages for the shared-touch-state protocol
//
// JSON, one message per line, over a plain TCP stream. Client requests and
// server replies are correlated only by request_id; state_update is both a
// broadcast (after every accepted set_touch) and the reply shape for
// get_state.

use serde::{Deserialize, Serialize};

/// Messages sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify to the server after the socket opens
    Connect { client_id: String },
    /// Update the shared touch position
    SetTouch { x: f64, y: f64 },
    /// Request the current state (replied to the requester only)
    GetState { request_id: String },
    /// Request a fresh impedance vector computed from the shared state
    MeasureImpedance { request_id: String },
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply to Connect
    Connected { server_info: String },
    /// Shared state, broadcast on every change and sent to new connections
    StateUpdate {
        touch_position: [f64; 2],
        client_count: usize,
    },
    /// Reply to MeasureImpedance, addressed to the requester only
    ImpedanceResponse {
        request_id: String,
        /// One [magnitude, phase] entry per configured pair
        impedance_vector: Vec<[f64; 2]>,
        ground_truth: [f64; 2],
    },
}

/// Serialize a message to one JSON line (newline included)
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
