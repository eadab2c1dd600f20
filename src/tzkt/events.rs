//! Wire types for the TzKT head subscription channel.
//!
//! Frames are JSON objects `{ "type": <0|1|2>, "state": <level>, "data": … }`.
//! The first frame after subscribing is a `State` carrying the current head
//! level; `Data` frames carry a head payload; `Reorg` frames carry the first
//! invalidated level in `state`.

use serde::{Deserialize, Serialize};

/// Capacity of the internal queue between the socket reader and the
/// subscription processing loop. Overflow blocks the reader (backpressure).
pub const MESSAGE_QUEUE_CAPACITY: usize = 100;

/// Discriminant of a subscription frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum MessageKind {
    State,
    Data,
    Reorg,
}

impl TryFrom<u8> for MessageKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::State),
            1 => Ok(Self::Data),
            2 => Ok(Self::Reorg),
            other => Err(format!("unknown subscription message type {other}")),
        }
    }
}

/// One frame received on the head channel.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub state: u64,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Body of a head `Data` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Head {
    pub level: u64,
}

/// Request frame sent once after connecting to enter the head channel.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
}

impl SubscribeRequest {
    pub fn head() -> Self {
        Self {
            method: "SubscribeToHead",
        }
    }
}
