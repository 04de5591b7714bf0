//! Change event vocabulary and its wire encoding.
//!
//! Every frame on the wire is a JSON object `{"type": ..., "payload": ...}`.
//! The payload shape is fixed per event type and validated when a frame
//! is decoded; a frame that does not match is rejected rather than
//! passed on to listeners.

use fence_map_fence_models::{FenceId, PerimeterId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::BroadcastError;

/// Event names, as they appear in the frame `type` field.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// The link to the relay came up.
    Connect,
    /// The link to the relay went down.
    Disconnect,
    /// The transport reported an error.
    Error,
    /// Reconnection was abandoned after the maximum number of attempts.
    ReconnectFailed,
    /// Greeting sent by the relay to a newly connected client.
    ConnectSuccess,
    FenceCreated,
    FenceUpdated,
    FenceDeleted,
    PerimeterUpdated,
    PerimeterDeleted,
}

impl EventKind {
    /// Lifecycle events raised by the broadcaster itself. They are never
    /// accepted from the wire.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Disconnect | Self::Error | Self::ReconnectFailed
        )
    }
}

/// A change notification or connection lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Connect,
    Disconnect,
    Error { message: String },
    ReconnectFailed,
    ConnectSuccess { message: String },
    FenceCreated(FenceId),
    FenceUpdated(FenceId),
    FenceDeleted(FenceId),
    PerimeterUpdated(PerimeterId),
    PerimeterDeleted(PerimeterId),
}

/// Raw frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FencePayload {
    fence_id: FenceId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerimeterPayload {
    perimeter_id: PerimeterId,
}

#[derive(Serialize, Deserialize)]
struct MessagePayload {
    message: String,
}

impl ChangeEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connect => EventKind::Connect,
            Self::Disconnect => EventKind::Disconnect,
            Self::Error { .. } => EventKind::Error,
            Self::ReconnectFailed => EventKind::ReconnectFailed,
            Self::ConnectSuccess { .. } => EventKind::ConnectSuccess,
            Self::FenceCreated(_) => EventKind::FenceCreated,
            Self::FenceUpdated(_) => EventKind::FenceUpdated,
            Self::FenceDeleted(_) => EventKind::FenceDeleted,
            Self::PerimeterUpdated(_) => EventKind::PerimeterUpdated,
            Self::PerimeterDeleted(_) => EventKind::PerimeterDeleted,
        }
    }

    /// Fence the event refers to, if any.
    #[must_use]
    pub const fn fence_id(&self) -> Option<FenceId> {
        match self {
            Self::FenceCreated(id) | Self::FenceUpdated(id) | Self::FenceDeleted(id) => Some(*id),
            _ => None,
        }
    }

    /// Perimeter the event refers to, if any.
    #[must_use]
    pub const fn perimeter_id(&self) -> Option<PerimeterId> {
        match self {
            Self::PerimeterUpdated(id) | Self::PerimeterDeleted(id) => Some(*id),
            _ => None,
        }
    }

    /// Builds the frame envelope for this event.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if the payload cannot be
    /// serialized.
    pub fn to_frame(&self) -> Result<Frame, BroadcastError> {
        let payload = match self {
            Self::Connect | Self::Disconnect | Self::ReconnectFailed => Value::Null,
            Self::Error { message } | Self::ConnectSuccess { message } => {
                serde_json::to_value(MessagePayload {
                    message: message.clone(),
                })
                .map_err(BroadcastError::Encode)?
            }
            Self::FenceCreated(fence_id)
            | Self::FenceUpdated(fence_id)
            | Self::FenceDeleted(fence_id) => serde_json::to_value(FencePayload {
                fence_id: *fence_id,
            })
            .map_err(BroadcastError::Encode)?,
            Self::PerimeterUpdated(perimeter_id) | Self::PerimeterDeleted(perimeter_id) => {
                serde_json::to_value(PerimeterPayload {
                    perimeter_id: *perimeter_id,
                })
                .map_err(BroadcastError::Encode)?
            }
        };

        Ok(Frame {
            kind: self.kind().to_string(),
            payload,
        })
    }

    /// Serializes the event as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, BroadcastError> {
        serde_json::to_string(&self.to_frame()?).map_err(BroadcastError::Encode)
    }

    /// Parses and validates a JSON text frame received from the relay.
    ///
    /// # Errors
    ///
    /// * [`BroadcastError::Decode`] if the frame is not JSON or the
    ///   payload does not match the event type
    /// * [`BroadcastError::UnknownEvent`] if the type is not recognised or
    ///   names a local lifecycle event
    pub fn decode(text: &str) -> Result<Self, BroadcastError> {
        let frame: Frame = serde_json::from_str(text).map_err(BroadcastError::Decode)?;
        Self::from_frame(frame)
    }

    /// Validates a parsed frame envelope.
    ///
    /// # Errors
    ///
    /// See [`ChangeEvent::decode`].
    pub fn from_frame(frame: Frame) -> Result<Self, BroadcastError> {
        let kind: EventKind = match frame.kind.parse() {
            Ok(kind) if !EventKind::is_local(kind) => kind,
            _ => return Err(BroadcastError::UnknownEvent { kind: frame.kind }),
        };

        let payload = frame.payload;
        let event = match kind {
            EventKind::ConnectSuccess => Self::ConnectSuccess {
                message: parse::<MessagePayload>(payload)?.message,
            },
            EventKind::FenceCreated => Self::FenceCreated(parse::<FencePayload>(payload)?.fence_id),
            EventKind::FenceUpdated => Self::FenceUpdated(parse::<FencePayload>(payload)?.fence_id),
            EventKind::FenceDeleted => Self::FenceDeleted(parse::<FencePayload>(payload)?.fence_id),
            EventKind::PerimeterUpdated => {
                Self::PerimeterUpdated(parse::<PerimeterPayload>(payload)?.perimeter_id)
            }
            EventKind::PerimeterDeleted => {
                Self::PerimeterDeleted(parse::<PerimeterPayload>(payload)?.perimeter_id)
            }
            EventKind::Connect
            | EventKind::Disconnect
            | EventKind::Error
            | EventKind::ReconnectFailed => {
                return Err(BroadcastError::UnknownEvent {
                    kind: kind.to_string(),
                });
            }
        };

        Ok(event)
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, BroadcastError> {
    serde_json::from_value(payload).map_err(BroadcastError::Decode)
}
