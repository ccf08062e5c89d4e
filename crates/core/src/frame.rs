//! Wire frames for the chat socket.
//!
//! Inbound traffic is a closed set of `kind`-tagged JSON records. Frames
//! without a `kind` are only accepted through the explicit legacy adapter
//! in [`InboundFrame::decode`]; nothing else in the system guesses at
//! untyped payloads.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("untagged frame does not match the legacy message shape")]
    Unrecognized,
}

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundFrame {
    Message {
        content: String,
        author_id: i64,
        conversation_id: i64,
    },
    Ack {
        temp_id: i64,
        conversation_id: i64,
    },
    Typing {
        conversation_id: i64,
    },
    UserStatus {
        id: i64,
        #[serde(rename = "isOnline")]
        is_online: bool,
    },
}

impl InboundFrame {
    /// Decode a raw frame.
    ///
    /// Tagged frames decode strictly against the closed kind set. A frame
    /// with no `kind` at all goes through [`legacy_message`], a
    /// compatibility adapter for the pre-tagging server generation that
    /// emitted bare message records.
    pub fn decode(raw: &str) -> Result<Self, FrameDecodeError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("kind").is_some() {
            Ok(serde_json::from_value(value)?)
        } else {
            legacy_message(value)
        }
    }
}

/// Compatibility adapter: an untagged record carrying both `content` and
/// `author_id` is an old-style `message` frame.
fn legacy_message(value: serde_json::Value) -> Result<InboundFrame, FrameDecodeError> {
    #[derive(Deserialize)]
    struct LegacyMessage {
        content: String,
        author_id: i64,
        #[serde(default)]
        conversation_id: i64,
    }

    match serde_json::from_value::<LegacyMessage>(value) {
        Ok(legacy) => {
            debug!(
                author_id = legacy.author_id,
                "accepted untagged frame via legacy message adapter"
            );
            Ok(InboundFrame::Message {
                content: legacy.content,
                author_id: legacy.author_id,
                conversation_id: legacy.conversation_id,
            })
        }
        Err(_) => Err(FrameDecodeError::Unrecognized),
    }
}

/// A client-to-server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        content: String,
        /// 0 when no conversation exists yet; the server creates one
        conversation_id: i64,
        recipient_id: i64,
        temp_id: i64,
    },
    Typing {
        conversation_id: i64,
    },
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
