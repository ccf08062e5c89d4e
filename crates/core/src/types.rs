use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The authenticated user, as returned by the identity endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// A roster entry: identity, presence, and last-message metadata.
///
/// Field names follow the server's JSON. Contacts are mutated in place by
/// roster merges and never removed during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "profile_img", default)]
    pub avatar_url: Option<String>,
    #[serde(rename = "is_online", default)]
    pub online: bool,
    #[serde(default, deserialize_with = "nullable_time")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(rename = "last_message_content", default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, deserialize_with = "nullable_id")]
    pub conversation_id: Option<i64>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A single chat message as held by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id; absent until acknowledged or loaded from history
    pub server_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub author_id: i64,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub direction: Direction,
    pub delivery: DeliveryState,
    /// Correlation id; set only while locally originated and unacknowledged
    pub temp_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

/// Accepts the server's three spellings of a nullable timestamp: an RFC 3339
/// string, `null`, or the `{Valid, Time}` object form.
fn nullable_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Rfc3339(DateTime<Utc>),
        Nullable {
            #[serde(rename = "Valid")]
            valid: bool,
            #[serde(rename = "Time", default)]
            time: Option<DateTime<Utc>>,
        },
    }

    Ok(match Option::<Wire>::deserialize(deserializer)? {
        Some(Wire::Rfc3339(t)) => Some(t),
        Some(Wire::Nullable { valid: true, time }) => time,
        Some(Wire::Nullable { valid: false, .. }) | None => None,
    })
}

/// The server sends `0` or `null` for "no conversation yet".
fn nullable_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.filter(|id| *id != 0))
}
