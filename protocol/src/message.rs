use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use uuid::Uuid;

const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";
const STREAMING_ID_PREFIX: &str = "streaming-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn of a chat as the server stores it, or as the client synthesizes it
/// while a reply is still streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(deserialize_with = "deserialize_opaque_id")]
    pub id: String,
    pub role: Role,
    #[serde(default, deserialize_with = "deserialize_nullable_text")]
    pub content: String,
    #[serde(default, alias = "tool_code", skip_serializing_if = "Option::is_none")]
    pub tool_code: Option<String>,
    #[serde(default, alias = "tool_output", skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    /// ISO-8601 text exactly as the server sent it.
    #[serde(default, deserialize_with = "deserialize_nullable_text")]
    pub timestamp: String,
    #[serde(default, alias = "author_user_id", skip_serializing_if = "Option::is_none")]
    pub author_user_id: Option<String>,
}

impl Message {
    /// Local user message shown before the server echoes it back.
    pub fn optimistic_user(id: String, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            tool_code: None,
            tool_output: None,
            timestamp: now_timestamp(),
            author_user_id: None,
        }
    }

    /// Empty assistant message that incremental frames are appended to.
    pub fn streaming_assistant(id: String) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            tool_code: None,
            tool_output: None,
            timestamp: now_timestamp(),
            author_user_id: None,
        }
    }

    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub fn append_tool_code(&mut self, delta: &str) {
        self.tool_code.get_or_insert_with(String::new).push_str(delta);
    }

    pub fn append_tool_output(&mut self, delta: &str) {
        self.tool_output
            .get_or_insert_with(String::new)
            .push_str(delta);
    }

    pub fn timestamp_key(&self) -> TimestampKey {
        TimestampKey::parse(&self.timestamp)
    }
}

/// Sort key for [`Message::timestamp`].
///
/// Parsable timestamps order by instant; anything else sorts after them by raw
/// text. Deriving `Ord` on the tuple keeps the order total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampKey(bool, Option<DateTime<Utc>>, String);

impl TimestampKey {
    pub fn parse(raw: &str) -> Self {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                // Servers that emit naive ISO-8601 (no offset) are treated as UTC.
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            });
        Self(parsed.is_none(), parsed, raw.to_string())
    }
}

/// Stable ascending sort by timestamp.
pub fn sort_by_timestamp(messages: &mut [Message]) {
    messages.sort_by_cached_key(Message::timestamp_key);
}

pub fn new_optimistic_id() -> String {
    format!("{OPTIMISTIC_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn new_streaming_id() -> String {
    format!("{STREAMING_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_optimistic_id(id: &str) -> bool {
    id.starts_with(OPTIMISTIC_ID_PREFIX)
}

pub fn is_streaming_id(id: &str) -> bool {
    id.starts_with(STREAMING_ID_PREFIX)
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Message ids are opaque: some backends send integers, others strings.
fn deserialize_opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OpaqueId {
        Text(String),
        Integer(i64),
        Unsigned(u64),
    }

    Ok(match OpaqueId::deserialize(deserializer)? {
        OpaqueId::Text(text) => text,
        OpaqueId::Integer(value) => value.to_string(),
        OpaqueId::Unsigned(value) => value.to_string(),
    })
}

/// Tool-only turns arrive with `"content": null`; treat it like a missing key.
fn deserialize_nullable_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
