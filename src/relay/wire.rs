//! Wire shapes for the event fabric.
//!
//! Frames are JSON. Inbound: `{"id": 7, "event": "join", "payload": {…}}`,
//! where `id` is present when the sender wants an ack. Outbound events carry
//! `{"event", "payload"}`; acks carry `{"ack": 7, "payload": {…}}`. Byte
//! fields (IVs, ciphertext) travel base64-encoded.

use crate::store::{ContentItem, ContentType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

pub mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintPayload {
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub session_id: String,
    pub client_name: String,
    pub fingerprint: FingerprintPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptionMetadata {
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

/// Content metadata as it travels between clients. `metadata` is an opaque
/// blob the server stores and echoes without interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInfo {
    pub content_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content_type: ContentType,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub is_chunked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    pub total_size: u64,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_large_file: bool,
    pub encryption_metadata: EncryptionMetadata,
}

impl ContentInfo {
    pub fn from_item(item: &ContentItem) -> Self {
        Self {
            content_id: item.content_id.clone(),
            sender_id: item.sender_id.clone(),
            sender_name: item.sender_name.clone(),
            content_type: item.content_type,
            timestamp: item.created_at,
            metadata: item.additional_metadata.clone(),
            is_chunked: item.total_chunks > 1,
            total_chunks: Some(item.total_chunks),
            total_size: item.total_size,
            is_pinned: item.is_pinned,
            is_large_file: item.is_large_file,
            encryption_metadata: EncryptionMetadata {
                iv: item.encryption_iv.clone(),
            },
        }
    }

    pub fn to_item(&self, session_id: &str, large_file_threshold: u64) -> ContentItem {
        let now = crate::store::content_store::now_millis();
        let created_at = if self.timestamp > 0 { self.timestamp } else { now };
        ContentItem {
            content_id: self.content_id.clone(),
            session_id: session_id.to_string(),
            content_type: self.content_type,
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            total_chunks: self.total_chunks.unwrap_or(1),
            total_size: self.total_size,
            created_at,
            last_modified: now,
            encryption_iv: self.encryption_metadata.iv.clone(),
            additional_metadata: self.metadata.clone(),
            is_complete: false,
            is_pinned: self.is_pinned,
            is_large_file: self.is_large_file || self.total_size >= large_file_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub session_id: String,
    pub content: ContentInfo,
    #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub content_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub session_id: String,
    pub chunk: ChunkInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameContentPayload {
    pub session_id: String,
    pub content_id: String,
    pub new_name: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveContentPayload {
    pub session_id: String,
    pub content_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinContentPayload {
    pub session_id: String,
    pub content_id: String,
    pub pinned: bool,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearAllContentPayload {
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContentPayload {
    pub session_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    pub session_id: String,
}

/// Every event a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join(JoinPayload),
    Leave(LeavePayload),
    Content(ContentPayload),
    Chunk(ChunkPayload),
    RenameContent(RenameContentPayload),
    RemoveContent(RemoveContentPayload),
    PinContent(PinContentPayload),
    ClearAllContent(ClearAllContentPayload),
    ListContent(ListContentPayload),
    Ping(PingPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::Leave(_) => "leave",
            ClientEvent::Content(_) => "content",
            ClientEvent::Chunk(_) => "chunk",
            ClientEvent::RenameContent(_) => "rename-content",
            ClientEvent::RemoveContent(_) => "remove-content",
            ClientEvent::PinContent(_) => "pin-content",
            ClientEvent::ClearAllContent(_) => "clear-all-content",
            ClientEvent::ListContent(_) => "list-content",
            ClientEvent::Ping(_) => "ping",
        }
    }
}

/// One inbound frame: an event plus an optional ack correlation id.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientJoinedPayload {
    pub session_id: String,
    pub client_id: String,
    pub client_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLeftPayload {
    pub session_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRenamedPayload {
    pub content_id: String,
    pub new_name: String,
    pub sender_id: String,
    pub sender_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRemovedPayload {
    pub content_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPinnedPayload {
    pub content_id: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllContentClearedPayload {
    pub session_id: String,
    pub cleared_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExpiredPayload {
    pub session_id: String,
    pub message: String,
}

/// Every event the server may push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    ClientJoined(ClientJoinedPayload),
    ClientLeft(ClientLeftPayload),
    Content(ContentPayload),
    Chunk(ChunkPayload),
    ContentRenamed(ContentRenamedPayload),
    ContentRemoved(ContentRemovedPayload),
    ContentPinned(ContentPinnedPayload),
    AllContentCleared(AllContentClearedPayload),
    SessionExpired(SessionExpiredPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<MemberInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpAck {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearAllAck {
    pub success: bool,
    /// Content ids deleted by this call; empty on a repeated clear.
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContentAck {
    pub success: bool,
    pub items: Vec<ContentInfo>,
    pub total_count: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingAck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Typed ack bodies; serialized untagged so the client sees plain objects.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AckPayload {
    Join(JoinAck),
    List(ListContentAck),
    Clear(ClearAllAck),
    Ping(PingAck),
    Op(OpAck),
}

/// One outbound frame: a pushed event or an ack to a correlated request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Event(ServerEvent),
    Ack { ack: u64, payload: AckPayload },
}
