use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broad classification of a content item. The server never inspects
/// payloads; this comes from the publisher and only steers client rendering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    File,
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::File => "file",
            ContentType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text" => ContentType::Text,
            "image" => ContentType::Image,
            "file" => ContentType::File,
            _ => ContentType::Other,
        }
    }
}

/// A logical content item: one published artifact composed of one or more
/// encrypted chunks. All byte fields are opaque ciphertext or IVs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_id: String,
    pub session_id: String,
    pub content_type: ContentType,
    pub sender_id: String,
    pub sender_name: String,
    pub total_chunks: u32,
    pub total_size: u64,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds; bumped on every chunk write and mutation.
    pub last_modified: i64,
    /// Content-level IV, opaque to the server.
    pub encryption_iv: Vec<u8>,
    /// Free-form JSON from the publisher (fileName, mimeType, dimensions, ...).
    pub additional_metadata: Option<Value>,
    pub is_complete: bool,
    pub is_pinned: bool,
    pub is_large_file: bool,
}

impl ContentItem {
    pub fn file_name(&self) -> Option<&str> {
        self.additional_metadata
            .as_ref()
            .and_then(|m| m.get("fileName"))
            .and_then(Value::as_str)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.additional_metadata
            .as_ref()
            .and_then(|m| m.get("mimeType"))
            .and_then(Value::as_str)
    }

    /// Typed view over the opaque metadata blob.
    pub fn metadata_view(&self) -> MetadataView<'_> {
        let meta = match self.additional_metadata.as_ref() {
            Some(m) => m,
            None => return MetadataView::Other(None),
        };

        match self.content_type {
            ContentType::Text => MetadataView::Text {
                mime_type: meta.get("mimeType").and_then(Value::as_str),
            },
            ContentType::Image => MetadataView::Image {
                mime_type: meta.get("mimeType").and_then(Value::as_str),
                width: meta.get("width").and_then(Value::as_u64),
                height: meta.get("height").and_then(Value::as_u64),
            },
            ContentType::File => MetadataView::File {
                file_name: meta.get("fileName").and_then(Value::as_str),
                mime_type: meta.get("mimeType").and_then(Value::as_str),
            },
            ContentType::Other => MetadataView::Other(Some(meta)),
        }
    }
}

/// In-process typed projection of `additional_metadata`. The blob itself is
/// carried end-to-end untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataView<'a> {
    Text {
        mime_type: Option<&'a str>,
    },
    Image {
        mime_type: Option<&'a str>,
        width: Option<u64>,
        height: Option<u64>,
    },
    File {
        file_name: Option<&'a str>,
        mime_type: Option<&'a str>,
    },
    Other(Option<&'a Value>),
}

/// Metadata accompanying a chunk write. The content-level fields are only
/// consulted when the chunk arrives before its `content` event and the item
/// row has to be created lazily.
#[derive(Debug, Clone, Default)]
pub struct ChunkMeta {
    pub content_id: String,
    pub session_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Per-chunk IV.
    pub iv: Vec<u8>,
    pub content_type: Option<ContentType>,
    pub total_size: Option<u64>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub encryption_iv: Option<Vec<u8>>,
    pub additional_metadata: Option<Value>,
}

/// Result of a `save_chunk` call: the item row as of this write plus how many
/// distinct chunk rows are now stored, so the caller can detect the
/// completion edge without a second query.
#[derive(Debug, Clone)]
pub struct SaveChunkOutcome {
    pub item: ContentItem,
    pub chunks_stored: u32,
    /// False when the write was an idempotent duplicate.
    pub newly_stored: bool,
}

/// One page of a session's content listing, newest first.
#[derive(Debug, Clone)]
pub struct ContentPage {
    pub items: Vec<ContentItem>,
    pub total_count: u64,
    pub has_more: bool,
}

/// Per-chunk info handed to a download sink alongside the payload.
#[derive(Debug, Clone)]
pub struct ChunkStreamInfo {
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub size: u64,
    pub iv: Vec<u8>,
}

/// Totals reported after a full download stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadSummary {
    pub chunks: u32,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_with(content_type: ContentType, meta: Option<Value>) -> ContentItem {
        ContentItem {
            content_id: "c1".into(),
            session_id: "s1".into(),
            content_type,
            sender_id: "client-a".into(),
            sender_name: "Alice".into(),
            total_chunks: 1,
            total_size: 10,
            created_at: 0,
            last_modified: 0,
            encryption_iv: vec![0; 12],
            additional_metadata: meta,
            is_complete: false,
            is_pinned: false,
            is_large_file: false,
        }
    }

    #[test]
    fn test_content_type_round_trip() {
        for ct in [
            ContentType::Text,
            ContentType::Image,
            ContentType::File,
            ContentType::Other,
        ] {
            assert_eq!(ContentType::parse(ct.as_str()), ct);
        }
        assert_eq!(ContentType::parse("unknown"), ContentType::Other);
    }

    #[test]
    fn test_file_name_and_mime_type() {
        let item = item_with(
            ContentType::File,
            Some(json!({"fileName": "notes.txt", "mimeType": "text/plain"})),
        );
        assert_eq!(item.file_name(), Some("notes.txt"));
        assert_eq!(item.mime_type(), Some("text/plain"));

        let bare = item_with(ContentType::File, None);
        assert_eq!(bare.file_name(), None);
        assert_eq!(bare.mime_type(), None);
    }

    #[test]
    fn test_metadata_view_image() {
        let item = item_with(
            ContentType::Image,
            Some(json!({"mimeType": "image/png", "width": 640, "height": 480})),
        );
        match item.metadata_view() {
            MetadataView::Image {
                mime_type,
                width,
                height,
            } => {
                assert_eq!(mime_type, Some("image/png"));
                assert_eq!(width, Some(640));
                assert_eq!(height, Some(480));
            }
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[test]
    fn test_metadata_view_missing_blob() {
        let item = item_with(ContentType::Text, None);
        assert_eq!(item.metadata_view(), MetadataView::Other(None));
    }
}
