pub mod content_store;
pub mod error;
pub mod types;

pub use content_store::ContentStore;
pub use error::{StoreError, StoreResult};
pub use types::{
    ChunkMeta, ChunkStreamInfo, ContentItem, ContentPage, ContentType, DownloadSummary,
    MetadataView, SaveChunkOutcome,
};
