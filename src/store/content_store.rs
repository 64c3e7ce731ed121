use crate::store::error::{StoreError, StoreResult};
use crate::store::types::{
    ChunkMeta, ChunkStreamInfo, ContentItem, ContentPage, ContentType, DownloadSummary,
    SaveChunkOutcome,
};
use bytes::Bytes;
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Items at or above this size are flagged `is_large_file` and excluded from
/// real-time chunk fanout.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Schema revisions, applied in order. `schema_version.version` records the
/// last applied index + 1.
const MIGRATIONS: &[&[&str]] = &[&[
    r#"
    CREATE TABLE IF NOT EXISTS content (
        content_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        content_type TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        sender_name TEXT NOT NULL,
        total_chunks INTEGER NOT NULL,
        total_size INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        last_modified INTEGER NOT NULL,
        encryption_iv BLOB NOT NULL,
        additional_metadata TEXT,
        is_complete INTEGER NOT NULL DEFAULT 0,
        is_pinned INTEGER NOT NULL DEFAULT 0,
        is_large_file INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        content_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        size INTEGER NOT NULL,
        iv BLOB NOT NULL,
        checksum BLOB NOT NULL,
        PRIMARY KEY (content_id, chunk_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_content_session ON content(session_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_content ON chunks(content_id)",
]];

/// Persistent, per-session store of encrypted chunks and their metadata.
///
/// The relational index lives in SQLite; chunk payloads live on disk under
/// `<root>/sessions/<session_id>/<content_id>/<chunk_index>.bin`. Writes that
/// mutate the same item serialize on a per-content lock; reads and writes to
/// distinct items run concurrently.
pub struct ContentStore {
    pool: SqlitePool,
    chunk_root: PathBuf,
    large_file_threshold: u64,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContentStore {
    /// Open (or create) the content index at `db_path` with chunk payloads
    /// under `storage_root/sessions`.
    pub async fn new(
        db_path: impl AsRef<Path>,
        storage_root: impl AsRef<Path>,
        large_file_threshold: u64,
    ) -> StoreResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool, storage_root, large_file_threshold).await
    }

    /// In-memory index with on-disk chunks (for testing).
    pub async fn new_in_memory(storage_root: impl AsRef<Path>) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, storage_root, DEFAULT_LARGE_FILE_THRESHOLD).await
    }

    async fn with_pool(
        pool: SqlitePool,
        storage_root: impl AsRef<Path>,
        large_file_threshold: u64,
    ) -> StoreResult<Self> {
        let chunk_root = storage_root.as_ref().join("sessions");
        tokio::fs::create_dir_all(&chunk_root).await?;

        apply_migrations(&pool).await?;

        Ok(Self {
            pool,
            chunk_root,
            large_file_threshold,
            write_locks: DashMap::new(),
        })
    }

    pub fn large_file_threshold(&self) -> u64 {
        self.large_file_threshold
    }

    /// Persist one encrypted chunk. Idempotent per `(content_id, chunk_index)`:
    /// a byte-equal duplicate is a no-op, a differing payload is rejected. The
    /// first chunk of an unknown content id creates the item row lazily from
    /// the chunk's metadata.
    pub async fn save_chunk(&self, payload: Bytes, meta: ChunkMeta) -> StoreResult<SaveChunkOutcome> {
        validate_path_id("session", &meta.session_id)?;
        validate_path_id("content", &meta.content_id)?;
        if meta.total_chunks == 0 {
            return Err(StoreError::InvalidArgument(
                "totalChunks must be at least 1".into(),
            ));
        }
        if meta.chunk_index >= meta.total_chunks {
            return Err(StoreError::InvalidArgument(format!(
                "chunk index {} out of range for {} chunks",
                meta.chunk_index, meta.total_chunks
            )));
        }

        let lock = self.content_lock(&meta.content_id);
        let _guard = lock.lock().await;

        let mut item = match self.fetch_item(&meta.content_id).await? {
            Some(existing) => {
                if existing.total_chunks != meta.total_chunks {
                    return Err(StoreError::InvalidArgument(format!(
                        "totalChunks mismatch for {}: stored {}, got {}",
                        meta.content_id, existing.total_chunks, meta.total_chunks
                    )));
                }
                if existing.session_id != meta.session_id {
                    return Err(StoreError::InvalidArgument(format!(
                        "content {} belongs to another session",
                        meta.content_id
                    )));
                }
                existing
            }
            None => {
                let item = item_from_chunk_meta(&meta, self.large_file_threshold);
                self.insert_item(&item).await?;
                item
            }
        };

        let checksum = blake3::hash(&payload);
        let existing: Option<Vec<u8>> =
            sqlx::query("SELECT checksum FROM chunks WHERE content_id = ? AND chunk_index = ?")
                .bind(&meta.content_id)
                .bind(meta.chunk_index as i64)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.try_get("checksum"))
                .transpose()?;

        if let Some(stored) = existing {
            if stored.as_slice() == checksum.as_bytes() {
                let chunks_stored = self.chunk_count(&meta.content_id).await?;
                return Ok(SaveChunkOutcome {
                    item,
                    chunks_stored,
                    newly_stored: false,
                });
            }
            return Err(StoreError::InvalidArgument(format!(
                "chunk {}/{} already stored with different payload",
                meta.content_id, meta.chunk_index
            )));
        }

        let dir = self.content_dir(&meta.session_id, &meta.content_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(format!("{}.bin", meta.chunk_index)), &payload).await?;

        sqlx::query(
            "INSERT OR IGNORE INTO chunks (content_id, chunk_index, size, iv, checksum) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&meta.content_id)
        .bind(meta.chunk_index as i64)
        .bind(payload.len() as i64)
        .bind(&meta.iv)
        .bind(checksum.as_bytes().as_slice())
        .execute(&self.pool)
        .await?;

        let now = now_millis();
        sqlx::query("UPDATE content SET last_modified = ? WHERE content_id = ?")
            .bind(now)
            .bind(&meta.content_id)
            .execute(&self.pool)
            .await?;
        item.last_modified = now;

        let chunks_stored = self.chunk_count(&meta.content_id).await?;
        tracing::debug!(
            content_id = %meta.content_id,
            chunk_index = meta.chunk_index,
            stored = chunks_stored,
            total = meta.total_chunks,
            "chunk persisted"
        );

        Ok(SaveChunkOutcome {
            item,
            chunks_stored,
            newly_stored: true,
        })
    }

    /// Upsert an item row without touching chunk data. `created_at` and the
    /// pin flag of an existing row are preserved.
    pub async fn save_content(&self, item: &ContentItem) -> StoreResult<ContentItem> {
        validate_path_id("session", &item.session_id)?;
        validate_path_id("content", &item.content_id)?;
        if item.total_chunks == 0 {
            return Err(StoreError::InvalidArgument(
                "totalChunks must be at least 1".into(),
            ));
        }

        let lock = self.content_lock(&item.content_id);
        let _guard = lock.lock().await;

        let mut stored = item.clone();
        stored.is_large_file =
            item.is_large_file || item.total_size >= self.large_file_threshold;
        let meta_text = stored
            .additional_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO content
                (content_id, session_id, content_type, sender_id, sender_name,
                 total_chunks, total_size, created_at, last_modified,
                 encryption_iv, additional_metadata, is_complete, is_pinned, is_large_file)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                content_type = excluded.content_type,
                sender_id = excluded.sender_id,
                sender_name = excluded.sender_name,
                total_chunks = excluded.total_chunks,
                total_size = excluded.total_size,
                last_modified = excluded.last_modified,
                encryption_iv = excluded.encryption_iv,
                additional_metadata = excluded.additional_metadata,
                is_complete = excluded.is_complete,
                is_large_file = excluded.is_large_file
            "#,
        )
        .bind(&stored.content_id)
        .bind(&stored.session_id)
        .bind(stored.content_type.as_str())
        .bind(&stored.sender_id)
        .bind(&stored.sender_name)
        .bind(stored.total_chunks as i64)
        .bind(stored.total_size as i64)
        .bind(stored.created_at)
        .bind(stored.last_modified)
        .bind(&stored.encryption_iv)
        .bind(meta_text)
        .bind(stored.is_complete as i64)
        .bind(stored.is_pinned as i64)
        .bind(stored.is_large_file as i64)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Fetch a chunk payload, or `None` when the chunk was never stored.
    pub async fn get_chunk(&self, content_id: &str, chunk_index: u32) -> StoreResult<Option<Bytes>> {
        let item = match self.fetch_item(content_id).await? {
            Some(item) => item,
            None => return Ok(None),
        };

        let row = sqlx::query("SELECT 1 FROM chunks WHERE content_id = ? AND chunk_index = ?")
            .bind(content_id)
            .bind(chunk_index as i64)
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            return Ok(None);
        }

        let path = self
            .content_dir(&item.session_id, content_id)
            .join(format!("{chunk_index}.bin"));
        let bytes = tokio::fs::read(path).await?;
        Ok(Some(Bytes::from(bytes)))
    }

    pub async fn get_content_metadata(&self, content_id: &str) -> StoreResult<Option<ContentItem>> {
        self.fetch_item(content_id).await
    }

    /// List a session's items newest-first with `(limit, offset)` pagination.
    pub async fn list_content(
        &self,
        session_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> StoreResult<ContentPage> {
        let limit = limit.unwrap_or(50).min(1000) as i64;
        let offset = offset.unwrap_or(0) as i64;

        let rows = sqlx::query(
            "SELECT * FROM content WHERE session_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(row_to_item(row)?);
        }

        let total_count: i64 =
            sqlx::query("SELECT COUNT(*) as count FROM content WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?
                .try_get("count")?;
        let total_count = total_count as u64;
        let has_more = (offset as u64) + (items.len() as u64) < total_count;

        Ok(ContentPage {
            items,
            total_count,
            has_more,
        })
    }

    /// Flip `is_complete` once every chunk row exists. Idempotent when already
    /// complete; errors while chunks are still missing.
    pub async fn mark_content_complete(&self, content_id: &str) -> StoreResult<ContentItem> {
        let lock = self.content_lock(content_id);
        let _guard = lock.lock().await;

        let mut item = self
            .fetch_item(content_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(content_id.to_string()))?;
        if item.is_complete {
            return Ok(item);
        }

        let stored = self.chunk_count(content_id).await?;
        if stored < item.total_chunks {
            return Err(StoreError::ChunksMissing {
                content_id: content_id.to_string(),
                stored,
                expected: item.total_chunks,
            });
        }

        let now = now_millis();
        sqlx::query("UPDATE content SET is_complete = 1, last_modified = ? WHERE content_id = ?")
            .bind(now)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        item.is_complete = true;
        item.last_modified = now;
        Ok(item)
    }

    /// Store a new display name in `additional_metadata.fileName`. The name is
    /// trimmed; empty-after-trim is rejected.
    pub async fn rename_content(&self, content_id: &str, new_name: &str) -> StoreResult<ContentItem> {
        let trimmed = new_name.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidArgument("Name cannot be empty".into()));
        }

        let lock = self.content_lock(content_id);
        let _guard = lock.lock().await;

        let mut item = self
            .fetch_item(content_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(content_id.to_string()))?;

        let mut meta = item
            .additional_metadata
            .take()
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("fileName".into(), serde_json::Value::String(trimmed.into()));
        }
        let meta_text = serde_json::to_string(&meta)?;
        let now = now_millis();

        sqlx::query(
            "UPDATE content SET additional_metadata = ?, last_modified = ? WHERE content_id = ?",
        )
        .bind(&meta_text)
        .bind(now)
        .bind(content_id)
        .execute(&self.pool)
        .await?;

        item.additional_metadata = Some(meta);
        item.last_modified = now;
        Ok(item)
    }

    /// Pin or unpin an item; pinned items are exempt from retention eviction.
    pub async fn set_pinned(&self, content_id: &str, pinned: bool) -> StoreResult<ContentItem> {
        let lock = self.content_lock(content_id);
        let _guard = lock.lock().await;

        let mut item = self
            .fetch_item(content_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(content_id.to_string()))?;

        let now = now_millis();
        sqlx::query("UPDATE content SET is_pinned = ?, last_modified = ? WHERE content_id = ?")
            .bind(pinned as i64)
            .bind(now)
            .bind(content_id)
            .execute(&self.pool)
            .await?;

        item.is_pinned = pinned;
        item.last_modified = now;
        Ok(item)
    }

    /// Delete an item's chunks, files, and metadata row. Idempotent: removing
    /// an unknown id reports `false` with no error.
    pub async fn remove_content(&self, content_id: &str) -> StoreResult<bool> {
        let lock = self.content_lock(content_id);

        let removed = {
            let _guard = lock.lock().await;

            let item = match self.fetch_item(content_id).await? {
                Some(item) => item,
                None => return Ok(false),
            };

            sqlx::query("DELETE FROM chunks WHERE content_id = ?")
                .bind(content_id)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM content WHERE content_id = ?")
                .bind(content_id)
                .execute(&self.pool)
                .await?;

            let dir = self.content_dir(&item.session_id, content_id);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(content_id, error = %e, "failed to remove chunk directory");
                }
            }
            true
        };

        self.write_locks.remove(content_id);
        Ok(removed)
    }

    /// Invoke `sink` for every stored chunk of `content_id` in ascending index
    /// order; each invocation is awaited before the next chunk is read.
    pub async fn stream_content_for_download<F, Fut>(
        &self,
        content_id: &str,
        mut sink: F,
    ) -> StoreResult<DownloadSummary>
    where
        F: FnMut(Bytes, ChunkStreamInfo) -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        let item = self
            .fetch_item(content_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(content_id.to_string()))?;

        let rows = sqlx::query(
            "SELECT chunk_index, size, iv FROM chunks WHERE content_id = ? ORDER BY chunk_index ASC",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        let dir = self.content_dir(&item.session_id, content_id);
        let mut summary = DownloadSummary::default();

        for row in rows {
            let chunk_index = row.try_get::<i64, _>("chunk_index")? as u32;
            let size = row.try_get::<i64, _>("size")? as u64;
            let iv: Vec<u8> = row.try_get("iv")?;

            let payload = tokio::fs::read(dir.join(format!("{chunk_index}.bin"))).await?;
            summary.chunks += 1;
            summary.bytes += payload.len() as u64;

            sink(
                Bytes::from(payload),
                ChunkStreamInfo {
                    chunk_index,
                    total_chunks: item.total_chunks,
                    size,
                    iv,
                },
            )
            .await?;
        }

        Ok(summary)
    }

    /// Evict the oldest unpinned complete items until at most `max_items` of
    /// them remain in the session. Returns the removed content ids.
    pub async fn cleanup_old_content(
        &self,
        session_id: &str,
        max_items: u32,
    ) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT content_id FROM content \
             WHERE session_id = ? AND is_complete = 1 AND is_pinned = 0 \
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut removed = Vec::new();
        for row in rows.iter().skip(max_items as usize) {
            let content_id: String = row.try_get("content_id")?;
            if self.remove_content(&content_id).await? {
                removed.push(content_id);
            }
        }

        if !removed.is_empty() {
            tracing::info!(session_id, evicted = removed.len(), "retention cleanup");
        }
        Ok(removed)
    }

    /// Delete every item in the session, including pinned and incomplete ones.
    pub async fn cleanup_all_session_content(&self, session_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT content_id FROM content WHERE session_id = ?")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        let mut removed = Vec::new();
        for row in rows {
            let content_id: String = row.try_get("content_id")?;
            if self.remove_content(&content_id).await? {
                removed.push(content_id);
            }
        }

        let session_dir = self.chunk_root.join(session_id);
        if let Err(e) = tokio::fs::remove_dir_all(&session_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(session_id, error = %e, "failed to remove session directory");
            }
        }

        Ok(removed)
    }

    /// Number of chunk rows stored for an item.
    pub async fn chunk_count(&self, content_id: &str) -> StoreResult<u32> {
        let count: i64 = sqlx::query("SELECT COUNT(*) as count FROM chunks WHERE content_id = ?")
            .bind(content_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count as u32)
    }

    async fn fetch_item(&self, content_id: &str) -> StoreResult<Option<ContentItem>> {
        let row = sqlx::query("SELECT * FROM content WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn insert_item(&self, item: &ContentItem) -> StoreResult<()> {
        let meta_text = item
            .additional_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO content
                (content_id, session_id, content_type, sender_id, sender_name,
                 total_chunks, total_size, created_at, last_modified,
                 encryption_iv, additional_metadata, is_complete, is_pinned, is_large_file)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(&item.content_id)
        .bind(&item.session_id)
        .bind(item.content_type.as_str())
        .bind(&item.sender_id)
        .bind(&item.sender_name)
        .bind(item.total_chunks as i64)
        .bind(item.total_size as i64)
        .bind(item.created_at)
        .bind(item.last_modified)
        .bind(&item.encryption_iv)
        .bind(meta_text)
        .bind(item.is_large_file as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn content_lock(&self, content_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(content_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn content_dir(&self, session_id: &str, content_id: &str) -> PathBuf {
        self.chunk_root.join(session_id).join(content_id)
    }
}

fn item_from_chunk_meta(meta: &ChunkMeta, large_file_threshold: u64) -> ContentItem {
    let now = now_millis();
    let total_size = meta.total_size.unwrap_or(0);
    ContentItem {
        content_id: meta.content_id.clone(),
        session_id: meta.session_id.clone(),
        content_type: meta.content_type.unwrap_or(ContentType::Other),
        sender_id: meta.sender_id.clone().unwrap_or_default(),
        sender_name: meta.sender_name.clone().unwrap_or_default(),
        total_chunks: meta.total_chunks,
        total_size,
        created_at: now,
        last_modified: now,
        encryption_iv: meta.encryption_iv.clone().unwrap_or_default(),
        additional_metadata: meta.additional_metadata.clone(),
        is_complete: false,
        is_pinned: false,
        is_large_file: total_size >= large_file_threshold,
    }
}

fn row_to_item(row: &SqliteRow) -> StoreResult<ContentItem> {
    let meta_text: Option<String> = row.try_get("additional_metadata")?;
    let additional_metadata = match meta_text {
        Some(text) if !text.is_empty() => Some(serde_json::from_str(&text)?),
        _ => None,
    };

    Ok(ContentItem {
        content_id: row.try_get("content_id")?,
        session_id: row.try_get("session_id")?,
        content_type: ContentType::parse(&row.try_get::<String, _>("content_type")?),
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        total_chunks: row.try_get::<i64, _>("total_chunks")? as u32,
        total_size: row.try_get::<i64, _>("total_size")? as u64,
        created_at: row.try_get("created_at")?,
        last_modified: row.try_get("last_modified")?,
        encryption_iv: row.try_get("encryption_iv")?,
        additional_metadata,
        is_complete: row.try_get::<i64, _>("is_complete")? != 0,
        is_pinned: row.try_get::<i64, _>("is_pinned")? != 0,
        is_large_file: row.try_get::<i64, _>("is_large_file")? != 0,
    })
}

async fn apply_migrations(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await?;

    let current: Option<i64> = sqlx::query("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await?
        .map(|row| row.try_get("version"))
        .transpose()?;
    let current = current.unwrap_or(0);

    for (idx, statements) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        for statement in *statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(version, "applied content schema migration");
    }

    Ok(())
}

/// Ids are embedded in filesystem paths; restrict them to a safe charset.
pub(crate) fn validate_path_id(kind: &str, id: &str) -> StoreResult<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!("invalid {kind} id: {id:?}")))
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
