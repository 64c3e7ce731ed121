use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{ct_eq, ClientHandle, Fingerprint, JoinGrant, SessionRecord};
use dashmap::DashMap;
use rand::RngCore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

/// Session authentication and lifecycle.
///
/// Fingerprint records are durable in `sessions.db` and mirrored in memory;
/// membership and tokens are in-memory only and start empty after a restart.
pub struct SessionRegistry {
    pool: SqlitePool,
    records: DashMap<String, SessionRecord>,
    members: DashMap<String, HashMap<String, ClientHandle>>,
}

impl SessionRegistry {
    /// Open (or create) the session database and load all records.
    pub async fn new(db_path: impl AsRef<Path>) -> SessionResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// In-memory database (for testing).
    pub async fn new_in_memory() -> SessionResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> SessionResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                fingerprint_iv BLOB NOT NULL,
                fingerprint_data BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                last_activity INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await?;
        let has_version = sqlx::query("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&pool)
            .await?
            .is_some();
        if !has_version {
            sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
                .execute(&pool)
                .await?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions(last_activity)",
        )
        .execute(&pool)
        .await?;

        let registry = Self {
            pool,
            records: DashMap::new(),
            members: DashMap::new(),
        };
        registry.load_records().await?;
        Ok(registry)
    }

    async fn load_records(&self) -> SessionResult<()> {
        let rows = sqlx::query("SELECT * FROM sessions").fetch_all(&self.pool).await?;
        for row in rows {
            let record = SessionRecord {
                session_id: row.try_get("session_id")?,
                fingerprint: Fingerprint {
                    iv: row.try_get("fingerprint_iv")?,
                    data: row.try_get("fingerprint_data")?,
                },
                created_at: row.try_get("created_at")?,
                last_activity: row.try_get("last_activity")?,
            };
            self.records.insert(record.session_id.clone(), record);
        }
        if !self.records.is_empty() {
            tracing::info!(sessions = self.records.len(), "loaded session records");
        }
        Ok(())
    }

    /// Join a session, creating its record on first contact or verifying the
    /// fingerprint against the stored one. A failed verification does not
    /// touch `last_activity`. Issues a fresh per-connection token.
    pub async fn join_session(
        &self,
        session_id: &str,
        fingerprint: Fingerprint,
        client_id: &str,
        client_name: &str,
    ) -> SessionResult<JoinGrant> {
        if session_id.trim().is_empty() {
            return Err(SessionError::InvalidArgument("session id cannot be empty".into()));
        }
        if client_id.is_empty() {
            return Err(SessionError::InvalidArgument("client id cannot be empty".into()));
        }

        let now = now_millis();
        let created = match self.records.get(session_id) {
            Some(record) => {
                if !record.fingerprint.matches(&fingerprint) {
                    return Err(SessionError::InvalidPassphrase);
                }
                false
            }
            None => {
                let record = SessionRecord {
                    session_id: session_id.to_string(),
                    fingerprint: fingerprint.clone(),
                    created_at: now,
                    last_activity: now,
                };
                sqlx::query(
                    "INSERT OR REPLACE INTO sessions \
                     (session_id, fingerprint_iv, fingerprint_data, created_at, last_activity) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(session_id)
                .bind(&record.fingerprint.iv)
                .bind(&record.fingerprint.data)
                .bind(record.created_at)
                .bind(record.last_activity)
                .execute(&self.pool)
                .await?;
                self.records.insert(session_id.to_string(), record);
                tracing::info!(session_id, "session created");
                true
            }
        };

        if !created {
            self.touch_session(session_id).await?;
        }

        let token = generate_token();
        self.members.entry(session_id.to_string()).or_default().insert(
            client_id.to_string(),
            ClientHandle {
                client_id: client_id.to_string(),
                client_name: client_name.to_string(),
                token: token.clone(),
            },
        );

        tracing::debug!(session_id, client_id, client_name, "client joined session");
        Ok(JoinGrant { token, created })
    }

    /// Check a content-plane token for a connected member of the session.
    pub fn validate_token(&self, session_id: &str, client_id: &str, token: &str) -> bool {
        self.members
            .get(session_id)
            .and_then(|m| {
                m.get(client_id)
                    .map(|h| ct_eq(h.token.as_bytes(), token.as_bytes()))
            })
            .unwrap_or(false)
    }

    /// True if any connected member of the session holds this token. Used by
    /// the download path, where the requester is identified by token alone.
    pub fn validate_session_token(&self, session_id: &str, token: &str) -> bool {
        self.members
            .get(session_id)
            .map(|m| m.values().any(|h| ct_eq(h.token.as_bytes(), token.as_bytes())))
            .unwrap_or(false)
    }

    /// Drop a member; the durable session record stays.
    pub fn remove_client_from_session(&self, session_id: &str, client_id: &str) {
        if let Some(mut entry) = self.members.get_mut(session_id) {
            entry.remove(client_id);
            if entry.is_empty() {
                drop(entry);
                self.members.remove_if(session_id, |_, m| m.is_empty());
            }
        }
    }

    /// Update `last_activity` to now, in memory and durably.
    pub async fn touch_session(&self, session_id: &str) -> SessionResult<()> {
        let now = now_millis();
        {
            let mut record = self
                .records
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            record.last_activity = now;
        }
        sqlx::query("UPDATE sessions SET last_activity = ? WHERE session_id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.records.contains_key(session_id)
    }

    pub fn get_record(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.get(session_id).map(|r| r.clone())
    }

    /// Current member roster, deduplicated by client id.
    pub fn members(&self, session_id: &str) -> Vec<ClientHandle> {
        self.members
            .get(session_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, session_id: &str) -> usize {
        self.members.get(session_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Delete the durable record, the member map, and everyone's tokens.
    pub async fn remove_session(&self, session_id: &str) -> SessionResult<()> {
        self.records.remove(session_id);
        self.members.remove(session_id);
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(session_id, "session removed");
        Ok(())
    }

    /// Sessions whose inactivity exceeds `timeout_ms` as of `now_ms`.
    pub async fn find_expired(&self, now_ms: i64, timeout_ms: i64) -> SessionResult<Vec<String>> {
        let rows = sqlx::query("SELECT session_id FROM sessions WHERE ? - last_activity > ?")
            .bind(now_ms)
            .bind(timeout_ms)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("session_id").map_err(SessionError::from))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.records.len()
    }
}

/// 256-bit CSPRNG token, hex-encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
