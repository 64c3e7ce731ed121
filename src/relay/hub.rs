use crate::relay::error::{RelayError, RelayResult};
use crate::relay::wire::{
    AckPayload, AllContentClearedPayload, ChunkInfo, ChunkPayload, ClearAllAck,
    ClearAllContentPayload, ClientEvent, ClientJoinedPayload, ClientLeftPayload, ContentInfo,
    ContentPayload, ContentPinnedPayload, ContentRemovedPayload, ContentRenamedPayload,
    InboundFrame, JoinAck, JoinPayload, ListContentAck, ListContentPayload, MemberInfo, OpAck,
    OutboundFrame, PinContentPayload, PingAck, RemoveContentPayload, RenameContentPayload,
    ServerEvent, SessionExpiredPayload,
};
use crate::session::{Fingerprint, SessionRegistry};
use crate::store::content_store::{now_millis, validate_path_id};
use crate::store::{ChunkMeta, ContentStore};
use crate::transport::ConnectionFabric;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EXPIRY_MESSAGE: &str = "Session expired due to inactivity";

#[derive(Default)]
struct RelayStatsInner {
    events_received: AtomicU64,
    chunks_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    items_replayed: AtomicU64,
    sessions_expired: AtomicU64,
}

/// Point-in-time counters for operational logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStats {
    pub events_received: u64,
    pub chunks_relayed: u64,
    pub bytes_relayed: u64,
    pub items_replayed: u64,
    pub sessions_expired: u64,
}

impl std::fmt::Display for RelayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Relay: {} events, {} chunks relayed ({:.2}MB), {} replayed, {} expired",
            self.events_received,
            self.chunks_relayed,
            self.bytes_relayed as f64 / 1024.0 / 1024.0,
            self.items_replayed,
            self.sessions_expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct RelayHubConfig {
    /// Inactivity window before a session expires, in milliseconds.
    pub session_timeout_ms: i64,
    /// Retention cap on unpinned complete items per session.
    pub max_items_per_session: u32,
    pub large_file_threshold: u64,
    /// Items replayed to a joiner, newest first.
    pub replay_page_size: u32,
    pub expiry_check_interval: Duration,
}

impl Default for RelayHubConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 10 * 60 * 1000,
            max_items_per_session: 100,
            large_file_threshold: crate::store::content_store::DEFAULT_LARGE_FILE_THRESHOLD,
            replay_page_size: 100,
            expiry_check_interval: Duration::from_secs(60),
        }
    }
}

/// Event dispatcher between connections and the stores.
///
/// Holds the only in-memory membership view (`connection → joined session`);
/// everything durable lives in the registry and the content store. One
/// connection's events are handled sequentially in arrival order; different
/// connections dispatch concurrently.
pub struct RelayHub {
    registry: Arc<SessionRegistry>,
    store: Arc<ContentStore>,
    fabric: Arc<ConnectionFabric<OutboundFrame>>,
    joined: DashMap<String, String>,
    config: RelayHubConfig,
    stats: RelayStatsInner,
}

impl RelayHub {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<ContentStore>,
        fabric: Arc<ConnectionFabric<OutboundFrame>>,
        config: RelayHubConfig,
    ) -> Self {
        Self {
            registry,
            store,
            fabric,
            joined: DashMap::new(),
            config,
            stats: RelayStatsInner::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            events_received: self.stats.events_received.load(Ordering::Relaxed),
            chunks_relayed: self.stats.chunks_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.stats.bytes_relayed.load(Ordering::Relaxed),
            items_replayed: self.stats.items_replayed.load(Ordering::Relaxed),
            sessions_expired: self.stats.sessions_expired.load(Ordering::Relaxed),
        }
    }

    pub fn fabric(&self) -> &Arc<ConnectionFabric<OutboundFrame>> {
        &self.fabric
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Dispatch one inbound frame: run the handler, ack if requested, then
    /// any post-ack work (replay after a successful join).
    pub async fn handle_frame(&self, connection_id: &str, frame: InboundFrame) {
        let InboundFrame { id, event } = frame;
        let event_name = event.name();
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(connection_id, event = event_name, "dispatching event");

        match event {
            ClientEvent::Join(payload) => {
                let session_id = payload.session_id.clone();
                let ack = self.handle_join(connection_id, payload).await;
                let joined = ack.success;
                self.send_ack(connection_id, id, AckPayload::Join(ack)).await;
                if joined {
                    self.replay_existing(connection_id, &session_id).await;
                }
            }
            ClientEvent::Leave(payload) => {
                // Clone out of the map before mutating it in leave_session.
                let current = self.joined.get(connection_id).map(|s| s.value().clone());
                let result = match current {
                    Some(current) if current == payload.session_id => {
                        self.leave_session(connection_id, &current, true).await;
                        Ok(())
                    }
                    _ => Err(RelayError::NotInSession),
                };
                self.send_op_ack(connection_id, id, event_name, result).await;
            }
            ClientEvent::Content(payload) => {
                let result = self.handle_content(connection_id, payload).await;
                self.send_op_ack(connection_id, id, event_name, result).await;
            }
            ClientEvent::Chunk(payload) => {
                let result = self.handle_chunk(connection_id, payload).await;
                self.send_op_ack(connection_id, id, event_name, result).await;
            }
            ClientEvent::RenameContent(payload) => {
                let result = self.handle_rename(connection_id, payload).await;
                self.send_op_ack(connection_id, id, event_name, result).await;
            }
            ClientEvent::RemoveContent(payload) => {
                let result = self.handle_remove(connection_id, payload).await;
                self.send_op_ack(connection_id, id, event_name, result).await;
            }
            ClientEvent::PinContent(payload) => {
                let result = self.handle_pin(connection_id, payload).await;
                self.send_op_ack(connection_id, id, event_name, result).await;
            }
            ClientEvent::ClearAllContent(payload) => {
                let ack = match self.handle_clear_all(connection_id, payload).await {
                    Ok(removed) => AckPayload::Clear(ClearAllAck {
                        success: true,
                        removed,
                    }),
                    Err(e) => {
                        tracing::debug!(connection_id, event = event_name, error = %e, "event rejected");
                        AckPayload::Op(OpAck::err(&e))
                    }
                };
                self.send_ack(connection_id, id, ack).await;
            }
            ClientEvent::ListContent(payload) => {
                let ack = match self.handle_list(connection_id, payload).await {
                    Ok(list) => AckPayload::List(list),
                    Err(e) => {
                        tracing::debug!(connection_id, event = event_name, error = %e, "event rejected");
                        AckPayload::Op(OpAck::err(&e))
                    }
                };
                self.send_ack(connection_id, id, ack).await;
            }
            ClientEvent::Ping(payload) => {
                let ack = self.handle_ping(connection_id, &payload.session_id).await;
                self.send_ack(connection_id, id, AckPayload::Ping(ack)).await;
            }
        }
    }

    /// Transport-close path: announce the leave and tear the connection down.
    pub async fn handle_disconnect(&self, connection_id: &str) {
        if let Some((_, session_id)) = self.joined.remove(connection_id) {
            self.registry
                .remove_client_from_session(&session_id, connection_id);
            self.fabric
                .emit_room(
                    &session_id,
                    OutboundFrame::Event(ServerEvent::ClientLeft(ClientLeftPayload {
                        session_id: session_id.clone(),
                        client_id: connection_id.to_string(),
                    })),
                    Some(connection_id),
                )
                .await;
            tracing::debug!(connection_id, session_id, "client disconnected");
        }
        self.fabric.disconnect(connection_id);
    }

    /// Run the expiry sweep on an interval until the returned handle is
    /// aborted.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(hub.config.expiry_check_interval);
            loop {
                tick.tick().await;
                hub.expire_idle_sessions().await;
            }
        })
    }

    /// Expire every session whose inactivity exceeds the configured timeout.
    pub async fn expire_idle_sessions(&self) {
        let expired = match self
            .registry
            .find_expired(now_millis(), self.config.session_timeout_ms)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "expiry scan failed");
                return;
            }
        };

        for session_id in expired {
            self.expire_session(&session_id).await;
        }
    }

    async fn expire_session(&self, session_id: &str) {
        tracing::info!(session_id, "expiring idle session");

        // Best-effort notification before membership is dropped.
        self.fabric
            .emit_room(
                session_id,
                OutboundFrame::Event(ServerEvent::SessionExpired(SessionExpiredPayload {
                    session_id: session_id.to_string(),
                    message: EXPIRY_MESSAGE.to_string(),
                })),
                None,
            )
            .await;

        for connection_id in self.fabric.room_members(session_id) {
            self.joined.remove(&connection_id);
            self.fabric.leave_room(&connection_id, session_id);
        }

        if let Err(e) = self.registry.remove_session(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to remove expired session");
        }
        if let Err(e) = self.store.cleanup_all_session_content(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to clear expired session content");
        }
        self.stats.sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    async fn handle_join(&self, connection_id: &str, payload: JoinPayload) -> JoinAck {
        if let Err(e) = validate_path_id("session", &payload.session_id) {
            return JoinAck {
                success: false,
                token: None,
                clients: None,
                error: Some(RelayError::from(e).to_string()),
            };
        }

        // Re-join from another session first passes through an implicit leave.
        // The clone must complete before leave_session mutates the map.
        let current = self.joined.get(connection_id).map(|s| s.value().clone());
        if let Some(current) = current {
            self.leave_session(connection_id, &current, true).await;
        }

        let fingerprint = Fingerprint::new(payload.fingerprint.iv, payload.fingerprint.data);
        let grant = match self
            .registry
            .join_session(
                &payload.session_id,
                fingerprint,
                connection_id,
                &payload.client_name,
            )
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                let error = RelayError::from(e);
                tracing::debug!(connection_id, session_id = %payload.session_id, error = %error, "join rejected");
                return JoinAck {
                    success: false,
                    token: None,
                    clients: None,
                    error: Some(error.to_string()),
                };
            }
        };

        self.joined
            .insert(connection_id.to_string(), payload.session_id.clone());
        self.fabric.join_room(connection_id, &payload.session_id);

        self.fabric
            .emit_room(
                &payload.session_id,
                OutboundFrame::Event(ServerEvent::ClientJoined(ClientJoinedPayload {
                    session_id: payload.session_id.clone(),
                    client_id: connection_id.to_string(),
                    client_name: payload.client_name.clone(),
                })),
                Some(connection_id),
            )
            .await;

        let clients = self
            .registry
            .members(&payload.session_id)
            .into_iter()
            .map(|handle| MemberInfo {
                id: handle.client_id,
                name: handle.client_name,
            })
            .collect();

        JoinAck {
            success: true,
            token: Some(grant.token),
            clients: Some(clients),
            error: None,
        }
    }

    /// Replay complete items to a fresh joiner, newest first: metadata for
    /// everything, chunks only for non-large items. Large items are fetched
    /// on demand over the download endpoint.
    async fn replay_existing(&self, connection_id: &str, session_id: &str) {
        let page = match self
            .store
            .list_content(session_id, Some(self.config.replay_page_size), None)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "replay listing failed");
                return;
            }
        };

        for item in page.items.iter().filter(|item| item.is_complete) {
            let frame = OutboundFrame::Event(ServerEvent::Content(ContentPayload {
                session_id: session_id.to_string(),
                content: ContentInfo::from_item(item),
                data: None,
            }));
            if !self.fabric.emit(connection_id, frame).await {
                return;
            }
            self.stats.items_replayed.fetch_add(1, Ordering::Relaxed);

            if item.is_large_file {
                continue;
            }

            let fabric = Arc::clone(&self.fabric);
            let target = connection_id.to_string();
            let session = session_id.to_string();
            let content_id = item.content_id.clone();
            let result = self
                .store
                .stream_content_for_download(&item.content_id, move |payload, info| {
                    let fabric = Arc::clone(&fabric);
                    let target = target.clone();
                    let session = session.clone();
                    let content_id = content_id.clone();
                    async move {
                        fabric
                            .emit(
                                &target,
                                OutboundFrame::Event(ServerEvent::Chunk(ChunkPayload {
                                    session_id: session,
                                    chunk: ChunkInfo {
                                        content_id,
                                        chunk_index: info.chunk_index,
                                        total_chunks: info.total_chunks,
                                        encrypted_data: payload.to_vec(),
                                        iv: info.iv,
                                    },
                                })),
                            )
                            .await;
                        Ok(())
                    }
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(session_id, content_id = %item.content_id, error = %e, "replay stream failed");
            }
        }
    }

    async fn handle_content(&self, connection_id: &str, payload: ContentPayload) -> RelayResult<()> {
        self.authorize(connection_id, &payload.session_id, None)?;
        self.touch(&payload.session_id).await;

        let info = &payload.content;
        let item = if let Some(data) = payload.data.clone() {
            let meta = ChunkMeta {
                content_id: info.content_id.clone(),
                session_id: payload.session_id.clone(),
                chunk_index: 0,
                total_chunks: info.total_chunks.unwrap_or(1),
                iv: info.encryption_metadata.iv.clone(),
                content_type: Some(info.content_type),
                total_size: Some(info.total_size),
                sender_id: Some(connection_id.to_string()),
                sender_name: Some(info.sender_name.clone()),
                encryption_iv: Some(info.encryption_metadata.iv.clone()),
                additional_metadata: info.metadata.clone(),
            };
            let outcome = self.store.save_chunk(Bytes::from(data), meta).await?;
            let mut item = outcome.item;
            if outcome.chunks_stored == item.total_chunks && !item.is_complete {
                item = self.store.mark_content_complete(&item.content_id).await?;
                self.enforce_retention(&payload.session_id).await;
            }
            item
        } else {
            let mut item = info.to_item(&payload.session_id, self.config.large_file_threshold);
            item.sender_id = connection_id.to_string();
            self.store.save_content(&item).await?
        };

        let data = if item.is_large_file { None } else { payload.data };
        self.fabric
            .emit_room(
                &payload.session_id,
                OutboundFrame::Event(ServerEvent::Content(ContentPayload {
                    session_id: payload.session_id.clone(),
                    content: ContentInfo::from_item(&item),
                    data,
                })),
                Some(connection_id),
            )
            .await;

        Ok(())
    }

    async fn handle_chunk(&self, connection_id: &str, payload: ChunkPayload) -> RelayResult<()> {
        self.authorize(connection_id, &payload.session_id, None)?;
        self.touch(&payload.session_id).await;

        let chunk = &payload.chunk;
        let meta = ChunkMeta {
            content_id: chunk.content_id.clone(),
            session_id: payload.session_id.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            iv: chunk.iv.clone(),
            content_type: None,
            total_size: None,
            sender_id: Some(connection_id.to_string()),
            sender_name: Some(self.member_name(&payload.session_id, connection_id)),
            encryption_iv: None,
            additional_metadata: None,
        };
        let outcome = self
            .store
            .save_chunk(Bytes::from(chunk.encrypted_data.clone()), meta)
            .await?;

        if !outcome.item.is_large_file && outcome.newly_stored {
            let delivered = self
                .fabric
                .emit_room(
                    &payload.session_id,
                    OutboundFrame::Event(ServerEvent::Chunk(payload.clone())),
                    Some(connection_id),
                )
                .await;
            self.stats
                .chunks_relayed
                .fetch_add(delivered as u64, Ordering::Relaxed);
            self.stats
                .bytes_relayed
                .fetch_add(delivered as u64 * chunk.encrypted_data.len() as u64, Ordering::Relaxed);
        }

        if outcome.chunks_stored == outcome.item.total_chunks && !outcome.item.is_complete {
            self.store
                .mark_content_complete(&outcome.item.content_id)
                .await?;
            tracing::debug!(
                content_id = %outcome.item.content_id,
                total_chunks = outcome.item.total_chunks,
                "content complete"
            );
            self.enforce_retention(&payload.session_id).await;
        }

        Ok(())
    }

    async fn handle_rename(
        &self,
        connection_id: &str,
        payload: RenameContentPayload,
    ) -> RelayResult<()> {
        self.authorize(connection_id, &payload.session_id, Some(&payload.token))?;
        self.touch(&payload.session_id).await;

        let item = self
            .store
            .rename_content(&payload.content_id, &payload.new_name)
            .await?;
        let new_name = item.file_name().unwrap_or_default().to_string();

        // Inclusive broadcast: the renamer sees the canonical trimmed form too.
        self.fabric
            .emit_room(
                &payload.session_id,
                OutboundFrame::Event(ServerEvent::ContentRenamed(ContentRenamedPayload {
                    content_id: payload.content_id.clone(),
                    new_name,
                    sender_id: connection_id.to_string(),
                    sender_name: self.member_name(&payload.session_id, connection_id),
                })),
                None,
            )
            .await;

        Ok(())
    }

    async fn handle_remove(
        &self,
        connection_id: &str,
        payload: RemoveContentPayload,
    ) -> RelayResult<()> {
        self.authorize(connection_id, &payload.session_id, Some(&payload.token))?;
        self.touch(&payload.session_id).await;

        let removed = self.store.remove_content(&payload.content_id).await?;
        if removed {
            self.fabric
                .emit_room(
                    &payload.session_id,
                    OutboundFrame::Event(ServerEvent::ContentRemoved(ContentRemovedPayload {
                        content_id: payload.content_id.clone(),
                    })),
                    Some(connection_id),
                )
                .await;
        }

        Ok(())
    }

    async fn handle_pin(
        &self,
        connection_id: &str,
        payload: PinContentPayload,
    ) -> RelayResult<()> {
        self.authorize(connection_id, &payload.session_id, Some(&payload.token))?;
        self.touch(&payload.session_id).await;

        self.store
            .set_pinned(&payload.content_id, payload.pinned)
            .await?;

        self.fabric
            .emit_room(
                &payload.session_id,
                OutboundFrame::Event(ServerEvent::ContentPinned(ContentPinnedPayload {
                    content_id: payload.content_id.clone(),
                    pinned: payload.pinned,
                })),
                Some(connection_id),
            )
            .await;

        Ok(())
    }

    async fn handle_clear_all(
        &self,
        connection_id: &str,
        payload: ClearAllContentPayload,
    ) -> RelayResult<Vec<String>> {
        self.authorize(connection_id, &payload.session_id, Some(&payload.token))?;
        self.touch(&payload.session_id).await;

        let removed = self
            .store
            .cleanup_all_session_content(&payload.session_id)
            .await?;

        self.fabric
            .emit_room(
                &payload.session_id,
                OutboundFrame::Event(ServerEvent::AllContentCleared(AllContentClearedPayload {
                    session_id: payload.session_id.clone(),
                    cleared_by: connection_id.to_string(),
                })),
                None,
            )
            .await;

        Ok(removed)
    }

    async fn handle_list(
        &self,
        connection_id: &str,
        payload: ListContentPayload,
    ) -> RelayResult<ListContentAck> {
        self.authorize(connection_id, &payload.session_id, Some(&payload.token))?;
        self.touch(&payload.session_id).await;

        let page = self
            .store
            .list_content(&payload.session_id, payload.limit, payload.offset)
            .await?;

        Ok(ListContentAck {
            success: true,
            items: page.items.iter().map(ContentInfo::from_item).collect(),
            total_count: page.total_count,
            has_more: page.has_more,
        })
    }

    async fn handle_ping(&self, connection_id: &str, session_id: &str) -> PingAck {
        let joined_here = self
            .joined
            .get(connection_id)
            .map(|s| s.value() == session_id)
            .unwrap_or(false);

        if !joined_here {
            return PingAck {
                valid: false,
                error: Some(RelayError::NotInSession.to_string()),
            };
        }
        if !self.registry.has_session(session_id) {
            return PingAck {
                valid: false,
                error: Some(RelayError::SessionNotFound.to_string()),
            };
        }

        self.touch(session_id).await;
        PingAck {
            valid: true,
            error: None,
        }
    }

    /// Authorization for content-plane events: joined to this session, the
    /// session record still exists, and (when the event carries one) the
    /// token matches the handle issued at join.
    fn authorize(
        &self,
        connection_id: &str,
        session_id: &str,
        token: Option<&str>,
    ) -> RelayResult<()> {
        let joined_here = self
            .joined
            .get(connection_id)
            .map(|s| s.value() == session_id)
            .unwrap_or(false);
        if !joined_here {
            return Err(RelayError::NotInSession);
        }
        if !self.registry.has_session(session_id) {
            return Err(RelayError::SessionNotFound);
        }

        let valid = match token {
            Some(token) => self.registry.validate_token(session_id, connection_id, token),
            None => self
                .registry
                .members(session_id)
                .iter()
                .any(|handle| handle.client_id == connection_id),
        };
        if !valid {
            return Err(RelayError::InvalidSessionToken);
        }

        Ok(())
    }

    async fn leave_session(&self, connection_id: &str, session_id: &str, announce: bool) {
        self.joined.remove(connection_id);
        self.registry
            .remove_client_from_session(session_id, connection_id);
        self.fabric.leave_room(connection_id, session_id);

        if announce {
            self.fabric
                .emit_room(
                    session_id,
                    OutboundFrame::Event(ServerEvent::ClientLeft(ClientLeftPayload {
                        session_id: session_id.to_string(),
                        client_id: connection_id.to_string(),
                    })),
                    Some(connection_id),
                )
                .await;
        }
    }

    async fn enforce_retention(&self, session_id: &str) {
        let removed = match self
            .store
            .cleanup_old_content(session_id, self.config.max_items_per_session)
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "retention cleanup failed");
                return;
            }
        };

        for content_id in removed {
            self.fabric
                .emit_room(
                    session_id,
                    OutboundFrame::Event(ServerEvent::ContentRemoved(ContentRemovedPayload {
                        content_id,
                    })),
                    None,
                )
                .await;
        }
    }

    async fn touch(&self, session_id: &str) {
        if let Err(e) = self.registry.touch_session(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to touch session");
        }
    }

    fn member_name(&self, session_id: &str, connection_id: &str) -> String {
        self.registry
            .members(session_id)
            .into_iter()
            .find(|handle| handle.client_id == connection_id)
            .map(|handle| handle.client_name)
            .unwrap_or_default()
    }

    async fn send_ack(&self, connection_id: &str, id: Option<u64>, payload: AckPayload) {
        if let Some(ack) = id {
            self.fabric
                .emit(connection_id, OutboundFrame::Ack { ack, payload })
                .await;
        }
    }

    async fn send_op_ack(
        &self,
        connection_id: &str,
        id: Option<u64>,
        event_name: &str,
        result: RelayResult<()>,
    ) {
        let payload = match result {
            Ok(()) => AckPayload::Op(OpAck::ok()),
            Err(e) => {
                tracing::debug!(connection_id, event = event_name, error = %e, "event rejected");
                AckPayload::Op(OpAck::err(&e))
            }
        };
        self.send_ack(connection_id, id, payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::wire::{
        ClearAllContentPayload, FingerprintPayload, ListContentPayload, PinContentPayload,
        PingPayload, RemoveContentPayload, RenameContentPayload,
    };
    use crate::store::ContentType;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    async fn test_hub(config: RelayHubConfig) -> (Arc<RelayHub>, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new_in_memory().await.unwrap());
        let store = Arc::new(ContentStore::new_in_memory(dir.path()).await.unwrap());
        let fabric = Arc::new(ConnectionFabric::default());
        (Arc::new(RelayHub::new(registry, store, fabric, config)), dir)
    }

    fn fingerprint(seed: u8) -> FingerprintPayload {
        FingerprintPayload {
            iv: vec![seed; 12],
            data: vec![seed.wrapping_add(1); 16],
        }
    }

    fn join_frame(id: u64, session_id: &str, name: &str, seed: u8) -> InboundFrame {
        InboundFrame {
            id: Some(id),
            event: ClientEvent::Join(JoinPayload {
                session_id: session_id.to_string(),
                client_name: name.to_string(),
                fingerprint: fingerprint(seed),
            }),
        }
    }

    fn content_frame(session_id: &str, content_id: &str, total_size: u64, data: &[u8]) -> InboundFrame {
        InboundFrame {
            id: None,
            event: ClientEvent::Content(ContentPayload {
                session_id: session_id.to_string(),
                content: ContentInfo {
                    content_id: content_id.to_string(),
                    sender_id: String::new(),
                    sender_name: "Alice".to_string(),
                    content_type: ContentType::Text,
                    timestamp: 0,
                    metadata: Some(json!({"mimeType": "text/plain"})),
                    is_chunked: false,
                    total_chunks: Some(1),
                    total_size,
                    is_pinned: false,
                    is_large_file: false,
                    encryption_metadata: crate::relay::wire::EncryptionMetadata { iv: vec![3; 12] },
                },
                data: Some(data.to_vec()),
            }),
        }
    }

    fn chunk_frame(session_id: &str, content_id: &str, index: u32, total: u32, data: &[u8]) -> InboundFrame {
        InboundFrame {
            id: None,
            event: ClientEvent::Chunk(ChunkPayload {
                session_id: session_id.to_string(),
                chunk: ChunkInfo {
                    content_id: content_id.to_string(),
                    chunk_index: index,
                    total_chunks: total,
                    encrypted_data: data.to_vec(),
                    iv: vec![index as u8; 12],
                },
            }),
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<OutboundFrame>) -> OutboundFrame {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<OutboundFrame>) {
        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "expected no frame"
        );
    }

    /// Join and return the issued token, draining the ack.
    async fn join(
        hub: &RelayHub,
        rx: &mut mpsc::Receiver<OutboundFrame>,
        conn: &str,
        session_id: &str,
        name: &str,
        seed: u8,
    ) -> String {
        hub.handle_frame(conn, join_frame(1, session_id, name, seed)).await;
        match recv(rx).await {
            OutboundFrame::Ack {
                payload: AckPayload::Join(ack),
                ..
            } => {
                assert!(ack.success, "join failed: {:?}", ack.error);
                ack.token.unwrap()
            }
            other => panic!("expected join ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_issues_token_and_roster() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        let token_a = join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        assert_eq!(token_a.len(), 64);

        hub.handle_frame("conn-b", join_frame(2, "s1", "Bob", 1)).await;
        match recv(&mut rx_b).await {
            OutboundFrame::Ack {
                ack,
                payload: AckPayload::Join(join_ack),
            } => {
                assert_eq!(ack, 2);
                assert!(join_ack.success);
                let mut names: Vec<String> = join_ack
                    .clients
                    .unwrap()
                    .into_iter()
                    .map(|m| m.name)
                    .collect();
                names.sort();
                assert_eq!(names, vec!["Alice".to_string(), "Bob".to_string()]);
            }
            other => panic!("expected join ack, got {other:?}"),
        }

        // Alice hears about Bob; Bob does not hear about himself.
        match recv(&mut rx_a).await {
            OutboundFrame::Event(ServerEvent::ClientJoined(p)) => {
                assert_eq!(p.client_id, "conn-b");
                assert_eq!(p.client_name, "Bob");
            }
            other => panic!("expected client-joined, got {other:?}"),
        }
        assert_silent(&mut rx_b).await;
    }

    #[tokio::test]
    async fn test_join_with_wrong_fingerprint() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_c = hub.fabric().register_with_id("conn-c".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;

        hub.handle_frame("conn-c", join_frame(5, "s1", "Mallory", 9)).await;
        match recv(&mut rx_c).await {
            OutboundFrame::Ack {
                payload: AckPayload::Join(ack),
                ..
            } => {
                assert!(!ack.success);
                assert_eq!(ack.error.as_deref(), Some("Invalid passphrase"));
            }
            other => panic!("expected join ack, got {other:?}"),
        }

        assert_eq!(hub.registry().member_count("s1"), 1);
        assert_silent(&mut rx_a).await;
    }

    #[tokio::test]
    async fn test_publish_text_broadcasts_to_peer() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await; // client-joined for Bob

        let ciphertext = b"Hello, world!";
        hub.handle_frame("conn-a", content_frame("s1", "c1", 13, ciphertext)).await;

        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::Content(p)) => {
                assert_eq!(p.content.content_id, "c1");
                assert_eq!(p.data.as_deref(), Some(&ciphertext[..]));
                assert!(!p.content.is_large_file);
            }
            other => panic!("expected content, got {other:?}"),
        }

        // Sender does not get its own event back.
        assert_silent(&mut rx_a).await;

        let item = hub.store().get_content_metadata("c1").await.unwrap().unwrap();
        assert!(item.is_complete);
        assert_eq!(item.sender_id, "conn-a");
    }

    #[tokio::test]
    async fn test_chunked_publish_rebroadcast_and_completion() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        for index in 0..3 {
            hub.handle_frame(
                "conn-a",
                chunk_frame("s1", "c1", index, 3, &[index as u8; 8]),
            )
            .await;
        }

        for index in 0..3u32 {
            match recv(&mut rx_b).await {
                OutboundFrame::Event(ServerEvent::Chunk(p)) => {
                    assert_eq!(p.chunk.chunk_index, index);
                    assert_eq!(p.chunk.encrypted_data, vec![index as u8; 8]);
                }
                other => panic!("expected chunk, got {other:?}"),
            }
        }

        let item = hub.store().get_content_metadata("c1").await.unwrap().unwrap();
        assert!(item.is_complete);
    }

    #[tokio::test]
    async fn test_large_file_chunks_not_broadcast() {
        let config = RelayHubConfig {
            large_file_threshold: 1024,
            ..RelayHubConfig::default()
        };
        let (hub, _dir) = test_hub(config).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        // 4 KiB across 4 chunks, above the 1 KiB threshold.
        let mut frame = content_frame("s1", "big", 4096, b"");
        if let ClientEvent::Content(ref mut p) = frame.event {
            p.data = None;
            p.content.total_chunks = Some(4);
            p.content.is_chunked = true;
        }
        hub.handle_frame("conn-a", frame).await;

        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::Content(p)) => {
                assert!(p.content.is_large_file);
                assert!(p.data.is_none());
            }
            other => panic!("expected content, got {other:?}"),
        }

        for index in 0..4 {
            hub.handle_frame(
                "conn-a",
                chunk_frame("s1", "big", index, 4, &[0xab; 1024]),
            )
            .await;
        }

        // Peer sees no chunk traffic for a large file.
        assert_silent(&mut rx_b).await;

        let item = hub.store().get_content_metadata("big").await.unwrap().unwrap();
        assert!(item.is_complete);
        assert!(item.is_large_file);
        assert_eq!(hub.store().chunk_count("big").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_chunk_for_unknown_content_creates_item() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        hub.handle_frame("conn-a", chunk_frame("s1", "orphan", 0, 2, b"data")).await;

        let item = hub.store().get_content_metadata("orphan").await.unwrap().unwrap();
        assert_eq!(item.total_chunks, 2);
        assert_eq!(item.sender_id, "conn-a");
        assert!(!item.is_complete);
    }

    #[tokio::test]
    async fn test_rename_trims_and_broadcasts_inclusively() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        let token_b = join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        hub.handle_frame("conn-a", content_frame("s1", "c1", 13, b"Hello, world!")).await;
        let _ = recv(&mut rx_b).await;

        hub.handle_frame(
            "conn-b",
            InboundFrame {
                id: Some(7),
                event: ClientEvent::RenameContent(RenameContentPayload {
                    session_id: "s1".into(),
                    content_id: "c1".into(),
                    new_name: "  notes.txt  ".into(),
                    token: token_b,
                }),
            },
        )
        .await;

        // Both members receive the trimmed name; the renamer also gets an ack.
        match recv(&mut rx_a).await {
            OutboundFrame::Event(ServerEvent::ContentRenamed(p)) => {
                assert_eq!(p.new_name, "notes.txt");
                assert_eq!(p.sender_id, "conn-b");
                assert_eq!(p.sender_name, "Bob");
            }
            other => panic!("expected content-renamed, got {other:?}"),
        }
        let mut saw_event = false;
        let mut saw_ack = false;
        for _ in 0..2 {
            match recv(&mut rx_b).await {
                OutboundFrame::Event(ServerEvent::ContentRenamed(p)) => {
                    assert_eq!(p.new_name, "notes.txt");
                    saw_event = true;
                }
                OutboundFrame::Ack {
                    ack: 7,
                    payload: AckPayload::Op(op),
                } => {
                    assert!(op.success);
                    saw_ack = true;
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert!(saw_event && saw_ack);

        let item = hub.store().get_content_metadata("c1").await.unwrap().unwrap();
        assert_eq!(item.file_name(), Some("notes.txt"));
    }

    #[tokio::test]
    async fn test_rename_rejections() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        let token = join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        hub.handle_frame("conn-a", content_frame("s1", "c1", 5, b"bytes")).await;

        // Whitespace-only name.
        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(1),
                event: ClientEvent::RenameContent(RenameContentPayload {
                    session_id: "s1".into(),
                    content_id: "c1".into(),
                    new_name: "   ".into(),
                    token: token.clone(),
                }),
            },
        )
        .await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Op(op),
                ..
            } => assert_eq!(op.error.as_deref(), Some("Name cannot be empty")),
            other => panic!("expected ack, got {other:?}"),
        }

        // Unknown content id.
        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(2),
                event: ClientEvent::RenameContent(RenameContentPayload {
                    session_id: "s1".into(),
                    content_id: "ghost".into(),
                    new_name: "name".into(),
                    token: token.clone(),
                }),
            },
        )
        .await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Op(op),
                ..
            } => assert_eq!(op.error.as_deref(), Some("Content not found")),
            other => panic!("expected ack, got {other:?}"),
        }

        // Bad token.
        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(3),
                event: ClientEvent::RenameContent(RenameContentPayload {
                    session_id: "s1".into(),
                    content_id: "c1".into(),
                    new_name: "name".into(),
                    token: "deadbeef".into(),
                }),
            },
        )
        .await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Op(op),
                ..
            } => assert_eq!(op.error.as_deref(), Some("Invalid session token")),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_content_broadcast_and_idempotence() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        let token_a = join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        hub.handle_frame("conn-a", content_frame("s1", "c1", 5, b"bytes")).await;
        let _ = recv(&mut rx_b).await;

        let remove = |id: u64, token: String| InboundFrame {
            id: Some(id),
            event: ClientEvent::RemoveContent(RemoveContentPayload {
                session_id: "s1".into(),
                content_id: "c1".into(),
                token,
            }),
        };

        hub.handle_frame("conn-a", remove(1, token_a.clone())).await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Op(op),
                ..
            } => assert!(op.success),
            other => panic!("expected ack, got {other:?}"),
        }
        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::ContentRemoved(p)) => {
                assert_eq!(p.content_id, "c1")
            }
            other => panic!("expected content-removed, got {other:?}"),
        }

        // Second remove: still success, no broadcast.
        hub.handle_frame("conn-a", remove(2, token_a)).await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Op(op),
                ..
            } => assert!(op.success),
            other => panic!("expected ack, got {other:?}"),
        }
        assert_silent(&mut rx_b).await;
    }

    #[tokio::test]
    async fn test_pin_content_broadcast() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        let token_a = join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        hub.handle_frame("conn-a", content_frame("s1", "c1", 5, b"bytes")).await;
        let _ = recv(&mut rx_b).await;

        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(4),
                event: ClientEvent::PinContent(PinContentPayload {
                    session_id: "s1".into(),
                    content_id: "c1".into(),
                    pinned: true,
                    token: token_a,
                }),
            },
        )
        .await;

        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::ContentPinned(p)) => {
                assert_eq!(p.content_id, "c1");
                assert!(p.pinned);
            }
            other => panic!("expected content-pinned, got {other:?}"),
        }
        let item = hub.store().get_content_metadata("c1").await.unwrap().unwrap();
        assert!(item.is_pinned);
    }

    #[tokio::test]
    async fn test_clear_all_content() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        let token_a = join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        for i in 0..3 {
            hub.handle_frame("conn-a", content_frame("s1", &format!("c{i}"), 5, b"bytes")).await;
            let _ = recv(&mut rx_b).await;
        }

        let clear = |id: u64, token: String| InboundFrame {
            id: Some(id),
            event: ClientEvent::ClearAllContent(ClearAllContentPayload {
                session_id: "s1".into(),
                token,
            }),
        };

        hub.handle_frame("conn-a", clear(1, token_a.clone())).await;

        // Inclusive broadcast: both members see the clear, sender included.
        let mut cleared_seen = false;
        for _ in 0..2 {
            match recv(&mut rx_a).await {
                OutboundFrame::Event(ServerEvent::AllContentCleared(p)) => {
                    assert_eq!(p.cleared_by, "conn-a");
                    cleared_seen = true;
                }
                OutboundFrame::Ack {
                    payload: AckPayload::Clear(ack),
                    ..
                } => {
                    assert!(ack.success);
                    assert_eq!(ack.removed.len(), 3);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert!(cleared_seen);
        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::AllContentCleared(_)) => {}
            other => panic!("expected all-content-cleared, got {other:?}"),
        }

        let page = hub.store().list_content("s1", None, None).await.unwrap();
        assert_eq!(page.total_count, 0);

        // Second clear is empty but still succeeds.
        hub.handle_frame("conn-a", clear(2, token_a)).await;
        let mut saw_empty_ack = false;
        for _ in 0..2 {
            match recv(&mut rx_a).await {
                OutboundFrame::Ack {
                    payload: AckPayload::Clear(ack),
                    ..
                } => {
                    assert!(ack.success);
                    assert!(ack.removed.is_empty());
                    saw_empty_ack = true;
                }
                OutboundFrame::Event(ServerEvent::AllContentCleared(_)) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert!(saw_empty_ack);
    }

    #[tokio::test]
    async fn test_list_content_pagination_ack() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        let token = join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        for i in 0..5 {
            hub.handle_frame("conn-a", content_frame("s1", &format!("c{i}"), 5, b"bytes")).await;
        }

        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(9),
                event: ClientEvent::ListContent(ListContentPayload {
                    session_id: "s1".into(),
                    limit: Some(2),
                    offset: Some(0),
                    token,
                }),
            },
        )
        .await;

        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                ack: 9,
                payload: AckPayload::List(list),
            } => {
                assert!(list.success);
                assert_eq!(list.items.len(), 2);
                assert_eq!(list.total_count, 5);
                assert!(list.has_more);
                assert_eq!(list.items[0].content_id, "c4");
            }
            other => panic!("expected list ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;

        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(1),
                event: ClientEvent::Ping(PingPayload {
                    session_id: "s1".into(),
                }),
            },
        )
        .await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Ping(ping),
                ..
            } => assert!(ping.valid),
            other => panic!("expected ping ack, got {other:?}"),
        }

        hub.handle_frame(
            "conn-a",
            InboundFrame {
                id: Some(2),
                event: ClientEvent::Ping(PingPayload {
                    session_id: "other".into(),
                }),
            },
        )
        .await;
        match recv(&mut rx_a).await {
            OutboundFrame::Ack {
                payload: AckPayload::Ping(ping),
                ..
            } => {
                assert!(!ping.valid);
                assert!(ping.error.is_some());
            }
            other => panic!("expected ping ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_content_requires_membership() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;

        // conn-b never joined.
        let mut frame = content_frame("s1", "c1", 5, b"bytes");
        frame.id = Some(1);
        hub.handle_frame("conn-b", frame).await;

        match recv(&mut rx_b).await {
            OutboundFrame::Ack {
                payload: AckPayload::Op(op),
                ..
            } => assert_eq!(op.error.as_deref(), Some("Not joined to this session")),
            other => panic!("expected ack, got {other:?}"),
        }
        assert!(hub.store().get_content_metadata("c1").await.unwrap().is_none());
        assert_silent(&mut rx_a).await;
    }

    #[tokio::test]
    async fn test_replay_on_join() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        hub.handle_frame("conn-a", content_frame("s1", "done", 5, b"bytes")).await;
        // An incomplete item must not replay.
        hub.handle_frame("conn-a", chunk_frame("s1", "partial", 0, 2, b"half")).await;

        let mut rx_b = hub.fabric().register_with_id("conn-b".into());
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;

        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::Content(p)) => {
                assert_eq!(p.content.content_id, "done");
                assert!(p.data.is_none());
            }
            other => panic!("expected replayed content, got {other:?}"),
        }
        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::Chunk(p)) => {
                assert_eq!(p.chunk.content_id, "done");
                assert_eq!(p.chunk.encrypted_data, b"bytes".to_vec());
            }
            other => panic!("expected replayed chunk, got {other:?}"),
        }
        assert_silent(&mut rx_b).await;
    }

    #[tokio::test]
    async fn test_replay_skips_large_file_chunks() {
        let config = RelayHubConfig {
            large_file_threshold: 16,
            ..RelayHubConfig::default()
        };
        let (hub, _dir) = test_hub(config).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        let mut frame = content_frame("s1", "big", 64, b"");
        if let ClientEvent::Content(ref mut p) = frame.event {
            p.data = None;
            p.content.total_chunks = Some(2);
        }
        hub.handle_frame("conn-a", frame).await;
        hub.handle_frame("conn-a", chunk_frame("s1", "big", 0, 2, &[1; 32])).await;
        hub.handle_frame("conn-a", chunk_frame("s1", "big", 1, 2, &[2; 32])).await;

        let mut rx_b = hub.fabric().register_with_id("conn-b".into());
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;

        match recv(&mut rx_b).await {
            OutboundFrame::Event(ServerEvent::Content(p)) => {
                assert_eq!(p.content.content_id, "big");
                assert!(p.content.is_large_file);
            }
            other => panic!("expected replayed content, got {other:?}"),
        }
        assert_silent(&mut rx_b).await;
    }

    #[tokio::test]
    async fn test_retention_evicts_and_notifies() {
        let config = RelayHubConfig {
            max_items_per_session: 2,
            ..RelayHubConfig::default()
        };
        let (hub, _dir) = test_hub(config).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        for i in 0..3 {
            hub.handle_frame("conn-a", content_frame("s1", &format!("c{i}"), 5, b"bytes")).await;
        }

        // Publishing the third item evicts the first.
        match recv(&mut rx_a).await {
            OutboundFrame::Event(ServerEvent::ContentRemoved(p)) => {
                assert_eq!(p.content_id, "c0");
            }
            other => panic!("expected content-removed, got {other:?}"),
        }

        let page = hub.store().list_content("s1", None, None).await.unwrap();
        assert_eq!(page.total_count, 2);
    }

    #[tokio::test]
    async fn test_expiry_notifies_and_allows_fresh_rejoin() {
        let config = RelayHubConfig {
            session_timeout_ms: 50,
            ..RelayHubConfig::default()
        };
        let (hub, _dir) = test_hub(config).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());

        join(&hub, &mut rx_a, "conn-a", "s2", "Alice", 1).await;
        hub.handle_frame("conn-a", content_frame("s2", "c1", 5, b"bytes")).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        hub.expire_idle_sessions().await;

        match recv(&mut rx_a).await {
            OutboundFrame::Event(ServerEvent::SessionExpired(p)) => {
                assert_eq!(p.session_id, "s2");
                assert!(!p.message.is_empty());
            }
            other => panic!("expected session-expired, got {other:?}"),
        }
        assert!(!hub.registry().has_session("s2"));

        // Rejoin with the same passphrase: a fresh, empty session.
        let token = join(&hub, &mut rx_a, "conn-a", "s2", "Alice", 1).await;
        assert!(!token.is_empty());
        assert_silent(&mut rx_a).await; // nothing to replay
        let page = hub.store().list_content("s2", None, None).await.unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_client_left() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        hub.handle_disconnect("conn-b").await;

        match recv(&mut rx_a).await {
            OutboundFrame::Event(ServerEvent::ClientLeft(p)) => {
                assert_eq!(p.client_id, "conn-b");
            }
            other => panic!("expected client-left, got {other:?}"),
        }
        assert_eq!(hub.registry().member_count("s1"), 1);
        assert!(!hub.fabric().is_connected("conn-b"));
    }

    #[tokio::test]
    async fn test_stats_track_relay_traffic() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        for index in 0..3 {
            hub.handle_frame(
                "conn-a",
                chunk_frame("s1", "c1", index, 3, &[index as u8; 64]),
            )
            .await;
        }

        let stats = hub.stats();
        assert!(stats.events_received >= 5);
        assert_eq!(stats.chunks_relayed, 3);
        assert_eq!(stats.bytes_relayed, 3 * 64);
        assert_eq!(stats.sessions_expired, 0);
        assert!(format!("{stats}").contains("3 chunks relayed"));
    }

    #[tokio::test]
    async fn test_rejoin_different_session_implies_leave() {
        let (hub, _dir) = test_hub(RelayHubConfig::default()).await;
        let mut rx_a = hub.fabric().register_with_id("conn-a".into());
        let mut rx_b = hub.fabric().register_with_id("conn-b".into());

        join(&hub, &mut rx_a, "conn-a", "s1", "Alice", 1).await;
        join(&hub, &mut rx_b, "conn-b", "s1", "Bob", 1).await;
        let _ = recv(&mut rx_a).await;

        // Bob moves to s9; Alice sees him leave s1.
        join(&hub, &mut rx_b, "conn-b", "s9", "Bob", 3).await;

        match recv(&mut rx_a).await {
            OutboundFrame::Event(ServerEvent::ClientLeft(p)) => {
                assert_eq!(p.client_id, "conn-b");
                assert_eq!(p.session_id, "s1");
            }
            other => panic!("expected client-left, got {other:?}"),
        }
        assert_eq!(hub.registry().member_count("s1"), 1);
        assert_eq!(hub.registry().member_count("s9"), 1);
    }
}
