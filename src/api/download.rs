use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub async fn health_check() -> &'static str {
    "OK"
}

/// Stream a complete item's chunks in ascending index order. The caller must
/// present a token belonging to a live member of the owning session.
pub async fn download_content(
    State(state): State<ApiState>,
    Path(content_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let item = state
        .hub
        .store()
        .get_content_metadata(&content_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Content not found: {content_id}")))?;

    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization token".to_string()))?;
    if !state
        .hub
        .registry()
        .validate_session_token(&item.session_id, token)
    {
        return Err(ApiError::Unauthorized("Invalid session token".to_string()));
    }

    if !item.is_complete {
        return Err(ApiError::Conflict(format!(
            "Content {content_id} is not complete"
        )));
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    let store = state.hub.store().clone();
    let stream_id = content_id.clone();
    tokio::spawn(async move {
        let chunk_tx = tx.clone();
        let result = store
            .stream_content_for_download(&stream_id, move |payload, _info| {
                let chunk_tx = chunk_tx.clone();
                async move {
                    chunk_tx.send(Ok(payload)).await.map_err(|_| {
                        crate::store::StoreError::Io(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "download client went away",
                        ))
                    })
                }
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(content_id = %stream_id, error = %e, "download stream failed");
            let _ = tx
                .send(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                )))
                .await;
        }
    });

    let file_name = item
        .file_name()
        .unwrap_or(&content_id)
        .replace('"', "'");
    let mime_type = item.mime_type().unwrap_or("application/octet-stream").to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, item.total_size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::InternalError(e.to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or(Some(value))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
