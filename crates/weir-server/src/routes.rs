//! REST routes mapping 1:1 onto the stream manager's operations.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `POST` | `/streams` | Upsert a stream |
//! | `GET` | `/streams` | List streams |
//! | `GET` | `/streams/{id}` | Get one stream |
//! | `POST` | `/streams/{id}/start` | Start |
//! | `POST` | `/streams/{id}/stop` | Stop |
//! | `POST` | `/streams/{id}/reset` | Reset to a sequence ID |
//! | `DELETE` | `/streams/{id}` | Delete |
//!
//! Error kinds map onto status codes: validation 400, unauthorized 403,
//! not-found 404, conflict 409, timeout/cancelled 503, everything else
//! 500. Every error body is `{"error": "<code>: <message>"}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use weir_core::{Error, ErrorKind, EventStreamSpec};
use weir_engine::EventStreamManager;
use weir_persistence::Filter;

/// Error wrapper mapping kinds to HTTP statuses.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Timeout | ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Storage
            | ErrorKind::TransportRetryable
            | ErrorKind::TransportFatal
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Pagination and filter parameters for `GET /streams`.
#[derive(Debug, Deserialize)]
struct ListQuery {
    skip: Option<u64>,
    limit: Option<u64>,
    name: Option<String>,
}

/// Body of `POST /streams/{id}/reset`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    initial_sequence_id: String,
}

/// Builds the stream management router over a shared manager.
pub fn stream_router<CT, DT>(manager: Arc<EventStreamManager<CT, DT>>) -> Router
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    Router::new()
        .route(
            "/streams",
            post(upsert_stream::<CT, DT>).get(list_streams::<CT, DT>),
        )
        .route(
            "/streams/{id}",
            get(get_stream::<CT, DT>).delete(delete_stream::<CT, DT>),
        )
        .route("/streams/{id}/start", post(start_stream::<CT, DT>))
        .route("/streams/{id}/stop", post(stop_stream::<CT, DT>))
        .route("/streams/{id}/reset", post(reset_stream::<CT, DT>))
        .with_state(manager)
}

async fn upsert_stream<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Json(mut spec): Json<EventStreamSpec<CT>>,
) -> Result<Response, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    let is_new = manager.upsert_stream(&mut spec).await?;
    let enriched = manager.get_stream(spec.id()).await?;
    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(enriched)).into_response())
}

async fn list_streams<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    let mut filter = Filter::new();
    if let Some(name) = query.name {
        filter = filter.eq("name", name);
    }
    if let Some(skip) = query.skip {
        filter = filter.skip(skip);
    }
    if let Some(limit) = query.limit {
        filter = filter.limit(limit);
    }
    let streams = manager.list_streams(&filter).await?;
    Ok(Json(streams).into_response())
}

async fn get_stream<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    let stream = manager.get_stream(&id).await?;
    Ok(Json(stream).into_response())
}

async fn start_stream<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    manager.start_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_stream<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    manager.stop_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_stream<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Path(id): Path<String>,
    Json(request): Json<ResetRequest>,
) -> Result<StatusCode, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    manager
        .reset_stream(&id, &request.initial_sequence_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_stream<CT, DT>(
    State(manager): State<Arc<EventStreamManager<CT, DT>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    CT: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    manager.delete_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
