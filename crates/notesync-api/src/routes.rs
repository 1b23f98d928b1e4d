use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use notesync_core::remote::{PushMode, RemoteRecord};
use notesync_core::{MemoryRemote, RecordId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::auth::verify_bearer_token;
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    records: Arc<MemoryRemote>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            records: Arc::new(MemoryRemote::new()),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/records", get(list_records))
        .route("/records/{id}", put(upsert_record))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    records: usize,
    cursor: i64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp_millis(),
        records: state.records.len(),
        cursor: state.records.cursor(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.api_token.as_deref() {
        verify_bearer_token(request.headers(), expected)?;
    }
    Ok(next.run(request).await)
}

/// Pull position as a server change cursor
#[derive(Debug, Deserialize)]
struct ChangesQuery {
    #[serde(default)]
    since: i64,
}

async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Json<Vec<RemoteRecord>> {
    let changes = state.records.changes_since(query.since);
    tracing::debug!(
        since = query.since,
        count = changes.len(),
        "Served record changes"
    );
    Json(changes)
}

#[derive(Debug, Deserialize)]
struct UpsertQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct UpsertResponse {
    id: RecordId,
}

/// Upsert one record; a stale normal push gets 409 with the stored copy
async fn upsert_record(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(query): Query<UpsertQuery>,
    Json(record): Json<RemoteRecord>,
) -> Result<Response, AppError> {
    let id = raw_id
        .parse::<RecordId>()
        .map_err(|_| AppError::bad_request(format!("`{raw_id}` is not a record id")))?;
    if id != record.id {
        return Err(AppError::bad_request("Path id does not match body id"));
    }

    let mode = if query.force {
        PushMode::Overwrite
    } else {
        PushMode::Normal
    };

    match state.records.upsert(&record, mode) {
        Ok(id) => {
            tracing::info!(
                record_id = %id,
                timestamp = record.timestamp,
                deleted = record.deleted,
                force = query.force,
                "Stored record"
            );
            Ok(Json(UpsertResponse { id }).into_response())
        }
        Err(existing) => {
            tracing::info!(
                record_id = %id,
                incoming = record.timestamp,
                stored = existing.timestamp,
                "Rejected stale record"
            );
            Ok((StatusCode::CONFLICT, Json(existing)).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use notesync_core::sync::{EngineConfig, ReconciliationEngine};
    use notesync_core::{HttpRemoteClient, RecordDraft, RecordPatch, RecordStore, SyncState};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "test-token";

    fn router(api_token: Option<&str>) -> Router {
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            api_token: api_token.map(str::to_string),
        };
        app_router(AppState::from_config(Arc::new(config)))
    }

    fn remote_record(timestamp: i64) -> RemoteRecord {
        RemoteRecord {
            id: RecordId::new(),
            title: format!("at {timestamp}"),
            content: "body".to_string(),
            timestamp,
            deleted: false,
            cursor: 0,
        }
    }

    fn put_request(record: &RemoteRecord, force: bool) -> Request<Body> {
        let uri = if force {
            format!("/v1/records/{}?force=true", record.id)
        } else {
            format!("/v1/records/{}", record.id)
        };
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::from(serde_json::to_vec(record).unwrap()))
            .unwrap()
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = router(Some(TOKEN))
            .oneshot(get_request("/health", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["records"], 0);
    }

    #[tokio::test]
    async fn record_routes_require_the_configured_token() {
        let app = router(Some(TOKEN));

        let missing = app
            .clone()
            .oneshot(get_request("/v1/records", None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert!(json_body(missing).await["error"]
            .as_str()
            .is_some_and(|message| message.contains("Authorization")));

        let wrong = app
            .clone()
            .oneshot(get_request("/v1/records", Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app
            .oneshot(get_request("/v1/records", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn open_server_accepts_anonymous_clients() {
        let response = router(None)
            .oneshot(get_request("/v1/records?since=0", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn put_then_list_changes_since() {
        let app = router(Some(TOKEN));
        let record = remote_record(100);

        let stored = app.clone().oneshot(put_request(&record, false)).await.unwrap();
        assert_eq!(stored.status(), StatusCode::OK);
        assert_eq!(json_body(stored).await["id"], record.id.to_string());

        let all = app
            .clone()
            .oneshot(get_request("/v1/records?since=0", Some(TOKEN)))
            .await
            .unwrap();
        let records: Vec<RemoteRecord> = serde_json::from_value(json_body(all).await).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cursor, 1);
        assert_eq!(RemoteRecord { cursor: 0, ..records[0].clone() }, record);

        let none = app
            .oneshot(get_request("/v1/records?since=1", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(json_body(none).await, Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn late_upload_with_old_timestamp_is_listed_after_the_cursor() {
        let app = router(Some(TOKEN));
        app.clone()
            .oneshot(put_request(&remote_record(1_000), false))
            .await
            .unwrap();

        let late = remote_record(500);
        app.clone().oneshot(put_request(&late, false)).await.unwrap();

        let after_first = app
            .oneshot(get_request("/v1/records?since=1", Some(TOKEN)))
            .await
            .unwrap();
        let records: Vec<RemoteRecord> =
            serde_json::from_value(json_body(after_first).await).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, late.id);
        assert_eq!(records[0].cursor, 2);
    }

    #[tokio::test]
    async fn stale_put_conflicts_unless_forced() {
        let app = router(Some(TOKEN));
        let newer = remote_record(200);
        app.clone().oneshot(put_request(&newer, false)).await.unwrap();

        let mut stale = newer.clone();
        stale.title = "stale".to_string();
        stale.timestamp = 100;

        let conflict = app.clone().oneshot(put_request(&stale, false)).await.unwrap();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let stored: RemoteRecord = serde_json::from_value(json_body(conflict).await).unwrap();
        assert_eq!(stored.title, newer.title);
        assert_eq!(stored.timestamp, 200);

        let forced = app.oneshot(put_request(&stale, true)).await.unwrap();
        assert_eq!(forced.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn put_rejects_mismatched_ids() {
        let app = router(None);
        let record = remote_record(1);

        let request = Request::builder()
            .method("PUT")
            .uri(format!("/v1/records/{}", RecordId::new()))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&record).unwrap()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("PUT")
            .uri("/v1/records/not-an-id")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&record).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn engine(base_url: &str) -> ReconciliationEngine<HttpRemoteClient> {
        let client = HttpRemoteClient::new(
            base_url,
            Some(TOKEN.to_string()),
            Duration::from_secs(5),
            Duration::from_millis(1),
        )
        .unwrap();
        ReconciliationEngine::new(
            RecordStore::open_in_memory().unwrap(),
            client,
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn two_clients_converge_through_the_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router(Some(TOKEN))).await.unwrap();
        });

        let laptop = engine(&base_url);
        let phone = engine(&base_url);

        let record = laptop
            .store()
            .create(RecordDraft::new("shopping", "milk"))
            .await
            .unwrap();
        assert_eq!(laptop.run_cycle().await.unwrap().pushed, 1);

        assert_eq!(phone.run_cycle().await.unwrap().pulled, 1);
        let on_phone = phone.store().get(&record.id).await.unwrap();
        assert_eq!(on_phone.content, "milk");
        assert_eq!(on_phone.sync_state, SyncState::Synced);

        phone
            .store()
            .update(&record.id, RecordPatch::content("milk, eggs"))
            .await
            .unwrap();
        assert_eq!(phone.run_cycle().await.unwrap().pushed, 1);

        laptop.run_cycle().await.unwrap();
        let on_laptop = laptop.store().get(&record.id).await.unwrap();
        assert_eq!(on_laptop.content, "milk, eggs");
        assert_eq!(on_laptop.sync_state, SyncState::Synced);

        laptop.store().delete(&record.id).await.unwrap();
        laptop.run_cycle().await.unwrap();
        phone.run_cycle().await.unwrap();
        assert!(phone.store().get(&record.id).await.is_err());
    }
}
