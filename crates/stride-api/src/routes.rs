//! HTTP surface of the ingestion backend
//!
//! `/healthz` is open. Everything under `/v1` (batch ingestion per record
//! kind, origin-id lookup and delete, owner registration and the owner audit
//! log) sits behind the bearer-token middleware when a token is configured.

use std::sync::{Arc, OnceLock};

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use stride_core::util::owner_fingerprint;
use stride_core::{IngestRequest, IngestResponse, RecordKind};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::ApiToken;
use crate::error::AppError;
use crate::ingest::{IngestError, IngestionEngine};
use crate::store::{AuditRow, Store, StoredRecord};

const DEFAULT_AUDIT_LIMIT: u32 = 100;
const MAX_AUDIT_LIMIT: u32 = 1_000;

#[derive(Clone)]
pub struct AppState {
    engine: IngestionEngine,
    token: Option<ApiToken>,
}

impl AppState {
    pub fn new(engine: IngestionEngine, token: Option<String>) -> Self {
        Self {
            engine,
            token: token.map(ApiToken::new),
        }
    }

    fn store(&self) -> &Arc<Store> {
        self.engine.store()
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/ingest/{kind}", post(ingest))
        .route("/records/{kind}/lookup", post(lookup_records))
        .route("/records/{kind}/delete", post(delete_records))
        .route("/owners/{owner_id}", put(register_owner))
        .route("/owners/{owner_id}/audit", get(owner_audit))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Owner ids are opaque but must be printable and reasonably short
pub fn is_valid_owner_id(owner_id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:@-]{0,127}$").expect("valid regex"))
        .is_match(owner_id)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = &state.token {
        token.verify(request.headers())?;
    }
    Ok(next.run(request).await)
}

fn parse_kind(raw: &str) -> Result<RecordKind, AppError> {
    raw.parse()
        .map_err(|_| AppError::not_found(format!("unknown record kind `{raw}`")))
}

async fn ingest(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let kind = parse_kind(&kind)?;
    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(kind = kind.as_str(), "Rejected unreadable batch body: {error}");
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(IngestResponse::rejected(
                    0,
                    format!("invalid batch body: {error}"),
                )),
            ));
        }
    };
    let received = request.records.len();

    match state.engine.ingest(kind, &request).await {
        Ok(report) => {
            let status = if report.is_success() {
                StatusCode::OK
            } else {
                StatusCode::UNPROCESSABLE_ENTITY
            };
            Ok((status, Json(IngestResponse::from(&report))))
        }
        Err(IngestError::Protocol(message)) => {
            tracing::warn!(
                kind = kind.as_str(),
                owner = owner_fingerprint(request.owner_id.trim()),
                received,
                "Rejected batch: {message}"
            );
            Ok((
                StatusCode::BAD_REQUEST,
                Json(IngestResponse::rejected(received, message)),
            ))
        }
        Err(IngestError::UnknownOwner) => {
            tracing::warn!(
                kind = kind.as_str(),
                owner = owner_fingerprint(request.owner_id.trim()),
                "Rejected batch for unknown owner"
            );
            Ok((
                StatusCode::NOT_FOUND,
                Json(IngestResponse::rejected(received, "unknown owner")),
            ))
        }
        Err(IngestError::Store(error)) => Err(error.into()),
    }
}

#[derive(Debug, Deserialize)]
struct OriginIdsRequest {
    owner_id: String,
    #[serde(default)]
    origin_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LookupResponse {
    records: Vec<StoredRecord>,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: u64,
}

async fn lookup_records(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<OriginIdsRequest>,
) -> Result<Json<LookupResponse>, AppError> {
    let kind = parse_kind(&kind)?;
    let records = state
        .store()
        .find_by_origin_ids(request.owner_id.trim(), kind, &request.origin_ids)
        .await?;
    Ok(Json(LookupResponse { records }))
}

async fn delete_records(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<OriginIdsRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let kind = parse_kind(&kind)?;
    let owner_id = request.owner_id.trim();
    let deleted = state
        .store()
        .delete_by_origin_ids(owner_id, kind, &request.origin_ids)
        .await?;
    tracing::info!(
        kind = kind.as_str(),
        owner = owner_fingerprint(owner_id),
        requested = request.origin_ids.len(),
        deleted,
        "Deleted records by origin id"
    );
    Ok(Json(DeleteResponse { deleted }))
}

#[derive(Debug, Serialize)]
struct OwnerResponse {
    owner_id: String,
    /// False when the owner already existed
    registered: bool,
}

async fn register_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<(StatusCode, Json<OwnerResponse>), AppError> {
    if !is_valid_owner_id(&owner_id) {
        return Err(AppError::bad_request("owner id has an invalid format"));
    }
    let registered = state.store().register_owner(&owner_id).await?;
    if registered {
        tracing::info!(owner = owner_fingerprint(&owner_id), "Registered owner");
    }
    let status = if registered {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(OwnerResponse {
            owner_id,
            registered,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct AuditResponse {
    entries: Vec<AuditRow>,
}

async fn owner_audit(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditResponse>, AppError> {
    if !state.store().owner_exists(&owner_id).await? {
        return Err(AppError::not_found("unknown owner"));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let entries = state.store().audit_for_owner(&owner_id, limit).await?;
    Ok(Json(AuditResponse { entries }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use stride_core::clock::SystemClock;
    use tower::ServiceExt;

    use super::*;
    use crate::ingest::DEFAULT_MAX_BATCH_RECORDS;

    async fn router(token: Option<&str>) -> Router {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store.register_owner("owner-1").await.unwrap();
        let engine = IngestionEngine::new(store, Arc::new(SystemClock), DEFAULT_MAX_BATCH_RECORDS);
        app_router(AppState::new(engine, token.map(str::to_string)))
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send_with(router, method, uri, body, None).await
    }

    async fn send_with(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn step(origin_id: &str, hour: u32) -> Value {
        json!({
            "origin_id": origin_id,
            "start_time": format!("2025-09-30T{hour:02}:00:00Z"),
            "end_time": format!("2025-09-30T{hour:02}:30:00Z"),
            "count": 2_000
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthz_reports_ok() {
        let router = router(None).await;
        let (status, body) = send(&router, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ingest_returns_report_and_is_idempotent() {
        let router = router(None).await;
        let batch = json!({ "owner_id": "owner-1", "records": [step("a", 1), step("b", 2)] });

        let (status, body) = send(&router, Method::POST, "/v1/ingest/step", Some(batch.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "count_received": 2,
                "count_inserted": 2,
                "duplicates_skipped": 0,
                "warnings_count": 0,
                "errors_count": 0
            })
        );

        let (status, body) = send(&router, Method::POST, "/v1/ingest/steps", Some(batch)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count_inserted"], 0);
        assert_eq!(body["duplicates_skipped"], 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_invalid_batch_is_unprocessable() {
        let router = router(None).await;
        let batch = json!({ "owner_id": "owner-1", "records": [{ "count": 5 }] });
        let (status, body) = send(&router, Method::POST, "/v1/ingest/step", Some(batch)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["errors_count"], 1);
        assert!(body["errors"][0].as_str().unwrap().starts_with("record 0:"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn protocol_errors_and_unknown_targets() {
        let router = router(None).await;

        let mut foreign = step("a", 1);
        foreign["owner_id"] = json!("owner-2");
        let (status, body) = send(
            &router,
            Method::POST,
            "/v1/ingest/step",
            Some(json!({ "owner_id": "owner-1", "records": [foreign] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0], "batch references more than one owner");

        let (status, _) = send(&router, Method::POST, "/v1/ingest/step", Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &router,
            Method::POST,
            "/v1/ingest/step",
            Some(json!({ "owner_id": "ghost", "records": [step("a", 1)] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            &router,
            Method::POST,
            "/v1/ingest/calendar",
            Some(json!({ "owner_id": "owner-1", "records": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn token_guards_v1_routes_only() {
        let router = router(Some("s3cret")).await;
        let batch = json!({ "owner_id": "owner-1", "records": [step("a", 1)] });

        let (status, _) = send(&router, Method::POST, "/v1/ingest/step", Some(batch.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send_with(
            &router,
            Method::POST,
            "/v1/ingest/step",
            Some(batch),
            Some("s3cret"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn owners_lookup_delete_and_audit() {
        let router = router(None).await;

        let (status, body) = send(&router, Method::PUT, "/v1/owners/owner-9", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "owner_id": "owner-9", "registered": true }));
        let (status, _) = send(&router, Method::PUT, "/v1/owners/owner-9", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&router, Method::PUT, "/v1/owners/bad%20owner", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut noisy = step("a", 1);
        noisy["count"] = json!(120_000);
        send(
            &router,
            Method::POST,
            "/v1/ingest/step",
            Some(json!({ "owner_id": "owner-9", "records": [noisy, step("b", 2)] })),
        )
        .await;

        let (status, body) = send(
            &router,
            Method::POST,
            "/v1/records/step/lookup",
            Some(json!({ "owner_id": "owner-9", "origin_ids": ["a", "missing"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"].as_array().unwrap().len(), 1);
        assert_eq!(body["records"][0]["origin_id"], "a");
        assert_eq!(body["records"][0]["payload"]["count"], 120_000);

        let (status, body) = send(&router, Method::GET, "/v1/owners/owner-9/audit?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"][0]["event"], "warning");
        assert_eq!(body["entries"][0]["field"], "count");

        let (status, _) = send(&router, Method::GET, "/v1/owners/nobody/audit", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &router,
            Method::POST,
            "/v1/records/step/delete",
            Some(json!({ "owner_id": "owner-9", "origin_ids": ["a", "b"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);

        let (_, body) = send(
            &router,
            Method::POST,
            "/v1/records/step/lookup",
            Some(json!({ "owner_id": "unknown", "origin_ids": ["a"] })),
        )
        .await;
        assert_eq!(body["records"], json!([]));
    }

    #[test]
    fn owner_id_format() {
        assert!(is_valid_owner_id("user-42"));
        assert!(is_valid_owner_id("a1b2c3d4-e5f6@example.com"));
        assert!(!is_valid_owner_id(""));
        assert!(!is_valid_owner_id("-leading"));
        assert!(!is_valid_owner_id("has space"));
    }
}
