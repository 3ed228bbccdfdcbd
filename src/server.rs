use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::{self, SqliteStore};
use crate::error::{ImportError, ReaderError};
use crate::import::{self, ImportReport, Upload};
use crate::parser::DocumentParser;
use crate::persist::{Collection, Persister};
use crate::settings::Settings;

// Room for multipart framing and the collection field on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub parser: Arc<DocumentParser>,
    pub persister: Arc<Mutex<Persister<SqliteStore>>>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(settings: &Settings, store: SqliteStore) -> Result<Self> {
        let parser = DocumentParser::new(settings).context("Invalid garble or label patterns")?;
        Ok(AppState {
            parser: Arc::new(parser),
            persister: Arc::new(Mutex::new(Persister::new(store, &settings.persist))),
            max_upload_bytes: settings.max_upload_bytes,
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

pub fn import_status(err: &ImportError) -> StatusCode {
    match err {
        ImportError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ImportError::Reader(ReaderError::Unsupported(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ImportError::Reader(ReaderError::Unavailable { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, hint) = match &self {
            ApiError::Import(e) => {
                let hint = match e {
                    ImportError::Reader(ReaderError::Unavailable { hint, .. }) => Some(*hint),
                    _ => None,
                };
                (import_status(e), hint)
            }
            ApiError::Multipart(e) => (e.status(), None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = Json(json!({
            "ok": false,
            "message": self.to_string(),
            "hint": hint,
        }));
        (status, body).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/api/import", post(import_handler))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: &Settings) -> Result<()> {
    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;
    let state = AppState::new(settings, SqliteStore::new(conn))?;
    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind))?;
    info!("Listening on {}", settings.bind);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ImportQuery {
    #[serde(default)]
    commit: bool,
}

async fn import_handler(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    mut multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let mut upload: Option<Upload> = None;
    let mut collection: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?.to_vec();
                upload = Some(Upload { file_name, content_type, bytes });
            }
            Some("collection") => collection = Some(field.text().await?),
            _ => {}
        }
    }

    let upload = upload.ok_or(ImportError::MissingFile)?;
    let collection: Collection = collection
        .ok_or_else(|| ApiError::BadRequest("missing collection field".to_string()))?
        .parse()?;

    let report = tokio::task::spawn_blocking(move || -> Result<ImportReport, ApiError> {
        let parsed = import::parse_upload(&state.parser, state.max_upload_bytes, &upload)?;
        if !query.commit {
            return Ok(import::preview(&parsed, collection, &upload.file_name));
        }
        let mut persister = state
            .persister
            .lock()
            .map_err(|_| ApiError::Internal("persistence layer unavailable".to_string()))?;
        Ok(import::commit(&parsed, collection, &upload.file_name, &mut *persister))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rusqlite::Connection;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "catalogboundary";

    fn app(max_upload_bytes: usize) -> (Router, AppState) {
        let mut settings = Settings::defaults().unwrap();
        settings.max_upload_bytes = max_upload_bytes;
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let state = AppState::new(&settings, SqliteStore::new(conn)).unwrap();
        (build_router(state.clone()), state)
    }

    fn multipart(file: Option<(&str, &[u8])>, collection: Option<&str>) -> Body {
        let mut body = Vec::new();
        if let Some(c) = collection {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"collection\"\r\n\r\n{}\r\n",
                    BOUNDARY, c
                )
                .as_bytes(),
            );
        }
        if let Some((name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        Body::from(body)
    }

    async fn post(router: Router, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(body)
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn fixture() -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/two_entries.txt", env!("CARGO_MANIFEST_DIR"))).unwrap()
    }

    #[tokio::test]
    async fn health() {
        let (router, _) = app(1 << 20);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn preview_does_not_write() {
        let (router, state) = app(1 << 20);
        let bytes = fixture();
        let (status, json) =
            post(router, "/api/import", multipart(Some(("teak.txt", bytes.as_slice())), Some("taxonomy"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
        assert!(json["created"].as_array().unwrap().is_empty());
        let persister = state.persister.lock().unwrap();
        assert_eq!(db::get_stats(persister.store().conn()).unwrap().taxa, 0);
    }

    #[tokio::test]
    async fn commit_writes_records() {
        let (router, state) = app(1 << 20);
        let bytes = fixture();
        let (status, json) = post(
            router,
            "/api/import?commit=true",
            multipart(Some(("teak.txt", bytes.as_slice())), Some("taxonomy")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["created"].as_array().unwrap().len(), 2);
        assert_eq!(json["stats"]["sections"], 2);
        let persister = state.persister.lock().unwrap();
        assert_eq!(db::get_stats(persister.store().conn()).unwrap().taxa, 2);
    }

    #[tokio::test]
    async fn error_statuses() {
        let (router, _) = app(10);
        let (status, json) =
            post(router, "/api/import", multipart(Some(("big.txt", &[b'a'; 64][..])), Some("taxonomy"))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["ok"], false);

        let (router, _) = app(1 << 20);
        let (status, _) =
            post(router, "/api/import", multipart(Some(("sheet.xls", &b"x"[..])), Some("taxonomy"))).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (router, _) = app(1 << 20);
        let (status, _) = post(router, "/api/import", multipart(None, Some("taxonomy"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (router, _) = app(1 << 20);
        let (status, json) =
            post(router, "/api/import", multipart(Some(("a.txt", &b"x"[..])), Some("plants"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("plants"));
    }

    #[test]
    fn unavailable_reader_maps_to_422() {
        let err = ImportError::Reader(ReaderError::Unavailable { format: "pdf", hint: "enable pdf" });
        assert_eq!(import_status(&err), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(import_status(&ImportError::MissingFile), StatusCode::BAD_REQUEST);
    }
}
