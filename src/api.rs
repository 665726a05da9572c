// Branch Directory - REST API with Axum
//
// Thin transport over the record store and the interchange engine.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::branch::{Branch, BranchFields, BranchId};
use crate::dataset::{read_dataset, utf8_prefix, DatasetFormat};
use crate::db::BranchRepository;
use crate::error::{InterchangeError, StoreError};
use crate::export::{export_snapshot, ExportFormat};
use crate::import::{apply_rows, ImportReport};
use crate::staging::StagedUpload;

/// Multipart field carrying the spreadsheet
pub const UPLOAD_FIELD: &str = "file";

/// Number of export fields cut to fit an xlsx cell (absent when none)
pub const TRUNCATED_HEADER: &str = "x-export-truncated-fields";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BranchRepository>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// NotFound → 404, anything else is logged and reported with `context`
    fn store(context: &str, e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, format!("Branch {} not found", id))
            }
            other => {
                error!(error = %other, "{}", context);
                Self::internal(context)
            }
        }
    }

    fn interchange(context: &str, e: InterchangeError) -> Self {
        match e {
            InterchangeError::Validation(msg) => {
                warn!(reason = %msg, "rejected dataset");
                Self::bad_request(msg)
            }
            other => {
                error!(error = %other, "{}", context);
                Self::internal(context)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: BranchId,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    format: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": crate::VERSION }))
}

/// Run a store call on the blocking pool; SQLite work never sits on the
/// async runtime threads
async fn with_store<T, F>(state: &AppState, context: &'static str, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn BranchRepository) -> Result<T, StoreError> + Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| {
            error!(error = %e, "store task failed");
            ApiError::internal(context)
        })?
        .map_err(|e| ApiError::store(context, e))
}

/// GET /api/branches - Full list
async fn list_branches(State(state): State<AppState>) -> Result<Json<Vec<Branch>>, ApiError> {
    with_store(&state, "Failed to fetch branches", |store| store.list())
        .await
        .map(Json)
}

/// GET /api/branches/:id
async fn get_branch(
    State(state): State<AppState>,
    Path(id): Path<BranchId>,
) -> Result<Json<Branch>, ApiError> {
    with_store(&state, "Failed to fetch branch", move |store| store.get(id))
        .await
        .map(Json)
}

/// POST /api/branches - Create one record
async fn create_branch(
    State(state): State<AppState>,
    Json(fields): Json<BranchFields>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let id = with_store(&state, "Failed to add branch", move |store| store.create(&fields)).await?;

    Ok(Json(CreatedResponse { id }))
}

/// PUT /api/branches/:id - Replace all fields
async fn update_branch(
    State(state): State<AppState>,
    Path(id): Path<BranchId>,
    Json(fields): Json<BranchFields>,
) -> Result<StatusCode, ApiError> {
    with_store(&state, "Failed to update branch", move |store| {
        store.update(id, &fields)
    })
    .await?;

    Ok(StatusCode::OK)
}

/// DELETE /api/branches/:id
async fn delete_branch(
    State(state): State<AppState>,
    Path(id): Path<BranchId>,
) -> Result<StatusCode, ApiError> {
    with_store(&state, "Failed to delete branch", move |store| store.delete(id)).await?;

    Ok(StatusCode::OK)
}

/// POST /api/import - Multipart spreadsheet upload, one record per row
async fn import_branches(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let staged = stage_upload(&state, &mut multipart).await?;
    info!(bytes = staged.len(), format = ?staged.format(), "upload staged");

    let store = state.store.clone();
    let report = tokio::task::spawn_blocking(move || {
        let parsed = read_dataset(staged.path(), staged.format());

        // parsing is done; the staged file goes away whatever the outcome
        if let Err(e) = staged.release() {
            warn!(error = %e, "Error deleting staged upload");
        }

        parsed.map(|dataset| apply_rows(store.as_ref(), &dataset.rows))
    })
    .await
    .map_err(|e| {
        error!(error = %e, "import task failed");
        ApiError::internal("Failed to import branches")
    })?
    .map_err(|e| ApiError::interchange("Failed to import branches", e))?;

    Ok(Json(report))
}

/// Stream the `file` field into a staged upload; other fields are skipped
async fn stage_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<StagedUpload, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let first = field
            .chunk()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?
            .unwrap_or_default();

        let head = &first[..first.len().min(512)];
        let format = DatasetFormat::detect(file_name.as_deref(), utf8_prefix(head))
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let mut staged = StagedUpload::create(&state.upload_dir, format).map_err(|e| {
            error!(error = %e, dir = %state.upload_dir.display(), "cannot stage upload");
            ApiError::internal("Failed to stage upload")
        })?;

        let mut chunk = Some(first);
        while let Some(bytes) = chunk {
            staged
                .write_chunk(&bytes)
                .map_err(|e| ApiError::internal(format!("Failed to stage upload: {}", e)))?;
            chunk = field
                .chunk()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        }
        staged
            .finish()
            .map_err(|e| ApiError::internal(format!("Failed to stage upload: {}", e)))?;

        return Ok(staged);
    }

    Err(ApiError::bad_request(format!(
        "missing multipart field '{}'",
        UPLOAD_FIELD
    )))
}

/// GET /api/export - Spreadsheet download of the current snapshot
async fn export_branches(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        None => ExportFormat::default(),
        Some(value) => ExportFormat::parse(value)
            .ok_or_else(|| ApiError::bad_request(format!("unsupported export format '{}'", value)))?,
    };

    let store = state.store.clone();
    let artifact = tokio::task::spawn_blocking(move || export_snapshot(store.as_ref(), format))
        .await
        .map_err(|e| {
            error!(error = %e, "export task failed");
            ApiError::internal("Failed to export branches")
        })?
        .map_err(|e| ApiError::interchange("Failed to export branches", e))?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    let mut response = (
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response();

    if !artifact.truncated.is_empty() {
        response
            .headers_mut()
            .insert(TRUNCATED_HEADER, HeaderValue::from(artifact.truncated.len()));
    }
    Ok(response)
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/branches", get(list_branches).post(create_branch))
        .route(
            "/branches/:id",
            get(get_branch).put(update_branch).delete(delete_branch),
        )
        .route("/import", post(import_branches))
        .route("/export", get(export_branches))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::export::XLSX_CONTENT_TYPE;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "branch-directory-test-boundary";

    struct TestApp {
        router: Router,
        store: Arc<SqliteStore>,
        upload_dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let upload_dir = tempfile::tempdir().unwrap();
        let state = AppState {
            store: store.clone(),
            upload_dir: upload_dir.path().to_path_buf(),
            max_upload_bytes: 1024 * 1024,
        };
        TestApp {
            router: router(state),
            store,
            upload_dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn upload_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/import")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn staged_files(app: &TestApp) -> usize {
        std::fs::read_dir(app.upload_dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_crud_scenario() {
        let app = test_app();

        let (status, body) = send(
            &app.router,
            json_request(
                "POST",
                "/api/branches",
                serde_json::json!({"name": "Downtown", "location": "5th Ave", "manager": "Alice"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let created: CreatedResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.id, 1);

        let (_, body) = send(&app.router, empty_request("GET", "/api/branches")).await;
        let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            listed,
            serde_json::json!([{"id": 1, "name": "Downtown", "location": "5th Ave", "manager": "Alice"}])
        );

        let (status, body) = send(
            &app.router,
            json_request(
                "PUT",
                "/api/branches/1",
                serde_json::json!({"name": "Downtown West", "location": "5th Ave", "manager": "Bob"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (_, body) = send(&app.router, empty_request("GET", "/api/branches/1")).await;
        let fetched: Branch = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched.manager.as_deref(), Some("Bob"));
        assert_eq!(fetched.name.as_deref(), Some("Downtown West"));

        let (status, _) = send(&app.router, empty_request("DELETE", "/api/branches/1")).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app.router, empty_request("GET", "/api/branches")).await;
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_missing_ids_are_404() {
        let app = test_app();

        let (status, body) = send(
            &app.router,
            json_request("PUT", "/api/branches/42", serde_json::json!({"name": "Ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "Branch 42 not found");

        let (status, _) = send(&app.router, empty_request("DELETE", "/api/branches/42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app.router, empty_request("GET", "/api/branches/42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(app.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_csv_upload_reports_and_cleans_up() {
        let app = test_app();
        let csv = b"name,location,manager\nDowntown,5th Ave,Alice\n,Pier 3,\nUptown,Main St,Bob\n";

        let (status, body) = send(&app.router, upload_request("file", "branches.csv", csv)).await;

        assert_eq!(status, StatusCode::OK);
        let report: ImportReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.applied, 3);
        assert!(report.failed.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].row_number, 3);

        assert_eq!(app.store.count().unwrap(), 3);
        assert_eq!(staged_files(&app), 0);
    }

    #[tokio::test]
    async fn test_import_garbage_is_400_and_cleans_up() {
        let app = test_app();

        let (status, _) = send(
            &app.router,
            upload_request("file", "branches.xlsx", b"not really a workbook"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.store.count().unwrap(), 0);
        assert_eq!(staged_files(&app), 0);
    }

    #[tokio::test]
    async fn test_import_without_file_field_is_400() {
        let app = test_app();

        let (status, _) = send(
            &app.router,
            upload_request("attachment", "branches.csv", b"name\nA\n"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_export_then_reimport_doubles() {
        let app = test_app();
        app.store
            .create(&BranchFields::new("Downtown", "5th Ave", "Alice"))
            .unwrap();
        app.store
            .create(&BranchFields::new("Uptown", "Main St", "Bob"))
            .unwrap();

        let resp = app
            .router
            .clone()
            .oneshot(empty_request("GET", "/api/export"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            XLSX_CONTENT_TYPE
        );
        assert!(resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("branches.xlsx"));
        let artifact = resp.into_body().collect().await.unwrap().to_bytes();

        let (status, _) = send(&app.router, upload_request("file", "branches.xlsx", &artifact)).await;
        assert_eq!(status, StatusCode::OK);

        let all = app.store.list().unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[2].fields(), all[0].fields());
        assert_eq!(all[3].fields(), all[1].fields());
    }

    #[tokio::test]
    async fn test_export_csv_and_unknown_format() {
        let app = test_app();
        app.store
            .create(&BranchFields::new("Downtown", "5th Ave", "Alice"))
            .unwrap();

        let (status, body) = send(&app.router, empty_request("GET", "/api/export?format=csv")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "id,name,location,manager\n1,Downtown,5th Ave,Alice\n"
        );

        let (status, _) = send(&app.router, empty_request("GET", "/api/export?format=pdf")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_export_reports_truncated_fields() {
        let app = test_app();
        app.store
            .create(&BranchFields {
                name: Some("n".repeat(40_000)),
                location: None,
                manager: Some("m".repeat(33_000)),
            })
            .unwrap();

        let resp = app
            .router
            .clone()
            .oneshot(empty_request("GET", "/api/export"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[TRUNCATED_HEADER].to_str().unwrap(), "2");

        let (status, _) = send(&app.router, empty_request("GET", "/api/export?format=csv")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_all_land() {
        let app = test_app();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let router = app.router.clone();
                tokio::spawn(async move {
                    let body = serde_json::json!({ "name": format!("Branch {}", i) });
                    send(&router, json_request("POST", "/api/branches", body)).await
                })
            })
            .collect();

        for handle in handles {
            let (status, _) = handle.await.unwrap();
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(app.store.count().unwrap(), 16);
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app.router, empty_request("GET", "/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }
}
