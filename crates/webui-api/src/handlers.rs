//! REST API handlers.
//!
//! Each handler reads or writes through `StateStore` and answers with the
//! `{ success, data?, error? }` envelope. Writes only ever touch `WebUi`
//! objects; the controller owns the children.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use webui_controller::builder::CHILD_PREFIX;
use webui_state::*;

use crate::ApiState;

/// Longest name a child object may carry.
const MAX_NAME_LEN: usize = 63;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn store_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound { .. } => StatusCode::NOT_FOUND,
        StateError::AlreadyExists { .. } | StateError::Conflict { .. } => StatusCode::CONFLICT,
        _ => {
            warn!(error = %e, "store request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

// ── Request bodies ─────────────────────────────────────────────

/// Body of a create or apply request.
#[derive(Debug, Deserialize)]
pub struct WebUiRequest {
    #[serde(default)]
    pub metadata: RequestMeta,
    pub spec: WebUiSpec,
}

/// Caller-supplied metadata. Path segments win over these fields.
#[derive(Debug, Default, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub name: Option<String>,
    /// Expected current version for an optimistic update.
    #[serde(default)]
    pub resource_version: Option<u64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn validate_label(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "{field} {value:?} may contain only lowercase letters, digits and '-'"
        ));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(format!("{field} {value:?} must start and end with a letter or digit"));
    }
    Ok(())
}

fn validate(namespace: &str, name: &str, spec: &WebUiSpec) -> Result<(), String> {
    validate_label("namespace", namespace)?;
    if namespace.len() > MAX_NAME_LEN {
        return Err(format!("namespace exceeds {MAX_NAME_LEN} characters"));
    }
    validate_label("name", name)?;
    if CHILD_PREFIX.len() + name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name exceeds {} characters",
            MAX_NAME_LEN - CHILD_PREFIX.len()
        ));
    }
    if spec.image.trim().is_empty() {
        return Err("spec.image must not be empty".to_string());
    }
    Ok(())
}

fn request_body(body: Result<Json<WebUiRequest>, JsonRejection>) -> Result<WebUiRequest, Response> {
    body.map(|Json(req)| req)
        .map_err(|e| error_response(&e.body_text(), StatusCode::BAD_REQUEST))
}

fn to_webui(namespace: &str, name: &str, req: WebUiRequest) -> WebUi {
    let mut webui = WebUi::new(namespace, name, req.spec);
    webui.metadata.labels = req.metadata.labels;
    webui
}

// ── WebUis ─────────────────────────────────────────────────────

/// GET /api/v1/webuis
pub async fn list_all_webuis(State(state): State<ApiState>) -> Response {
    match state.store.list::<WebUi>() {
        Ok(webuis) => ApiResponse::ok(webuis).into_response(),
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/namespaces/{ns}/webuis
pub async fn list_webuis(State(state): State<ApiState>, Path(ns): Path<String>) -> Response {
    match state.store.list_namespaced::<WebUi>(&ns) {
        Ok(webuis) => ApiResponse::ok(webuis).into_response(),
        Err(e) => store_error(&e),
    }
}

/// POST /api/v1/namespaces/{ns}/webuis
pub async fn create_webui(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
    body: Result<Json<WebUiRequest>, JsonRejection>,
) -> Response {
    let req = match request_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let Some(name) = req.metadata.name.clone() else {
        return error_response("metadata.name is required", StatusCode::BAD_REQUEST);
    };
    if let Err(msg) = validate(&ns, &name, &req.spec) {
        return error_response(&msg, StatusCode::BAD_REQUEST);
    }

    match state.store.create(&to_webui(&ns, &name, req)) {
        Ok(webui) => {
            info!(key = %webui.metadata.key(), "webui created");
            (StatusCode::CREATED, ApiResponse::ok(webui)).into_response()
        }
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/namespaces/{ns}/webuis/{name}
pub async fn get_webui(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.store.get::<WebUi>(&ObjectKey::new(ns, name)) {
        Ok(webui) => ApiResponse::ok(webui).into_response(),
        Err(e) => store_error(&e),
    }
}

/// PUT /api/v1/namespaces/{ns}/webuis/{name}
///
/// Creates the object if absent. Otherwise replaces spec and labels, checked
/// against `metadata.resource_version` when the caller supplies one.
pub async fn apply_webui(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    body: Result<Json<WebUiRequest>, JsonRejection>,
) -> Response {
    let req = match request_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(msg) = validate(&ns, &name, &req.spec) {
        return error_response(&msg, StatusCode::BAD_REQUEST);
    }

    let key = ObjectKey::new(ns.as_str(), name.as_str());
    let expected = req.metadata.resource_version;
    let mut webui = to_webui(&ns, &name, req);

    let current = match state.store.get::<WebUi>(&key) {
        Ok(current) => Some(current),
        Err(e) if e.is_not_found() => None,
        Err(e) => return store_error(&e),
    };

    match current {
        None => match state.store.create(&webui) {
            Ok(created) => {
                info!(%key, "webui created");
                (StatusCode::CREATED, ApiResponse::ok(created)).into_response()
            }
            Err(e) => store_error(&e),
        },
        Some(current) => {
            webui.metadata.resource_version =
                expected.unwrap_or(current.metadata.resource_version);
            match state.store.update(&webui) {
                Ok(updated) => {
                    info!(%key, version = updated.metadata.resource_version, "webui updated");
                    ApiResponse::ok(updated).into_response()
                }
                Err(e) => store_error(&e),
            }
        }
    }
}

/// DELETE /api/v1/namespaces/{ns}/webuis/{name}
pub async fn delete_webui(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    let key = ObjectKey::new(ns, name);
    match state.store.delete::<WebUi>(&key) {
        Ok(()) => {
            info!(%key, "webui deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/namespaces/{ns}/webuis/{name}/status
pub async fn get_status(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.statuses.get(&ObjectKey::new(ns, name)).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("no reconcile recorded", StatusCode::NOT_FOUND),
    }
}

// ── Children ───────────────────────────────────────────────────

/// GET /api/v1/namespaces/{ns}/workloads/{name}
pub async fn get_workload(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.store.get::<Workload>(&ObjectKey::new(ns, name)) {
        Ok(workload) => ApiResponse::ok(workload).into_response(),
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/namespaces/{ns}/contentstores/{name}
pub async fn get_content_store(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.store.get::<ContentStore>(&ObjectKey::new(ns, name)) {
        Ok(content) => ApiResponse::ok(content).into_response(),
        Err(e) => store_error(&e),
    }
}

/// GET /healthz
pub async fn healthz() -> Response {
    ApiResponse::ok("ok").into_response()
}
