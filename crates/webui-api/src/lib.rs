//! webui-api: REST API for web UI objects.
//!
//! `WebUi` objects are the only writable resource. Their children are
//! exposed read-only so operators can see what the controller produced, and
//! the status route shows the most recent reconcile result.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/webuis` | List all web UIs |
//! | GET | `/api/v1/namespaces/{ns}/webuis` | List web UIs in a namespace |
//! | POST | `/api/v1/namespaces/{ns}/webuis` | Create a web UI |
//! | GET | `/api/v1/namespaces/{ns}/webuis/{name}` | Get a web UI |
//! | PUT | `/api/v1/namespaces/{ns}/webuis/{name}` | Create or update a web UI |
//! | DELETE | `/api/v1/namespaces/{ns}/webuis/{name}` | Delete a web UI |
//! | GET | `/api/v1/namespaces/{ns}/webuis/{name}/status` | Last reconcile result |
//! | GET | `/api/v1/namespaces/{ns}/workloads/{name}` | Get a workload |
//! | GET | `/api/v1/namespaces/{ns}/contentstores/{name}` | Get a content store |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use webui_controller::StatusBoard;
use webui_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub statuses: StatusBoard,
}

/// Build the complete API router.
pub fn build_router(store: StateStore, statuses: StatusBoard) -> Router {
    let state = ApiState { store, statuses };

    let api_routes = Router::new()
        .route("/webuis", get(handlers::list_all_webuis))
        .route(
            "/namespaces/{ns}/webuis",
            get(handlers::list_webuis).post(handlers::create_webui),
        )
        .route(
            "/namespaces/{ns}/webuis/{name}",
            get(handlers::get_webui)
                .put(handlers::apply_webui)
                .delete(handlers::delete_webui),
        )
        .route("/namespaces/{ns}/webuis/{name}/status", get(handlers::get_status))
        .route("/namespaces/{ns}/workloads/{name}", get(handlers::get_workload))
        .route("/namespaces/{ns}/contentstores/{name}", get(handlers::get_content_store))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
