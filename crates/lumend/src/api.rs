use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::bus::{CommandBus, ServiceBus, ServiceData};
use crate::group::GroupDescriptor;
use crate::light::{EntityState, ServiceKind, LIGHT_DOMAIN};
use crate::store::StateStore;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Error body returned by any endpoint that can fail
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// One group in the /v1/groups listing: its configuration plus the
/// composite state currently published for it.
#[derive(Serialize)]
struct GroupStateResponse {
    entity_id: String,
    name: String,
    members: Vec<String>,
    state: Option<EntityState>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    store: Arc<StateStore>,
    bus: Arc<ServiceBus>,
    groups: Vec<GroupDescriptor>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/states
#[tracing::instrument(skip(state))]
async fn list_states(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/states request");

    let snapshot = state.store.snapshot();
    // BTreeMap keeps the listing stable across requests.
    let states: BTreeMap<String, EntityState> = snapshot
        .entities
        .iter()
        .map(|(entity_id, entity_state)| (entity_id.clone(), entity_state.clone()))
        .collect();

    (StatusCode::OK, Json(states))
}

/// Handler for GET /v1/states/:entity_id
#[tracing::instrument(skip(state))]
async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Response {
    tracing::debug!("Handling /v1/states/{} request", entity_id);

    match state.store.get(&entity_id) {
        Some(entity_state) => (StatusCode::OK, Json(entity_state)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("entity '{}' has no state", entity_id),
            }),
        )
            .into_response(),
    }
}

/// Handler for PUT /v1/states/:entity_id
///
/// Writes a member state directly into the store, the same path an
/// integration would use. Useful for feeding groups from external sources
/// and for poking at a running daemon.
#[tracing::instrument(skip(state, entity_state))]
async fn put_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(entity_state): Json<EntityState>,
) -> impl IntoResponse {
    tracing::debug!("Handling state update for {}", entity_id);

    state.store.set(&entity_id, entity_state);
    StatusCode::NO_CONTENT
}

/// Handler for DELETE /v1/states/:entity_id
#[tracing::instrument(skip(state))]
async fn delete_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Response {
    tracing::debug!("Handling state removal for {}", entity_id);

    if state.store.remove(&entity_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("entity '{}' has no state", entity_id),
            }),
        )
            .into_response()
    }
}

/// Handler for GET /v1/groups
#[tracing::instrument(skip(state))]
async fn list_groups(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/groups request");

    let snapshot = state.store.snapshot();
    let groups: Vec<GroupStateResponse> = state
        .groups
        .iter()
        .map(|descriptor| GroupStateResponse {
            entity_id: descriptor.entity_id.clone(),
            name: descriptor.name.clone(),
            members: descriptor.members.clone(),
            state: snapshot.get(&descriptor.entity_id).cloned(),
        })
        .collect();

    (StatusCode::OK, Json(groups))
}

/// Handler for POST /v1/services/light/:service
///
/// Body is the service data map; `entity_id` in the body selects the
/// targets. Unknown services are rejected before touching the bus.
#[tracing::instrument(skip(state, data))]
async fn call_service(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(data): Json<ServiceData>,
) -> Response {
    tracing::debug!("Handling light.{} service call", service);

    if service.parse::<ServiceKind>().is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("unknown light service '{}'", service),
            }),
        )
            .into_response();
    }

    match state.bus.invoke(LIGHT_DOMAIN, &service, data).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/states", get(list_states))
        .route(
            "/v1/states/:entity_id",
            get(get_state).put(put_state).delete(delete_state),
        )
        .route("/v1/groups", get(list_groups))
        .route("/v1/services/light/:service", post(call_service))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8645)
/// * `store` - Entity state store backing the states and groups endpoints
/// * `bus` - Service bus that light service calls are dispatched onto
/// * `groups` - Configured groups, as listed by /v1/groups
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
///
/// # Returns
/// Returns Ok(()) if the server shuts down gracefully, or an error if startup fails
pub async fn serve(
    listen: String,
    port: u16,
    store: Arc<StateStore>,
    bus: Arc<ServiceBus>,
    groups: Vec<GroupDescriptor>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState {
        version,
        store,
        bus,
        groups,
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
