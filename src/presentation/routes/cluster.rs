use crate::{
    application::handlers::cluster::{
        get_decision, get_reconciler_status, get_snapshot, health_checker_handler,
        release_disruption, request_disruption,
    },
    AppState,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn cluster_router() -> Router<AppState> {
    Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/decision", get(get_decision))
        .route("/reconciler", get(get_reconciler_status))
}

pub fn disruption_router() -> Router<AppState> {
    Router::new()
        .route("/api/disruptions", post(request_disruption))
        .route("/api/disruptions/:permit_id", delete(release_disruption))
}

/// Full API with request tracing, ready for `with_state`.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/healthchecker", get(health_checker_handler))
        .nest("/api/cluster", cluster_router())
        .merge(disruption_router())
        .layer(TraceLayer::new_for_http())
}
