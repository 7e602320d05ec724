//! Axum router wiring for the operational endpoints.

use axum::{middleware, routing::get, Router};

use crate::{app_state::AppState, obs, ops};

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/metrics", get(ops::metrics))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/info", get(ops::info));

    let router = if state.http_metrics().is_some() {
        router.layer(middleware::from_fn_with_state(
            state.clone(),
            obs::track_requests,
        ))
    } else {
        router
    };

    router.with_state(state)
}
