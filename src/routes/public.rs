use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without any identity: the health probe and account registration.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers; returns "ok" without touching dependencies.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates the provider account and mirrors it into `public.profiles`.
        .route("/register", post(handlers::users::register_user))
}
