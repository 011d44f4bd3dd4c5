use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Endpoints that only make sense for a signed-in user. The whole router sits behind the
/// `AuthUser` middleware, so guests and anonymous callers get 401 before any handler runs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /classes/join
        // Redeems a join code; the caller becomes a 'student' member.
        .route("/classes/join", post(handlers::classes::join_class))
        // GET/PUT /user/role
        // Reads or switches the caller's profile role ('student' | 'teacher').
        .route(
            "/user/role",
            get(handlers::users::get_role).put(handlers::users::update_role),
        )
}
