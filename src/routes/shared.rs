use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Shared Router Module
///
/// Endpoints open to signed-in users and guests alike. Each handler extracts a `Principal`
/// and authorizes it against the owning class; anonymous callers are turned away there.
pub fn shared_routes() -> Router<AppState> {
    Router::new()
        // --- Classes ---
        // GET lists the caller's visible classes; POST creates one with a fresh join code.
        .route(
            "/classes",
            get(handlers::classes::list_classes).post(handlers::classes::create_class),
        )
        // GET for owner or member; DELETE archives (owner only).
        .route(
            "/classes/{id}",
            get(handlers::classes::get_class).delete(handlers::classes::archive_class),
        )
        .route(
            "/classes/{id}/members",
            get(handlers::members::list_members).post(handlers::members::invite_member),
        )
        .route(
            "/classes/{id}/members/{user_id}",
            delete(handlers::members::remove_member),
        )
        // --- Outline ---
        .route(
            "/classes/{id}/chapters",
            get(handlers::chapters::list_chapters).post(handlers::chapters::create_chapter),
        )
        .route("/chapters/{id}/blocks", post(handlers::chapters::create_block))
        // --- Assignments ---
        .route(
            "/assignments",
            get(handlers::assignments::list_assignments)
                .post(handlers::assignments::create_assignment),
        )
        // POST takes an `AuthUser`: only signed-in members submit.
        .route(
            "/assignments/{id}/submissions",
            get(handlers::assignments::list_submissions)
                .post(handlers::assignments::create_submission),
        )
        // --- Materials ---
        .route(
            "/materials",
            get(handlers::materials::list_materials).post(handlers::materials::create_material),
        )
        .route(
            "/materials/{id}",
            get(handlers::materials::get_material).delete(handlers::materials::delete_material),
        )
        // --- Generation (not persisted) ---
        .route("/generate/quiz", post(handlers::generate::generate_quiz))
        .route(
            "/generate/flashcards",
            post(handlers::generate::generate_flashcards),
        )
}
