use axum::{
    Router,
    body::Body,
    extract::{FromRef, Request, State},
    http::{HeaderName, header},
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod generation;
pub mod handlers;
pub mod identity;
pub mod join_code;
pub mod models;
pub mod repository;

// Routers split by access tier (public, user-or-guest, signed-in).
pub mod routes;
use routes::{authenticated, public, shared};

#[cfg(test)]
pub(crate) mod test_support;

// --- Public Re-exports ---

pub use config::{AppConfig, Env};
pub use error::AppError;
pub use generation::GeneratorState;
pub use identity::IdentityState;
pub use join_code::CodeSourceState;
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};

use auth::AuthUser;
use error::ErrorDetail;

/// ApiDoc
///
/// OpenAPI document assembled from every `#[utoipa::path]` handler and `ToSchema` model,
/// served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::users::register_user, handlers::users::get_role, handlers::users::update_role,
        handlers::classes::list_classes, handlers::classes::create_class,
        handlers::classes::get_class, handlers::classes::archive_class,
        handlers::classes::join_class,
        handlers::members::list_members, handlers::members::invite_member,
        handlers::members::remove_member,
        handlers::chapters::list_chapters, handlers::chapters::create_chapter,
        handlers::chapters::create_block,
        handlers::assignments::list_assignments, handlers::assignments::create_assignment,
        handlers::assignments::list_submissions, handlers::assignments::create_submission,
        handlers::materials::list_materials, handlers::materials::create_material,
        handlers::materials::get_material, handlers::materials::delete_material,
        handlers::generate::generate_quiz, handlers::generate::generate_flashcards
    ),
    components(
        schemas(
            models::User, models::Owner, models::Class, models::ClassRole, models::ClassMember,
            models::MemberProfile, models::Chapter, models::Block, models::ChapterOutline,
            models::Assignment, models::Submission, models::Note, models::QuizQuestion,
            models::QuizContent, models::Flashcard, models::FlashcardDeck, models::Concept,
            models::MaterialType, models::MaterialContent, models::Material,
            models::CreateClassRequest, models::JoinClassRequest, models::InviteMemberRequest,
            models::CreateChapterRequest, models::CreateBlockRequest,
            models::CreateAssignmentRequest, models::CreateSubmissionRequest,
            models::InlineContent, models::GenerationOptions, models::CreateMaterialRequest,
            models::UpdateRoleRequest, models::RoleResponse, models::RegisterUserRequest,
            generation::QuizRequest, generation::FlashcardRequest, error::ErrorBody,
        )
    ),
    tags(
        (name = "classroom-portal", description = "Classroom Portal API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single shared container of services and configuration, cloned into every request.
/// Handlers receive collaborators from here, never from globals.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    /// Hosted auth provider: sign-up and e-mail lookup.
    pub identity: IdentityState,
    /// Hosted generative model.
    pub generator: GeneratorState,
    /// Join-code source; swapped for a scripted one in tests.
    pub codes: CodeSourceState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for GeneratorState {
    fn from_ref(app_state: &AppState) -> GeneratorState {
        app_state.generator.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Gate for `authenticated_routes`: the `AuthUser` extractor rejects requests without a
/// valid session with 401 before any handler runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// expose_error_detail
///
/// In `Env::Local`, copies the internal `ErrorDetail` of a failed response into a `detail`
/// field of the JSON body. Production bodies never carry it.
async fn expose_error_detail(
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if config.env != Env::Local {
        return response;
    }
    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    let mut value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    if let Some(object) = value.as_object_mut() {
        object.insert("detail".to_string(), serde_json::Value::String(detail));
    }
    match serde_json::to_vec(&value) {
        Ok(body) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(body))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// create_router
///
/// Assembles the routing tree, applies the scoped auth layer and the global observability
/// stack, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: no identity required.
        .merge(public::public_routes())
        // Shared Routes: user or guest; handlers run the access guard.
        .merge(shared::shared_routes())
        // Authenticated Routes: signed-in users only.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            expose_error_detail,
        ))
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the per-request span carrying method, URI and the `x-request-id`, so every log
/// line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
