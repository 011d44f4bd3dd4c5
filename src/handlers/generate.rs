use axum::extract::State;

use crate::{
    AppState,
    auth::Principal,
    error::{AppError, ErrorBody},
    extract::Json,
    generation::{self, FlashcardRequest, QuizRequest},
    models::{FlashcardDeck, QuizContent},
};

/// generate_quiz
///
/// [User or guest] Generates a quiz from source text without storing it, so the client can
/// review it before creating a material.
#[utoipa::path(
    post,
    path = "/generate/quiz",
    request_body = QuizRequest,
    responses(
        (status = 200, description = "Generated quiz", body = QuizContent),
        (status = 401, description = "No user or guest identity", body = ErrorBody),
        (status = 502, description = "Generation failed", body = ErrorBody)
    )
)]
pub async fn generate_quiz(
    principal: Principal,
    State(state): State<AppState>,
    Json(payload): Json<QuizRequest>,
) -> Result<Json<QuizContent>, AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    generation::validate_request(&payload.source_text, payload.count)?;
    let quiz = state.generator.generate_quiz(payload).await?;
    Ok(Json(quiz))
}

#[utoipa::path(
    post,
    path = "/generate/flashcards",
    request_body = FlashcardRequest,
    responses(
        (status = 200, description = "Generated deck", body = FlashcardDeck),
        (status = 401, description = "No user or guest identity", body = ErrorBody),
        (status = 502, description = "Generation failed", body = ErrorBody)
    )
)]
pub async fn generate_flashcards(
    principal: Principal,
    State(state): State<AppState>,
    Json(payload): Json<FlashcardRequest>,
) -> Result<Json<FlashcardDeck>, AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    generation::validate_request(&payload.source_text, payload.count)?;
    let deck = state.generator.generate_flashcards(payload).await?;
    Ok(Json(deck))
}
