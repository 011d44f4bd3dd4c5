use axum::{extract::State, http::StatusCode};
use uuid::Uuid;

use super::required_text;
use crate::{
    AppState,
    access::{self, Operation},
    auth::Principal,
    error::{AppError, ErrorBody},
    extract::{Json, Path},
    models::{Block, Chapter, ChapterOutline, CreateBlockRequest, CreateChapterRequest},
};

/// list_chapters
///
/// [Owner or member] The class outline: chapters in position order, each with its blocks.
#[utoipa::path(
    get,
    path = "/classes/{id}/chapters",
    params(("id" = Uuid, Path, description = "Class ID")),
    responses(
        (status = 200, description = "Outline", body = [ChapterOutline]),
        (status = 403, description = "Not a member", body = ErrorBody)
    )
)]
pub async fn list_chapters(
    principal: Principal,
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<Vec<ChapterOutline>>, AppError> {
    access::authorize_class_read(state.repo.as_ref(), &principal, class_id).await?;

    let chapters = state.repo.list_chapters(class_id).await?;
    let mut outline = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let blocks = state.repo.list_blocks(chapter.id).await?;
        outline.push(ChapterOutline { chapter, blocks });
    }
    Ok(Json(outline))
}

/// create_chapter
///
/// [Owner] Appends a chapter; `position` defaults to the end of the outline.
#[utoipa::path(
    post,
    path = "/classes/{id}/chapters",
    params(("id" = Uuid, Path, description = "Class ID")),
    request_body = CreateChapterRequest,
    responses(
        (status = 201, description = "Created", body = Chapter),
        (status = 403, description = "Not the owner", body = ErrorBody)
    )
)]
pub async fn create_chapter(
    principal: Principal,
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(payload): Json<CreateChapterRequest>,
) -> Result<(StatusCode, Json<Chapter>), AppError> {
    access::authorize_class_write(state.repo.as_ref(), &principal, class_id, Operation::Write)
        .await?;
    let title = required_text("title", &payload.title)?;

    let position = match payload.position {
        Some(position) => position,
        None => state.repo.list_chapters(class_id).await?.len() as i32,
    };
    let chapter = state.repo.create_chapter(class_id, &title, position).await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

/// create_block
///
/// [Owner of the chapter's class] Appends a block to a chapter.
#[utoipa::path(
    post,
    path = "/chapters/{id}/blocks",
    params(("id" = Uuid, Path, description = "Chapter ID")),
    request_body = CreateBlockRequest,
    responses(
        (status = 201, description = "Created", body = Block),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Chapter not found", body = ErrorBody)
    )
)]
pub async fn create_block(
    principal: Principal,
    State(state): State<AppState>,
    Path(chapter_id): Path<Uuid>,
    Json(payload): Json<CreateBlockRequest>,
) -> Result<(StatusCode, Json<Block>), AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    let chapter = state
        .repo
        .get_chapter(chapter_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("chapter {} not found", chapter_id)))?;
    access::authorize_class_write(
        state.repo.as_ref(),
        &principal,
        chapter.class_id,
        Operation::Write,
    )
    .await?;
    let title = required_text("title", &payload.title)?;

    let position = match payload.position {
        Some(position) => position,
        None => state.repo.list_blocks(chapter_id).await?.len() as i32,
    };
    let block = state.repo.create_block(chapter_id, &title, position).await?;
    Ok((StatusCode::CREATED, Json(block)))
}
