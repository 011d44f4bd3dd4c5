use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

use super::{optional_text, required_text};
use crate::{
    AppState,
    access::{self, Operation, SubmissionScope},
    auth::{AuthUser, Principal},
    error::{AppError, ErrorBody},
    extract::{Json, Path, Query},
    models::{
        Assignment, CreateAssignmentRequest, CreateSubmissionRequest, NewAssignment, Submission,
    },
};

/// ClassFilter
///
/// Optional `class_id` narrowing for the assignment and material listings.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClassFilter {
    pub class_id: Option<Uuid>,
}

/// The classes a listing may draw from: the single requested class (after a read check) or
/// the caller's whole visibility set. Anonymous callers see nothing, filtered or not.
pub(crate) async fn listing_scope(
    state: &AppState,
    principal: &Principal,
    class_id: Option<Uuid>,
) -> Result<HashSet<Uuid>, AppError> {
    if principal.is_anonymous() {
        return Ok(HashSet::new());
    }
    match class_id {
        Some(class_id) => {
            access::authorize_class_read(state.repo.as_ref(), principal, class_id).await?;
            Ok(HashSet::from([class_id]))
        }
        None => access::resolve_owned_class_ids(state.repo.as_ref(), principal).await,
    }
}

#[utoipa::path(
    get,
    path = "/assignments",
    params(ClassFilter),
    responses(
        (status = 200, description = "Visible assignments", body = [Assignment]),
        (status = 403, description = "Not a member of the requested class", body = ErrorBody)
    )
)]
pub async fn list_assignments(
    principal: Principal,
    State(state): State<AppState>,
    Query(filter): Query<ClassFilter>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    let class_ids = listing_scope(&state, &principal, filter.class_id).await?;
    if class_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let mut assignments = state.repo.list_assignments(&class_ids).await?;
    assignments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(assignments))
}

/// create_assignment
///
/// [Owner] Creates an assignment, optionally pinned to a chapter and a block inside it.
///
/// *Placement*: `block_id` requires `chapter_id`; the chapter must belong to `class_id` and
/// the block to the chapter. Any mismatch is a 400 and nothing is written.
#[utoipa::path(
    post,
    path = "/assignments",
    request_body = CreateAssignmentRequest,
    responses(
        (status = 201, description = "Created", body = Assignment),
        (status = 400, description = "Invalid input or mismatched chapter/block", body = ErrorBody),
        (status = 403, description = "Not the class owner", body = ErrorBody),
        (status = 404, description = "Class not found", body = ErrorBody)
    )
)]
pub async fn create_assignment(
    principal: Principal,
    State(state): State<AppState>,
    Json(payload): Json<CreateAssignmentRequest>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    let class = access::authorize_class_write(
        state.repo.as_ref(),
        &principal,
        payload.class_id,
        Operation::Write,
    )
    .await?;
    let title = required_text("title", &payload.title)?;

    if payload.block_id.is_some() && payload.chapter_id.is_none() {
        return Err(AppError::validation("block_id requires chapter_id"));
    }
    if let Some(chapter_id) = payload.chapter_id {
        let chapter = state
            .repo
            .get_chapter(chapter_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("chapter {} does not exist", chapter_id)))?;
        access::authorize_child_entity("chapter", chapter.class_id, class.id)?;

        if let Some(block_id) = payload.block_id {
            let block = state
                .repo
                .get_block(block_id)
                .await?
                .ok_or_else(|| AppError::validation(format!("block {} does not exist", block_id)))?;
            access::authorize_child_entity("block", block.chapter_id, chapter_id)?;
        }
    }

    let assignment = state
        .repo
        .create_assignment(NewAssignment {
            class_id: class.id,
            chapter_id: payload.chapter_id,
            block_id: payload.block_id,
            title,
            description: optional_text(payload.description),
            due_at: payload.due_at,
            owner: class.owner,
        })
        .await?;

    tracing::info!(assignment_id = %assignment.id, class_id = %class.id, "assignment created");
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// list_submissions
///
/// [Owner: all submissions | Member: own submissions only]
#[utoipa::path(
    get,
    path = "/assignments/{id}/submissions",
    params(("id" = Uuid, Path, description = "Assignment ID")),
    responses(
        (status = 200, description = "Submissions", body = [Submission]),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn list_submissions(
    principal: Principal,
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
) -> Result<Json<Vec<Submission>>, AppError> {
    let scope =
        access::authorize_submission_read(state.repo.as_ref(), &principal, assignment_id).await?;
    let only_user = match scope {
        SubmissionScope::All => None,
        SubmissionScope::OwnOnly(user_id) => Some(user_id),
    };
    let submissions = state.repo.list_submissions(assignment_id, only_user).await?;
    Ok(Json(submissions))
}

/// create_submission
///
/// [Signed-in member] Hands in work for an assignment. The owner does not submit.
#[utoipa::path(
    post,
    path = "/assignments/{id}/submissions",
    params(("id" = Uuid, Path, description = "Assignment ID")),
    request_body = CreateSubmissionRequest,
    responses(
        (status = 201, description = "Submitted", body = Submission),
        (status = 401, description = "Sign-in required", body = ErrorBody),
        (status = 403, description = "Not a member", body = ErrorBody)
    )
)]
pub async fn create_submission(
    user: AuthUser,
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
    Json(payload): Json<CreateSubmissionRequest>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let principal = Principal::from(user.clone());
    let (assignment, access) =
        access::authorize_assignment_read(state.repo.as_ref(), &principal, assignment_id).await?;
    if access.is_owner() {
        return Err(AppError::forbidden("the class owner cannot submit to their own assignment"));
    }
    if payload.content.trim().is_empty() {
        return Err(AppError::validation("content must not be empty"));
    }

    let submission = state
        .repo
        .create_submission(assignment.id, user.id, &payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Class;
    use crate::repository::Repository;
    use crate::test_support::TestApp;

    fn request(class: &Class, chapter_id: Option<Uuid>, block_id: Option<Uuid>) -> CreateAssignmentRequest {
        CreateAssignmentRequest {
            class_id: class.id,
            chapter_id,
            block_id,
            title: "Lab report".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_block_from_another_chapter_is_rejected_without_writing() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;
        let chapter_a = app
            .repo
            .create_chapter(class.id, "Cells", 0)
            .await
            .unwrap();
        let chapter_b = app
            .repo
            .create_chapter(class.id, "Genetics", 1)
            .await
            .unwrap();
        let block_in_b = app.repo.create_block(chapter_b.id, "DNA", 0).await.unwrap();

        let result = create_assignment(
            owner.clone().into(),
            State(app.state()),
            Json(request(&class, Some(chapter_a.id), Some(block_in_b.id))),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let orphan_block = create_assignment(
            owner.clone().into(),
            State(app.state()),
            Json(request(&class, None, Some(block_in_b.id))),
        )
        .await;
        assert!(matches!(orphan_block, Err(AppError::Validation(_))));
        assert_eq!(app.repo.assignment_count(), 0);

        let (status, Json(assignment)) = create_assignment(
            owner.into(),
            State(app.state()),
            Json(request(&class, Some(chapter_b.id), Some(block_in_b.id))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(assignment.owner, class.owner);
    }

    #[tokio::test]
    async fn test_chapter_from_another_class_is_rejected() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let mine = app.class_owned_by(owner.id, "Mine").await;
        let other_owner = app.user("other@example.com", "teacher");
        let theirs = app.class_owned_by(other_owner.id, "Theirs").await;
        let foreign_chapter = app
            .repo
            .create_chapter(theirs.id, "Private", 0)
            .await
            .unwrap();

        let result = create_assignment(
            owner.into(),
            State(app.state()),
            Json(request(&mine, Some(foreign_chapter.id), None)),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(app.repo.assignment_count(), 0);
    }

    #[tokio::test]
    async fn test_members_see_only_their_own_submissions() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let alice = app.user("alice@example.com", "student");
        let bob = app.user("bob@example.com", "student");
        let class = app.class_owned_by(owner.id, "Essay Writing").await;
        app.join(&class, alice.id).await;
        app.join(&class, bob.id).await;

        let (_, Json(assignment)) = create_assignment(
            owner.clone().into(),
            State(app.state()),
            Json(request(&class, None, None)),
        )
        .await
        .unwrap();

        for student in [&alice, &bob] {
            create_submission(
                student.clone(),
                State(app.state()),
                Path(assignment.id),
                Json(CreateSubmissionRequest {
                    content: format!("essay by {}", student.id),
                }),
            )
            .await
            .unwrap();
        }

        let Json(all) = list_submissions(owner.clone().into(), State(app.state()), Path(assignment.id))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let Json(own) = list_submissions(alice.clone().into(), State(app.state()), Path(assignment.id))
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].user_id, alice.id);

        let by_owner = create_submission(
            owner,
            State(app.state()),
            Path(assignment.id),
            Json(CreateSubmissionRequest {
                content: "answer key".into(),
            }),
        )
        .await;
        assert!(matches!(by_owner, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_listing_scopes_to_visible_classes() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let stranger = app.user("stranger@example.com", "student");
        let class = app.class_owned_by(owner.id, "Biology").await;
        create_assignment(owner.clone().into(), State(app.state()), Json(request(&class, None, None)))
            .await
            .unwrap();

        let Json(visible) = list_assignments(
            owner.into(),
            State(app.state()),
            Query(ClassFilter { class_id: None }),
        )
        .await
        .unwrap();
        assert_eq!(visible.len(), 1);

        let Json(none) = list_assignments(
            stranger.clone().into(),
            State(app.state()),
            Query(ClassFilter { class_id: None }),
        )
        .await
        .unwrap();
        assert!(none.is_empty());

        let denied = list_assignments(
            stranger.into(),
            State(app.state()),
            Query(ClassFilter {
                class_id: Some(class.id),
            }),
        )
        .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));
    }
}
