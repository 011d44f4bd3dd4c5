use axum::{extract::State, http::StatusCode};
use uuid::Uuid;

use super::{optional_text, required_text};
use crate::{
    AppState,
    access::{self, Operation},
    auth::{AuthUser, Principal},
    error::{AppError, ErrorBody},
    extract::{Json, Path},
    join_code,
    models::{Class, ClassMember, ClassRole, CreateClassRequest, JoinClassRequest},
    repository::RepoError,
};

/// list_classes
///
/// Classes the caller owns or belongs to, newest first. Guests see only the classes created
/// under their guest id; anonymous callers get an empty list.
#[utoipa::path(
    get,
    path = "/classes",
    params(("guestId" = Option<String>, Query, description = "Guest id for callers without a session")),
    responses((status = 200, description = "Visible classes", body = [Class]))
)]
pub async fn list_classes(
    principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Class>>, AppError> {
    let ids = access::resolve_owned_class_ids(state.repo.as_ref(), &principal).await?;
    if ids.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let mut classes = state.repo.get_classes(&ids).await?;
    classes.retain(|c| !c.is_archived);
    classes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(classes))
}

/// create_class
///
/// Creates a class owned by the caller and allocates its join code. A guest without the
/// `x-guest-id` header may pass `guestId` in the body instead.
#[utoipa::path(
    post,
    path = "/classes",
    request_body = CreateClassRequest,
    responses(
        (status = 201, description = "Created", body = Class),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "No user or guest identity", body = ErrorBody),
        (status = 500, description = "Join code allocation exhausted", body = ErrorBody)
    )
)]
pub async fn create_class(
    principal: Principal,
    State(state): State<AppState>,
    Json(payload): Json<CreateClassRequest>,
) -> Result<(StatusCode, Json<Class>), AppError> {
    let principal = principal.or_guest(payload.guest_id.as_deref())?;
    let owner = access::owner_of(&principal)?;
    let name = required_text("name", &payload.name)?;

    let class = join_code::create_class_with_code(
        state.repo.as_ref(),
        state.codes.as_ref(),
        name,
        optional_text(payload.description),
        owner,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(class)))
}

#[utoipa::path(
    get,
    path = "/classes/{id}",
    params(("id" = Uuid, Path, description = "Class ID")),
    responses(
        (status = 200, description = "Found", body = Class),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_class(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Class>, AppError> {
    let access = access::authorize_class_read(state.repo.as_ref(), &principal, id).await?;
    Ok(Json(access.class))
}

/// archive_class
///
/// Owner-only soft delete. The join code is released for reuse and the class disappears
/// from every listing.
#[utoipa::path(
    delete,
    path = "/classes/{id}",
    params(("id" = Uuid, Path, description = "Class ID")),
    responses(
        (status = 204, description = "Archived"),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn archive_class(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    access::authorize_class_write(state.repo.as_ref(), &principal, id, Operation::Delete).await?;
    if state.repo.archive_class(id).await? {
        tracing::info!(class_id = %id, "class archived");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("class {} not found", id)))
    }
}

/// join_class
///
/// Redeems a join code for the signed-in user, who becomes a `student` member. Guests
/// cannot join (the `AuthUser` extractor rejects them).
#[utoipa::path(
    post,
    path = "/classes/join",
    request_body = JoinClassRequest,
    responses(
        (status = 201, description = "Joined", body = ClassMember),
        (status = 400, description = "Already a member, or the caller owns the class", body = ErrorBody),
        (status = 404, description = "No active class uses this code", body = ErrorBody)
    )
)]
pub async fn join_class(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<JoinClassRequest>,
) -> Result<(StatusCode, Json<ClassMember>), AppError> {
    let code = join_code::normalize_code(&payload.class_code);
    if !join_code::is_valid_code(&code) {
        return Err(AppError::validation(
            "class_code must be 6 characters of A-Z and 0-9",
        ));
    }

    let class = state
        .repo
        .find_class_by_code(&code)
        .await?
        .ok_or_else(|| AppError::not_found("no active class uses this code"))?;

    let principal = Principal::from(user.clone());
    if access::is_owner(&principal, &class.owner) {
        return Err(AppError::IsOwner);
    }
    if state.repo.get_membership(class.id, user.id).await?.is_some() {
        return Err(AppError::AlreadyMember);
    }

    match state
        .repo
        .add_member(class.id, user.id, ClassRole::Student)
        .await
    {
        Ok(member) => {
            tracing::info!(class_id = %class.id, user_id = %user.id, "joined class by code");
            Ok((StatusCode::CREATED, Json(member)))
        }
        // A concurrent join by the same user won the insert.
        Err(RepoError::UniqueViolation(_)) => Err(AppError::AlreadyMember),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;

    #[tokio::test]
    async fn test_guest_create_uses_body_guest_id() {
        let app = TestApp::new();
        let payload = CreateClassRequest {
            name: " Art ".into(),
            description: Some("  ".into()),
            guest_id: Some("guest-7".into()),
        };

        let (status, Json(class)) =
            create_class(Principal::Anonymous, State(app.state()), Json(payload))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(class.name, "Art");
        assert_eq!(class.description, None);
        assert!(join_code::is_valid_code(&class.class_code));
        assert_eq!(class.owner.guest_id(), Some("guest-7"));
    }

    #[tokio::test]
    async fn test_anonymous_create_is_unauthorized() {
        let app = TestApp::new();
        let payload = CreateClassRequest {
            name: "Art".into(),
            ..Default::default()
        };
        let result = create_class(Principal::Anonymous, State(app.state()), Json(payload)).await;
        assert!(matches!(result, Err(AppError::Unauthorized)));
        assert_eq!(app.repo.class_count(), 0);
    }

    #[tokio::test]
    async fn test_join_outcomes() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let student = app.user("student@example.com", "student");
        let class = app.class_owned_by(owner.id, "Biology").await;

        let join = |user: AuthUser, code: &str| {
            join_class(
                user,
                State(app.state()),
                Json(JoinClassRequest {
                    class_code: code.to_string(),
                }),
            )
        };

        let lowercase = class.class_code.to_lowercase();
        let (status, Json(member)) = join(student.clone(), &lowercase).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(member.role, ClassRole::Student);

        assert!(matches!(
            join(student.clone(), &class.class_code).await,
            Err(AppError::AlreadyMember)
        ));
        assert!(matches!(
            join(owner.clone(), &class.class_code).await,
            Err(AppError::IsOwner)
        ));
        assert!(matches!(
            join(student.clone(), "ZZZZZZ").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            join(student, "bad").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_join_that_loses_the_membership_insert_is_already_member() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let student = app.user("student@example.com", "student");
        let class = app.class_owned_by(owner.id, "Biology").await;
        app.repo.lose_member_insert_races(1);

        let result = join_class(
            student,
            State(app.state()),
            Json(JoinClassRequest {
                class_code: class.class_code.clone(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::AlreadyMember)));
    }

    #[tokio::test]
    async fn test_only_owner_archives_and_archived_class_disappears() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let member = app.user("member@example.com", "student");
        let class = app.class_owned_by(owner.id, "History").await;
        app.join(&class, member.id).await;

        let denied = archive_class(member.clone().into(), State(app.state()), Path(class.id)).await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let status = archive_class(owner.clone().into(), State(app.state()), Path(class.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(listed) = list_classes(member.into(), State(app.state())).await.unwrap();
        assert!(listed.is_empty());
        let fetched = get_class(owner.into(), State(app.state()), Path(class.id)).await;
        assert!(matches!(fetched, Err(AppError::NotFound(_))));
    }
}
