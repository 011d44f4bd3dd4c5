use axum::{extract::State, http::StatusCode};
use uuid::Uuid;

use crate::{
    AppState,
    access::{self, Operation},
    auth::Principal,
    error::{AppError, ErrorBody},
    extract::{Json, Path},
    models::{ClassMember, InviteMemberRequest, MemberProfile, Owner},
    repository::RepoError,
};

/// list_members
///
/// [Owner or member] Membership rows merged with the local profile and the e-mail held by
/// the identity provider. A provider outage degrades to the profile e-mail instead of
/// failing the listing.
#[utoipa::path(
    get,
    path = "/classes/{id}/members",
    params(("id" = Uuid, Path, description = "Class ID")),
    responses(
        (status = 200, description = "Members", body = [MemberProfile]),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn list_members(
    principal: Principal,
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<Vec<MemberProfile>>, AppError> {
    access::authorize_class_read(state.repo.as_ref(), &principal, class_id).await?;

    let members = state.repo.list_members(class_id).await?;
    let mut profiles = Vec::with_capacity(members.len());
    for member in members {
        let profile = state.repo.get_user(member.user_id).await?;
        let provider_email = match state.identity.lookup_email(member.user_id).await {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(user_id = %member.user_id, "email lookup failed: {}", e);
                None
            }
        };
        profiles.push(MemberProfile {
            user_id: member.user_id,
            email: provider_email.or_else(|| profile.as_ref().map(|p| p.email.clone())),
            class_role: member.role,
            profile_role: profile.map(|p| p.role),
            joined_at: member.joined_at,
        });
    }
    profiles.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
    Ok(Json(profiles))
}

/// invite_member
///
/// [Owner] Adds an existing user directly, without a join code.
#[utoipa::path(
    post,
    path = "/classes/{id}/members",
    params(("id" = Uuid, Path, description = "Class ID")),
    request_body = InviteMemberRequest,
    responses(
        (status = 201, description = "Added", body = ClassMember),
        (status = 400, description = "Already a member, or the owner", body = ErrorBody),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Class or user not found", body = ErrorBody)
    )
)]
pub async fn invite_member(
    principal: Principal,
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(payload): Json<InviteMemberRequest>,
) -> Result<(StatusCode, Json<ClassMember>), AppError> {
    let class =
        access::authorize_class_write(state.repo.as_ref(), &principal, class_id, Operation::Write)
            .await?;

    if state.repo.get_user(payload.user_id).await?.is_none() {
        return Err(AppError::not_found(format!("user {} not found", payload.user_id)));
    }
    if class.owner == (Owner::User { user_id: payload.user_id }) {
        return Err(AppError::IsOwner);
    }

    let role = payload.role.unwrap_or_default();
    match state.repo.add_member(class_id, payload.user_id, role).await {
        Ok(member) => {
            tracing::info!(class_id = %class_id, user_id = %payload.user_id, role = role.as_str(), "member invited");
            Ok((StatusCode::CREATED, Json(member)))
        }
        Err(RepoError::UniqueViolation(_)) => Err(AppError::AlreadyMember),
        Err(e) => Err(e.into()),
    }
}

/// remove_member
///
/// [Owner] Removes any member. A member may also remove themselves (leave the class).
#[utoipa::path(
    delete,
    path = "/classes/{id}/members/{user_id}",
    params(
        ("id" = Uuid, Path, description = "Class ID"),
        ("user_id" = Uuid, Path, description = "Member's user ID")
    ),
    responses(
        (status = 204, description = "Removed"),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "No such member", body = ErrorBody)
    )
)]
pub async fn remove_member(
    principal: Principal,
    State(state): State<AppState>,
    Path((class_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    if principal.user_id() == Some(user_id) {
        access::authorize_class_read(state.repo.as_ref(), &principal, class_id).await?;
    } else {
        access::authorize_class_write(state.repo.as_ref(), &principal, class_id, Operation::Delete)
            .await?;
    }

    if state.repo.remove_member(class_id, user_id).await? {
        tracing::info!(class_id = %class_id, user_id = %user_id, "member removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!(
            "user {} is not a member of class {}",
            user_id, class_id
        )))
    }
}
