use axum::{extract::State, http::StatusCode};

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, ErrorBody},
    extract::Json,
    identity::IdentityError,
    models::{PROFILE_ROLES, RegisterUserRequest, RoleResponse, UpdateRoleRequest, User},
};

const MIN_PASSWORD_LEN: usize = 6;

fn validate_role(role: &str) -> Result<(), AppError> {
    if PROFILE_ROLES.contains(&role) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "role must be one of: {}",
            PROFILE_ROLES.join(", ")
        )))
    }
}

/// get_role
///
/// [Authenticated Route] The caller's profile role.
#[utoipa::path(
    get,
    path = "/user/role",
    responses(
        (status = 200, description = "Current role", body = RoleResponse),
        (status = 401, description = "Sign-in required", body = ErrorBody)
    )
)]
pub async fn get_role(AuthUser { id, role }: AuthUser) -> Json<RoleResponse> {
    Json(RoleResponse { user_id: id, role })
}

/// update_role
///
/// [Authenticated Route] Switches the caller between 'student' and 'teacher'.
#[utoipa::path(
    put,
    path = "/user/role",
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated", body = RoleResponse),
        (status = 400, description = "Unknown role", body = ErrorBody),
        (status = 401, description = "Sign-in required", body = ErrorBody)
    )
)]
pub async fn update_role(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    let role = payload.role.trim().to_lowercase();
    validate_role(&role)?;

    let user = state
        .repo
        .set_user_role(id, &role)
        .await?
        .ok_or_else(|| AppError::not_found(format!("profile {} not found", id)))?;

    tracing::info!(user_id = %id, role = %user.role, "profile role updated");
    Ok(Json(RoleResponse {
        user_id: user.id,
        role: user.role,
    }))
}

/// register_user
///
/// [Public Route] Creates the account with the identity provider, then mirrors it as a
/// local profile keyed by the provider's user id.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid input or rejected by the provider", body = ErrorBody)
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let email = payload.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AppError::validation("email is not valid"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let role = payload.role.trim().to_lowercase();
    validate_role(&role)?;

    // Step 1: the provider owns credentials and issues the canonical id.
    let id = state
        .identity
        .sign_up(&email, &payload.password)
        .await
        .map_err(|e| match e {
            IdentityError::Rejected(reason) => AppError::validation(reason),
            other => AppError::Internal(other.to_string()),
        })?;

    // Step 2: mirror it in `public.profiles`.
    let user = state.repo.create_user(User { id, email, role }).await?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityProvider;
    use crate::test_support::TestApp;

    fn registration(email: &str, role: &str) -> RegisterUserRequest {
        RegisterUserRequest {
            email: email.into(),
            password: "correct horse".into(),
            role: role.into(),
        }
    }

    #[tokio::test]
    async fn test_register_creates_profile_with_provider_id() {
        let app = TestApp::new();
        let (status, Json(user)) =
            register_user(State(app.state()), Json(registration(" Ada@Example.com ", "Teacher")))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, "teacher");
        assert!(app.identity.lookup_email(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input_and_duplicates() {
        let app = TestApp::new();
        let bad_role = register_user(State(app.state()), Json(registration("a@example.com", "admin"))).await;
        assert!(matches!(bad_role, Err(AppError::Validation(_))));

        let mut short = registration("a@example.com", "student");
        short.password = "abc".into();
        assert!(matches!(
            register_user(State(app.state()), Json(short)).await,
            Err(AppError::Validation(_))
        ));

        register_user(State(app.state()), Json(registration("a@example.com", "student")))
            .await
            .unwrap();
        let duplicate =
            register_user(State(app.state()), Json(registration("a@example.com", "student"))).await;
        assert!(matches!(duplicate, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_role_update_validates_and_persists() {
        let app = TestApp::new();
        let user = app.user("s@example.com", "student");

        let Json(updated) = update_role(
            user.clone(),
            State(app.state()),
            Json(UpdateRoleRequest {
                role: "teacher".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.role, "teacher");

        let rejected = update_role(
            user,
            State(app.state()),
            Json(UpdateRoleRequest {
                role: "principal".into(),
            }),
        )
        .await;
        assert!(matches!(rejected, Err(AppError::Validation(_))));
    }
}
