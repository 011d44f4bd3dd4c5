use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    repository::RepositoryState,
};

/// Header a guest client uses to present its ephemeral id.
pub const GUEST_HEADER: &str = "x-guest-id";
/// Local-only header that stands in for a session during development.
pub const DEV_USER_HEADER: &str = "x-user-id";

const MAX_GUEST_ID_LEN: usize = 128;

/// Claims
///
/// The payload of a provider-issued session JWT, validated on every request that carries
/// an `Authorization: Bearer` header.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's UUID, also the primary key of `public.profiles`.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// AuthUser
///
/// A verified, signed-in user. Using it as a handler argument makes the route reject
/// callers without a session with 401.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    /// Profile role, 'student' or 'teacher'.
    pub role: String,
}

/// Principal
///
/// The acting identity of a request. Guests carry a client-chosen id that the server
/// cannot verify; it only ever unlocks classes created under that same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User { id: Uuid, role: String },
    Guest { guest_id: String },
    Anonymous,
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::User { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Upgrades an anonymous principal to a guest when a guest id arrives out of band
    /// (e.g. in a JSON body). Signed-in users and existing guests are left untouched.
    pub fn or_guest(self, guest_id: Option<&str>) -> Result<Self, AppError> {
        match (self, guest_id) {
            (Principal::Anonymous, Some(raw)) => Ok(normalize_guest_id(raw)?
                .map(|guest_id| Principal::Guest { guest_id })
                .unwrap_or(Principal::Anonymous)),
            (principal, _) => Ok(principal),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User { id, .. } => write!(f, "user:{}", id),
            Principal::Guest { guest_id } => write!(f, "guest:{}", guest_id),
            Principal::Anonymous => write!(f, "anonymous"),
        }
    }
}

impl From<AuthUser> for Principal {
    fn from(user: AuthUser) -> Self {
        Principal::User {
            id: user.id,
            role: user.role,
        }
    }
}

/// Validates a client-supplied guest id. Blank input means "no guest".
pub fn normalize_guest_id(raw: &str) -> Result<Option<String>, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_GUEST_ID_LEN
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::validation(
            "guestId must be 1-128 characters of letters, digits, '-' or '_'",
        ));
    }
    Ok(Some(trimmed.to_string()))
}

#[derive(Debug, Deserialize)]
struct GuestQuery {
    #[serde(default, rename = "guestId", alias = "guest_id")]
    guest_id: Option<String>,
}

/// resolve_session
///
/// Resolves a signed-in user from the request, if any:
/// 1. Local bypass: in `Env::Local` an `x-user-id` header naming an existing profile.
/// 2. Bearer JWT signed with the configured secret, whose subject has a profile.
///
/// No credentials at all yields `Ok(None)`. Credentials that are present but invalid are
/// rejected outright rather than silently downgraded to a guest.
async fn resolve_session(
    parts: &Parts,
    repo: &RepositoryState,
    config: &AppConfig,
) -> Result<Option<AuthUser>, AppError> {
    if config.env == Env::Local {
        if let Some(user_id) = parts
            .headers
            .get(DEV_USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
        {
            if let Some(user) = repo.get_user(user_id).await? {
                return Ok(Some(AuthUser {
                    id: user.id,
                    role: user.role,
                }));
            }
        }
    }

    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;
    // Supabase sets `aud: authenticated`; the subject is all we rely on.
    validation.validate_aud = false;

    let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        match e.kind() {
            ErrorKind::ExpiredSignature => tracing::debug!("rejected expired session token"),
            other => tracing::debug!("rejected session token: {:?}", other),
        }
        AppError::Unauthorized
    })?;

    // A valid token for a deleted profile is no longer a session.
    let user = repo
        .get_user(token_data.claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Some(AuthUser {
        id: user.id,
        role: user.role,
    }))
}

/// Reads a guest id from the `x-guest-id` header, falling back to the `guestId` query
/// parameter.
fn guest_from_parts(parts: &Parts) -> Result<Option<String>, AppError> {
    if let Some(value) = parts.headers.get(GUEST_HEADER) {
        let raw = value
            .to_str()
            .map_err(|_| AppError::validation("x-guest-id must be visible ASCII"))?;
        return normalize_guest_id(raw);
    }
    match Query::<GuestQuery>::try_from_uri(&parts.uri) {
        Ok(Query(GuestQuery {
            guest_id: Some(raw),
        })) => normalize_guest_id(&raw),
        _ => Ok(None),
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        resolve_session(parts, &repo, &config)
            .await?
            .ok_or(AppError::Unauthorized)
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if let Some(user) = resolve_session(parts, &repo, &config).await? {
            return Ok(user.into());
        }

        Ok(match guest_from_parts(parts)? {
            Some(guest_id) => Principal::Guest { guest_id },
            None => Principal::Anonymous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_id_normalization() {
        assert_eq!(normalize_guest_id("  ").unwrap(), None);
        assert_eq!(
            normalize_guest_id(" guest_01-a ").unwrap(),
            Some("guest_01-a".to_string())
        );
        assert!(normalize_guest_id("guest id with spaces").is_err());
        assert!(normalize_guest_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_or_guest_only_upgrades_anonymous() {
        let anonymous = Principal::Anonymous.or_guest(Some("g-1")).unwrap();
        assert_eq!(
            anonymous,
            Principal::Guest {
                guest_id: "g-1".into()
            }
        );

        let user = Principal::User {
            id: Uuid::nil(),
            role: "student".into(),
        };
        assert_eq!(user.clone().or_guest(Some("g-1")).unwrap(), user);
        assert!(Principal::Anonymous.or_guest(None).unwrap().is_anonymous());
    }
}
