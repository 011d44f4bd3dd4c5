use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// IdentityError
///
/// `Rejected` is the provider refusing the request (duplicate e-mail, weak password);
/// everything else is infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("unexpected identity provider response: {0}")]
    Malformed(String),
}

/// IdentityProvider
///
/// The hosted auth service that owns credentials. The API never stores passwords; it only
/// asks the provider to create accounts and to resolve e-mails for member listings.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates the account and returns the provider's user id, which becomes the profile id.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, IdentityError>;

    /// The account's e-mail, or `None` when the provider has no such user.
    async fn lookup_email(&self, user_id: Uuid) -> Result<Option<String>, IdentityError>;
}

#[derive(Deserialize)]
struct SupabaseUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

/// SupabaseIdentityClient
///
/// Talks to Supabase Auth (`/auth/v1`). Sign-up uses the public signup endpoint; lookups go
/// through the admin API and therefore need the service-role key.
#[derive(Clone)]
pub struct SupabaseIdentityClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl SupabaseIdentityClient {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, IdentityError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.service_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(IdentityError::Rejected(format!("signup returned {}", status)));
        }
        if !status.is_success() {
            return Err(IdentityError::Transport(format!("signup returned {}", status)));
        }

        let user = response
            .json::<SupabaseUser>()
            .await
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        Ok(user.id)
    }

    async fn lookup_email(&self, user_id: Uuid) -> Result<Option<String>, IdentityError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/admin/users/{}", self.base_url, user_id))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IdentityError::Transport(format!(
                "admin lookup returned {}",
                response.status()
            )));
        }

        let user = response
            .json::<SupabaseUser>()
            .await
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        Ok(user.email)
    }
}

/// StaticIdentityProvider
///
/// In-memory accounts for tests.
#[derive(Default)]
pub struct StaticIdentityProvider {
    accounts: Mutex<HashMap<Uuid, String>>,
    /// When true, every call fails as if the provider were down.
    pub should_fail: bool,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn add_account(&self, user_id: Uuid, email: &str) {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, email.to_string());
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn sign_up(&self, email: &str, _password: &str) -> Result<Uuid, IdentityError> {
        if self.should_fail {
            return Err(IdentityError::Transport("simulated outage".into()));
        }
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        if accounts.values().any(|existing| existing == email) {
            return Err(IdentityError::Rejected("email already registered".into()));
        }
        let id = Uuid::new_v4();
        accounts.insert(id, email.to_string());
        Ok(id)
    }

    async fn lookup_email(&self, user_id: Uuid) -> Result<Option<String>, IdentityError> {
        if self.should_fail {
            return Err(IdentityError::Transport("simulated outage".into()));
        }
        Ok(self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned())
    }
}

pub type IdentityState = Arc<dyn IdentityProvider>;
