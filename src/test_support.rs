//! In-memory application wiring shared by the unit tests.

use std::sync::Arc;
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    config::AppConfig,
    generation::MockContentGenerator,
    identity::StaticIdentityProvider,
    join_code::{self, RandomCodeSource},
    models::{Class, ClassMember, ClassRole, Owner, User},
    repository::{MemoryRepository, Repository},
};

pub struct TestApp {
    pub repo: Arc<MemoryRepository>,
    pub identity: Arc<StaticIdentityProvider>,
    pub generator: Arc<MockContentGenerator>,
    pub config: AppConfig,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_generator(MockContentGenerator::new())
    }

    pub fn with_generator(generator: MockContentGenerator) -> Self {
        Self {
            repo: Arc::new(MemoryRepository::new()),
            identity: Arc::new(StaticIdentityProvider::new()),
            generator: Arc::new(generator),
            config: AppConfig::default(),
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            repo: self.repo.clone(),
            identity: self.identity.clone(),
            generator: self.generator.clone(),
            codes: Arc::new(RandomCodeSource),
            config: self.config.clone(),
        }
    }

    /// Seeds a profile plus a matching provider account.
    pub fn user(&self, email: &str, role: &str) -> AuthUser {
        let id = Uuid::new_v4();
        self.repo.insert_user(User {
            id,
            email: email.to_string(),
            role: role.to_string(),
        });
        self.identity.add_account(id, email);
        AuthUser {
            id,
            role: role.to_string(),
        }
    }

    pub async fn class_owned_by(&self, user_id: Uuid, name: &str) -> Class {
        join_code::create_class_with_code(
            self.repo.as_ref(),
            &RandomCodeSource,
            name.to_string(),
            None,
            Owner::User { user_id },
        )
        .await
        .unwrap()
    }

    pub async fn join(&self, class: &Class, user_id: Uuid) -> ClassMember {
        self.repo
            .add_member(class.id, user_id, ClassRole::Student)
            .await
            .unwrap()
    }
}
