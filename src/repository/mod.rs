use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    Assignment, Block, Chapter, Class, ClassMember, ClassRole, Concept, Material, NewAssignment,
    NewClass, NewMaterial, Note, Submission, User,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Persistence failures. `UniqueViolation` is split out so callers racing on a unique key
/// (the join-code allocator) can tell a lost race from a broken database.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("stored row violates an ownership or shape invariant: {0}")]
    Integrity(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return RepoError::UniqueViolation(
                    db_err.constraint().unwrap_or("unknown").to_string(),
                );
            }
        }
        RepoError::Database(err)
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The abstract contract for every persistence operation. Handlers and the access guard
/// receive it explicitly through `AppState`, never through a global client.
///
/// Authorization is not enforced here: the repository answers raw questions about rows and
/// the guard in `crate::access` decides what the caller may see.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn create_user(&self, user: User) -> RepoResult<User>;
    async fn set_user_role(&self, id: Uuid, role: &str) -> RepoResult<Option<User>>;

    // --- Classes ---
    async fn get_class(&self, id: Uuid) -> RepoResult<Option<Class>>;
    async fn get_classes(&self, ids: &HashSet<Uuid>) -> RepoResult<Vec<Class>>;
    /// Active classes whose current `owner_id` column equals the user.
    async fn class_ids_by_owner(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>>;
    /// Active classes whose legacy `user_id` column equals the user.
    async fn class_ids_by_legacy_user(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>>;
    /// Active classes the user belongs to through `class_members`.
    async fn class_ids_by_membership(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>>;
    async fn class_ids_by_guest(&self, guest_id: &str) -> RepoResult<Vec<Uuid>>;
    /// True when an active class already uses this join code.
    async fn class_code_exists(&self, code: &str) -> RepoResult<bool>;
    async fn find_class_by_code(&self, code: &str) -> RepoResult<Option<Class>>;
    /// Fails with `UniqueViolation` when the code is taken by an active class.
    async fn create_class(&self, class: NewClass) -> RepoResult<Class>;
    async fn archive_class(&self, id: Uuid) -> RepoResult<bool>;

    // --- Members ---
    async fn get_membership(&self, class_id: Uuid, user_id: Uuid)
    -> RepoResult<Option<ClassMember>>;
    /// Fails with `UniqueViolation` when the membership already exists.
    async fn add_member(
        &self,
        class_id: Uuid,
        user_id: Uuid,
        role: ClassRole,
    ) -> RepoResult<ClassMember>;
    async fn remove_member(&self, class_id: Uuid, user_id: Uuid) -> RepoResult<bool>;
    async fn list_members(&self, class_id: Uuid) -> RepoResult<Vec<ClassMember>>;

    // --- Chapters & Blocks ---
    async fn create_chapter(&self, class_id: Uuid, title: &str, position: i32)
    -> RepoResult<Chapter>;
    async fn get_chapter(&self, id: Uuid) -> RepoResult<Option<Chapter>>;
    async fn list_chapters(&self, class_id: Uuid) -> RepoResult<Vec<Chapter>>;
    async fn create_block(&self, chapter_id: Uuid, title: &str, position: i32)
    -> RepoResult<Block>;
    async fn get_block(&self, id: Uuid) -> RepoResult<Option<Block>>;
    async fn list_blocks(&self, chapter_id: Uuid) -> RepoResult<Vec<Block>>;

    // --- Assignments & Submissions ---
    async fn create_assignment(&self, assignment: NewAssignment) -> RepoResult<Assignment>;
    async fn get_assignment(&self, id: Uuid) -> RepoResult<Option<Assignment>>;
    async fn list_assignments(&self, class_ids: &HashSet<Uuid>) -> RepoResult<Vec<Assignment>>;
    async fn create_submission(
        &self,
        assignment_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> RepoResult<Submission>;
    /// All submissions for the assignment, or only one user's when `user_id` is given.
    async fn list_submissions(
        &self,
        assignment_id: Uuid,
        user_id: Option<Uuid>,
    ) -> RepoResult<Vec<Submission>>;

    // --- Notes & Materials ---
    async fn create_note(&self, title: &str, content: &str) -> RepoResult<Note>;
    async fn get_note(&self, id: Uuid) -> RepoResult<Option<Note>>;
    async fn delete_note(&self, id: Uuid) -> RepoResult<bool>;
    async fn create_material(&self, material: NewMaterial) -> RepoResult<Material>;
    async fn get_material(&self, id: Uuid) -> RepoResult<Option<Material>>;
    async fn list_materials(&self, class_ids: &HashSet<Uuid>) -> RepoResult<Vec<Material>>;
    async fn set_material_concepts(&self, id: Uuid, concepts: &[Concept]) -> RepoResult<bool>;
    async fn delete_material(&self, id: Uuid) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer carried in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;
