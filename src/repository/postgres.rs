use async_trait::async_trait;
use sqlx::{PgPool, types::Json};
use std::collections::HashSet;
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository};
use crate::models::{
    Assignment, AssignmentRecord, Block, Chapter, Class, ClassMember, ClassMemberRecord,
    ClassRecord, ClassRole, Concept, FlashcardDeck, Material, MaterialContent, MaterialRecord,
    NewAssignment, NewClass, NewMaterial, Note, QuizContent, Submission, User,
};

const CLASS_COLUMNS: &str = "id, name, description, class_code, owner_type, owner_id, user_id, guest_id, is_archived, created_at";
const ASSIGNMENT_COLUMNS: &str = "id, class_id, chapter_id, block_id, title, description, due_at, owner_type, user_id, guest_id, created_at";
const MATERIAL_COLUMNS: &str = "id, class_id, title, type, note_id, content, concepts, owner_type, user_id, guest_id, created_at";

/// Logs a failed statement under the operation name and passes the error on.
fn logged<T>(op: &'static str, result: Result<T, sqlx::Error>) -> RepoResult<T> {
    result.map_err(|e| {
        let err = RepoError::from(e);
        match &err {
            RepoError::UniqueViolation(_) => tracing::debug!("{} conflict: {}", op, err),
            _ => tracing::error!("{} error: {:?}", op, err),
        }
        err
    })
}

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. All statements are built at
/// runtime with bound parameters; rows decode into the `*Record` types and are converted
/// into the tagged domain models, so malformed ownership columns surface as
/// `RepoError::Integrity` instead of leaking through.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn class_ids_where(
        &self,
        op: &'static str,
        column: &str,
        user_id: Uuid,
    ) -> RepoResult<Vec<Uuid>> {
        let sql = format!(
            "SELECT id FROM classes WHERE {} = $1 AND is_archived = false",
            column
        );
        logged(
            op,
            sqlx::query_scalar::<_, Uuid>(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await,
        )
    }
}

/// Splits an owner into the (owner_type, user_id, guest_id) column triple.
fn owner_columns(owner: &crate::models::Owner) -> (&'static str, Option<Uuid>, Option<String>) {
    (
        owner.owner_type(),
        owner.user_id(),
        owner.guest_id().map(str::to_string),
    )
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- PROFILES ---

    /// get_user
    ///
    /// Retrieves the profile (id, email, role) needed for authentication.
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        logged(
            "get_user",
            sqlx::query_as::<_, User>("SELECT id, email, role FROM profiles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )
    }

    /// create_user
    ///
    /// Creates the mirroring profile record after the auth provider accepted the sign-up.
    async fn create_user(&self, user: User) -> RepoResult<User> {
        logged(
            "create_user",
            sqlx::query_as::<_, User>(
                "INSERT INTO profiles (id, email, role) VALUES ($1, $2, $3) RETURNING id, email, role",
            )
            .bind(user.id)
            .bind(user.email)
            .bind(user.role)
            .fetch_one(&self.pool)
            .await,
        )
    }

    async fn set_user_role(&self, id: Uuid, role: &str) -> RepoResult<Option<User>> {
        logged(
            "set_user_role",
            sqlx::query_as::<_, User>(
                "UPDATE profiles SET role = $2 WHERE id = $1 RETURNING id, email, role",
            )
            .bind(id)
            .bind(role)
            .fetch_optional(&self.pool)
            .await,
        )
    }

    // --- CLASSES ---

    async fn get_class(&self, id: Uuid) -> RepoResult<Option<Class>> {
        let sql = format!("SELECT {} FROM classes WHERE id = $1", CLASS_COLUMNS);
        let row = logged(
            "get_class",
            sqlx::query_as::<_, ClassRecord>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )?;
        row.map(Class::try_from).transpose()
    }

    async fn get_classes(&self, ids: &HashSet<Uuid>) -> RepoResult<Vec<Class>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = ids.iter().copied().collect();
        let sql = format!(
            "SELECT {} FROM classes WHERE id = ANY($1) ORDER BY created_at DESC",
            CLASS_COLUMNS
        );
        let rows = logged(
            "get_classes",
            sqlx::query_as::<_, ClassRecord>(&sql)
                .bind(ids)
                .fetch_all(&self.pool)
                .await,
        )?;
        rows.into_iter().map(Class::try_from).collect()
    }

    async fn class_ids_by_owner(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        self.class_ids_where("class_ids_by_owner", "owner_id", user_id)
            .await
    }

    async fn class_ids_by_legacy_user(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        self.class_ids_where("class_ids_by_legacy_user", "user_id", user_id)
            .await
    }

    async fn class_ids_by_membership(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        logged(
            "class_ids_by_membership",
            sqlx::query_scalar::<_, Uuid>(
                r#"
                SELECT m.class_id
                FROM class_members m
                JOIN classes c ON c.id = m.class_id
                WHERE m.user_id = $1 AND c.is_archived = false
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await,
        )
    }

    async fn class_ids_by_guest(&self, guest_id: &str) -> RepoResult<Vec<Uuid>> {
        logged(
            "class_ids_by_guest",
            sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM classes WHERE guest_id = $1 AND is_archived = false",
            )
            .bind(guest_id)
            .fetch_all(&self.pool)
            .await,
        )
    }

    async fn class_code_exists(&self, code: &str) -> RepoResult<bool> {
        logged(
            "class_code_exists",
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM classes WHERE class_code = $1 AND is_archived = false)",
            )
            .bind(code)
            .fetch_one(&self.pool)
            .await,
        )
    }

    async fn find_class_by_code(&self, code: &str) -> RepoResult<Option<Class>> {
        let sql = format!(
            "SELECT {} FROM classes WHERE class_code = $1 AND is_archived = false",
            CLASS_COLUMNS
        );
        let row = logged(
            "find_class_by_code",
            sqlx::query_as::<_, ClassRecord>(&sql)
                .bind(code)
                .fetch_optional(&self.pool)
                .await,
        )?;
        row.map(Class::try_from).transpose()
    }

    /// create_class
    ///
    /// Inserts the class. The partial unique index `classes_active_code_key` rejects a code
    /// already held by an active class; that surfaces as `RepoError::UniqueViolation`.
    async fn create_class(&self, class: NewClass) -> RepoResult<Class> {
        let (owner_type, user_id, guest_id) = owner_columns(&class.owner);
        let sql = format!(
            r#"INSERT INTO classes (id, name, description, class_code, owner_type, owner_id, user_id, guest_id, is_archived, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $6, $7, false, NOW())
               RETURNING {}"#,
            CLASS_COLUMNS
        );
        let row = logged(
            "create_class",
            sqlx::query_as::<_, ClassRecord>(&sql)
                .bind(Uuid::new_v4())
                .bind(class.name)
                .bind(class.description)
                .bind(class.class_code)
                .bind(owner_type)
                .bind(user_id)
                .bind(guest_id)
                .fetch_one(&self.pool)
                .await,
        )?;
        Class::try_from(row)
    }

    async fn archive_class(&self, id: Uuid) -> RepoResult<bool> {
        let res = logged(
            "archive_class",
            sqlx::query("UPDATE classes SET is_archived = true WHERE id = $1 AND is_archived = false")
                .bind(id)
                .execute(&self.pool)
                .await,
        )?;
        Ok(res.rows_affected() > 0)
    }

    // --- MEMBERS ---

    async fn get_membership(
        &self,
        class_id: Uuid,
        user_id: Uuid,
    ) -> RepoResult<Option<ClassMember>> {
        let row = logged(
            "get_membership",
            sqlx::query_as::<_, ClassMemberRecord>(
                "SELECT class_id, user_id, role, joined_at FROM class_members WHERE class_id = $1 AND user_id = $2",
            )
            .bind(class_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        row.map(ClassMember::try_from).transpose()
    }

    async fn add_member(
        &self,
        class_id: Uuid,
        user_id: Uuid,
        role: ClassRole,
    ) -> RepoResult<ClassMember> {
        let row = logged(
            "add_member",
            sqlx::query_as::<_, ClassMemberRecord>(
                r#"INSERT INTO class_members (class_id, user_id, role, joined_at)
                   VALUES ($1, $2, $3, NOW())
                   RETURNING class_id, user_id, role, joined_at"#,
            )
            .bind(class_id)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await,
        )?;
        ClassMember::try_from(row)
    }

    async fn remove_member(&self, class_id: Uuid, user_id: Uuid) -> RepoResult<bool> {
        let res = logged(
            "remove_member",
            sqlx::query("DELETE FROM class_members WHERE class_id = $1 AND user_id = $2")
                .bind(class_id)
                .bind(user_id)
                .execute(&self.pool)
                .await,
        )?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_members(&self, class_id: Uuid) -> RepoResult<Vec<ClassMember>> {
        let rows = logged(
            "list_members",
            sqlx::query_as::<_, ClassMemberRecord>(
                "SELECT class_id, user_id, role, joined_at FROM class_members WHERE class_id = $1 ORDER BY joined_at ASC",
            )
            .bind(class_id)
            .fetch_all(&self.pool)
            .await,
        )?;
        rows.into_iter().map(ClassMember::try_from).collect()
    }

    // --- CHAPTERS & BLOCKS ---

    async fn create_chapter(
        &self,
        class_id: Uuid,
        title: &str,
        position: i32,
    ) -> RepoResult<Chapter> {
        logged(
            "create_chapter",
            sqlx::query_as::<_, Chapter>(
                r#"INSERT INTO chapters (id, class_id, title, position, created_at)
                   VALUES ($1, $2, $3, $4, NOW())
                   RETURNING id, class_id, title, position, created_at"#,
            )
            .bind(Uuid::new_v4())
            .bind(class_id)
            .bind(title)
            .bind(position)
            .fetch_one(&self.pool)
            .await,
        )
    }

    async fn get_chapter(&self, id: Uuid) -> RepoResult<Option<Chapter>> {
        logged(
            "get_chapter",
            sqlx::query_as::<_, Chapter>(
                "SELECT id, class_id, title, position, created_at FROM chapters WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await,
        )
    }

    async fn list_chapters(&self, class_id: Uuid) -> RepoResult<Vec<Chapter>> {
        logged(
            "list_chapters",
            sqlx::query_as::<_, Chapter>(
                "SELECT id, class_id, title, position, created_at FROM chapters WHERE class_id = $1 ORDER BY position ASC, created_at ASC",
            )
            .bind(class_id)
            .fetch_all(&self.pool)
            .await,
        )
    }

    async fn create_block(&self, chapter_id: Uuid, title: &str, position: i32) -> RepoResult<Block> {
        logged(
            "create_block",
            sqlx::query_as::<_, Block>(
                r#"INSERT INTO blocks (id, chapter_id, title, position, created_at)
                   VALUES ($1, $2, $3, $4, NOW())
                   RETURNING id, chapter_id, title, position, created_at"#,
            )
            .bind(Uuid::new_v4())
            .bind(chapter_id)
            .bind(title)
            .bind(position)
            .fetch_one(&self.pool)
            .await,
        )
    }

    async fn get_block(&self, id: Uuid) -> RepoResult<Option<Block>> {
        logged(
            "get_block",
            sqlx::query_as::<_, Block>(
                "SELECT id, chapter_id, title, position, created_at FROM blocks WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await,
        )
    }

    async fn list_blocks(&self, chapter_id: Uuid) -> RepoResult<Vec<Block>> {
        logged(
            "list_blocks",
            sqlx::query_as::<_, Block>(
                "SELECT id, chapter_id, title, position, created_at FROM blocks WHERE chapter_id = $1 ORDER BY position ASC, created_at ASC",
            )
            .bind(chapter_id)
            .fetch_all(&self.pool)
            .await,
        )
    }

    // --- ASSIGNMENTS & SUBMISSIONS ---

    async fn create_assignment(&self, assignment: NewAssignment) -> RepoResult<Assignment> {
        let (owner_type, user_id, guest_id) = owner_columns(&assignment.owner);
        let sql = format!(
            r#"INSERT INTO assignments (id, class_id, chapter_id, block_id, title, description, due_at, owner_type, user_id, guest_id, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
               RETURNING {}"#,
            ASSIGNMENT_COLUMNS
        );
        let row = logged(
            "create_assignment",
            sqlx::query_as::<_, AssignmentRecord>(&sql)
                .bind(Uuid::new_v4())
                .bind(assignment.class_id)
                .bind(assignment.chapter_id)
                .bind(assignment.block_id)
                .bind(assignment.title)
                .bind(assignment.description)
                .bind(assignment.due_at)
                .bind(owner_type)
                .bind(user_id)
                .bind(guest_id)
                .fetch_one(&self.pool)
                .await,
        )?;
        Assignment::try_from(row)
    }

    async fn get_assignment(&self, id: Uuid) -> RepoResult<Option<Assignment>> {
        let sql = format!("SELECT {} FROM assignments WHERE id = $1", ASSIGNMENT_COLUMNS);
        let row = logged(
            "get_assignment",
            sqlx::query_as::<_, AssignmentRecord>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )?;
        row.map(Assignment::try_from).transpose()
    }

    async fn list_assignments(&self, class_ids: &HashSet<Uuid>) -> RepoResult<Vec<Assignment>> {
        if class_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = class_ids.iter().copied().collect();
        let sql = format!(
            "SELECT {} FROM assignments WHERE class_id = ANY($1) ORDER BY created_at DESC",
            ASSIGNMENT_COLUMNS
        );
        let rows = logged(
            "list_assignments",
            sqlx::query_as::<_, AssignmentRecord>(&sql)
                .bind(ids)
                .fetch_all(&self.pool)
                .await,
        )?;
        rows.into_iter().map(Assignment::try_from).collect()
    }

    async fn create_submission(
        &self,
        assignment_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> RepoResult<Submission> {
        logged(
            "create_submission",
            sqlx::query_as::<_, Submission>(
                r#"INSERT INTO submissions (id, assignment_id, user_id, content, submitted_at)
                   VALUES ($1, $2, $3, $4, NOW())
                   RETURNING id, assignment_id, user_id, content, submitted_at"#,
            )
            .bind(Uuid::new_v4())
            .bind(assignment_id)
            .bind(user_id)
            .bind(content)
            .fetch_one(&self.pool)
            .await,
        )
    }

    async fn list_submissions(
        &self,
        assignment_id: Uuid,
        user_id: Option<Uuid>,
    ) -> RepoResult<Vec<Submission>> {
        logged(
            "list_submissions",
            sqlx::query_as::<_, Submission>(
                r#"SELECT id, assignment_id, user_id, content, submitted_at
                   FROM submissions
                   WHERE assignment_id = $1 AND ($2::uuid IS NULL OR user_id = $2)
                   ORDER BY submitted_at ASC"#,
            )
            .bind(assignment_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await,
        )
    }

    // --- NOTES & MATERIALS ---

    async fn create_note(&self, title: &str, content: &str) -> RepoResult<Note> {
        logged(
            "create_note",
            sqlx::query_as::<_, Note>(
                r#"INSERT INTO notes (id, title, content, created_at)
                   VALUES ($1, $2, $3, NOW())
                   RETURNING id, title, content, created_at"#,
            )
            .bind(Uuid::new_v4())
            .bind(title)
            .bind(content)
            .fetch_one(&self.pool)
            .await,
        )
    }

    async fn get_note(&self, id: Uuid) -> RepoResult<Option<Note>> {
        logged(
            "get_note",
            sqlx::query_as::<_, Note>("SELECT id, title, content, created_at FROM notes WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )
    }

    async fn delete_note(&self, id: Uuid) -> RepoResult<bool> {
        let res = logged(
            "delete_note",
            sqlx::query("DELETE FROM notes WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await,
        )?;
        Ok(res.rows_affected() > 0)
    }

    async fn create_material(&self, material: NewMaterial) -> RepoResult<Material> {
        let (owner_type, user_id, guest_id) = owner_columns(&material.owner);
        let material_type = material.content.material_type();
        let note_id = material.content.note_id();
        let inline = match material.content {
            MaterialContent::Note { .. } => None,
            MaterialContent::Quiz { questions } => Some(
                serde_json::to_value(QuizContent { questions })
                    .map_err(|e| RepoError::Integrity(e.to_string()))?,
            ),
            MaterialContent::Flashcards { cards } => Some(
                serde_json::to_value(FlashcardDeck { cards })
                    .map_err(|e| RepoError::Integrity(e.to_string()))?,
            ),
        };
        let sql = format!(
            r#"INSERT INTO materials (id, class_id, title, type, note_id, content, concepts, owner_type, user_id, guest_id, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, '[]'::jsonb, $7, $8, $9, NOW())
               RETURNING {}"#,
            MATERIAL_COLUMNS
        );
        let row = logged(
            "create_material",
            sqlx::query_as::<_, MaterialRecord>(&sql)
                .bind(Uuid::new_v4())
                .bind(material.class_id)
                .bind(material.title)
                .bind(material_type.as_str())
                .bind(note_id)
                .bind(inline.map(Json))
                .bind(owner_type)
                .bind(user_id)
                .bind(guest_id)
                .fetch_one(&self.pool)
                .await,
        )?;
        Material::try_from(row)
    }

    async fn get_material(&self, id: Uuid) -> RepoResult<Option<Material>> {
        let sql = format!("SELECT {} FROM materials WHERE id = $1", MATERIAL_COLUMNS);
        let row = logged(
            "get_material",
            sqlx::query_as::<_, MaterialRecord>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
        )?;
        row.map(Material::try_from).transpose()
    }

    async fn list_materials(&self, class_ids: &HashSet<Uuid>) -> RepoResult<Vec<Material>> {
        if class_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = class_ids.iter().copied().collect();
        let sql = format!(
            "SELECT {} FROM materials WHERE class_id = ANY($1) ORDER BY created_at DESC",
            MATERIAL_COLUMNS
        );
        let rows = logged(
            "list_materials",
            sqlx::query_as::<_, MaterialRecord>(&sql)
                .bind(ids)
                .fetch_all(&self.pool)
                .await,
        )?;
        rows.into_iter().map(Material::try_from).collect()
    }

    async fn set_material_concepts(&self, id: Uuid, concepts: &[Concept]) -> RepoResult<bool> {
        let res = logged(
            "set_material_concepts",
            sqlx::query("UPDATE materials SET concepts = $2 WHERE id = $1")
                .bind(id)
                .bind(Json(concepts.to_vec()))
                .execute(&self.pool)
                .await,
        )?;
        Ok(res.rows_affected() > 0)
    }

    /// delete_material
    ///
    /// Deletes the material and, for NOTE materials, the Note row it owns. Both deletes run
    /// in one transaction so a NOTE material never leaves its content behind.
    async fn delete_material(&self, id: Uuid) -> RepoResult<bool> {
        let mut tx = logged("delete_material", self.pool.begin().await)?;

        let deleted = logged(
            "delete_material",
            sqlx::query_scalar::<_, Option<Uuid>>(
                "DELETE FROM materials WHERE id = $1 RETURNING note_id",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await,
        )?;

        let Some(note_id) = deleted else {
            // Nothing matched; dropping the transaction rolls it back.
            return Ok(false);
        };

        if let Some(note_id) = note_id {
            logged(
                "delete_material",
                sqlx::query("DELETE FROM notes WHERE id = $1")
                    .bind(note_id)
                    .execute(&mut *tx)
                    .await,
            )?;
        }

        logged("delete_material", tx.commit().await)?;
        Ok(true)
    }
}
