use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::repository::RepoError;

// --- Identity & Ownership ---

/// User
///
/// The canonical profile record stored in `public.profiles`, mirroring the auth provider's
/// `auth.users` row. Resolved on every authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    // Profile-level role: 'student' or 'teacher'.
    pub role: String,
}

/// Profile roles accepted by `PUT /user/role` and `/register`.
pub const PROFILE_ROLES: [&str; 2] = ["student", "teacher"];

/// Owner
///
/// Who holds exclusive write rights over a class and everything inside it.
/// Stored across `owner_type`, `owner_id`/`user_id` and `guest_id`; exactly one identity
/// column group is populated and it must agree with `owner_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "owner_type", rename_all = "lowercase")]
#[ts(export)]
pub enum Owner {
    User { user_id: Uuid },
    Guest { guest_id: String },
}

impl Owner {
    pub fn owner_type(&self) -> &'static str {
        match self {
            Owner::User { .. } => "user",
            Owner::Guest { .. } => "guest",
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Owner::User { user_id } => Some(*user_id),
            Owner::Guest { .. } => None,
        }
    }

    pub fn guest_id(&self) -> Option<&str> {
        match self {
            Owner::User { .. } => None,
            Owner::Guest { guest_id } => Some(guest_id),
        }
    }

    /// Rebuilds an owner from its storage columns.
    ///
    /// `owner_id` is the current column; `legacy_user_id` is the pre-migration column that
    /// older rows still carry on their own. When both are present they must agree.
    pub fn from_columns(
        owner_type: &str,
        owner_id: Option<Uuid>,
        legacy_user_id: Option<Uuid>,
        guest_id: Option<String>,
    ) -> Result<Self, RepoError> {
        match owner_type {
            "user" => {
                if guest_id.is_some() {
                    return Err(RepoError::Integrity(
                        "user-owned row also carries a guest_id".into(),
                    ));
                }
                match (owner_id, legacy_user_id) {
                    (Some(a), Some(b)) if a != b => Err(RepoError::Integrity(format!(
                        "owner_id {} disagrees with legacy user_id {}",
                        a, b
                    ))),
                    (Some(id), _) | (None, Some(id)) => Ok(Owner::User { user_id: id }),
                    (None, None) => Err(RepoError::Integrity(
                        "user-owned row has no user id".into(),
                    )),
                }
            }
            "guest" => {
                if owner_id.is_some() || legacy_user_id.is_some() {
                    return Err(RepoError::Integrity(
                        "guest-owned row also carries a user id".into(),
                    ));
                }
                guest_id
                    .map(|guest_id| Owner::Guest { guest_id })
                    .ok_or_else(|| RepoError::Integrity("guest-owned row has no guest_id".into()))
            }
            other => Err(RepoError::Integrity(format!("unknown owner_type '{}'", other))),
        }
    }
}

// --- Classes ---

/// Class
///
/// A course container. `class_code` is the 6-character join code, unique among classes
/// that are not archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Class {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub class_code: String,
    pub owner: Owner,
    pub is_archived: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Raw `public.classes` row.
#[derive(Debug, Clone, FromRow)]
pub struct ClassRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub class_code: String,
    pub owner_type: String,
    pub owner_id: Option<Uuid>,
    // Legacy ownership column, still populated on new rows.
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ClassRecord> for Class {
    type Error = RepoError;

    fn try_from(row: ClassRecord) -> Result<Self, Self::Error> {
        let owner = Owner::from_columns(&row.owner_type, row.owner_id, row.user_id, row.guest_id)?;
        Ok(Class {
            id: row.id,
            name: row.name,
            description: row.description,
            class_code: row.class_code,
            owner,
            is_archived: row.is_archived,
            created_at: row.created_at,
        })
    }
}

/// Insert payload for a class; the code has already been drawn by the allocator.
#[derive(Debug, Clone)]
pub struct NewClass {
    pub name: String,
    pub description: Option<String>,
    pub class_code: String,
    pub owner: Owner,
}

/// ClassRole
///
/// Role a member holds inside one class. Grants read access only; writes stay with the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ClassRole {
    #[default]
    Student,
    Teacher,
}

impl ClassRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassRole::Student => "student",
            ClassRole::Teacher => "teacher",
        }
    }

    pub fn parse(value: &str) -> Result<Self, RepoError> {
        match value {
            "student" => Ok(ClassRole::Student),
            "teacher" => Ok(ClassRole::Teacher),
            other => Err(RepoError::Integrity(format!("unknown class role '{}'", other))),
        }
    }
}

/// ClassMember
///
/// Row of the `class_members` join table, unique per (class_id, user_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ClassMember {
    pub class_id: Uuid,
    pub user_id: Uuid,
    pub role: ClassRole,
    #[ts(type = "string")]
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ClassMemberRecord {
    pub class_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl TryFrom<ClassMemberRecord> for ClassMember {
    type Error = RepoError;

    fn try_from(row: ClassMemberRecord) -> Result<Self, Self::Error> {
        Ok(ClassMember {
            class_id: row.class_id,
            user_id: row.user_id,
            role: ClassRole::parse(&row.role)?,
            joined_at: row.joined_at,
        })
    }
}

/// MemberProfile
///
/// Output of `GET /classes/{id}/members`: the membership row merged with the profile and
/// the e-mail address held by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MemberProfile {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub class_role: ClassRole,
    pub profile_role: Option<String>,
    #[ts(type = "string")]
    pub joined_at: DateTime<Utc>,
}

// --- Curriculum Structure ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Chapter {
    pub id: Uuid,
    pub class_id: Uuid,
    pub title: String,
    pub position: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Block {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub title: String,
    pub position: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// A chapter together with its blocks, as listed by `GET /classes/{id}/chapters`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ChapterOutline {
    #[serde(flatten)]
    pub chapter: Chapter,
    pub blocks: Vec<Block>,
}

// --- Assignments ---

/// Assignment
///
/// Belongs to exactly one class and optionally points at a chapter and a block inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Assignment {
    pub id: Uuid,
    pub class_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub block_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    #[ts(type = "string | null")]
    pub due_at: Option<DateTime<Utc>>,
    pub owner: Owner,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub class_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub block_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub owner_type: String,
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRecord> for Assignment {
    type Error = RepoError;

    fn try_from(row: AssignmentRecord) -> Result<Self, Self::Error> {
        let owner = Owner::from_columns(&row.owner_type, None, row.user_id, row.guest_id)?;
        Ok(Assignment {
            id: row.id,
            class_id: row.class_id,
            chapter_id: row.chapter_id,
            block_id: row.block_id,
            title: row.title,
            description: row.description,
            due_at: row.due_at,
            owner,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub class_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub block_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub owner: Owner,
}

/// Submission
///
/// A member's answer to an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Submission {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[ts(type = "string")]
    pub submitted_at: DateTime<Utc>,
}

// --- Materials & Generated Content ---

/// Note
///
/// Free-text content owned by exactly one NOTE material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options` of the correct answer.
    pub answer_index: u32,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct QuizContent {
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FlashcardDeck {
    pub cards: Vec<Flashcard>,
}

/// A key idea extracted from source text and attached to a material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Concept {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum MaterialType {
    Note,
    Quiz,
    Flashcards,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Note => "NOTE",
            MaterialType::Quiz => "QUIZ",
            MaterialType::Flashcards => "FLASHCARDS",
        }
    }
}

/// MaterialContent
///
/// Tagged by `type`. NOTE materials reference a separate Note row; QUIZ and FLASHCARDS
/// carry their content inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum MaterialContent {
    Note {
        note_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<Note>,
    },
    Quiz {
        questions: Vec<QuizQuestion>,
    },
    Flashcards {
        cards: Vec<Flashcard>,
    },
}

impl MaterialContent {
    pub fn material_type(&self) -> MaterialType {
        match self {
            MaterialContent::Note { .. } => MaterialType::Note,
            MaterialContent::Quiz { .. } => MaterialType::Quiz,
            MaterialContent::Flashcards { .. } => MaterialType::Flashcards,
        }
    }

    pub fn note_id(&self) -> Option<Uuid> {
        match self {
            MaterialContent::Note { note_id, .. } => Some(*note_id),
            _ => None,
        }
    }
}

/// Material
///
/// Class-scoped study content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Material {
    pub id: Uuid,
    pub class_id: Uuid,
    pub title: String,
    pub content: MaterialContent,
    pub concepts: Vec<Concept>,
    pub owner: Owner,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Raw `public.materials` row. Inline content is JSONB and only valid for QUIZ/FLASHCARDS.
#[derive(Debug, Clone, FromRow)]
pub struct MaterialRecord {
    pub id: Uuid,
    pub class_id: Uuid,
    pub title: String,
    #[sqlx(rename = "type")]
    pub material_type: String,
    pub note_id: Option<Uuid>,
    pub content: Option<Json<serde_json::Value>>,
    pub concepts: Json<Vec<Concept>>,
    pub owner_type: String,
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MaterialRecord> for Material {
    type Error = RepoError;

    fn try_from(row: MaterialRecord) -> Result<Self, Self::Error> {
        let owner = Owner::from_columns(&row.owner_type, None, row.user_id, row.guest_id)?;
        let inline = |row_content: Option<Json<serde_json::Value>>| {
            row_content
                .map(|Json(value)| value)
                .ok_or_else(|| RepoError::Integrity(format!("material {} has no content", row.id)))
        };
        let content = match row.material_type.as_str() {
            "NOTE" => MaterialContent::Note {
                note_id: row.note_id.ok_or_else(|| {
                    RepoError::Integrity(format!("NOTE material {} has no note_id", row.id))
                })?,
                note: None,
            },
            "QUIZ" => {
                let quiz: QuizContent = serde_json::from_value(inline(row.content)?)
                    .map_err(|e| RepoError::Integrity(e.to_string()))?;
                MaterialContent::Quiz { questions: quiz.questions }
            }
            "FLASHCARDS" => {
                let deck: FlashcardDeck = serde_json::from_value(inline(row.content)?)
                    .map_err(|e| RepoError::Integrity(e.to_string()))?;
                MaterialContent::Flashcards { cards: deck.cards }
            }
            other => {
                return Err(RepoError::Integrity(format!("unknown material type '{}'", other)));
            }
        };
        Ok(Material {
            id: row.id,
            class_id: row.class_id,
            title: row.title,
            content,
            concepts: row.concepts.0,
            owner,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub class_id: Uuid,
    pub title: String,
    pub content: MaterialContent,
    pub owner: Owner,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateClassRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Guest callers without a session may pass their ephemeral id here.
    #[serde(default, rename = "guestId", alias = "guest_id")]
    pub guest_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct JoinClassRequest {
    pub class_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct InviteMemberRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<ClassRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateChapterRequest {
    pub title: String,
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateBlockRequest {
    pub title: String,
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateAssignmentRequest {
    pub class_id: Uuid,
    #[serde(default)]
    pub chapter_id: Option<Uuid>,
    #[serde(default)]
    pub block_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateSubmissionRequest {
    pub content: String,
}

/// InlineContent
///
/// Client-supplied material body: plain text for NOTE, `{questions}` for QUIZ,
/// `{cards}` for FLASHCARDS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(untagged)]
#[ts(export)]
pub enum InlineContent {
    Text(String),
    Quiz(QuizContent),
    Flashcards(FlashcardDeck),
}

/// Tuning knobs forwarded to the generation adapter.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct GenerationOptions {
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateMaterialRequest {
    pub class_id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub material_type: MaterialType,
    #[serde(default)]
    pub content: Option<InlineContent>,
    /// QUIZ/FLASHCARDS only: generate the content from this text when `content` is absent.
    #[serde(default)]
    pub generate_from: Option<String>,
    #[serde(default)]
    pub generation: Option<GenerationOptions>,
    /// When present, concepts are extracted from this text after the material is written.
    #[serde(default)]
    pub source_text_for_concepts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RoleResponse {
    pub user_id: Uuid,
    pub role: String,
}

/// RegisterUserRequest
///
/// The password is passed straight through to the auth provider and never stored or logged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterUserRequest {
    pub email: String,
    pub password: String,
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_prefers_current_column_and_accepts_legacy() {
        let id = Uuid::from_u128(7);
        assert_eq!(
            Owner::from_columns("user", Some(id), None, None).unwrap(),
            Owner::User { user_id: id }
        );
        assert_eq!(
            Owner::from_columns("user", None, Some(id), None).unwrap(),
            Owner::User { user_id: id }
        );
        assert!(Owner::from_columns("user", Some(id), Some(Uuid::from_u128(8)), None).is_err());
    }

    #[test]
    fn test_owner_rejects_mixed_identity_columns() {
        let id = Uuid::from_u128(7);
        assert!(Owner::from_columns("guest", None, Some(id), Some("g-1".into())).is_err());
        assert!(Owner::from_columns("user", Some(id), None, Some("g-1".into())).is_err());
        assert!(Owner::from_columns("guest", None, None, None).is_err());
        assert!(Owner::from_columns("robot", None, None, None).is_err());
    }

    #[test]
    fn test_material_record_decodes_inline_quiz() {
        let row = MaterialRecord {
            id: Uuid::from_u128(1),
            class_id: Uuid::from_u128(2),
            title: "Cells".into(),
            material_type: "QUIZ".into(),
            note_id: None,
            content: Some(Json(serde_json::json!({
                "questions": [{"question": "Q?", "options": ["a", "b"], "answer_index": 1}]
            }))),
            concepts: Json(vec![]),
            owner_type: "guest".into(),
            user_id: None,
            guest_id: Some("g-9".into()),
            created_at: Utc::now(),
        };
        let material = Material::try_from(row).unwrap();
        assert_eq!(material.content.material_type(), MaterialType::Quiz);
        assert_eq!(material.owner, Owner::Guest { guest_id: "g-9".into() });
    }

    #[test]
    fn test_note_material_without_note_id_is_an_integrity_error() {
        let row = MaterialRecord {
            id: Uuid::from_u128(1),
            class_id: Uuid::from_u128(2),
            title: "Orphan".into(),
            material_type: "NOTE".into(),
            note_id: None,
            content: None,
            concepts: Json(vec![]),
            owner_type: "user".into(),
            user_id: Some(Uuid::from_u128(3)),
            guest_id: None,
            created_at: Utc::now(),
        };
        assert!(matches!(Material::try_from(row), Err(RepoError::Integrity(_))));
    }
}
