use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository};
use crate::models::{
    Assignment, Block, Chapter, Class, ClassMember, ClassRole, Concept, Material, MaterialContent,
    NewAssignment, NewClass, NewMaterial, Note, Owner, Submission, User,
};

/// A class plus the raw ownership columns, so the current/legacy split of the
/// Postgres schema can be reproduced.
#[derive(Debug, Clone)]
struct StoredClass {
    class: Class,
    owner_id: Option<Uuid>,
    legacy_user_id: Option<Uuid>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    classes: Vec<StoredClass>,
    members: Vec<ClassMember>,
    chapters: Vec<Chapter>,
    blocks: Vec<Block>,
    assignments: Vec<Assignment>,
    submissions: Vec<Submission>,
    notes: HashMap<Uuid, Note>,
    materials: Vec<Material>,
}

/// MemoryRepository
///
/// An in-process `Repository` used by the test suites. It mirrors the constraints of the
/// Postgres schema (unique active join codes, unique memberships, note cascade on material
/// delete) and exposes failure switches so the compensation and race paths can be exercised.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    fail_material_insert: AtomicBool,
    fail_concept_write: AtomicBool,
    vanish_before_concept_write: AtomicBool,
    racing_class_inserts: AtomicUsize,
    racing_member_inserts: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent `create_material` fail.
    pub fn fail_material_inserts(&self, fail: bool) {
        self.fail_material_insert.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `set_material_concepts` fail.
    pub fn fail_concept_writes(&self, fail: bool) {
        self.fail_concept_write.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_material_concepts` find its material already deleted, as if a concurrent
    /// delete got there first.
    pub fn remove_materials_before_concept_writes(&self, remove: bool) {
        self.vanish_before_concept_write.store(remove, Ordering::SeqCst);
    }

    /// The next `count` class inserts lose a simulated race on the join-code index.
    pub fn lose_class_insert_races(&self, count: usize) {
        self.racing_class_inserts.store(count, Ordering::SeqCst);
    }

    /// The next `count` membership inserts lose a simulated race on the membership key,
    /// after the caller's own duplicate check has passed.
    pub fn lose_member_insert_races(&self, count: usize) {
        self.racing_member_inserts.store(count, Ordering::SeqCst);
    }

    pub fn insert_user(&self, user: User) {
        self.state().users.insert(user.id, user);
    }

    /// Seeds a user-owned class that predates the `owner_id` column: only the legacy
    /// `user_id` column identifies the owner.
    pub fn insert_legacy_class(&self, name: &str, class_code: &str, user_id: Uuid) -> Class {
        let class = Class {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            class_code: class_code.to_string(),
            owner: Owner::User { user_id },
            is_archived: false,
            created_at: Utc::now(),
        };
        self.state().classes.push(StoredClass {
            class: class.clone(),
            owner_id: None,
            legacy_user_id: Some(user_id),
        });
        class
    }

    pub fn note_count(&self) -> usize {
        self.state().notes.len()
    }

    pub fn material_count(&self) -> usize {
        self.state().materials.len()
    }

    pub fn assignment_count(&self) -> usize {
        self.state().assignments.len()
    }

    pub fn class_count(&self) -> usize {
        self.state().classes.len()
    }
}

fn active_ids<F>(state: &MemoryState, predicate: F) -> Vec<Uuid>
where
    F: Fn(&StoredClass) -> bool,
{
    state
        .classes
        .iter()
        .filter(|c| !c.class.is_archived && predicate(c))
        .map(|c| c.class.id)
        .collect()
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.state().users.get(&id).cloned())
    }

    async fn create_user(&self, user: User) -> RepoResult<User> {
        let mut state = self.state();
        if state.users.contains_key(&user.id) {
            return Err(RepoError::UniqueViolation("profiles_pkey".into()));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_user_role(&self, id: Uuid, role: &str) -> RepoResult<Option<User>> {
        let mut state = self.state();
        Ok(state.users.get_mut(&id).map(|user| {
            user.role = role.to_string();
            user.clone()
        }))
    }

    async fn get_class(&self, id: Uuid) -> RepoResult<Option<Class>> {
        Ok(self
            .state()
            .classes
            .iter()
            .find(|c| c.class.id == id)
            .map(|c| c.class.clone()))
    }

    async fn get_classes(&self, ids: &HashSet<Uuid>) -> RepoResult<Vec<Class>> {
        let mut classes: Vec<Class> = self
            .state()
            .classes
            .iter()
            .filter(|c| ids.contains(&c.class.id))
            .map(|c| c.class.clone())
            .collect();
        classes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(classes)
    }

    async fn class_ids_by_owner(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        Ok(active_ids(&self.state(), |c| c.owner_id == Some(user_id)))
    }

    async fn class_ids_by_legacy_user(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        Ok(active_ids(&self.state(), |c| c.legacy_user_id == Some(user_id)))
    }

    async fn class_ids_by_membership(&self, user_id: Uuid) -> RepoResult<Vec<Uuid>> {
        let state = self.state();
        let joined: HashSet<Uuid> = state
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.class_id)
            .collect();
        Ok(active_ids(&state, |c| joined.contains(&c.class.id)))
    }

    async fn class_ids_by_guest(&self, guest_id: &str) -> RepoResult<Vec<Uuid>> {
        Ok(active_ids(&self.state(), |c| {
            c.class.owner.guest_id() == Some(guest_id)
        }))
    }

    async fn class_code_exists(&self, code: &str) -> RepoResult<bool> {
        Ok(self
            .state()
            .classes
            .iter()
            .any(|c| !c.class.is_archived && c.class.class_code == code))
    }

    async fn find_class_by_code(&self, code: &str) -> RepoResult<Option<Class>> {
        Ok(self
            .state()
            .classes
            .iter()
            .find(|c| !c.class.is_archived && c.class.class_code == code)
            .map(|c| c.class.clone()))
    }

    async fn create_class(&self, new: NewClass) -> RepoResult<Class> {
        let racing = self.racing_class_inserts.load(Ordering::SeqCst);
        if racing > 0 {
            self.racing_class_inserts.store(racing - 1, Ordering::SeqCst);
            return Err(RepoError::UniqueViolation("classes_active_code_key".into()));
        }

        let mut state = self.state();
        if state
            .classes
            .iter()
            .any(|c| !c.class.is_archived && c.class.class_code == new.class_code)
        {
            return Err(RepoError::UniqueViolation("classes_active_code_key".into()));
        }
        let user_id = new.owner.user_id();
        let class = Class {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            class_code: new.class_code,
            owner: new.owner,
            is_archived: false,
            created_at: Utc::now(),
        };
        state.classes.push(StoredClass {
            class: class.clone(),
            owner_id: user_id,
            legacy_user_id: user_id,
        });
        Ok(class)
    }

    async fn archive_class(&self, id: Uuid) -> RepoResult<bool> {
        let mut state = self.state();
        match state
            .classes
            .iter_mut()
            .find(|c| c.class.id == id && !c.class.is_archived)
        {
            Some(stored) => {
                stored.class.is_archived = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_membership(
        &self,
        class_id: Uuid,
        user_id: Uuid,
    ) -> RepoResult<Option<ClassMember>> {
        Ok(self
            .state()
            .members
            .iter()
            .find(|m| m.class_id == class_id && m.user_id == user_id)
            .cloned())
    }

    async fn add_member(
        &self,
        class_id: Uuid,
        user_id: Uuid,
        role: ClassRole,
    ) -> RepoResult<ClassMember> {
        let racing = self.racing_member_inserts.load(Ordering::SeqCst);
        if racing > 0 {
            self.racing_member_inserts.store(racing - 1, Ordering::SeqCst);
            return Err(RepoError::UniqueViolation("class_members_pkey".into()));
        }

        let mut state = self.state();
        if state
            .members
            .iter()
            .any(|m| m.class_id == class_id && m.user_id == user_id)
        {
            return Err(RepoError::UniqueViolation("class_members_pkey".into()));
        }
        let member = ClassMember {
            class_id,
            user_id,
            role,
            joined_at: Utc::now(),
        };
        state.members.push(member.clone());
        Ok(member)
    }

    async fn remove_member(&self, class_id: Uuid, user_id: Uuid) -> RepoResult<bool> {
        let mut state = self.state();
        let before = state.members.len();
        state
            .members
            .retain(|m| !(m.class_id == class_id && m.user_id == user_id));
        Ok(state.members.len() < before)
    }

    async fn list_members(&self, class_id: Uuid) -> RepoResult<Vec<ClassMember>> {
        Ok(self
            .state()
            .members
            .iter()
            .filter(|m| m.class_id == class_id)
            .cloned()
            .collect())
    }

    async fn create_chapter(
        &self,
        class_id: Uuid,
        title: &str,
        position: i32,
    ) -> RepoResult<Chapter> {
        let chapter = Chapter {
            id: Uuid::new_v4(),
            class_id,
            title: title.to_string(),
            position,
            created_at: Utc::now(),
        };
        self.state().chapters.push(chapter.clone());
        Ok(chapter)
    }

    async fn get_chapter(&self, id: Uuid) -> RepoResult<Option<Chapter>> {
        Ok(self.state().chapters.iter().find(|c| c.id == id).cloned())
    }

    async fn list_chapters(&self, class_id: Uuid) -> RepoResult<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .state()
            .chapters
            .iter()
            .filter(|c| c.class_id == class_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.position);
        Ok(chapters)
    }

    async fn create_block(&self, chapter_id: Uuid, title: &str, position: i32) -> RepoResult<Block> {
        let block = Block {
            id: Uuid::new_v4(),
            chapter_id,
            title: title.to_string(),
            position,
            created_at: Utc::now(),
        };
        self.state().blocks.push(block.clone());
        Ok(block)
    }

    async fn get_block(&self, id: Uuid) -> RepoResult<Option<Block>> {
        Ok(self.state().blocks.iter().find(|b| b.id == id).cloned())
    }

    async fn list_blocks(&self, chapter_id: Uuid) -> RepoResult<Vec<Block>> {
        let mut blocks: Vec<Block> = self
            .state()
            .blocks
            .iter()
            .filter(|b| b.chapter_id == chapter_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.position);
        Ok(blocks)
    }

    async fn create_assignment(&self, new: NewAssignment) -> RepoResult<Assignment> {
        let assignment = Assignment {
            id: Uuid::new_v4(),
            class_id: new.class_id,
            chapter_id: new.chapter_id,
            block_id: new.block_id,
            title: new.title,
            description: new.description,
            due_at: new.due_at,
            owner: new.owner,
            created_at: Utc::now(),
        };
        self.state().assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn get_assignment(&self, id: Uuid) -> RepoResult<Option<Assignment>> {
        Ok(self.state().assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn list_assignments(&self, class_ids: &HashSet<Uuid>) -> RepoResult<Vec<Assignment>> {
        Ok(self
            .state()
            .assignments
            .iter()
            .filter(|a| class_ids.contains(&a.class_id))
            .cloned()
            .collect())
    }

    async fn create_submission(
        &self,
        assignment_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> RepoResult<Submission> {
        let submission = Submission {
            id: Uuid::new_v4(),
            assignment_id,
            user_id,
            content: content.to_string(),
            submitted_at: Utc::now(),
        };
        self.state().submissions.push(submission.clone());
        Ok(submission)
    }

    async fn list_submissions(
        &self,
        assignment_id: Uuid,
        user_id: Option<Uuid>,
    ) -> RepoResult<Vec<Submission>> {
        Ok(self
            .state()
            .submissions
            .iter()
            .filter(|s| s.assignment_id == assignment_id)
            .filter(|s| user_id.is_none_or(|uid| s.user_id == uid))
            .cloned()
            .collect())
    }

    async fn create_note(&self, title: &str, content: &str) -> RepoResult<Note> {
        let note = Note {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.state().notes.insert(note.id, note.clone());
        Ok(note)
    }

    async fn get_note(&self, id: Uuid) -> RepoResult<Option<Note>> {
        Ok(self.state().notes.get(&id).cloned())
    }

    async fn delete_note(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.state().notes.remove(&id).is_some())
    }

    async fn create_material(&self, new: NewMaterial) -> RepoResult<Material> {
        if self.fail_material_insert.load(Ordering::SeqCst) {
            return Err(RepoError::Integrity("simulated material insert failure".into()));
        }
        let mut state = self.state();
        if let Some(note_id) = new.content.note_id() {
            if !state.notes.contains_key(&note_id) {
                return Err(RepoError::Integrity(format!(
                    "materials_note_id_fkey: note {} does not exist",
                    note_id
                )));
            }
        }
        let material = Material {
            id: Uuid::new_v4(),
            class_id: new.class_id,
            title: new.title,
            content: match new.content {
                MaterialContent::Note { note_id, .. } => MaterialContent::Note { note_id, note: None },
                other => other,
            },
            concepts: vec![],
            owner: new.owner,
            created_at: Utc::now(),
        };
        state.materials.push(material.clone());
        Ok(material)
    }

    async fn get_material(&self, id: Uuid) -> RepoResult<Option<Material>> {
        Ok(self.state().materials.iter().find(|m| m.id == id).cloned())
    }

    async fn list_materials(&self, class_ids: &HashSet<Uuid>) -> RepoResult<Vec<Material>> {
        Ok(self
            .state()
            .materials
            .iter()
            .filter(|m| class_ids.contains(&m.class_id))
            .cloned()
            .collect())
    }

    async fn set_material_concepts(&self, id: Uuid, concepts: &[Concept]) -> RepoResult<bool> {
        if self.fail_concept_write.load(Ordering::SeqCst) {
            return Err(RepoError::Integrity("simulated concept write failure".into()));
        }
        if self.vanish_before_concept_write.load(Ordering::SeqCst) {
            self.delete_material(id).await?;
        }
        let mut state = self.state();
        match state.materials.iter_mut().find(|m| m.id == id) {
            Some(material) => {
                material.concepts = concepts.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_material(&self, id: Uuid) -> RepoResult<bool> {
        let mut state = self.state();
        let Some(index) = state.materials.iter().position(|m| m.id == id) else {
            return Ok(false);
        };
        let material = state.materials.remove(index);
        if let Some(note_id) = material.content.note_id() {
            state.notes.remove(&note_id);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_class(code: &str, owner: Owner) -> NewClass {
        NewClass {
            name: "Biology".into(),
            description: None,
            class_code: code.into(),
            owner,
        }
    }

    #[tokio::test]
    async fn test_active_code_is_unique_but_archived_code_is_reusable() {
        let repo = MemoryRepository::new();
        let owner = Owner::User { user_id: Uuid::new_v4() };

        let first = repo.create_class(new_class("ABC123", owner.clone())).await.unwrap();
        let clash = repo.create_class(new_class("ABC123", owner.clone())).await;
        assert!(matches!(clash, Err(RepoError::UniqueViolation(_))));

        assert!(repo.archive_class(first.id).await.unwrap());
        assert!(!repo.class_code_exists("ABC123").await.unwrap());
        assert!(repo.create_class(new_class("ABC123", owner)).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_membership_is_rejected() {
        let repo = MemoryRepository::new();
        let class_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        repo.add_member(class_id, user_id, ClassRole::Student).await.unwrap();
        let again = repo.add_member(class_id, user_id, ClassRole::Teacher).await;
        assert!(matches!(again, Err(RepoError::UniqueViolation(_))));
    }

    #[tokio::test]
    async fn test_deleting_note_material_removes_note() {
        let repo = MemoryRepository::new();
        let note = repo.create_note("Cells", "Mitochondria").await.unwrap();
        let material = repo
            .create_material(NewMaterial {
                class_id: Uuid::new_v4(),
                title: "Cells".into(),
                content: MaterialContent::Note { note_id: note.id, note: None },
                owner: Owner::Guest { guest_id: "g-1".into() },
            })
            .await
            .unwrap();

        assert!(repo.delete_material(material.id).await.unwrap());
        assert!(repo.get_note(note.id).await.unwrap().is_none());
        assert!(!repo.delete_material(material.id).await.unwrap());
    }
}
