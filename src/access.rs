//! Access control for class-scoped resources.
//!
//! Every decision starts from the acting `Principal` and the owning class. Owners hold all
//! write rights; members (joined via code or invite) may only read. Guests are matched by
//! their `guest_id` alone and never through the membership table.
//!
//! Outcomes are kept apart: no identity is `Unauthorized`, a missing (or archived) class or
//! entity is `NotFound`, an identity without rights is `Forbidden`.

use std::collections::HashSet;
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::AppError,
    models::{Assignment, Class, ClassRole, Material, Owner},
    repository::Repository,
};

/// The kind of access being requested; carried into the audit log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
}

/// How the principal relates to a class it was granted access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Owner,
    Member(ClassRole),
}

#[derive(Debug, Clone)]
pub struct ClassAccess {
    pub class: Class,
    pub relation: Relation,
}

impl ClassAccess {
    pub fn is_owner(&self) -> bool {
        self.relation == Relation::Owner
    }
}

/// Which submissions of an assignment the caller may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionScope {
    All,
    OwnOnly(Uuid),
}

/// True when the principal is the recorded owner.
pub fn is_owner(principal: &Principal, owner: &Owner) -> bool {
    match (principal, owner) {
        (Principal::User { id, .. }, Owner::User { user_id }) => id == user_id,
        (Principal::Guest { guest_id }, Owner::Guest { guest_id: owner_guest }) => {
            guest_id == owner_guest
        }
        _ => false,
    }
}

/// The owner a new row is stamped with when this principal creates it.
pub fn owner_of(principal: &Principal) -> Result<Owner, AppError> {
    match principal {
        Principal::User { id, .. } => Ok(Owner::User { user_id: *id }),
        Principal::Guest { guest_id } => Ok(Owner::Guest {
            guest_id: guest_id.clone(),
        }),
        Principal::Anonymous => Err(AppError::Unauthorized),
    }
}

/// resolve_owned_class_ids
///
/// The visibility set for list endpoints. For users it is the union of classes matched by
/// the current `owner_id` column, the legacy `user_id` column and the membership table;
/// for guests only `guest_id` equality applies. Anonymous callers see nothing.
pub async fn resolve_owned_class_ids(
    repo: &dyn Repository,
    principal: &Principal,
) -> Result<HashSet<Uuid>, AppError> {
    let ids: HashSet<Uuid> = match principal {
        Principal::User { id, .. } => {
            let mut ids: HashSet<Uuid> = repo.class_ids_by_owner(*id).await?.into_iter().collect();
            ids.extend(repo.class_ids_by_legacy_user(*id).await?);
            ids.extend(repo.class_ids_by_membership(*id).await?);
            ids
        }
        Principal::Guest { guest_id } => {
            repo.class_ids_by_guest(guest_id).await?.into_iter().collect()
        }
        Principal::Anonymous => HashSet::new(),
    };
    Ok(ids)
}

async fn load_active_class(repo: &dyn Repository, class_id: Uuid) -> Result<Class, AppError> {
    match repo.get_class(class_id).await? {
        Some(class) if !class.is_archived => Ok(class),
        _ => Err(AppError::not_found(format!("class {} not found", class_id))),
    }
}

/// authorize_class_write
///
/// ALLOW iff the principal owns the class. Membership never grants write access, including
/// to assignments and materials inside the class.
pub async fn authorize_class_write(
    repo: &dyn Repository,
    principal: &Principal,
    class_id: Uuid,
    operation: Operation,
) -> Result<Class, AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    let class = load_active_class(repo, class_id).await?;
    if is_owner(principal, &class.owner) {
        Ok(class)
    } else {
        tracing::warn!(
            class_id = %class_id,
            principal = %principal,
            ?operation,
            "denied: only the class owner may modify this class"
        );
        Err(AppError::forbidden("only the class owner may modify this class"))
    }
}

/// authorize_class_read
///
/// ALLOW iff the principal owns the class or is a member of it.
pub async fn authorize_class_read(
    repo: &dyn Repository,
    principal: &Principal,
    class_id: Uuid,
) -> Result<ClassAccess, AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    let class = load_active_class(repo, class_id).await?;
    if is_owner(principal, &class.owner) {
        return Ok(ClassAccess {
            class,
            relation: Relation::Owner,
        });
    }
    if let Principal::User { id, .. } = principal {
        if let Some(member) = repo.get_membership(class_id, *id).await? {
            return Ok(ClassAccess {
                class,
                relation: Relation::Member(member.role),
            });
        }
    }
    tracing::warn!(class_id = %class_id, principal = %principal, "denied: not a class member");
    Err(AppError::forbidden("you are not a member of this class"))
}

/// authorize_child_entity
///
/// ALLOW iff the child's declared parent id is exactly the parent the caller named. Stops a
/// caller from pairing a valid child id with a parent from another tenant.
pub fn authorize_child_entity(
    entity: &str,
    actual_parent_id: Uuid,
    expected_parent_id: Uuid,
) -> Result<(), AppError> {
    if actual_parent_id == expected_parent_id {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{} does not belong to parent {}",
            entity, expected_parent_id
        )))
    }
}

/// Resolves a material and checks the caller against its class: read for `Operation::Read`,
/// owner-only otherwise.
pub async fn authorize_material(
    repo: &dyn Repository,
    principal: &Principal,
    material_id: Uuid,
    operation: Operation,
) -> Result<Material, AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    let material = repo
        .get_material(material_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("material {} not found", material_id)))?;
    match operation {
        Operation::Read => {
            authorize_class_read(repo, principal, material.class_id).await?;
        }
        Operation::Write | Operation::Delete => {
            authorize_class_write(repo, principal, material.class_id, operation).await?;
        }
    }
    Ok(material)
}

pub async fn authorize_assignment_read(
    repo: &dyn Repository,
    principal: &Principal,
    assignment_id: Uuid,
) -> Result<(Assignment, ClassAccess), AppError> {
    if principal.is_anonymous() {
        return Err(AppError::Unauthorized);
    }
    let assignment = repo
        .get_assignment(assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("assignment {} not found", assignment_id)))?;
    let access = authorize_class_read(repo, principal, assignment.class_id).await?;
    Ok((assignment, access))
}

/// The owner reads every submission; a member reads only their own.
pub async fn authorize_submission_read(
    repo: &dyn Repository,
    principal: &Principal,
    assignment_id: Uuid,
) -> Result<SubmissionScope, AppError> {
    let (_, access) = authorize_assignment_read(repo, principal, assignment_id).await?;
    match (access.relation, principal) {
        (Relation::Owner, _) => Ok(SubmissionScope::All),
        (Relation::Member(_), Principal::User { id, .. }) => Ok(SubmissionScope::OwnOnly(*id)),
        _ => Err(AppError::forbidden("submissions are not visible to this caller")),
    }
}
