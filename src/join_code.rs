//! Join-code allocation for new classes.
//!
//! Codes are 6 characters drawn uniformly (with replacement) from `[A-Z0-9]`. A code is only
//! known to be free once the class row holding it has been inserted: the partial unique
//! index on active classes is the final arbiter, so a racer that wins between our
//! existence check and our insert simply costs one more attempt.

use rand::{Rng, thread_rng};
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{Class, NewClass, Owner},
    repository::{RepoError, Repository},
};

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LENGTH: usize = 6;
pub const MAX_ATTEMPTS: usize = 10;

/// CodeSource
///
/// Where candidate codes come from. Production draws from the thread RNG; tests inject a
/// scripted sequence to force collisions.
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn next_code(&self) -> String {
        let mut rng = thread_rng();
        (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

pub type CodeSourceState = Arc<dyn CodeSource>;

/// True for a well-formed code: exactly 6 characters of `[A-Z0-9]`.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Canonical form of a code typed by a user: trimmed and upper-cased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// create_class_with_code
///
/// Allocates a fresh join code and inserts the class in one loop. Each attempt samples a
/// code, skips it if an active class already holds it, then tries the insert; a unique
/// violation on insert counts as a collision. After `MAX_ATTEMPTS` collisions the call
/// fails with `AllocationExhausted` and no class row exists.
pub async fn create_class_with_code(
    repo: &dyn Repository,
    codes: &dyn CodeSource,
    name: String,
    description: Option<String>,
    owner: Owner,
) -> Result<Class, AppError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let class_code = codes.next_code();

        if repo.class_code_exists(&class_code).await? {
            tracing::debug!(attempt, "join code collision on lookup");
            continue;
        }

        let new_class = NewClass {
            name: name.clone(),
            description: description.clone(),
            class_code,
            owner: owner.clone(),
        };

        match repo.create_class(new_class).await {
            Ok(class) => {
                tracing::info!(class_id = %class.id, attempt, "class created");
                return Ok(class);
            }
            Err(RepoError::UniqueViolation(constraint)) => {
                tracing::debug!(attempt, %constraint, "join code taken by a concurrent insert");
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::error!(attempts = MAX_ATTEMPTS, "join code allocation exhausted");
    Err(AppError::AllocationExhausted {
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Replays a fixed list of codes, then falls back to random ones.
    struct ScriptedCodes(Mutex<VecDeque<String>>);

    impl ScriptedCodes {
        fn new(codes: &[&str]) -> Self {
            Self(Mutex::new(codes.iter().map(|c| c.to_string()).collect()))
        }
    }

    impl CodeSource for ScriptedCodes {
        fn next_code(&self) -> String {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| RandomCodeSource.next_code())
        }
    }

    fn owner() -> Owner {
        Owner::User {
            user_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_random_codes_are_well_formed() {
        let codes: HashSet<String> = (0..500).map(|_| RandomCodeSource.next_code()).collect();
        assert!(codes.iter().all(|c| is_valid_code(c)));
        // 36^6 possibilities; 500 draws colliding more than a handful would mean a broken RNG.
        assert!(codes.len() > 490);
    }

    #[test]
    fn test_code_validation() {
        assert!(is_valid_code("AB12CD"));
        assert!(!is_valid_code("ab12cd"));
        assert!(!is_valid_code("AB12C"));
        assert!(!is_valid_code("AB12C-"));
        assert_eq!(normalize_code("  ab12cd "), "AB12CD");
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt_after_nine_collisions() {
        let repo = MemoryRepository::new();
        create_class_with_code(&repo, &ScriptedCodes::new(&["TAKEN0"]), "A".into(), None, owner())
            .await
            .unwrap();

        let script = vec!["TAKEN0"; MAX_ATTEMPTS - 1]
            .into_iter()
            .chain(["FRESH1"])
            .collect::<Vec<_>>();
        let class = create_class_with_code(&repo, &ScriptedCodes::new(&script), "B".into(), None, owner())
            .await
            .unwrap();

        assert_eq!(class.class_code, "FRESH1");
        assert_eq!(repo.class_count(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_after_ten_collisions_creates_nothing() {
        let repo = MemoryRepository::new();
        create_class_with_code(&repo, &ScriptedCodes::new(&["TAKEN0"]), "A".into(), None, owner())
            .await
            .unwrap();

        let script = vec!["TAKEN0"; MAX_ATTEMPTS + 1];
        let result =
            create_class_with_code(&repo, &ScriptedCodes::new(&script), "B".into(), None, owner()).await;

        assert!(matches!(
            result,
            Err(AppError::AllocationExhausted { attempts: MAX_ATTEMPTS })
        ));
        assert_eq!(repo.class_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_insert_race_is_retried() {
        let repo = MemoryRepository::new();
        repo.lose_class_insert_races(3);

        let class = create_class_with_code(
            &repo,
            &ScriptedCodes::new(&["RACE01", "RACE02", "RACE03", "WIN004"]),
            "Racing".into(),
            None,
            owner(),
        )
        .await
        .unwrap();

        assert_eq!(class.class_code, "WIN004");
        assert_eq!(repo.class_count(), 1);
    }

    #[tokio::test]
    async fn test_archived_class_releases_its_code() {
        let repo = MemoryRepository::new();
        let first =
            create_class_with_code(&repo, &ScriptedCodes::new(&["REUSE1"]), "Old".into(), None, owner())
                .await
                .unwrap();
        repo.archive_class(first.id).await.unwrap();

        let second =
            create_class_with_code(&repo, &ScriptedCodes::new(&["REUSE1"]), "New".into(), None, owner())
                .await
                .unwrap();
        assert_eq!(second.class_code, "REUSE1");
    }
}
