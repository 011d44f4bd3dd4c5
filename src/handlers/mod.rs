//! HTTP handlers, grouped by resource.
//!
//! Every handler authorizes through `crate::access` before touching the repository, so a
//! denied request never causes a write.

use crate::error::AppError;

pub mod assignments;
pub mod chapters;
pub mod classes;
pub mod generate;
pub mod materials;
pub mod members;
pub mod users;

const MAX_TITLE_LEN: usize = 200;

/// Trims a required free-text field and rejects it when blank or over-long.
pub(crate) fn required_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            field, MAX_TITLE_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text is stored as absent.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_text_trims_and_bounds() {
        assert_eq!(required_text("name", "  Biology ").unwrap(), "Biology");
        assert!(required_text("name", "   ").is_err());
        assert!(required_text("name", &"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn test_optional_text_drops_blank() {
        assert_eq!(optional_text(Some("  ".into())), None);
        assert_eq!(optional_text(Some(" intro ".into())), Some("intro".into()));
    }
}
