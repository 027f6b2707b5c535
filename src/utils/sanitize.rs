//! Identifier validation for SurrealDB query safety.
//!
//! Record keys are always bound as parameters (`type::thing($tb, $key)`), but
//! payload field names are interpolated into `WHERE` clauses with `format!()`
//! and must be checked first.

use crate::TaleforgeError;

/// Allowed characters in a stable identifier: alphanumeric, `_`, `-`, `:`, `.`.
fn is_valid_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
}

/// Validate a stable identifier (`mol-…`, `evt-…`, `normalization:doc-1`).
pub fn validate_identifier(id: &str) -> Result<&str, TaleforgeError> {
    if id.is_empty() || id.len() > 256 || !id.chars().all(is_valid_id_char) {
        return Err(TaleforgeError::Validation(format!(
            "Invalid identifier '{}': must be 1-256 chars of [A-Za-z0-9_:.-]",
            id
        )));
    }
    Ok(id)
}

/// Validate a payload field name used in a filter clause.
///
/// ```ignore
/// validate_field_name("doc_type")?;       // ok
/// validate_field_name("x; DELETE a")?;    // Validation error
/// ```
pub fn validate_field_name(field: &str) -> Result<&str, TaleforgeError> {
    let mut chars = field.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    if !valid_head || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(TaleforgeError::Validation(format!(
            "Invalid payload field '{}': must be lowercase snake_case",
            field
        )));
    }
    Ok(field)
}
