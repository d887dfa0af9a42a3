use thiserror::Error;

use crate::{CLEANUP_NAMESPACE, DEFAULT_NAMESPACE};

const MAX_IDENTIFIER_LEN: usize = 63;

/// Names that cannot be chosen for a namespace or a queue
const RESERVED_NAMES: &[&str] = &[DEFAULT_NAMESPACE, CLEANUP_NAMESPACE];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NameError {
    #[error("Missing {0} name")]
    Empty(&'static str),
    #[error("Invalid {0} name {1:?}")]
    Invalid(&'static str, String),
    #[error("Reserved {0} name {1:?}")]
    Reserved(&'static str, String),
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    value.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Trims and lower-cases `value`, then checks it is an identifier.
///
/// `kind` is only used in error messages ("queue", "ticker", ...).
pub fn normalize_identifier(kind: &'static str, value: &str) -> Result<String, NameError> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Err(NameError::Empty(kind));
    }
    if !is_identifier(&value) {
        return Err(NameError::Invalid(kind, value));
    }
    Ok(value)
}

/// Like [`normalize_identifier`], additionally rejecting the reserved names.
pub fn validate_namespace(kind: &'static str, value: &str) -> Result<String, NameError> {
    let value = normalize_identifier(kind, value)?;
    if RESERVED_NAMES.contains(&value.as_str()) {
        return Err(NameError::Reserved(kind, value));
    }
    Ok(value)
}
