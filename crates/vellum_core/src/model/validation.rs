//! Entity invariant violations.
//!
//! Raised before any write touches the store, so a failed validation never
//! leaves a partial row behind.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Invariant violation detected on a model before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is zero or empty.
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    /// A shadow entry points at a hash that its form does not contain.
    UnknownShadowRef { name: String, reference: String },
    /// A version's kind differs from the kind of its content form.
    KindMismatch { expected: String, found: String },
    /// Custom attribute keys must be non-empty.
    EmptyAttributeKey,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { entity, field } => {
                write!(f, "{entity} must have a non-empty {field}")
            }
            Self::UnknownShadowRef { name, reference } => write!(
                f,
                "shadow attribute `{name}` references unknown form attribute `{reference}`"
            ),
            Self::KindMismatch { expected, found } => write!(
                f,
                "version kind `{expected}` does not match content form kind `{found}`"
            ),
            Self::EmptyAttributeKey => write!(f, "attribute key must be non-empty"),
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn require_id(
    entity: &'static str,
    field: &'static str,
    value: i64,
) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::MissingField { entity, field });
    }
    Ok(())
}

pub(crate) fn require_text(
    entity: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { entity, field });
    }
    Ok(())
}
