//! Content-addressed object primitives.
//!
//! # Responsibility
//! - Define `Form` (hash-keyed values), `Shadow` (named projection) and
//!   `Commit` (one form + one shadow).
//! - Compute content hashes for attribute values.
//!
//! # Invariants
//! - A form attribute key is always `content_hash` of its value.
//! - Every shadow `ref` must exist in the owning form.
//! - None of these types is updated after insert.

use crate::model::validation::{require_id, require_text, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Form attribute map keyed by content hash.
pub type FormAttributes = BTreeMap<String, Value>;

/// Shadow attribute map keyed by public attribute name.
pub type ShadowAttributes = BTreeMap<String, ShadowAttribute>;

/// Returns the lowercase hex SHA-256 of the value's JSON encoding.
///
/// `serde_json` maps keep keys ordered, so equal values hash equally.
pub fn content_hash(value: &Value) -> String {
    hex::encode(Sha256::digest(value.to_string().as_bytes()))
}

/// Flat bag of raw attribute values for one record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: i64,
    pub kind: String,
    pub attributes: FormAttributes,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Form {
    /// Creates an unsaved, empty form.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Stores `value` under its content hash and returns the hash.
    ///
    /// Adding an equal value again is a no-op returning the same key.
    pub fn add_attribute(&mut self, value: Value) -> String {
        let hash = content_hash(&value);
        self.attributes.entry(hash.clone()).or_insert(value);
        hash
    }

    /// Looks up one value by content hash.
    pub fn attribute(&self, reference: &str) -> Option<&Value> {
        self.attributes.get(reference)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("Form", "kind", &self.kind)
    }
}

/// One named entry of a shadow: declared type tag plus form reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowAttribute {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Named, typed projection over the attributes of one form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shadow {
    pub id: i64,
    pub form_id: i64,
    pub attributes: ShadowAttributes,
    pub created_at: i64,
}

impl Shadow {
    /// Creates an unsaved shadow with no form assigned yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as a view of the form value at `reference`.
    pub fn add_attribute(
        &mut self,
        name: impl Into<String>,
        type_tag: impl Into<String>,
        reference: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyAttributeKey);
        }

        self.attributes.insert(
            name,
            ShadowAttribute {
                type_tag: type_tag.into(),
                reference: reference.into(),
            },
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_id("Shadow", "form_id", self.form_id)
    }

    /// Checks that every `ref` resolves inside `form`.
    pub fn validate_against(&self, form: &Form) -> Result<(), ValidationError> {
        for (name, attribute) in &self.attributes {
            if form.attribute(&attribute.reference).is_none() {
                return Err(ValidationError::UnknownShadowRef {
                    name: name.clone(),
                    reference: attribute.reference.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Immutable pairing of one form and one shadow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: i64,
    pub form_id: i64,
    pub shadow_id: i64,
    /// Commit this one was branched from, if any.
    pub previous_id: Option<i64>,
    pub created_at: i64,
}

impl Commit {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_id("Commit", "form_id", self.form_id)?;
        require_id("Commit", "shadow_id", self.shadow_id)
    }
}

/// Form, shadow and commit loaded or inserted together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullObject {
    pub form: Form,
    pub shadow: Shadow,
    pub commit: Commit,
}
