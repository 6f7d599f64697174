//! Identity and branching models: roots, versions, heads and views.
//!
//! # Responsibility
//! - Give every logical record a permanent `Root`.
//! - Snapshot content plus pinned relations in immutable `Version`s.
//! - Track the current tip of a root per `View` with replaceable `Head`s.
//!
//! # Invariants
//! - Relation commit ids inside a version never change.
//! - At most one non-archived head exists per `(root_id, view_id)`.
//! - Parent/previous links are plain ids, never object references.

use crate::model::validation::{require_id, require_text, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-version map from related record kind to pinned commit ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relations(BTreeMap<String, Vec<i64>>);

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one commit id under `kind`, keeping insertion order.
    pub fn push(&mut self, kind: impl Into<String>, commit_id: i64) {
        self.0.entry(kind.into()).or_default().push(commit_id);
    }

    /// Commit ids recorded for `kind`; empty when the kind is absent.
    pub fn by_kind(&self, kind: &str) -> &[i64] {
        self.0.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.0
            .iter()
            .map(|(kind, ids)| (kind.as_str(), ids.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Vec<i64>>> for Relations {
    fn from(value: BTreeMap<String, Vec<i64>>) -> Self {
        Self(value)
    }
}

/// Permanent identity of one logical record across all views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Root {
    pub id: i64,
    pub kind: String,
    pub created_at: i64,
    pub archived_at: Option<i64>,
}

impl Root {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("Root", "kind", &self.kind)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Immutable snapshot of a root's content commit and its relations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    pub id: i64,
    /// Version this one was branched from; `None` for the first save.
    pub parent_id: Option<i64>,
    pub kind: String,
    pub content_commit_id: i64,
    pub relations: Relations,
    pub created_at: i64,
}

impl Version {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_id("Version", "content_commit_id", self.content_commit_id)?;
        require_text("Version", "kind", &self.kind)
    }
}

/// Pointer from a root to its latest version within one view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Head {
    pub id: i64,
    pub root_id: i64,
    pub view_id: i64,
    pub version_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub archived_at: Option<i64>,
}

impl Head {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_id("Head", "view_id", self.view_id)?;
        require_id("Head", "version_id", self.version_id)?;
        require_id("Head", "root_id", self.root_id)
    }

    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

/// Namespace under which heads are tracked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    pub id: i64,
    pub name: String,
    pub attributes: BTreeMap<String, Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl View {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("View", "name", &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::{Head, Relations, Version, View};
    use crate::model::validation::ValidationError;

    #[test]
    fn relations_group_by_kind_in_insertion_order() {
        let mut relations = Relations::new();
        relations.push("sku", 7);
        relations.push("sku", 3);
        relations.push("image", 9);

        assert_eq!(relations.by_kind("sku"), &[7, 3]);
        assert_eq!(relations.by_kind("image"), &[9]);
        assert!(relations.by_kind("variant").is_empty());
        assert_eq!(relations.kinds().collect::<Vec<_>>(), vec!["image", "sku"]);
    }

    #[test]
    fn relations_serialize_as_plain_map() {
        let mut relations = Relations::new();
        relations.push("sku", 42);
        let encoded = serde_json::to_string(&relations).unwrap();
        assert_eq!(encoded, r#"{"sku":[42]}"#);

        let decoded: Relations = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, relations);
    }

    #[test]
    fn version_requires_commit_and_kind() {
        let missing_commit = Version {
            kind: "product".to_string(),
            ..Version::default()
        };
        assert_eq!(
            missing_commit.validate().unwrap_err(),
            ValidationError::MissingField {
                entity: "Version",
                field: "content_commit_id"
            }
        );

        let missing_kind = Version {
            content_commit_id: 1,
            ..Version::default()
        };
        assert!(missing_kind.validate().is_err());
    }

    #[test]
    fn head_requires_all_pointers() {
        let head = Head {
            root_id: 1,
            view_id: 1,
            ..Head::default()
        };
        assert_eq!(
            head.validate().unwrap_err(),
            ValidationError::MissingField {
                entity: "Head",
                field: "version_id"
            }
        );
        assert!(head.is_active());
    }

    #[test]
    fn view_requires_name() {
        assert!(View::new("  ").validate().is_err());
        assert!(View::new("Default").validate().is_ok());
    }
}
