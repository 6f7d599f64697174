//! Application record capabilities and structural mapping.
//!
//! # Responsibility
//! - Define the read-only `Record` capability every versioned record exposes.
//! - Define `Entity`, the explicit per-type schema used by the mapper.
//! - Keep identity mutation (`identifier`, `commit_id`, `view_id`, `kind`,
//!   `relations`) private to the crate.
//!
//! # Invariants
//! - Callers can edit custom attributes but never identity fields.
//! - A record with `identifier() == 0` has never been saved.

use crate::model::entity::Relations;
use crate::model::validation::ValidationError;
use serde_json::Value;
use std::collections::BTreeMap;

pub mod mapper;
pub mod schema;

pub use mapper::{from_generic, to_generic, GenericRecord, MapperError, MapperResult};
pub use schema::{Entity, Field};

/// Identity and side-table state embedded in every record type.
///
/// Identity fields are assigned by the entity manager on save or load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    identifier: i64,
    commit_id: i64,
    view_id: i64,
    kind: String,
    attributes: BTreeMap<String, Value>,
    relations: Relations,
}

impl EntityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root id shared by the record across all views.
    pub fn identifier(&self) -> i64 {
        self.identifier
    }

    /// Version id of the snapshot this record was loaded from or saved as.
    pub fn commit_id(&self) -> i64 {
        self.commit_id
    }

    pub fn view_id(&self) -> i64 {
        self.view_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Custom attributes not backed by a schema field.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Creates or replaces one custom attribute.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), ValidationError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyAttributeKey);
        }
        self.attributes.insert(key, value.into());
        Ok(())
    }

    /// Removes one custom attribute. Missing keys are a no-op.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Relations pinned at the last save or load.
    pub fn relations(&self) -> &Relations {
        &self.relations
    }

    pub(crate) fn set_kind(&mut self, kind: impl Into<String>) {
        self.kind = kind.into();
    }

    pub(crate) fn insert_attribute(&mut self, key: String, value: Value) {
        self.attributes.insert(key, value);
    }

    fn stamp(&mut self, identity: Identity) {
        self.identifier = identity.identifier;
        self.commit_id = identity.commit_id;
        self.view_id = identity.view_id;
        self.relations = identity.relations;
    }
}

/// Proof of crate-internal access to a record's `EntityState`.
///
/// Only this crate can construct one, so `Record::entity_mut` is callable
/// from inside the crate alone.
#[derive(Debug)]
pub struct StateToken(());

impl StateToken {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

/// Read-only view of a versioned record.
///
/// Implementors only provide access to their embedded `EntityState`.
/// Outside this crate the only mutations are the custom-attribute methods.
pub trait Record {
    fn entity(&self) -> &EntityState;

    /// Mutable state access, gated by a token only this crate can build.
    fn entity_mut(&mut self, token: StateToken) -> &mut EntityState;

    fn identifier(&self) -> i64 {
        self.entity().identifier()
    }

    fn commit_id(&self) -> i64 {
        self.entity().commit_id()
    }

    fn view_id(&self) -> i64 {
        self.entity().view_id()
    }

    fn kind(&self) -> &str {
        self.entity().kind()
    }

    fn attributes(&self) -> &BTreeMap<String, Value> {
        self.entity().attributes()
    }

    fn attribute(&self, key: &str) -> Option<&Value> {
        self.entity().attribute(key)
    }

    fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), ValidationError>
    where
        Self: Sized,
    {
        self.entity_mut(StateToken::new()).set_attribute(key, value)
    }

    fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.entity_mut(StateToken::new()).remove_attribute(key)
    }

    fn relations(&self) -> &Relations {
        self.entity().relations()
    }

    /// Pinned commit ids of related records of `kind`.
    fn relations_by_entity(&self, kind: &str) -> &[i64] {
        self.entity().relations().by_kind(kind)
    }
}

/// Identity assigned to a record after it was saved or loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Identity {
    pub identifier: i64,
    pub commit_id: i64,
    pub view_id: i64,
    pub relations: Relations,
}

/// Mutable identity capability, reserved for components that hydrate records.
pub(crate) trait StampIdentity: Record {
    fn stamp_identity(&mut self, identity: Identity) {
        self.entity_mut(StateToken::new()).stamp(identity);
    }
}

impl<R: Record + ?Sized> StampIdentity for R {}

#[cfg(test)]
mod tests {
    use super::{EntityState, Identity, Record, StampIdentity, StateToken};
    use crate::model::entity::Relations;
    use crate::model::validation::ValidationError;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Note {
        entity: EntityState,
    }

    impl Record for Note {
        fn entity(&self) -> &EntityState {
            &self.entity
        }

        fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
            &mut self.entity
        }
    }

    #[test]
    fn custom_attributes_can_be_set_read_and_removed() {
        let mut note = Note::default();
        note.set_attribute("description", "A nice pair of socks")
            .unwrap();

        assert_eq!(note.attribute("description"), Some(&json!("A nice pair of socks")));
        assert_eq!(note.remove_attribute("description"), Some(json!("A nice pair of socks")));
        assert!(note.attribute("description").is_none());
        assert!(note.remove_attribute("description").is_none());
    }

    #[test]
    fn empty_attribute_keys_are_rejected() {
        let mut note = Note::default();
        assert_eq!(
            note.set_attribute("", 1).unwrap_err(),
            ValidationError::EmptyAttributeKey
        );
    }

    #[test]
    fn stamping_sets_identity_and_relations() {
        let mut relations = Relations::new();
        relations.push("sku", 11);

        let mut note = Note::default();
        note.stamp_identity(Identity {
            identifier: 3,
            commit_id: 5,
            view_id: 1,
            relations,
        });

        assert_eq!(note.identifier(), 3);
        assert_eq!(note.commit_id(), 5);
        assert_eq!(note.view_id(), 1);
        assert_eq!(note.relations_by_entity("sku"), &[11]);
    }
}
