//! Structural mapper between application records and the generic model.
//!
//! # Responsibility
//! - `to_generic`: split a record into kind, a content-addressed form, a
//!   shadow projection and pinned relations.
//! - `from_generic`: rebuild a record of a target type from a form/shadow pair.
//!
//! # Invariants
//! - Extraction followed by hydration reproduces every attribute field and
//!   every custom attribute.
//! - Relations are collected as commit ids; nested records are never
//!   re-hydrated.
//! - Attribute names are unique within one shadow.

use crate::model::entity::Relations;
use crate::model::object::{Form, Shadow};
use crate::model::validation::ValidationError;
use crate::record::schema::{json_type_tag, Entity};
use crate::record::StateToken;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static KIND_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid kind name regex"));

pub type MapperResult<T> = Result<T, MapperError>;

/// Failure while converting between a record and its generic form.
#[derive(Debug)]
pub enum MapperError {
    /// Kind is empty or not a lower-case identifier.
    InvalidRecordKind(String),
    /// A member value could not be encoded for content addressing.
    Encoding {
        field: String,
        source: serde_json::Error,
    },
    /// Two members (or a member and a custom attribute) share one name.
    DuplicateAttribute(String),
    /// A related record has never been saved and has no commit id.
    UnsavedRelation { field: String },
    /// A shadow entry points at a missing form value (corrupted storage).
    MissingFormAttribute { name: String, reference: String },
    /// A stored value does not fit the target member type.
    TypeMismatch {
        field: String,
        source: serde_json::Error,
    },
    /// The stored form belongs to a different record kind.
    KindMismatch { expected: String, found: String },
    Validation(ValidationError),
}

impl Display for MapperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRecordKind(kind) => write!(f, "invalid record kind `{kind}`"),
            Self::Encoding { field, source } => {
                write!(f, "unable to encode attribute `{field}`: {source}")
            }
            Self::DuplicateAttribute(name) => write!(f, "duplicate attribute name `{name}`"),
            Self::UnsavedRelation { field } => {
                write!(f, "relation `{field}` references a record that was never saved")
            }
            Self::MissingFormAttribute { name, reference } => write!(
                f,
                "unable to find form attribute `{reference}` for `{name}`"
            ),
            Self::TypeMismatch { field, source } => {
                write!(f, "unable to assign attribute `{field}`: {source}")
            }
            Self::KindMismatch { expected, found } => {
                write!(f, "expected record kind `{expected}`, found `{found}`")
            }
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MapperError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encoding { source, .. } | Self::TypeMismatch { source, .. } => Some(source),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for MapperError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Generic representation of one record: kind, content and relations.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericRecord {
    pub kind: String,
    pub form: Form,
    pub shadow: Shadow,
    pub relations: Relations,
}

/// Extracts kind, form, shadow and relations from `record`.
///
/// Identity fields on the record are ignored.
pub fn to_generic<R: Entity>(record: &R) -> MapperResult<GenericRecord> {
    let kind = R::kind_name();
    if !KIND_NAME_RE.is_match(&kind) {
        return Err(MapperError::InvalidRecordKind(kind));
    }

    let mut form = Form::new(kind.clone());
    let mut shadow = Shadow::new();
    let mut relations = Relations::new();

    for field in R::schema() {
        let name = field.name();

        if let Some(commit_ids) = field.commit_ids(record) {
            let relation_kind = field.relation_kind().unwrap_or_default().to_string();
            for commit_id in commit_ids {
                if commit_id <= 0 {
                    return Err(MapperError::UnsavedRelation { field: name });
                }
                relations.push(relation_kind.clone(), commit_id);
            }
            continue;
        }

        if shadow.attributes.contains_key(&name) {
            return Err(MapperError::DuplicateAttribute(name));
        }

        let value = match field.encode(record) {
            Some(Ok(value)) => value,
            Some(Err(source)) => return Err(MapperError::Encoding { field: name, source }),
            None => continue,
        };
        let type_tag = field.type_tag().unwrap_or_default().to_string();
        let reference = form.add_attribute(value);
        shadow.add_attribute(name, type_tag, reference)?;
    }

    for (name, value) in record.attributes() {
        if shadow.attributes.contains_key(name) {
            return Err(MapperError::DuplicateAttribute(name.clone()));
        }
        let reference = form.add_attribute(value.clone());
        shadow.add_attribute(name.clone(), json_type_tag(value), reference)?;
    }

    debug!(
        "event=record_extract module=mapper status=ok kind={} attributes={} relation_kinds={}",
        kind,
        shadow.attributes.len(),
        relations.kinds().count()
    );

    Ok(GenericRecord {
        kind,
        form,
        shadow,
        relations,
    })
}

/// Hydrates a new `R` from a form/shadow pair.
///
/// Names without a matching member become custom attributes. Identity
/// fields stay unset; callers stamp them.
pub fn from_generic<R: Entity>(form: &Form, shadow: &Shadow) -> MapperResult<R> {
    let expected = R::kind_name();
    if form.kind != expected {
        return Err(MapperError::KindMismatch {
            expected,
            found: form.kind.clone(),
        });
    }

    let schema = R::schema();
    let members: HashMap<String, usize> = schema
        .iter()
        .enumerate()
        .filter(|(_, field)| !field.is_relation())
        .map(|(index, field)| (field.name(), index))
        .collect();

    let mut record = R::default();
    for (name, attribute) in &shadow.attributes {
        let value = form
            .attribute(&attribute.reference)
            .cloned()
            .ok_or_else(|| MapperError::MissingFormAttribute {
                name: name.clone(),
                reference: attribute.reference.clone(),
            })?;

        match members.get(name).and_then(|index| schema[*index].decode(&mut record, value.clone())) {
            Some(Ok(())) => {}
            Some(Err(source)) => {
                return Err(MapperError::TypeMismatch {
                    field: name.clone(),
                    source,
                })
            }
            None => record
                .entity_mut(StateToken::new())
                .insert_attribute(name.clone(), value),
        }
    }

    record.entity_mut(StateToken::new()).set_kind(form.kind.clone());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::{from_generic, to_generic, MapperError};
    use crate::model::object::{Form, Shadow};
    use crate::record::{EntityState, Entity, Field, Identity, Record, StampIdentity, StateToken};
    use serde_json::json;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Product {
        entity: EntityState,
        title: String,
        stock_level: i32,
        price: f64,
        active: bool,
    }

    impl Record for Product {
        fn entity(&self) -> &EntityState {
            &self.entity
        }

        fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
            &mut self.entity
        }
    }

    impl Entity for Product {
        fn schema() -> Vec<Field<Self>> {
            vec![
                Field::attribute("title", |p: &Product| &p.title, |p, v| p.title = v),
                Field::attribute("stock_level", |p: &Product| &p.stock_level, |p, v| {
                    p.stock_level = v
                }),
                Field::attribute("price", |p: &Product| &p.price, |p, v| p.price = v)
                    .serialized_as("amount"),
                Field::attribute("active", |p: &Product| &p.active, |p, v| p.active = v),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct Bundle {
        entity: EntityState,
        name: String,
        products: Vec<Product>,
    }

    impl Record for Bundle {
        fn entity(&self) -> &EntityState {
            &self.entity
        }

        fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
            &mut self.entity
        }
    }

    impl Entity for Bundle {
        fn schema() -> Vec<Field<Self>> {
            vec![
                Field::attribute("name", |b: &Bundle| &b.name, |b, v| b.name = v),
                Field::relations("products", |b: &Bundle| b.products.as_slice()),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct BadKind {
        entity: EntityState,
    }

    impl Record for BadKind {
        fn entity(&self) -> &EntityState {
            &self.entity
        }

        fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
            &mut self.entity
        }
    }

    impl Entity for BadKind {
        fn kind_name() -> String {
            "Bad Kind".to_string()
        }

        fn schema() -> Vec<Field<Self>> {
            Vec::new()
        }
    }

    fn fox_socks() -> Product {
        Product {
            entity: EntityState::default(),
            title: "Fox Socks".to_string(),
            stock_level: 12,
            price: 999.0,
            active: true,
        }
    }

    #[test]
    fn extraction_builds_named_typed_shadow() {
        let generic = to_generic(&fox_socks()).unwrap();

        assert_eq!(generic.kind, "product");
        assert_eq!(generic.form.kind, "product");
        assert_eq!(generic.shadow.attributes["title"].type_tag, "string");
        assert_eq!(generic.shadow.attributes["stockLevel"].type_tag, "int");
        assert_eq!(generic.shadow.attributes["amount"].type_tag, "float");
        assert_eq!(generic.shadow.attributes["active"].type_tag, "bool");

        let title_ref = &generic.shadow.attributes["title"].reference;
        assert_eq!(generic.form.attributes[title_ref], json!("Fox Socks"));
        assert!(generic.relations.is_empty());
    }

    #[test]
    fn scalar_record_roundtrips() {
        let original = fox_socks();
        let generic = to_generic(&original).unwrap();
        let hydrated: Product = from_generic(&generic.form, &generic.shadow).unwrap();

        assert_eq!(hydrated.title, original.title);
        assert_eq!(hydrated.stock_level, original.stock_level);
        assert_eq!(hydrated.price, original.price);
        assert_eq!(hydrated.active, original.active);
        assert_eq!(hydrated.kind(), "product");
        assert!(hydrated.attributes().is_empty());
    }

    #[test]
    fn custom_attributes_roundtrip() {
        let mut product = fox_socks();
        product
            .set_attribute("description", "A nice pair of socks")
            .unwrap();

        let generic = to_generic(&product).unwrap();
        assert_eq!(generic.shadow.attributes["description"].type_tag, "string");

        let hydrated: Product = from_generic(&generic.form, &generic.shadow).unwrap();
        assert_eq!(
            hydrated.attribute("description"),
            Some(&json!("A nice pair of socks"))
        );
    }

    #[test]
    fn equal_values_share_one_form_entry() {
        let mut product = fox_socks();
        product.set_attribute("subtitle", "Fox Socks").unwrap();

        let generic = to_generic(&product).unwrap();
        assert_eq!(
            generic.shadow.attributes["title"].reference,
            generic.shadow.attributes["subtitle"].reference
        );
        assert_eq!(generic.form.attributes.len(), 4);
    }

    #[test]
    fn custom_attribute_cannot_shadow_a_member() {
        let mut product = fox_socks();
        product.set_attribute("title", "Other").unwrap();

        let err = to_generic(&product).unwrap_err();
        assert!(matches!(err, MapperError::DuplicateAttribute(name) if name == "title"));
    }

    #[test]
    fn non_finite_member_is_an_encoding_error() {
        let mut product = fox_socks();
        product.price = f64::NAN;

        let err = to_generic(&product).unwrap_err();
        assert!(matches!(err, MapperError::Encoding { field, .. } if field == "amount"));

        product.price = f64::NEG_INFINITY;
        assert!(matches!(
            to_generic(&product).unwrap_err(),
            MapperError::Encoding { .. }
        ));
    }

    #[test]
    fn invalid_kind_is_rejected() {
        let err = to_generic(&BadKind::default()).unwrap_err();
        assert!(matches!(err, MapperError::InvalidRecordKind(kind) if kind == "Bad Kind"));
    }

    #[test]
    fn relations_collect_commit_ids_by_singular_kind() {
        let mut first = fox_socks();
        first.stamp_identity(Identity {
            identifier: 1,
            commit_id: 10,
            view_id: 1,
            ..Identity::default()
        });
        let mut second = fox_socks();
        second.stamp_identity(Identity {
            identifier: 2,
            commit_id: 20,
            view_id: 1,
            ..Identity::default()
        });

        let bundle = Bundle {
            entity: EntityState::default(),
            name: "Winter".to_string(),
            products: vec![first, second],
        };
        let generic = to_generic(&bundle).unwrap();

        assert_eq!(generic.relations.by_kind("product"), &[10, 20]);
        assert!(!generic.shadow.attributes.contains_key("products"));
    }

    #[test]
    fn unsaved_relation_is_rejected() {
        let bundle = Bundle {
            entity: EntityState::default(),
            name: "Winter".to_string(),
            products: vec![fox_socks()],
        };
        let err = to_generic(&bundle).unwrap_err();
        assert!(matches!(err, MapperError::UnsavedRelation { field } if field == "products"));
    }

    #[test]
    fn hydration_reports_missing_form_value() {
        let form = Form::new("product");
        let mut shadow = Shadow::new();
        shadow.add_attribute("title", "string", "missing").unwrap();

        let err = from_generic::<Product>(&form, &shadow).unwrap_err();
        assert!(matches!(err, MapperError::MissingFormAttribute { name, .. } if name == "title"));
    }

    #[test]
    fn hydration_reports_type_mismatch() {
        let mut form = Form::new("product");
        let reference = form.add_attribute(json!("twelve"));
        let mut shadow = Shadow::new();
        shadow.add_attribute("stockLevel", "int", reference).unwrap();

        let err = from_generic::<Product>(&form, &shadow).unwrap_err();
        assert!(matches!(err, MapperError::TypeMismatch { field, .. } if field == "stockLevel"));
    }

    #[test]
    fn hydration_rejects_foreign_kind() {
        let form = Form::new("sku");
        let err = from_generic::<Product>(&form, &Shadow::new()).unwrap_err();
        assert!(matches!(err, MapperError::KindMismatch { expected, found } if expected == "product" && found == "sku"));
    }
}
