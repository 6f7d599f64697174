//! Explicit per-type record schema.
//!
//! # Responsibility
//! - Describe a record type as a table of attribute and relation fields.
//! - Derive public attribute names, type tags and relation kinds.
//!
//! # Invariants
//! - Name priority: domain name, then serialization name, then the
//!   lower-camel-cased member name.
//! - Integer widths map to `int`, float widths to `float`; sequences map to
//!   `array` and maps to `object`, matching the tags of custom attributes.
//! - An attribute only encodes when its JSON decodes back into the member
//!   type.
//! - Relation fields never contribute form attributes.

use crate::record::Record;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::type_name;

type Encoder<T> = Box<dyn Fn(&T) -> serde_json::Result<Value>>;
type Decoder<T> = Box<dyn Fn(&mut T, Value) -> serde_json::Result<()>>;
type CommitIds<T> = Box<dyn Fn(&T) -> Vec<i64>>;

/// A record type that can be stored as a versioned entity.
///
/// ```ignore
/// #[derive(Debug, Default)]
/// struct Product {
///     entity: EntityState,
///     title: String,
/// }
///
/// impl Entity for Product {
///     fn schema() -> Vec<Field<Self>> {
///         vec![Field::attribute("title", |p: &Product| &p.title, |p, v| p.title = v)]
///     }
/// }
/// ```
pub trait Entity: Record + Default + 'static {
    /// Kind stored on forms, versions and roots.
    ///
    /// Defaults to the lower-cased type name.
    fn kind_name() -> String {
        default_kind_name::<Self>()
    }

    /// Attribute and relation fields, in extraction order.
    fn schema() -> Vec<Field<Self>>;
}

/// One described member of a record type.
pub struct Field<T> {
    member: &'static str,
    domain_name: Option<&'static str>,
    serial_name: Option<&'static str>,
    access: FieldAccess<T>,
}

enum FieldAccess<T> {
    Attribute {
        type_tag: String,
        encode: Encoder<T>,
        decode: Decoder<T>,
    },
    Relation {
        kind: String,
        commit_ids: CommitIds<T>,
    },
}

impl<T: 'static> Field<T> {
    /// Describes a plain value member stored as a form attribute.
    pub fn attribute<F>(member: &'static str, get: fn(&T) -> &F, set: fn(&mut T, F)) -> Self
    where
        F: Serialize + DeserializeOwned + 'static,
    {
        Self {
            member,
            domain_name: None,
            serial_name: None,
            access: FieldAccess::Attribute {
                type_tag: normalize_type_tag(type_name::<F>()),
                encode: Box::new(move |record| {
                    let value = serde_json::to_value(get(record))?;
                    // Non-finite floats encode as null and never decode back.
                    serde_json::from_value::<F>(value.clone())?;
                    Ok(value)
                }),
                decode: Box::new(move |record, value| {
                    let decoded = serde_json::from_value::<F>(value)?;
                    set(record, decoded);
                    Ok(())
                }),
            },
        }
    }

    /// Describes an optional reference to one other versioned record.
    pub fn relation<R: Record + 'static>(member: &'static str, get: fn(&T) -> Option<&R>) -> Self {
        Self::relation_field::<R>(
            member,
            Box::new(move |record| get(record).map(Record::commit_id).into_iter().collect()),
        )
    }

    /// Describes a collection of references to other versioned records.
    pub fn relations<R: Record + 'static>(member: &'static str, get: fn(&T) -> &[R]) -> Self {
        Self::relation_field::<R>(
            member,
            Box::new(move |record| get(record).iter().map(Record::commit_id).collect()),
        )
    }

    fn relation_field<R: 'static>(member: &'static str, commit_ids: CommitIds<T>) -> Self {
        Self {
            member,
            domain_name: None,
            serial_name: None,
            access: FieldAccess::Relation {
                kind: singularize(&short_type_name(type_name::<R>()).to_lowercase()),
                commit_ids,
            },
        }
    }

    /// Domain-level name override; wins over every other naming rule.
    pub fn named(mut self, name: &'static str) -> Self {
        self.domain_name = Some(name);
        self
    }

    /// Generic serialization name, used when no domain name is given.
    pub fn serialized_as(mut self, name: &'static str) -> Self {
        self.serial_name = Some(name);
        self
    }

    pub fn member(&self) -> &'static str {
        self.member
    }

    /// Public attribute name used as the shadow key.
    pub fn name(&self) -> String {
        self.domain_name
            .or(self.serial_name)
            .map(str::to_string)
            .unwrap_or_else(|| lower_camel_case(self.member))
    }

    /// Normalized type tag; `None` for relation fields.
    pub fn type_tag(&self) -> Option<&str> {
        match &self.access {
            FieldAccess::Attribute { type_tag, .. } => Some(type_tag),
            FieldAccess::Relation { .. } => None,
        }
    }

    /// Relation kind key; `None` for attribute fields.
    pub fn relation_kind(&self) -> Option<&str> {
        match &self.access {
            FieldAccess::Attribute { .. } => None,
            FieldAccess::Relation { kind, .. } => Some(kind),
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.access, FieldAccess::Relation { .. })
    }

    pub(crate) fn encode(&self, record: &T) -> Option<serde_json::Result<Value>> {
        match &self.access {
            FieldAccess::Attribute { encode, .. } => Some(encode(record)),
            FieldAccess::Relation { .. } => None,
        }
    }

    pub(crate) fn decode(&self, record: &mut T, value: Value) -> Option<serde_json::Result<()>> {
        match &self.access {
            FieldAccess::Attribute { decode, .. } => Some(decode(record, value)),
            FieldAccess::Relation { .. } => None,
        }
    }

    pub(crate) fn commit_ids(&self, record: &T) -> Option<Vec<i64>> {
        match &self.access {
            FieldAccess::Attribute { .. } => None,
            FieldAccess::Relation { commit_ids, .. } => Some(commit_ids(record)),
        }
    }
}

impl<T> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (access, tag) = match &self.access {
            FieldAccess::Attribute { type_tag, .. } => ("attribute", type_tag.as_str()),
            FieldAccess::Relation { kind, .. } => ("relation", kind.as_str()),
        };
        f.debug_struct("Field")
            .field("member", &self.member)
            .field("domain_name", &self.domain_name)
            .field("serial_name", &self.serial_name)
            .field("access", &access)
            .field("tag", &tag)
            .finish()
    }
}

/// Lower-cased final path segment of `T`'s type name.
pub fn default_kind_name<T: ?Sized>() -> String {
    short_type_name(type_name::<T>()).to_lowercase()
}

/// Type tag for a custom attribute, derived from its JSON shape.
pub fn json_type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Maps a Rust type name to the stored type tag.
pub(crate) fn normalize_type_tag(full_name: &str) -> String {
    if let Some(inner) = full_name
        .strip_prefix("core::option::Option<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return normalize_type_tag(inner);
    }

    if full_name.starts_with('[') || full_name.starts_with("&[") {
        return "array".to_string();
    }

    match short_type_name(full_name) {
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" => "int".to_string(),
        "f32" | "f64" => "float".to_string(),
        "Vec" | "VecDeque" | "LinkedList" | "HashSet" | "BTreeSet" => "array".to_string(),
        "HashMap" | "BTreeMap" => "object".to_string(),
        other => other.to_lowercase(),
    }
}

fn short_type_name(full_name: &str) -> &str {
    let without_generics = full_name.split('<').next().unwrap_or(full_name);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .trim_start_matches('&')
}

/// `unit_price` -> `unitPrice`, `Title` -> `title`.
pub(crate) fn lower_camel_case(member: &str) -> String {
    let mut result = String::with_capacity(member.len());
    for (index, part) in member.split('_').filter(|part| !part.is_empty()).enumerate() {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            if index == 0 {
                result.extend(first.to_lowercase());
            } else {
                result.extend(first.to_uppercase());
            }
            result.push_str(chars.as_str());
        }
    }
    result
}

pub(crate) fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.len() <= 1 {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

#[cfg(test)]
mod tests {
    use super::{
        default_kind_name, json_type_tag, lower_camel_case, normalize_type_tag, singularize,
        Field,
    };
    use crate::record::{EntityState, Record, StateToken};
    use serde_json::json;
    use std::any::type_name;

    #[derive(Debug, Default)]
    struct Sku {
        entity: EntityState,
        unit_price: f64,
    }

    impl Record for Sku {
        fn entity(&self) -> &EntityState {
            &self.entity
        }

        fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
            &mut self.entity
        }
    }

    #[derive(Debug, Default)]
    struct Variant {
        entity: EntityState,
        skus: Vec<Sku>,
        hero: Option<Sku>,
    }

    #[test]
    fn names_follow_override_priority() {
        let plain = Field::attribute("unit_price", |s: &Sku| &s.unit_price, |s, v| s.unit_price = v);
        assert_eq!(plain.name(), "unitPrice");

        let serialized = Field::attribute("unit_price", |s: &Sku| &s.unit_price, |s, v| s.unit_price = v)
            .serialized_as("price");
        assert_eq!(serialized.name(), "price");

        let both = Field::attribute("unit_price", |s: &Sku| &s.unit_price, |s, v| s.unit_price = v)
            .serialized_as("price")
            .named("amount");
        assert_eq!(both.name(), "amount");
    }

    #[test]
    fn type_tags_are_normalized() {
        assert_eq!(normalize_type_tag(type_name::<i32>()), "int");
        assert_eq!(normalize_type_tag(type_name::<u64>()), "int");
        assert_eq!(normalize_type_tag(type_name::<f32>()), "float");
        assert_eq!(normalize_type_tag(type_name::<String>()), "string");
        assert_eq!(normalize_type_tag(type_name::<bool>()), "bool");
        assert_eq!(normalize_type_tag(type_name::<Option<i64>>()), "int");
        assert_eq!(normalize_type_tag(type_name::<Vec<String>>()), "array");
        assert_eq!(normalize_type_tag(type_name::<[u8; 4]>()), "array");
        assert_eq!(
            normalize_type_tag(type_name::<std::collections::BTreeMap<String, i64>>()),
            "object"
        );
        assert_eq!(
            normalize_type_tag(type_name::<std::collections::HashSet<String>>()),
            "array"
        );
    }

    #[test]
    fn custom_value_tags_follow_json_shape() {
        assert_eq!(json_type_tag(&json!(1)), "int");
        assert_eq!(json_type_tag(&json!(1.5)), "float");
        assert_eq!(json_type_tag(&json!("x")), "string");
        assert_eq!(json_type_tag(&json!([1])), "array");
    }

    #[test]
    fn non_finite_floats_do_not_encode() {
        let field = Field::attribute("unit_price", |s: &Sku| &s.unit_price, |s, v| s.unit_price = v);
        let sku = Sku {
            unit_price: f64::NAN,
            ..Sku::default()
        };
        assert!(matches!(field.encode(&sku), Some(Err(_))));

        let sku = Sku {
            unit_price: f64::INFINITY,
            ..Sku::default()
        };
        assert!(matches!(field.encode(&sku), Some(Err(_))));

        let sku = Sku {
            unit_price: 9.99,
            ..Sku::default()
        };
        assert_eq!(field.encode(&sku).unwrap().unwrap(), json!(9.99));
    }

    #[test]
    fn relation_fields_derive_singular_kind() {
        let many = Field::relations("skus", |v: &Variant| v.skus.as_slice());
        let one = Field::relation("hero", |v: &Variant| v.hero.as_ref());

        assert!(many.is_relation());
        assert_eq!(many.relation_kind(), Some("sku"));
        assert_eq!(one.relation_kind(), Some("sku"));
        assert!(many.type_tag().is_none());
    }

    #[test]
    fn relation_fields_collect_commit_ids() {
        let variant = Variant {
            entity: EntityState::default(),
            skus: vec![Sku::default(), Sku::default()],
            hero: None,
        };
        let many = Field::relations("skus", |v: &Variant| v.skus.as_slice());
        let one = Field::relation("hero", |v: &Variant| v.hero.as_ref());

        assert_eq!(many.commit_ids(&variant), Some(vec![0, 0]));
        assert_eq!(one.commit_ids(&variant), Some(vec![]));
    }

    #[test]
    fn helpers_handle_common_shapes() {
        assert_eq!(default_kind_name::<Sku>(), "sku");
        assert_eq!(lower_camel_case("title"), "title");
        assert_eq!(lower_camel_case("created_by_user"), "createdByUser");
        assert_eq!(singularize("skus"), "sku");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("sku"), "sku");
    }
}
