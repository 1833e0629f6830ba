//! Category definitions and the record validator.
//!
//! A schema is loaded from JSON keyed by category name:
//!
//! ```json
//! {
//!   "Person": {
//!     "global": true,
//!     "fields": {
//!       "Name":    { "type": "string", "required": true },
//!       "Address": { "include": "Address" },
//!       "Friends": { "many": "Person" }
//!     }
//!   },
//!   "Address": { "fields": { "City": { "type": "string" } } }
//! }
//! ```
//!
//! Reverse `Include` references (`included_by`) are derived on load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, ID_FIELD, Record, Result};

/// How a field is persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Decorator {
    /// A column of the category's own table.
    #[default]
    Plain,
    /// An embedded sub-record stored as a row of `category` sharing the
    /// parent's `Id`.
    Include { category: String },
    /// A many-to-many relation stored in a link table.
    Many { category: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub struct FieldDefinition {
    pub kind: String,
    pub required: bool,
    pub decorator: Decorator,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawField {
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    kind: String,
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    include: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    many: Option<String>,
}

impl TryFrom<RawField> for FieldDefinition {
    type Error = String;

    fn try_from(raw: RawField) -> core::result::Result<Self, String> {
        let decorator = match (raw.include, raw.many) {
            (None, None) => Decorator::Plain,
            (Some(category), None) => Decorator::Include { category },
            (None, Some(category)) => Decorator::Many { category },
            (Some(_), Some(_)) => {
                return Err("a field cannot be both `include` and `many`".to_owned());
            }
        };
        Ok(Self {
            kind: raw.kind,
            required: raw.required,
            decorator,
        })
    }
}

impl From<FieldDefinition> for RawField {
    fn from(def: FieldDefinition) -> Self {
        let (include, many) = match def.decorator {
            Decorator::Plain => (None, None),
            Decorator::Include { category } => (Some(category), None),
            Decorator::Many { category } => (None, Some(category)),
        };
        Self {
            kind: def.kind,
            required: def.required,
            include,
            many,
        }
    }
}

impl FieldDefinition {
    pub fn plain(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn include(category: impl Into<String>) -> Self {
        Self {
            kind: "object".to_owned(),
            required: false,
            decorator: Decorator::Include {
                category: category.into(),
            },
        }
    }

    pub fn many(category: impl Into<String>) -> Self {
        Self {
            kind: "array".to_owned(),
            required: false,
            decorator: Decorator::Many {
                category: category.into(),
            },
        }
    }

    /// Whether the field is a column of the category's own table.
    pub const fn is_column(&self) -> bool {
        matches!(self.decorator, Decorator::Plain)
    }
}

/// Field definitions of one category, in name order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryDefinition {
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl CategoryDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, def: FieldDefinition) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// `(field, included category)` for every `Include` field.
    pub fn includes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(name, def)| match &def.decorator {
            Decorator::Include { category } => Some((name.as_str(), category.as_str())),
            _ => None,
        })
    }

    /// Target category of a `Many` field.
    pub fn many_target(&self, field: &str) -> Option<&str> {
        match &self.fields.get(field)?.decorator {
            Decorator::Many { category } => Some(category),
            _ => None,
        }
    }

    /// Whether `field` is stored in the category's own table. `Id` and
    /// fields unknown to the schema count as columns.
    pub fn is_column(&self, field: &str) -> bool {
        self.fields.get(field).is_none_or(FieldDefinition::is_column)
    }

    /// Sub-records of `record` that belong in `Include` categories.
    pub fn include_data(&self, record: &Record) -> Vec<(String, Record)> {
        self.includes()
            .filter_map(|(field, category)| match record.get(field) {
                Some(Value::Object(value)) => Some((category.to_owned(), value.clone())),
                _ => None,
            })
            .collect()
    }
}

/// A category together with its persistence flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategorySchema {
    pub fields: CategoryDefinition,
    /// Identifiers are claimed from the shared pool.
    pub global: bool,
    /// Not independently creatable.
    pub ignored: bool,
    /// Categories holding an `Include` field of this one.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included_by: Vec<String>,
}

impl CategorySchema {
    pub const fn definition(&self) -> &CategoryDefinition {
        &self.fields
    }
}

/// All categories known to a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, CategorySchema>", into = "BTreeMap<String, CategorySchema>")]
pub struct Schema {
    categories: BTreeMap<String, CategorySchema>,
}

impl From<BTreeMap<String, CategorySchema>> for Schema {
    fn from(categories: BTreeMap<String, CategorySchema>) -> Self {
        Self::new(categories)
    }
}

impl From<Schema> for BTreeMap<String, CategorySchema> {
    fn from(schema: Schema) -> Self {
        schema.categories
    }
}

impl Schema {
    /// Builds a schema and derives every category's `included_by` list.
    pub fn new(mut categories: BTreeMap<String, CategorySchema>) -> Self {
        let reverse: Vec<(String, String)> = categories
            .iter()
            .flat_map(|(owner, schema)| {
                schema
                    .fields
                    .includes()
                    .map(|(_, target)| (target.to_owned(), owner.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (target, owner) in reverse {
            if let Some(schema) = categories.get_mut(&target) {
                if !schema.included_by.contains(&owner) {
                    schema.included_by.push(owner);
                }
            }
        }
        Self { categories }
    }

    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| Error::InvalidSchema(e.to_string()))
    }

    pub fn category(&self, name: &str) -> Result<&CategorySchema> {
        self.categories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("No category {name} available")))
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &CategorySchema)> {
        self.categories.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Name of the link table backing a `Many` field.
pub fn link_table_name(left: &str, right: &str, field: &str) -> String {
    format!("{left}{field}{right}")
}

/// Options passed to [`SchemaValidator::validate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// The record is a partial update: required fields may be absent.
    pub patch: bool,
}

/// Validates records before any mutation reaches storage.
pub trait SchemaValidator: Send + Sync {
    /// Returns a description of the first problem, or `None` when valid.
    fn validate(
        &self,
        kind: &str,
        category: &str,
        record: &Record,
        options: ValidateOptions,
    ) -> Option<String>;
}

/// Validator checking known fields, required fields and value kinds against
/// a [`Schema`].
#[derive(Clone, Debug)]
pub struct StrictValidator {
    schema: std::sync::Arc<Schema>,
}

impl StrictValidator {
    pub const fn new(schema: std::sync::Arc<Schema>) -> Self {
        Self { schema }
    }

    fn check(&self, category: &str, record: &Record, options: ValidateOptions) -> Option<String> {
        let Ok(schema) = self.schema.category(category) else {
            return Some(format!("unknown category {category}"));
        };
        let definition = schema.definition();
        for (name, value) in record {
            if name == ID_FIELD {
                continue;
            }
            let Some(field) = definition.field(name) else {
                return Some(format!("field {category}.{name} is not defined"));
            };
            if value.is_null() {
                if field.required && !options.patch {
                    return Some(format!("field {category}.{name} is required"));
                }
                continue;
            }
            match &field.decorator {
                Decorator::Include { category: target } => {
                    let Value::Object(inner) = value else {
                        return Some(format!("field {category}.{name} must be an object"));
                    };
                    if let Some(err) = self.check(target, inner, options) {
                        return Some(err);
                    }
                }
                Decorator::Many { .. } => {
                    if !value.is_array() {
                        return Some(format!("field {category}.{name} must be an array"));
                    }
                }
                Decorator::Plain => {
                    if !kind_accepts(&field.kind, value) {
                        return Some(format!(
                            "field {category}.{name} expects {}, got {value}",
                            field.kind
                        ));
                    }
                }
            }
        }
        if !options.patch {
            let missing = definition
                .fields
                .iter()
                .find(|(name, def)| def.required && !record.contains_key(name.as_str()));
            if let Some((name, _)) = missing {
                return Some(format!("field {category}.{name} is required"));
            }
        }
        None
    }
}

impl SchemaValidator for StrictValidator {
    fn validate(
        &self,
        kind: &str,
        category: &str,
        record: &Record,
        options: ValidateOptions,
    ) -> Option<String> {
        if kind != "category" {
            return Some(format!("unsupported schema kind {kind}"));
        }
        self.check(category, record, options)
    }
}

fn kind_accepts(kind: &str, value: &Value) -> bool {
    match kind {
        "string" | "text" | "datetime" | "date" => value.is_string(),
        "number" | "integer" | "id" => {
            value.is_number() || value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const PEOPLE: &str = r#"{
        "Person": {
            "global": true,
            "fields": {
                "Name": { "type": "string", "required": true },
                "Born": { "type": "number" },
                "Address": { "include": "Address" },
                "Friends": { "many": "Person" }
            }
        },
        "Address": { "fields": { "City": { "type": "string", "required": true } } },
        "Tag": { "ignored": true, "fields": { "Label": { "type": "string" } } }
    }"#;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn loads_and_derives_reverse_includes() {
        let schema = Schema::from_json(PEOPLE).unwrap();
        assert_eq!(schema.len(), 3);
        let person = schema.category("Person").unwrap();
        assert!(person.global);
        assert_eq!(person.definition().many_target("Friends"), Some("Person"));
        assert_eq!(person.definition().includes().collect::<Vec<_>>(), [("Address", "Address")]);
        assert_eq!(schema.category("Address").unwrap().included_by, ["Person"]);
        assert!(schema.category("Tag").unwrap().ignored);
        assert!(matches!(schema.category("Nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn rejects_conflicting_decorators() {
        let bad = r#"{ "A": { "fields": { "B": { "include": "X", "many": "Y" } } } }"#;
        assert!(matches!(Schema::from_json(bad), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn link_table_is_left_field_right() {
        assert_eq!(link_table_name("Person", "Book", "Read"), "PersonReadBook");
    }

    #[test]
    fn include_data_extracts_sub_records() {
        let schema = Schema::from_json(PEOPLE).unwrap();
        let def = schema.category("Person").unwrap().definition();
        let record = rec(json!({"Name": "X", "Address": {"City": "Kyiv"}}));
        assert_eq!(
            def.include_data(&record),
            [("Address".to_owned(), rec(json!({"City": "Kyiv"})))]
        );
        assert!(def.is_column("Name"));
        assert!(def.is_column("Id"));
        assert!(!def.is_column("Address"));
        assert!(!def.is_column("Friends"));
    }

    #[test]
    fn strict_validator() {
        let validator = StrictValidator::new(Arc::new(Schema::from_json(PEOPLE).unwrap()));
        let full = ValidateOptions::default();
        let patch = ValidateOptions { patch: true };

        let ok = rec(json!({"Name": "Marcus", "Born": 121, "Address": {"City": "Rome"}}));
        assert_eq!(validator.validate("category", "Person", &ok, full), None);

        let missing = rec(json!({"Born": 121}));
        assert!(validator.validate("category", "Person", &missing, full).is_some());
        assert_eq!(validator.validate("category", "Person", &missing, patch), None);

        let unknown = rec(json!({"Name": "X", "Shoe": 42}));
        assert!(validator.validate("category", "Person", &unknown, full).is_some());

        let bad_type = rec(json!({"Name": 7}));
        assert!(validator.validate("category", "Person", &bad_type, full).is_some());

        let bad_include = rec(json!({"Name": "X", "Address": {}}));
        assert!(validator.validate("category", "Person", &bad_include, full).is_some());

        assert!(validator.validate("category", "Ghost", &ok, full).is_some());
        assert!(validator.validate("action", "Person", &ok, full).is_some());
    }
}
