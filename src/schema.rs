//! Collection and field declaration, and payload validation.
//!
//! A schema names the collections a store may hold and the fields their
//! payloads must carry. Unknown extra fields are accepted for forward
//! compatibility; required fields must be present and non-null.

use crate::{error::Result, CollectionName, Error, Operation, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// Arbitrary nested JSON.
    Json,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::String => "String",
            FieldKind::Int => "Int",
            FieldKind::Float => "Float",
            FieldKind::Bool => "Bool",
            FieldKind::Timestamp => "Timestamp",
            FieldKind::Json => "Json",
        };
        write!(f, "{name}")
    }
}

/// A single field declaration within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Declared type.
    pub kind: FieldKind,
    /// Field name.
    pub name: String,
    /// Whether the field must be present and non-null.
    pub required: bool,
}

impl FieldSpec {
    /// Declare a required field.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            kind,
            name: name.into(),
            required: true,
        }
    }

    /// Declare an optional field.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            kind,
            name: name.into(),
            required: false,
        }
    }

    /// Check one payload value against this declaration.
    pub fn check(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None | Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.check_kind(v),
        }
    }

    fn check_kind(&self, value: &serde_json::Value) -> Result<()> {
        let matches = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Timestamp => value.is_i64() || value.is_u64(),
            FieldKind::Json => true,
        };

        if matches {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.kind.to_string(),
                got: json_kind_name(value).to_string(),
            })
        }
    }
}

fn json_kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Declaration of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDef {
    /// Field declarations, in declaration order.
    pub fields: Vec<FieldSpec>,
    /// Collection name.
    pub name: CollectionName,
}

impl CollectionDef {
    /// Declare a collection.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            name: name.into(),
        }
    }

    /// Validate a payload against this collection's fields.
    ///
    /// The payload must be a JSON object. Fields not declared here are
    /// accepted untouched.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let object = payload
            .as_object()
            .ok_or_else(|| Error::Malformed("payload must be a JSON object".into()))?;

        for field in &self.fields {
            field.check(object.get(&field.name))?;
        }

        Ok(())
    }
}

/// Schema for an entire store: a version number plus its collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Collection declarations by name, sorted for canonical encoding.
    pub collections: BTreeMap<CollectionName, CollectionDef>,
    /// Schema version.
    pub version: SchemaVersion,
}

impl Schema {
    /// An empty schema at the given version.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            collections: BTreeMap::new(),
            version,
        }
    }

    /// Add a collection declaration.
    pub fn add_collection(&mut self, collection: CollectionDef) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style variant of [`Schema::add_collection`].
    pub fn with_collection(mut self, collection: CollectionDef) -> Self {
        self.add_collection(collection);
        self
    }

    /// Look up a collection declaration.
    pub fn collection(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.get(name)
    }

    /// Validate an operation's target collection and payload.
    ///
    /// Deletes carry no payload and only need their collection to exist.
    pub fn validate_op(&self, op: &Operation) -> Result<()> {
        let def = self
            .collections
            .get(op.collection())
            .ok_or_else(|| Error::UnknownCollection(op.collection().clone()))?;

        if let Some(payload) = op.payload() {
            def.validate_payload(payload)?;
        }

        Ok(())
    }
}
