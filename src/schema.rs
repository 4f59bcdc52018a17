//! Entity descriptors and the schema they form.
//!
//! The schema is the lookup table every operation resolves entity names
//! against. It is supplied by the caller when the facade is built and never
//! changes afterwards; migrating persisted data between schemas is out of
//! scope, so a store refuses to open under a schema with another fingerprint.

use crate::error::{Result, StoreError};
use crate::types::{Attributes, Value, NULL_VALUE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Declared type of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
}

impl AttributeKind {
    /// Whether a non-null value may be stored under this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (AttributeKind::Bool, Value::Bool(_))
                | (AttributeKind::Int, Value::Int(_))
                | (AttributeKind::Float, Value::Float(_))
                | (AttributeKind::Float, Value::Int(_))
                | (AttributeKind::Text, Value::Text(_))
                | (AttributeKind::Timestamp, Value::Timestamp(_))
        )
    }
}

/// One attribute of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
    /// Optional attributes may stay null through a commit.
    pub optional: bool,
    /// Value assigned on insert.
    pub default: Option<Value>,
}

impl AttributeDescriptor {
    /// A required attribute with no default.
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A named entity kind known to the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub attributes: Vec<AttributeDescriptor>,
    /// Attributes whose non-null values must be unique across the entity.
    pub unique: Vec<String>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            unique: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Mark an attribute as unique.
    pub fn unique(mut self, name: impl Into<String>) -> Self {
        self.unique.push(name.into());
        self
    }

    pub fn attribute_named(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute_named(name).is_some()
    }

    /// Attribute values for a freshly inserted object.
    pub fn initial_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .map(|a| (a.name.clone(), a.default.clone().unwrap_or(Value::Null)))
            .collect()
    }

    /// Check kinds and required attributes of one object's values.
    pub fn validate(&self, attributes: &Attributes) -> Result<()> {
        for attribute in &self.attributes {
            let value = attributes.get(&attribute.name).unwrap_or(&NULL_VALUE);
            if value.is_null() {
                if !attribute.optional {
                    return Err(StoreError::constraint(format!(
                        "{}.{} is required",
                        self.name, attribute.name
                    )));
                }
                continue;
            }
            if !attribute.kind.accepts(value) {
                return Err(StoreError::constraint(format!(
                    "{}.{} expects {:?}, got {:?}",
                    self.name, attribute.name, attribute.kind, value
                )));
            }
        }
        Ok(())
    }

    /// Ensure every key names a declared attribute.
    pub fn check_attribute_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if !self.has_attribute(name) {
                return Err(StoreError::InvalidQuery(format!(
                    "{} has no attribute '{}'",
                    self.name, name
                )));
            }
        }
        Ok(())
    }
}

/// The set of entity descriptors a store is opened with.
#[derive(Clone, Debug)]
pub struct Schema {
    entities: HashMap<String, EntityDescriptor>,
    fingerprint: String,
}

impl Schema {
    /// Build a schema, rejecting duplicate entity or attribute names.
    pub fn new(entities: Vec<EntityDescriptor>) -> Result<Self> {
        let mut by_name = HashMap::new();

        for entity in entities {
            let mut seen = HashSet::new();
            for attribute in &entity.attributes {
                if !seen.insert(attribute.name.as_str()) {
                    return Err(StoreError::Configuration(format!(
                        "duplicate attribute {}.{}",
                        entity.name, attribute.name
                    )));
                }
            }
            for name in &entity.unique {
                if !seen.contains(name.as_str()) {
                    return Err(StoreError::Configuration(format!(
                        "unique constraint on undeclared attribute {}.{}",
                        entity.name, name
                    )));
                }
            }
            if by_name.contains_key(&entity.name) {
                return Err(StoreError::Configuration(format!(
                    "duplicate entity {}",
                    entity.name
                )));
            }
            by_name.insert(entity.name.clone(), entity);
        }

        let fingerprint = Self::compute_fingerprint(&by_name);

        Ok(Self {
            entities: by_name,
            fingerprint,
        })
    }

    /// Resolve an entity by name.
    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor> {
        self.entities
            .get(name)
            .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Entity names in sorted order.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Hex SHA-256 over the sorted entity and attribute declarations.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn compute_fingerprint(entities: &HashMap<String, EntityDescriptor>) -> String {
        let mut names: Vec<&String> = entities.keys().collect();
        names.sort();

        let mut hasher = Sha256::new();
        for name in names {
            let entity = &entities[name];
            hasher.update(name.as_bytes());
            hasher.update([0u8]);

            let mut attributes: Vec<&AttributeDescriptor> = entity.attributes.iter().collect();
            attributes.sort_by(|a, b| a.name.cmp(&b.name));
            for attribute in attributes {
                hasher.update(attribute.name.as_bytes());
                hasher.update(format!("{:?}", attribute.kind).as_bytes());
                hasher.update([attribute.optional as u8, 0u8]);
            }

            let mut unique = entity.unique.clone();
            unique.sort();
            for name in unique {
                hasher.update(b"unique:");
                hasher.update(name.as_bytes());
            }
            hasher.update([0xffu8]);
        }
        hex::encode(hasher.finalize())
    }
}
