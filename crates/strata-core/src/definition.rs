//! Stream and table definitions declared by a query plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::AttributeType;

/// A named, typed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
}

impl Attribute {
    /// Creates a new attribute.
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
        }
    }
}

fn position(attributes: &[Attribute], name: &str) -> Option<usize> {
    attributes.iter().position(|a| a.name == name)
}

/// Schema of an incoming event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDefinition {
    id: String,
    attributes: Vec<Attribute>,
}

impl StreamDefinition {
    /// Creates an empty stream definition.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Vec::new(),
        }
    }

    /// Appends an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, attr_type: AttributeType) -> Self {
        self.attributes.push(Attribute::new(name, attr_type));
        self
    }

    /// Stream id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ordered attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Position of `name` in the event data vector.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        position(&self.attributes, name)
    }

    /// Type of the attribute called `name`.
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.index_of(name).map(|i| self.attributes[i].attr_type)
    }
}

/// Logical definition of a table.
///
/// Carries the ordered attributes, an optional primary key, per-attribute
/// length overrides for text columns, and secondary index attributes.
/// Definitions are built once and treated as immutable by the stores
/// that consume them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    name: String,
    attributes: Vec<Attribute>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    field_lengths: BTreeMap<String, u32>,
    #[serde(default)]
    indexes: Vec<String>,
}

impl TableDefinition {
    /// Creates an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            primary_key: Vec::new(),
            field_lengths: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    /// Appends an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, attr_type: AttributeType) -> Self {
        self.attributes.push(Attribute::new(name, attr_type));
        self
    }

    /// Sets the primary-key attributes. Duplicates are collapsed.
    #[must_use]
    pub fn primary_key<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key.clear();
        for attr in attributes {
            let attr = attr.into();
            if !self.primary_key.contains(&attr) {
                self.primary_key.push(attr);
            }
        }
        self
    }

    /// Overrides the declared length of a text attribute.
    #[must_use]
    pub fn field_length(mut self, attribute: impl Into<String>, length: u32) -> Self {
        self.field_lengths.insert(attribute.into(), length);
        self
    }

    /// Adds a secondary index on `attribute`.
    #[must_use]
    pub fn index(mut self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        if !self.indexes.contains(&attribute) {
            self.indexes.push(attribute);
        }
        self
    }

    /// Returns a copy with `overrides` merged over the declared field lengths.
    #[must_use]
    pub fn with_field_lengths(&self, overrides: &BTreeMap<String, u32>) -> Self {
        let mut def = self.clone();
        def.field_lengths
            .extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        def
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Primary-key attributes (empty when the table has no key).
    #[must_use]
    pub fn primary_key_attributes(&self) -> &[String] {
        &self.primary_key
    }

    /// Per-attribute length overrides.
    #[must_use]
    pub fn field_lengths(&self) -> &BTreeMap<String, u32> {
        &self.field_lengths
    }

    /// Secondary index attributes.
    #[must_use]
    pub fn index_attributes(&self) -> &[String] {
        &self.indexes
    }

    /// Position of `name` in a table row.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        position(&self.attributes, name)
    }

    /// Type of the attribute called `name`.
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.index_of(name).map(|i| self.attributes[i].attr_type)
    }

    /// Returns `true` if `name` is part of the primary key.
    #[must_use]
    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_table() -> TableDefinition {
        TableDefinition::new("StockTable")
            .attribute("symbol", AttributeType::String)
            .attribute("price", AttributeType::Float)
            .attribute("volume", AttributeType::Long)
    }

    #[test]
    fn test_stream_index_of() {
        let s = StreamDefinition::new("FooStream")
            .attribute("name", AttributeType::String)
            .attribute("volume", AttributeType::Long);
        assert_eq!(s.id(), "FooStream");
        assert_eq!(s.index_of("name"), Some(0));
        assert_eq!(s.attribute_type("volume"), Some(AttributeType::Long));
        assert_eq!(s.index_of("price"), None);
    }

    #[test]
    fn test_table_primary_key_dedup() {
        let def = stock_table().primary_key(["symbol", "symbol"]);
        assert_eq!(def.primary_key_attributes(), ["symbol".to_string()]);
        assert!(def.is_key("symbol"));
        assert!(!def.is_key("price"));
    }

    #[test]
    fn test_with_field_lengths_overrides() {
        let def = stock_table().field_length("symbol", 50);
        let mut overrides = BTreeMap::new();
        overrides.insert("symbol".to_string(), 100);
        let merged = def.with_field_lengths(&overrides);
        assert_eq!(merged.field_lengths().get("symbol"), Some(&100));
        assert_eq!(def.field_lengths().get("symbol"), Some(&50));
    }

    #[test]
    fn test_index_attributes() {
        let def = stock_table().index("volume").index("volume");
        assert_eq!(def.index_attributes(), ["volume".to_string()]);
    }

    #[test]
    fn test_table_definition_from_json() {
        let json = r#"{
            "name": "StockTable",
            "attributes": [
                {"name": "symbol", "type": "string"},
                {"name": "volume", "type": "long"}
            ],
            "primary_key": ["symbol"]
        }"#;
        let def: TableDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.name(), "StockTable");
        assert_eq!(def.attribute_type("volume"), Some(AttributeType::Long));
        assert!(def.is_key("symbol"));
        assert!(def.field_lengths().is_empty());
    }
}
