use crate::error::{Result, TemplateFillError};
use schemars::JsonSchema;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Extracted field labels and their values, in the order the upstream
/// pipeline emitted them.
///
/// Backed by a list of pairs rather than a hash map: the declaration order
/// decides which field wins when several keys match the same label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair. Repeated keys are kept; the index decides which one wins.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses a flat JSON object, keeping the key order of the text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(TemplateFillError::InvalidFieldMap(format!(
                "expected a JSON object of field labels to values, found {}",
                json_kind(&value)
            )));
        }
        // Re-parse through the ordered visitor; `Value` does not keep key order.
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field labels to values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<FieldMap, A::Error> {
                let mut fields = FieldMap::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    fields.insert(key, value_to_text(value));
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// Textual form of a loosely typed JSON value.
pub(crate) fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct Cell {
    /// Plain text of the cell. Paragraphs are separated by newlines.
    pub text: String,
}

impl Cell {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Cell {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Array(_) | Value::Object(_) => Err(de::Error::invalid_type(
                de::Unexpected::Other("nested structure"),
                &"cell text",
            )),
            scalar => Ok(Cell::new(value_to_text(scalar))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Row {
    #[serde(default)]
    #[schemars(
        description = "Cells of the row. The first cell holds the field label, the second receives the value. Rows with fewer than two cells are left alone."
    )]
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new<I, C>(cells: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Cell>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }

    /// Text of the label cell, if the row has one.
    pub fn label(&self) -> Option<&str> {
        self.cells.first().map(|c| c.text.as_str())
    }

    /// Text of the value cell, if the row has one.
    pub fn value(&self) -> Option<&str> {
        self.cells.get(1).map(|c| c.text.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Table {
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

/// Format-independent view of a template: its tables in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateDocument {
    #[serde(default)]
    #[schemars(description = "Tables of label/value rows in document order")]
    pub tables: Vec<Table>,
}

impl TemplateDocument {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(TemplateDocument)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

impl AsRef<TemplateDocument> for TemplateDocument {
    fn as_ref(&self) -> &TemplateDocument {
        self
    }
}

impl AsMut<TemplateDocument> for TemplateDocument {
    fn as_mut(&mut self) -> &mut TemplateDocument {
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    #[schemars(
        description = "The first field, in declaration order, whose key is contained in the label wins."
    )]
    FirstDeclared,

    #[schemars(
        description = "The contained key with the most characters wins (most specific match). Equal lengths fall back to declaration order."
    )]
    LongestKey,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FillOptions {
    #[schemars(description = "How to choose between several fields matching one label")]
    pub match_policy: MatchPolicy,
}

impl FillOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
