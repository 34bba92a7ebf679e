//! Field Catalog
//!
//! Maps protocol field names to their numeric id and declared data type,
//! and resolves enumerated (LIST) values to their labels. The built-in
//! tables describe the LCR 600; other registers of the family can be
//! described with a JSON file of the same shape.

/// Built-in LCR 600 tables
pub mod tables;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::device::{decode, Value};
use crate::protocol::DecodeError;

/// Errors raised while loading reference tables
#[derive(Error, Debug)]
pub enum CatalogError {
    /// File could not be read
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// File is not valid catalog JSON
    #[error("Invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A LIST field has no `n`
    #[error("Field '{name}' declares LIST without a list table")]
    MissingList {
        /// Field name
        name: String,
    },

    /// Two fields claim the same id
    #[error("Fields '{first}' and '{second}' share id {id}")]
    DuplicateId {
        /// Shared id
        id: u8,
        /// Field seen first
        first: String,
        /// Field seen second
        second: String,
    },
}

/// Declared data type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// NUL-terminated string
    Text,
    /// 32-bit signed integer
    Long,
    /// 32-bit signed volume count
    Volume,
    /// 64-bit float
    FFloat,
    /// 32-bit unsigned float
    UFloat,
    /// 32-bit signed float
    SFloat,
    /// 16-bit signed integer
    Integer,
    /// 8-bit signed integer
    Byte,
    /// 8-bit index into an enumerated list
    #[serde(alias = "LIST600", alias = "LIST1000")]
    List,
}

impl FieldType {
    /// Whether readings of this type feed the flow summarizer
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Long
                | FieldType::Volume
                | FieldType::FFloat
                | FieldType::UFloat
                | FieldType::SFloat
                | FieldType::Integer
        )
    }
}

impl FromStr for FieldType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(FieldType::Text),
            "LONG" => Ok(FieldType::Long),
            "VOLUME" => Ok(FieldType::Volume),
            "FFLOAT" => Ok(FieldType::FFloat),
            "UFLOAT" => Ok(FieldType::UFloat),
            "SFLOAT" => Ok(FieldType::SFloat),
            "INTEGER" => Ok(FieldType::Integer),
            "BYTE" => Ok(FieldType::Byte),
            "LIST" | "LIST600" | "LIST1000" => Ok(FieldType::List),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "TEXT",
            FieldType::Long => "LONG",
            FieldType::Volume => "VOLUME",
            FieldType::FFloat => "FFLOAT",
            FieldType::UFloat => "UFLOAT",
            FieldType::SFloat => "SFLOAT",
            FieldType::Integer => "INTEGER",
            FieldType::Byte => "BYTE",
            FieldType::List => "LIST",
        };
        f.write_str(name)
    }
}

/// Protocol number and type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Protocol field number
    pub id: u8,
    /// Declared data type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// List table used to label LIST values
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub list: Option<u8>,
}

impl FieldDescriptor {
    /// Field with a scalar type
    pub const fn new(id: u8, field_type: FieldType) -> Self {
        Self {
            id,
            field_type,
            list: None,
        }
    }

    /// LIST field labelled by list table `list`
    pub const fn list(id: u8, list: u8) -> Self {
        Self {
            id,
            field_type: FieldType::List,
            list: Some(list),
        }
    }
}

/// Label of one enumerated list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListEntry {
    /// Numeric label, e.g. a decimal count
    Number(i64),
    /// Text label
    Text(String),
}

impl From<&ListEntry> for Value {
    fn from(entry: &ListEntry) -> Self {
        match entry {
            ListEntry::Number(n) => Value::Integer(*n),
            ListEntry::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// On-disk form of the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    fields: BTreeMap<String, FieldDescriptor>,
    #[serde(default)]
    lists: BTreeMap<u8, BTreeMap<i64, ListEntry>>,
    #[serde(default)]
    commands: BTreeMap<String, u8>,
}

/// Field and list reference tables with an id → name index
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    fields: HashMap<String, FieldDescriptor>,
    names_by_id: HashMap<u8, String>,
    lists: HashMap<u8, BTreeMap<i64, ListEntry>>,
    commands: HashMap<String, u8>,
}

impl FieldCatalog {
    /// Catalog of the LCR 600
    pub fn builtin() -> Self {
        let fields = tables::FIELDS
            .iter()
            .map(|(name, field)| (name.to_string(), *field))
            .collect();
        let lists = tables::lists()
            .into_iter()
            .map(|(n, entries)| (n, entries.into_iter().collect()))
            .collect();
        Self::from_parts(fields, lists, HashMap::new())
    }

    /// Parse a catalog from JSON:
    /// `{"fields": {name: {id, type, n?}}, "lists": {n: {index: label}}, "commands": {name: code}}`
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;

        let mut seen: HashMap<u8, &str> = HashMap::new();
        for (name, field) in &file.fields {
            if let Some(first) = seen.insert(field.id, name) {
                return Err(CatalogError::DuplicateId {
                    id: field.id,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
            if field.field_type == FieldType::List && field.list.is_none() {
                return Err(CatalogError::MissingList { name: name.clone() });
            }
        }

        Ok(Self::from_parts(
            file.fields.into_iter().collect(),
            file.lists.into_iter().collect(),
            file.commands
                .into_iter()
                .map(|(name, code)| (name.to_ascii_uppercase(), code))
                .collect(),
        ))
    }

    /// Load a catalog from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    fn from_parts(
        fields: HashMap<String, FieldDescriptor>,
        lists: HashMap<u8, BTreeMap<i64, ListEntry>>,
        commands: HashMap<String, u8>,
    ) -> Self {
        let names_by_id = fields
            .iter()
            .map(|(name, field)| (field.id, name.clone()))
            .collect();
        Self {
            fields,
            names_by_id,
            lists,
            commands,
        }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Name of the field with protocol number `id`
    pub fn name_by_id(&self, id: u8) -> Option<&str> {
        self.names_by_id.get(&id).map(String::as_str)
    }

    /// Label of `index` in list table `list`
    pub fn list_entry(&self, list: u8, index: i64) -> Option<&ListEntry> {
        self.lists.get(&list)?.get(&index)
    }

    /// Iterate over all field names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve an issue-command argument: a decimal or `0x` code is sent as
    /// is, anything else is looked up (case-insensitively) in the command names
    /// loaded with the catalog. The built-in catalog names no commands.
    pub fn command_code(&self, command: &str) -> Option<u8> {
        let command = command.trim();
        let numeric = match command
            .strip_prefix("0x")
            .or_else(|| command.strip_prefix("0X"))
        {
            Some(hex) => u8::from_str_radix(hex, 16).ok(),
            None => command.parse::<u8>().ok(),
        };
        numeric.or_else(|| self.commands.get(&command.to_ascii_uppercase()).copied())
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the catalog has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode a field payload and resolve LIST indices through the list tables.
    /// An index with no label is passed through as its number.
    pub fn decode_field(
        &self,
        field: &FieldDescriptor,
        payload: &[u8],
    ) -> Result<Value, DecodeError> {
        let value = decode(payload, field.field_type)?;
        if field.field_type != FieldType::List {
            return Ok(value);
        }

        let label = match (field.list, &value) {
            (Some(list), Value::Integer(index)) => self.list_entry(list, *index),
            _ => None,
        };
        Ok(label.map(Value::from).unwrap_or(value))
    }
}

impl Default for FieldCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
