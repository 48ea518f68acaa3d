#![forbid(unsafe_code)]

//! Declarative schema descriptors.
//!
//! A descriptor is plain data produced once by an external source (a YAML
//! file or the built-in table below). It feeds two consumers: the clause
//! whitelist and the prompt context summaries.

pub mod macros;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot read schema source {}: {message}", .path.display())]
    Unreachable { path: PathBuf, message: String },
    #[error("schema parse error: {0}")]
    Parse(String),
    #[error("invalid schema: {0}")]
    Invalid(String),
    #[error("schema source has no table descriptor")]
    MissingTable,
}

/// Storage-level kind of a queryable field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Boolean,
    Timestamp,
}

impl FieldKind {
    /// Column affinity used when the table is created.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Timestamp => "TEXT",
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Real => "REAL",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub description: String,
    /// Sample values quoted into the prompt.
    #[serde(default)]
    pub examples: Vec<String>,
}

/// The one table clauses are allowed to filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Rows come back newest first by this field.
    pub recency_field: String,
    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Structural checks the rest of the system relies on.
    pub fn check(&self) -> Result<(), SchemaError> {
        if !is_plain_identifier(&self.name) {
            return Err(SchemaError::Invalid(format!(
                "table name '{}' is not a plain identifier",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(SchemaError::Invalid(format!("table '{}' has no fields", self.name)));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_plain_identifier(&field.name) {
                return Err(SchemaError::Invalid(format!(
                    "field name '{}' is not a plain identifier",
                    field.name
                )));
            }
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(SchemaError::Invalid(format!("duplicate field '{}'", field.name)));
            }
        }
        if !seen.contains(&self.recency_field.to_ascii_lowercase()) {
            return Err(SchemaError::Invalid(format!(
                "recency field '{}' is not a field of '{}'",
                self.recency_field, self.name
            )));
        }
        Ok(())
    }

    /// Field listing for the clause prompt.
    pub fn summary(&self) -> String {
        let mut names: Vec<&str> = self.field_names().collect();
        names.sort_unstable();
        let mut out = format!("Available columns: {}\n\nColumn types:", names.join(", "));
        for field in &self.fields {
            out.push_str(&format!("\n- {}: {}", field.name, field.kind.sql_type()));
            match (field.description.is_empty(), field.examples.is_empty()) {
                (true, true) => {}
                (false, true) => out.push_str(&format!(" ({})", field.description)),
                (desc_empty, false) => {
                    let quoted: Vec<String> =
                        field.examples.iter().map(|e| format!("'{e}'")).collect();
                    if desc_empty {
                        out.push_str(&format!(" (e.g., {})", quoted.join(", ")));
                    } else {
                        out.push_str(&format!(
                            " ({}, e.g., {})",
                            field.description,
                            quoted.join(", ")
                        ));
                    }
                }
            }
        }
        out
    }
}

/// A field of a platform record type, as shown to the code generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_required() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<ContractField>,
}

impl RecordSpec {
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("class {}(BaseModel):", self.name)];
        for field in &self.fields {
            let req = if field.required { "required" } else { "optional" };
            let mut line = format!("    {}: {}  # {}", field.name, field.type_name, req);
            if !field.description.is_empty() {
                line.push_str(&format!(": {}", field.description));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumSpec {
    pub name: String,
    pub members: Vec<String>,
}

/// Everything an external schema source can describe.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default)]
    pub table: Option<TableSchema>,
    #[serde(default)]
    pub records: Vec<RecordSpec>,
    #[serde(default)]
    pub enums: Vec<EnumSpec>,
}

impl SchemaDescriptor {
    pub fn from_yaml(text: &str) -> Result<Self, SchemaError> {
        let desc: SchemaDescriptor =
            serde_yaml::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))?;
        if let Some(table) = &desc.table {
            table.check()?;
        }
        Ok(desc)
    }

    pub fn table(&self) -> Result<&TableSchema, SchemaError> {
        self.table.as_ref().ok_or(SchemaError::MissingTable)
    }

    pub fn record_summaries(&self) -> String {
        self.records
            .iter()
            .map(RecordSpec::summary)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn enum_summaries(&self) -> String {
        if self.enums.is_empty() {
            return "None".to_string();
        }
        self.enums
            .iter()
            .map(|e| {
                let members: Vec<String> = e.members.iter().map(|m| format!("\"{m}\"")).collect();
                format!("{}: {}", e.name, members.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Read-only provider of a schema descriptor.
pub trait SchemaSource: Send + Sync {
    fn load(&self) -> Result<SchemaDescriptor, SchemaError>;
}

/// Descriptor stored as a YAML document on disk.
#[derive(Clone, Debug)]
pub struct YamlSchemaSource {
    path: PathBuf,
}

impl YamlSchemaSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SchemaSource for YamlSchemaSource {
    fn load(&self) -> Result<SchemaDescriptor, SchemaError> {
        let text = fs::read_to_string(&self.path).map_err(|e| SchemaError::Unreachable {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        SchemaDescriptor::from_yaml(&text)
    }
}

/// The audit-log table, with no record contracts.
pub struct BuiltinSchemaSource;

impl SchemaSource for BuiltinSchemaSource {
    fn load(&self) -> Result<SchemaDescriptor, SchemaError> {
        let table = audit_logs();
        table.check()?;
        Ok(SchemaDescriptor {
            table: Some(table),
            records: Vec::new(),
            enums: Vec::new(),
        })
    }
}

crate::define_table! {
    /// Table that both stores session audit records and answers log queries.
    fn audit_logs => "audit_logs", recency: timestamp {
        id: Text => "unique event ID",
        event_type: Text ["nl_log_query", "scaffold", "classification", "retrieval"] => "kind of event",
        module: Text ["query", "scaffold", "core"] => "component that emitted the event",
        level: Text ["INFO", "WARN", "ERROR"] => "severity",
        input: Text => "input to this step",
        output: Text => "output from this step",
        tokens_in: Integer => "prompt tokens",
        tokens_out: Integer => "completion tokens",
        cost_usd: Real => "cost in USD",
        model: Text ["gpt-4o-mini"] => "model used",
        timestamp: Timestamp ["2026-02-12T14:30:00"] => "ISO 8601 event time",
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
