//! Validated SQL identifiers.
//!
//! Table and column names come from configuration and are rendered into
//! statements, so they are restricted to an allow-list of characters and
//! never concatenated unchecked. Values are always bound as parameters.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_IDENTIFIER_LEN: usize = 64;

fn validate(part: &str) -> Result<(), ConfigError> {
    let valid = !part.is_empty()
        && part.len() <= MAX_IDENTIFIER_LEN
        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(part.to_string()))
    }
}

/// A single column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnIdent(String);

impl ColumnIdent {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ColumnIdent {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ColumnIdent> for String {
    fn from(value: ColumnIdent) -> Self {
        value.0
    }
}

impl fmt::Display for ColumnIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A table name, optionally qualified by a schema (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableIdent {
    schema: Option<String>,
    table: String,
}

impl TableIdent {
    /// Parse `table` or `schema.table`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let mut parts = value.split('.');
        let (schema, table) = match (parts.next(), parts.next(), parts.next()) {
            (Some(table), None, None) => (None, table),
            (Some(schema), Some(table), None) => (Some(schema), table),
            _ => return Err(ConfigError::InvalidIdentifier(value.to_string())),
        };
        if let Some(schema) = schema {
            validate(schema)?;
        }
        validate(table)?;
        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl TryFrom<String> for TableIdent {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TableIdent> for String {
    fn from(value: TableIdent) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}
