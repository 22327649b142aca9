//! Identifier handling for the few places where SQL text is assembled by hand.
//!
//! Table and schema names are checked against a conservative character set
//! before they are quoted. Column names come from query results and may hold
//! arbitrary text, so they are only quoted, with embedded quotes doubled.

use std::fmt;

use crate::error::{IntegrationError, Result};

/// A `"schema"."table"` pair that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedTable {
    schema: String,
    table: String,
}

impl QualifiedTable {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        validate_name(schema)?;
        validate_name(table)?;
        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Letters (any script), digits, underscore, dot, dash and space.
pub fn validate_name(name: &str) -> Result<()> {
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ');
    if name.trim().is_empty() || !name.chars().all(allowed) {
        return Err(IntegrationError::Configuration(format!(
            "'{name}' is not an allowed table or column name"
        )));
    }
    Ok(())
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_table_quotes_both_parts() {
        let table = QualifiedTable::new("analitycs", "Int.Sales_Time").unwrap();
        assert_eq!(table.to_string(), "\"analitycs\".\"Int.Sales_Time\"");
    }

    #[test]
    fn rejects_names_with_sql_metacharacters() {
        assert!(QualifiedTable::new("analitycs", "x\"; DROP TABLE y; --").is_err());
        assert!(QualifiedTable::new("", "t").is_err());
        assert!(validate_name("ДатаСоздания").is_ok());
    }

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("Время чистой продажи"), "\"Время чистой продажи\"");
    }
}
