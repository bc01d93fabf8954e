//! Identifier rules for the two places names leave the program: XML markup
//! and SQL text.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed
//! as statement parameters, so they are validated and quoted here. XML names
//! decide whether the codec can use a table or column name directly as an
//! element or attribute name.

use crate::error::{Result, RowportError};

/// Maximum length of a table or column name written as an XML name.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum identifier length accepted for SQL (PostgreSQL's limit is 63 bytes,
/// but quoting is still safe for longer names on other engines).
const MAX_SQL_IDENTIFIER_LENGTH: usize = 128;

/// Whether `name` can be used verbatim as an XML element or attribute name.
///
/// Accepts a conservative subset of XML NCNames: an ASCII letter or `_`
/// followed by ASCII letters, digits, `_`, `-` or `.`. Names starting with
/// `xml` (any case) are reserved by XML itself and rejected.
pub fn is_xml_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    if name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("xml")) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Validate an identifier before it is interpolated into SQL.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RowportError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(RowportError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_SQL_IDENTIFIER_LENGTH {
        return Err(RowportError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_SQL_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier, doubling embedded double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with its schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote a string as a SQL literal, doubling single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_names() {
        assert!(is_xml_name("author"));
        assert!(is_xml_name("_private"));
        assert!(is_xml_name("order-line.v2"));
        assert!(!is_xml_name(""));
        assert!(!is_xml_name("1st"));
        assert!(!is_xml_name("first name"));
        assert!(!is_xml_name("ns:col"));
        assert!(!is_xml_name("XmlData"));
        assert!(!is_xml_name("größe"));
        assert!(is_xml_name(&"a".repeat(MAX_NAME_LENGTH)));
        assert!(!is_xml_name(&"a".repeat(MAX_NAME_LENGTH + 1)));
    }

    #[test]
    fn test_quote_pg() {
        assert_eq!(quote_pg("users").unwrap(), "\"users\"");
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
        assert!(quote_pg("").is_err());
        assert!(quote_pg("bad\0name").is_err());
        assert_eq!(qualify_pg("public", "book").unwrap(), "\"public\".\"book\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal(""), "''");
    }
}
