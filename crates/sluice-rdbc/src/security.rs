//! Identifier validation for operator-supplied SQL fragments.
//!
//! Table and column names reaching the renderer come from the source
//! schema. Fragments that come from configuration instead (such as a
//! destination table suffix) are checked here before they are ever
//! concatenated into statement text.

use crate::error::Error;

/// Validate a SQL identifier (table, schema names).
///
/// Rules:
/// - Must not be empty
/// - Maximum 255 characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use sluice_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(Error::config("SQL identifier cannot be empty")),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(_) => {
            return Err(Error::config(format!(
                "invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    validate_identifier_chars(name, chars.as_str())
}

/// Validate a fragment appended to an existing identifier, e.g. a table
/// suffix such as `_2024` or `_bak`.
///
/// Same character rules as [`validate_sql_identifier`] except that the
/// fragment may start with a digit.
///
/// ```
/// use sluice_rdbc::security::validate_identifier_fragment;
///
/// assert!(validate_identifier_fragment("_2024").is_ok());
/// assert!(validate_identifier_fragment("2024").is_ok());
/// assert!(validate_identifier_fragment("`; DROP").is_err());
/// ```
pub fn validate_identifier_fragment(fragment: &str) -> crate::Result<()> {
    if fragment.is_empty() {
        return Err(Error::config("identifier fragment cannot be empty"));
    }
    validate_identifier_chars(fragment, fragment)
}

fn validate_identifier_chars(name: &str, rest: &str) -> crate::Result<()> {
    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    match rest.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        Some(c) => Err(Error::config(format!(
            "invalid SQL identifier '{}': contains invalid character '{}'",
            name, c
        ))),
        None => Ok(()),
    }
}
