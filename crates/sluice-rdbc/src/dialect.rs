//! SQL dialect abstraction for sluice-rdbc
//!
//! - SqlDialect: identifier quoting and parameter placeholders per vendor
//! - dialect_for: resolve a dialect from a token or connection URL
//! - SqlBuilder: statement text assembly where every list is produced by
//!   joining, so no separator ever has to be trimmed afterwards

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Identifier quote character, `None` when identifiers are emitted bare
    fn quote_char(&self) -> Option<char>;

    /// Get the placeholder for a 1-based parameter index (e.g., $1, ?)
    fn placeholder(&self, index: usize) -> String;

    /// Quote an identifier (table, column name), doubling any embedded
    /// quote character
    fn quote_identifier(&self, name: &str) -> String {
        match self.quote_char() {
            Some(q) => {
                let mut quoted = String::with_capacity(name.len() + 2);
                quoted.push(q);
                for c in name.chars() {
                    if c == q {
                        quoted.push(q);
                    }
                    quoted.push(c);
                }
                quoted.push(q);
                quoted
            }
            None => name.to_string(),
        }
    }
}

/// PostgreSQL dialect (also Redshift)
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_char(&self) -> Option<char> {
        Some('"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
}

/// MySQL dialect (also MariaDB and OceanBase in MySQL mode)
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_char(&self) -> Option<char> {
        Some('`')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

/// Dialect for unrecognized targets: bare identifiers, `?` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDialect;

impl SqlDialect for PlainDialect {
    fn name(&self) -> &'static str {
        "Generic"
    }

    fn quote_char(&self) -> Option<char> {
        None
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

/// Get a dialect instance from a dialect token or connection URL.
///
/// Accepts `mysql`, `postgresql`, `mysql://host/db`,
/// `jdbc:postgresql://host/db` and similar. Unrecognized tokens resolve to
/// [`PlainDialect`].
pub fn dialect_for(token: &str) -> Box<dyn SqlDialect> {
    let token = token.trim();
    let token = token.strip_prefix("jdbc:").unwrap_or(token);
    let scheme = token.split(':').next().unwrap_or_default();
    match scheme.to_ascii_lowercase().as_str() {
        "mysql" | "mariadb" | "oceanbase" => Box::new(MySqlDialect),
        "postgres" | "postgresql" | "redshift" => Box::new(PostgresDialect),
        _ => Box::new(PlainDialect),
    }
}

/// Incremental SQL text builder bound to one dialect.
///
/// Placeholders are numbered across the whole statement, so numbered
/// dialects stay consistent in multi-row statements.
pub struct SqlBuilder<'a> {
    dialect: &'a dyn SqlDialect,
    sql: String,
    params: usize,
}

impl<'a> SqlBuilder<'a> {
    /// Create an empty builder
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: 0,
        }
    }

    /// Append raw text
    pub fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// Append a quoted identifier
    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
        self
    }

    /// Append the next parameter placeholder
    pub fn push_param(&mut self) -> &mut Self {
        self.params += 1;
        let placeholder = self.dialect.placeholder(self.params);
        self.sql.push_str(&placeholder);
        self
    }

    /// Append `items`, rendering each with `f`, separated by `sep`
    pub fn push_list<I, F>(&mut self, items: I, sep: &str, mut f: F) -> &mut Self
    where
        I: IntoIterator,
        F: FnMut(&mut Self, I::Item),
    {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            f(&mut *self, item);
        }
        self
    }

    /// Append a delimiter-joined list of quoted identifiers
    pub fn push_ident_list<S: AsRef<str>>(&mut self, names: &[S], sep: &str) -> &mut Self {
        self.push_list(names, sep, |b, name| {
            b.push_ident(AsRef::<str>::as_ref(name));
        })
    }

    /// Append `pattern` `count` times separated by `sep`
    pub fn push_repeated(&mut self, pattern: &str, count: usize, sep: &str) -> &mut Self {
        self.push_list(0..count, sep, |b, _| {
            b.push(pattern);
        })
    }

    /// Append `count` placeholders separated by `sep`
    pub fn push_params(&mut self, count: usize, sep: &str) -> &mut Self {
        self.push_list(0..count, sep, |b, _| {
            b.push_param();
        })
    }

    /// Number of placeholders emitted so far
    pub fn param_count(&self) -> usize {
        self.params
    }

    /// Borrow the text built so far
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// Finish and return the statement text
    pub fn build(self) -> String {
        self.sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.placeholder(1), "$1");
    }

    #[test]
    fn test_mysql_dialect() {
        let dialect = MySqlDialect;
        assert_eq!(dialect.quote_identifier("users"), "`users`");
        assert_eq!(dialect.placeholder(7), "?");
    }

    #[test]
    fn test_plain_dialect_leaves_identifiers_bare() {
        assert_eq!(PlainDialect.quote_identifier("users"), "users");
    }

    #[test]
    fn test_dialect_for() {
        assert_eq!(dialect_for("mysql").name(), "MySQL");
        assert_eq!(dialect_for("MariaDB").name(), "MySQL");
        assert_eq!(dialect_for("oceanbase").name(), "MySQL");
        assert_eq!(dialect_for("postgresql").name(), "PostgreSQL");
        assert_eq!(dialect_for("redshift").name(), "PostgreSQL");
        assert_eq!(dialect_for("jdbc:mysql://h:3306/db").name(), "MySQL");
        assert_eq!(dialect_for("sqlite").name(), "Generic");
    }

    #[test]
    fn test_builder_numbers_params_across_groups() {
        let dialect = PostgresDialect;
        let mut b = SqlBuilder::new(&dialect);
        b.push("VALUES ").push_list(0..2, ",", |b, _| {
            b.push("(").push_params(2, ",").push(")");
        });
        assert_eq!(b.param_count(), 4);
        assert_eq!(b.build(), "VALUES ($1,$2),($3,$4)");
    }

    #[test]
    fn test_builder_empty_list_has_no_separator() {
        let dialect = MySqlDialect;
        let mut b = SqlBuilder::new(&dialect);
        b.push("(").push_ident_list::<&str>(&[], ",").push(")");
        assert_eq!(b.as_str(), "()");
    }
}
