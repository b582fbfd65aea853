//! Change-event model and wire decoding
//!
//! A [`ChangeEvent`] is one table-scoped batch of row images produced by
//! upstream log decoding. Entries arrive as [`EntryMessage`] values in the
//! flat-message JSON shape and are decoded into typed events with
//! [`decode`]; DDL and non-DML entries never reach the apply core.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sluice_rdbc::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{ApplyError, Result};
use crate::sql_type::SqlType;

/// Row-level operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowKind {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

impl RowKind {
    /// Scheduling offset added on top of the dependency level.
    ///
    /// At equal level inserts run before updates, updates before deletes.
    pub const fn priority_offset(self) -> u32 {
        match self {
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    /// Upper-case operation name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowKind {
    type Err = ApplyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(ApplyError::decode(format!(
                "unsupported event type '{}'",
                other
            ))),
        }
    }
}

/// One column of a row image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Decoded value
    pub value: Value,
    /// SQL type tag the value is marshaled against
    pub sql_type: SqlType,
    /// Whether the column is part of the primary key
    pub is_key: bool,
}

impl Column {
    /// Non-key column
    pub fn new(name: impl Into<String>, sql_type: SqlType, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sql_type,
            is_key: false,
        }
    }

    /// Primary-key column
    pub fn key(name: impl Into<String>, sql_type: SqlType, value: impl Into<Value>) -> Self {
        Self {
            is_key: true,
            ..Self::new(name, sql_type, value)
        }
    }
}

/// Column-ordered row image keyed by column name
pub type RowImage = IndexMap<String, Column>;

/// Build a row image from columns, preserving their order
pub fn row_image<I: IntoIterator<Item = Column>>(columns: I) -> RowImage {
    columns.into_iter().map(|c| (c.name.clone(), c)).collect()
}

/// Source-log position of an event, kept for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Binary log file name
    pub logfile_name: Option<String>,
    /// Offset within the log file
    pub logfile_offset: Option<i64>,
    /// Execute time on the source (epoch millis)
    pub execute_time: Option<i64>,
    /// Time the entry was decoded (epoch millis)
    pub decoded_at: Option<i64>,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.logfile_name, self.logfile_offset) {
            (Some(name), Some(offset)) => write!(f, "{}:{}", name, offset),
            (Some(name), None) => f.write_str(name),
            _ => f.write_str("-"),
        }
    }
}

/// One table-scoped batch of row changes
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Source database (schema) name
    pub database: String,
    /// Source table name
    pub table: String,
    /// Operation kind shared by every row
    pub kind: RowKind,
    /// Ordered primary-key column names
    pub pk_names: Vec<String>,
    /// New-row images (before-images for DELETE)
    pub rows: Vec<RowImage>,
    /// Old-row images, parallel to `rows`, UPDATE only
    pub old_rows: Option<Vec<RowImage>>,
    /// Log position
    pub position: SourcePosition,
}

impl ChangeEvent {
    /// INSERT event
    pub fn insert(
        database: impl Into<String>,
        table: impl Into<String>,
        pk_names: Vec<String>,
        rows: Vec<RowImage>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            kind: RowKind::Insert,
            pk_names,
            rows,
            old_rows: None,
            position: SourcePosition::default(),
        }
    }

    /// UPDATE event; `old_rows[i]` is the before-image of `rows[i]`
    pub fn update(
        database: impl Into<String>,
        table: impl Into<String>,
        pk_names: Vec<String>,
        rows: Vec<RowImage>,
        old_rows: Vec<RowImage>,
    ) -> Self {
        Self {
            kind: RowKind::Update,
            old_rows: Some(old_rows),
            ..Self::insert(database, table, pk_names, rows)
        }
    }

    /// DELETE event
    pub fn delete(
        database: impl Into<String>,
        table: impl Into<String>,
        pk_names: Vec<String>,
        rows: Vec<RowImage>,
    ) -> Self {
        Self {
            kind: RowKind::Delete,
            ..Self::insert(database, table, pk_names, rows)
        }
    }

    /// Attach a log position
    pub fn with_position(mut self, position: SourcePosition) -> Self {
        self.position = position;
        self
    }

    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Check the structural invariants of the event
    pub fn validate(&self) -> Result<()> {
        match (self.kind, &self.old_rows) {
            (RowKind::Update, None) => {
                return Err(ApplyError::decode(format!(
                    "UPDATE on {} carries no old-row images",
                    self.qualified_name()
                )));
            }
            (RowKind::Update, Some(old)) if old.len() != self.rows.len() => {
                return Err(ApplyError::decode(format!(
                    "UPDATE on {} has {} new-row images but {} old-row images",
                    self.qualified_name(),
                    self.rows.len(),
                    old.len()
                )));
            }
            (RowKind::Insert | RowKind::Delete, Some(_)) => {
                return Err(ApplyError::decode(format!(
                    "{} on {} must not carry old-row images",
                    self.kind,
                    self.qualified_name()
                )));
            }
            _ => {}
        }

        if self.kind != RowKind::Insert && self.pk_names.is_empty() {
            return Err(ApplyError::decode(format!(
                "{} on {} has no primary key columns",
                self.kind,
                self.qualified_name()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Column value on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireColumn {
    /// Untyped JSON value
    #[serde(default)]
    pub value: serde_json::Value,
    /// SQL type code
    #[serde(default)]
    pub sql_type: SqlType,
    /// Primary-key flag
    #[serde(default)]
    pub is_key: bool,
}

/// Flat change entry as delivered by the log subscription client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMessage {
    /// Source database
    #[serde(default)]
    pub database: String,
    /// Source table
    #[serde(default)]
    pub table: String,
    /// Event type (INSERT, UPDATE, DELETE, or a DDL/other type)
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Primary-key column names
    #[serde(default)]
    pub pk_names: Vec<String>,
    /// Whether the entry is DDL
    #[serde(default)]
    pub is_ddl: bool,
    /// New-row images
    #[serde(default)]
    pub data: Vec<IndexMap<String, WireColumn>>,
    /// Old-row images (UPDATE)
    #[serde(default)]
    pub old: Option<Vec<IndexMap<String, WireColumn>>>,
    /// Binary log file name
    #[serde(default)]
    pub logfile_name: Option<String>,
    /// Binary log offset
    #[serde(default)]
    pub logfile_offset: Option<i64>,
    /// Execute time on the source
    #[serde(default)]
    pub es: Option<i64>,
    /// Decode time
    #[serde(default)]
    pub ts: Option<i64>,
    /// Source statement text (DDL)
    #[serde(default)]
    pub sql: Option<String>,
}

impl EntryMessage {
    /// Parse one entry from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Convert an untyped JSON value into the value union
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Value::Decimal(Decimal::from(u))
            } else {
                match n.as_f64() {
                    Some(f) => Value::Float64(f),
                    None => n
                        .to_string()
                        .parse::<Decimal>()
                        .map(Value::Decimal)
                        .unwrap_or(Value::Null),
                }
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn decode_image(image: IndexMap<String, WireColumn>) -> RowImage {
    image
        .into_iter()
        .map(|(name, wire)| {
            let column = Column {
                name: name.clone(),
                value: json_to_value(&wire.value),
                sql_type: wire.sql_type,
                is_key: wire.is_key,
            };
            (name, column)
        })
        .collect()
}

/// Decode one entry; `Ok(None)` when the entry is not row DML
pub fn decode_entry(entry: EntryMessage) -> Result<Option<ChangeEvent>> {
    if entry.is_ddl {
        debug!(
            database = %entry.database,
            table = %entry.table,
            kind = %entry.kind,
            "Skipping DDL entry"
        );
        return Ok(None);
    }

    let kind = match entry.kind.parse::<RowKind>() {
        Ok(kind) => kind,
        Err(_) => {
            warn!(
                kind = %entry.kind,
                sql = entry.sql.as_deref().unwrap_or_default(),
                "Unsupported event type, skipping"
            );
            return Ok(None);
        }
    };

    if entry.data.is_empty() {
        debug!(table = %entry.table, %kind, "Entry carries no rows, skipping");
        return Ok(None);
    }

    let rows: Vec<RowImage> = entry.data.into_iter().map(decode_image).collect();

    let pk_names = if entry.pk_names.is_empty() {
        rows.first()
            .map(|row| {
                row.values()
                    .filter(|c| c.is_key)
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        entry.pk_names
    };

    let old_rows = match kind {
        RowKind::Update => Some(
            entry
                .old
                .unwrap_or_default()
                .into_iter()
                .map(decode_image)
                .collect(),
        ),
        RowKind::Insert | RowKind::Delete => None,
    };

    let event = ChangeEvent {
        database: entry.database,
        table: entry.table,
        kind,
        pk_names,
        rows,
        old_rows,
        position: SourcePosition {
            logfile_name: entry.logfile_name,
            logfile_offset: entry.logfile_offset,
            execute_time: entry.es,
            decoded_at: entry.ts,
        },
    };
    event.validate()?;
    Ok(Some(event))
}

/// Decode a fetched batch of entries into change events, in order
pub fn decode(entries: Vec<EntryMessage>) -> Result<Vec<ChangeEvent>> {
    let mut events = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(event) = decode_entry(entry)? {
            events.push(event);
        }
    }
    Ok(events)
}
