//! Change normalization
//!
//! Flattens table-scoped [`ChangeEvent`]s into one [`SingleRowChange`] per
//! affected row. Each record carries the key signatures the scheduler uses
//! to detect conflicts and, for updates, the set of columns that actually
//! changed. Updates that change nothing are dropped here.

use indexmap::IndexSet;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{ApplyError, Result};
use crate::event::{ChangeEvent, Column, RowImage, RowKind};

/// Separator appended after every key value in a signature
const KEY_SEPARATOR: &str = "+!#";

/// Table a record applies to, shared by all records of one event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Source database
    pub database: String,
    /// Source table
    pub table: String,
    /// Ordered primary-key column names
    pub pk_names: Vec<String>,
}

impl TableRef {
    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// One single-row DML record
#[derive(Debug, Clone, PartialEq)]
pub struct SingleRowChange {
    /// Target table
    pub table: Arc<TableRef>,
    /// Operation kind
    pub kind: RowKind,
    /// New-row image (the deleted row for DELETE)
    pub row: RowImage,
    /// Old-row image, UPDATE only
    pub old: Option<RowImage>,
    /// Key columns identifying the target row before the change, in
    /// primary-key order. UPDATE takes them from the old image.
    pub key: Vec<Column>,
    /// Key signatures of the row before and after the change
    pub key_signatures: BTreeSet<String>,
    /// Columns whose value changed, in new-image order (UPDATE only)
    pub changed_columns: IndexSet<String>,
    /// Scheduling priority, lower runs first
    pub priority: u32,
}

impl SingleRowChange {
    /// Whether the two records touch a common row
    pub fn conflicts_with(&self, other: &SingleRowChange) -> bool {
        self.key_signatures
            .iter()
            .any(|k| other.key_signatures.contains(k))
    }
}

fn key_column<'a>(table: &TableRef, image: &'a RowImage, pk: &str) -> Result<&'a Column> {
    image.get(pk).ok_or_else(|| {
        ApplyError::decode(format!(
            "primary key column '{}' missing from row image of {}",
            pk,
            table.qualified_name()
        ))
    })
}

fn signature(table: &TableRef, columns: &[Column]) -> String {
    let mut sig = table.qualified_name();
    sig.push('|');
    for column in columns {
        let _ = write!(sig, "{}{}", column.value, KEY_SEPARATOR);
    }
    sig
}

/// Columns of `row` absent from `old` or holding a different value
pub fn changed_columns(row: &RowImage, old: &RowImage) -> IndexSet<String> {
    row.values()
        .filter(|column| match old.get(&column.name) {
            Some(before) => before.value != column.value,
            None => true,
        })
        .map(|column| column.name.clone())
        .collect()
}

/// Normalize one event into single-row records, in row order
pub fn normalize(event: ChangeEvent) -> Result<Vec<SingleRowChange>> {
    event.validate()?;

    let table = Arc::new(TableRef {
        database: event.database,
        table: event.table,
        pk_names: event.pk_names,
    });
    let kind = event.kind;

    let mut old_rows = event.old_rows.map(Vec::into_iter);
    let mut records = Vec::with_capacity(event.rows.len());

    for row in event.rows {
        let new_key = table
            .pk_names
            .iter()
            .map(|pk| key_column(&table, &row, pk).cloned())
            .collect::<Result<Vec<_>>>()?;

        let mut key_signatures = BTreeSet::new();
        key_signatures.insert(signature(&table, &new_key));

        let (old, key, changed) = match old_rows.as_mut().and_then(Iterator::next) {
            Some(old) => {
                let changed = changed_columns(&row, &old);

                // The old image may only carry the changed columns.
                let old_key: Vec<Column> = table
                    .pk_names
                    .iter()
                    .zip(&new_key)
                    .map(|(pk, fallback)| old.get(pk).unwrap_or(fallback).clone())
                    .collect();
                key_signatures.insert(signature(&table, &old_key));

                (Some(old), old_key, changed)
            }
            None => (None, new_key, IndexSet::new()),
        };

        if kind == RowKind::Update && changed.is_empty() {
            debug!(
                table = %table.qualified_name(),
                "Dropping UPDATE without changed columns"
            );
            continue;
        }

        records.push(SingleRowChange {
            table: Arc::clone(&table),
            kind,
            row,
            old,
            key,
            key_signatures,
            changed_columns: changed,
            priority: 0,
        });
    }

    trace!(
        table = %table.qualified_name(),
        %kind,
        records = records.len(),
        "Event normalized"
    );
    Ok(records)
}

/// Normalize a batch of events, preserving event and row order
pub fn normalize_all(events: Vec<ChangeEvent>) -> Result<Vec<SingleRowChange>> {
    let mut records = Vec::new();
    for event in events {
        records.extend(normalize(event)?);
    }
    Ok(records)
}
