//! Statement assembly
//!
//! Renders a [`PlannedBatch`] into one SQL text plus marshaled parameter
//! sets for the target dialect. Target tables are addressed by bare table
//! name (plus the optional configured suffix), never database-qualified.

use sluice_rdbc::dialect::{SqlBuilder, SqlDialect};
use sluice_rdbc::Value;

use crate::error::{ApplyError, Result};
use crate::event::{Column, RowKind};
use crate::marshal::MarshalConfig;
use crate::normalize::SingleRowChange;
use crate::plan::PlannedBatch;

/// Rendered batch ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Operation kind
    pub kind: RowKind,
    /// Rendered target table name (suffix applied, unquoted)
    pub table: String,
    /// Statement text
    pub sql: String,
    /// One parameter set per execution
    pub param_sets: Vec<Vec<Value>>,
    /// Rows covered by all executions together
    pub rows: usize,
}

/// Renders planned batches for one dialect
pub struct StatementRenderer<'a> {
    dialect: &'a dyn SqlDialect,
    marshal: &'a MarshalConfig,
    table_suffix: Option<&'a str>,
}

impl<'a> StatementRenderer<'a> {
    /// Create a renderer
    pub fn new(
        dialect: &'a dyn SqlDialect,
        marshal: &'a MarshalConfig,
        table_suffix: Option<&'a str>,
    ) -> Self {
        Self {
            dialect,
            marshal,
            table_suffix,
        }
    }

    /// Target table name for a source table
    pub fn target_table(&self, table: &str) -> String {
        match self.table_suffix {
            Some(suffix) => format!("{}{}", table, suffix),
            None => table.to_string(),
        }
    }

    fn bind(&self, column: &Column) -> Value {
        self.marshal.marshal(column.sql_type, &column.value)
    }

    fn column<'r>(record: &'r SingleRowChange, name: &str) -> Result<&'r Column> {
        record.row.get(name).ok_or_else(|| {
            ApplyError::decode(format!(
                "column '{}' missing from row image of {}",
                name,
                record.table.qualified_name()
            ))
        })
    }

    fn push_key_predicate(&self, b: &mut SqlBuilder<'_>, record: &SingleRowChange) {
        b.push(" WHERE ").push_list(&record.key, " AND ", |b, column| {
            b.push_ident(&column.name).push("=").push_param();
        });
    }

    /// Render one planned batch
    pub fn render(&self, batch: &PlannedBatch) -> Result<Statement> {
        let table = self.target_table(&batch.table.table);
        let first = batch
            .sets
            .first()
            .and_then(|set| set.first())
            .ok_or_else(|| ApplyError::decode(format!("empty {} batch for {}", batch.kind, table)))?;

        let mut b = SqlBuilder::new(self.dialect);
        let mut param_sets = Vec::with_capacity(batch.sets.len());

        match batch.kind {
            RowKind::Insert => {
                let width = batch.columns.len();
                b.push("INSERT INTO ")
                    .push_ident(&table)
                    .push(" (")
                    .push_ident_list(&batch.columns, ",")
                    .push(") VALUES ")
                    .push_list(0..batch.rows_per_set(), ",", |b, _| {
                        b.push("(").push_params(width, ",").push(")");
                    });

                for set in &batch.sets {
                    let mut params = Vec::with_capacity(set.len() * width);
                    for record in set {
                        for name in &batch.columns {
                            params.push(self.bind(Self::column(record, name)?));
                        }
                    }
                    param_sets.push(params);
                }
            }
            RowKind::Update => {
                b.push("UPDATE ")
                    .push_ident(&table)
                    .push(" SET ")
                    .push_list(&batch.columns, ", ", |b, name| {
                        b.push_ident(name).push("=").push_param();
                    });
                self.push_key_predicate(&mut b, first);

                for set in &batch.sets {
                    let mut params = Vec::with_capacity(batch.columns.len() + first.key.len());
                    for record in set {
                        for name in &batch.columns {
                            params.push(self.bind(Self::column(record, name)?));
                        }
                        params.extend(record.key.iter().map(|c| self.bind(c)));
                    }
                    param_sets.push(params);
                }
            }
            RowKind::Delete => {
                b.push("DELETE FROM ").push_ident(&table);
                self.push_key_predicate(&mut b, first);

                for set in &batch.sets {
                    param_sets.push(
                        set.iter()
                            .flat_map(|record| record.key.iter().map(|c| self.bind(c)))
                            .collect(),
                    );
                }
            }
        }

        Ok(Statement {
            kind: batch.kind,
            table,
            sql: b.build(),
            param_sets,
            rows: batch.row_count(),
        })
    }
}
