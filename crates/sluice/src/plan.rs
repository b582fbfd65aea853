//! Batch planning
//!
//! Groups scheduled records by priority (ascending) and target table
//! (first-seen order), then cuts each group into size-bounded batches.
//! Scheduled priorities carry a single operation kind each; the kind is
//! still part of the group key so unscheduled input never mixes kinds.
//! Every [`PlannedBatch`] becomes exactly one batched execution: one
//! statement text, one parameter set per entry of `sets`.
//!
//! - INSERT: full chunks of `merge_insert_size` rows share one multi-row
//!   statement executed once per chunk; the remainder gets its own
//!   statement.
//! - UPDATE: batches of `batch_update_size` rows, one row per set. The SET
//!   list is the union of the rows' changed columns, or with
//!   [`UpdateColumnPolicy::Exact`] rows are split by changed-column set.
//! - DELETE: batches of `batch_delete_size` rows, one row per set.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::event::RowKind;
use crate::normalize::{SingleRowChange, TableRef};

/// Default rows merged into one multi-row INSERT
pub const DEFAULT_MERGE_INSERT_SIZE: usize = 200;
/// Default rows per batched UPDATE execution
pub const DEFAULT_BATCH_UPDATE_SIZE: usize = 500;
/// Default rows per batched DELETE execution
pub const DEFAULT_BATCH_DELETE_SIZE: usize = 1000;

/// Which columns a batched UPDATE writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateColumnPolicy {
    /// Union of the changed columns of all rows in the batch
    #[default]
    Union,
    /// Only rows with identical changed-column sets share a batch
    Exact,
}

/// Planner settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanConfig {
    /// Rows per multi-row INSERT
    pub merge_insert_size: usize,
    /// Rows per batched UPDATE
    pub batch_update_size: usize,
    /// Rows per batched DELETE
    pub batch_delete_size: usize,
    /// UPDATE column selection
    pub update_columns: UpdateColumnPolicy,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            merge_insert_size: DEFAULT_MERGE_INSERT_SIZE,
            batch_update_size: DEFAULT_BATCH_UPDATE_SIZE,
            batch_delete_size: DEFAULT_BATCH_DELETE_SIZE,
            update_columns: UpdateColumnPolicy::Union,
        }
    }
}

/// One batched execution
#[derive(Debug, Clone)]
pub struct PlannedBatch {
    /// Priority group the batch belongs to
    pub priority: u32,
    /// Operation kind
    pub kind: RowKind,
    /// Target table
    pub table: Arc<TableRef>,
    /// INSERT column list or UPDATE SET list; empty for DELETE
    pub columns: Vec<String>,
    /// Parameter sets; each set holds the rows bound by one execution
    pub sets: Vec<Vec<SingleRowChange>>,
}

impl PlannedBatch {
    /// Rows rendered per statement execution
    pub fn rows_per_set(&self) -> usize {
        self.sets.first().map(Vec::len).unwrap_or(0)
    }

    /// Total rows covered by the batch
    pub fn row_count(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }
}

/// Ordered execution plan of one apply cycle
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Batches in execution order
    pub batches: Vec<PlannedBatch>,
    /// Number of distinct priority groups
    pub groups: usize,
}

impl Plan {
    /// Whether nothing needs executing
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total rows across all batches
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(PlannedBatch::row_count).sum()
    }
}

/// Build the execution plan for scheduled records
pub fn plan(records: Vec<SingleRowChange>, config: &PlanConfig) -> Plan {
    let mut groups: BTreeMap<(u32, RowKind), IndexMap<Arc<TableRef>, Vec<SingleRowChange>>> =
        BTreeMap::new();

    for record in records {
        groups
            .entry((record.priority, record.kind))
            .or_default()
            .entry(Arc::clone(&record.table))
            .or_default()
            .push(record);
    }

    let mut plan = Plan {
        groups: groups.len(),
        ..Default::default()
    };

    for ((priority, kind), tables) in groups {
        for (table, rows) in tables {
            trace!(
                priority,
                %kind,
                table = %table.qualified_name(),
                rows = rows.len(),
                "Planning group"
            );
            let batches = match kind {
                RowKind::Insert => plan_inserts(priority, &table, rows, config.merge_insert_size),
                RowKind::Update => plan_updates(priority, &table, rows, config),
                RowKind::Delete => plan_deletes(priority, &table, rows, config.batch_delete_size),
            };
            plan.batches.extend(batches);
        }
    }

    debug!(
        groups = plan.groups,
        batches = plan.batches.len(),
        rows = plan.row_count(),
        "Apply plan built"
    );
    plan
}

fn column_list(record: &SingleRowChange) -> Vec<String> {
    record.row.keys().cloned().collect()
}

fn plan_inserts(
    priority: u32,
    table: &Arc<TableRef>,
    rows: Vec<SingleRowChange>,
    merge_size: usize,
) -> Vec<PlannedBatch> {
    let merge_size = merge_size.max(1);

    // Rows with a different column layout cannot share a VALUES list.
    let mut layouts: IndexMap<Vec<String>, Vec<SingleRowChange>> = IndexMap::new();
    for row in rows {
        layouts.entry(column_list(&row)).or_default().push(row);
    }

    let mut batches = Vec::new();
    for (columns, rows) in layouts {
        let mut full: Vec<Vec<SingleRowChange>> = Vec::new();
        let mut chunk = Vec::with_capacity(merge_size);
        for row in rows {
            chunk.push(row);
            if chunk.len() == merge_size {
                full.push(std::mem::replace(&mut chunk, Vec::with_capacity(merge_size)));
            }
        }

        if !full.is_empty() {
            batches.push(PlannedBatch {
                priority,
                kind: RowKind::Insert,
                table: Arc::clone(table),
                columns: columns.clone(),
                sets: full,
            });
        }
        if !chunk.is_empty() {
            batches.push(PlannedBatch {
                priority,
                kind: RowKind::Insert,
                table: Arc::clone(table),
                columns,
                sets: vec![chunk],
            });
        }
    }
    batches
}

fn plan_updates(
    priority: u32,
    table: &Arc<TableRef>,
    rows: Vec<SingleRowChange>,
    config: &PlanConfig,
) -> Vec<PlannedBatch> {
    let batch_size = config.batch_update_size.max(1);
    let mut batches = Vec::new();

    let mut flush = |columns: IndexSet<String>, rows: Vec<SingleRowChange>| {
        if rows.is_empty() {
            return;
        }
        batches.push(PlannedBatch {
            priority,
            kind: RowKind::Update,
            table: Arc::clone(table),
            columns: columns.into_iter().collect(),
            sets: rows.into_iter().map(|row| vec![row]).collect(),
        });
    };

    match config.update_columns {
        UpdateColumnPolicy::Union => {
            let mut columns: IndexSet<String> = IndexSet::new();
            let mut current: Vec<SingleRowChange> = Vec::new();

            for row in rows {
                let mut merged = columns.clone();
                merged.extend(row.changed_columns.iter().cloned());

                // Every row in the batch must carry every SET column.
                let fits = current.len() < batch_size
                    && std::iter::once(&row)
                        .chain(current.iter())
                        .all(|r| merged.iter().all(|c| r.row.contains_key(c)));

                if fits {
                    columns = merged;
                } else {
                    flush(
                        std::mem::take(&mut columns),
                        std::mem::take(&mut current),
                    );
                    columns = row.changed_columns.clone();
                }
                current.push(row);
            }
            flush(columns, current);
        }
        UpdateColumnPolicy::Exact => {
            let mut by_columns: IndexMap<Vec<String>, Vec<SingleRowChange>> = IndexMap::new();
            for row in rows {
                let mut key: Vec<String> = row.changed_columns.iter().cloned().collect();
                key.sort();
                by_columns.entry(key).or_default().push(row);
            }

            for (_, rows) in by_columns {
                let columns = rows
                    .first()
                    .map(|r| r.changed_columns.clone())
                    .unwrap_or_default();
                let mut rows = rows.into_iter().peekable();
                while rows.peek().is_some() {
                    let chunk: Vec<_> = rows.by_ref().take(batch_size).collect();
                    flush(columns.clone(), chunk);
                }
            }
        }
    }

    batches
}

fn plan_deletes(
    priority: u32,
    table: &Arc<TableRef>,
    rows: Vec<SingleRowChange>,
    batch_size: usize,
) -> Vec<PlannedBatch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut rows = rows.into_iter().peekable();

    while rows.peek().is_some() {
        batches.push(PlannedBatch {
            priority,
            kind: RowKind::Delete,
            table: Arc::clone(table),
            columns: Vec::new(),
            sets: rows.by_ref().take(batch_size).map(|row| vec![row]).collect(),
        });
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{row_image, ChangeEvent, Column, RowImage};
    use crate::normalize::normalize_all;
    use crate::schedule::{schedule, SchedulePolicy};
    use crate::sql_type::SqlType;

    fn row(id: i64, a: &str, b: &str) -> RowImage {
        row_image([
            Column::key("id", SqlType::Integer, id),
            Column::new("a", SqlType::VarChar, a),
            Column::new("b", SqlType::VarChar, b),
        ])
    }

    fn pk() -> Vec<String> {
        vec!["id".into()]
    }

    fn planned(events: Vec<ChangeEvent>, config: &PlanConfig) -> Plan {
        let mut records = normalize_all(events).unwrap();
        schedule(&mut records, SchedulePolicy::NearestPredecessor);
        plan(records, config)
    }

    // ==================== Insert Tests ====================

    #[test]
    fn test_insert_full_chunks_share_one_batch() {
        let rows = (0..450).map(|i| row(i, "x", "y")).collect();
        let plan = planned(
            vec![ChangeEvent::insert("d", "t", pk(), rows)],
            &PlanConfig::default(),
        );

        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].sets.len(), 2);
        assert_eq!(plan.batches[0].rows_per_set(), 200);
        assert_eq!(plan.batches[1].sets.len(), 1);
        assert_eq!(plan.batches[1].rows_per_set(), 50);
        assert_eq!(plan.batches[0].columns, vec!["id", "a", "b"]);
        assert_eq!(plan.row_count(), 450);
    }

    #[test]
    fn test_insert_exact_multiple_has_no_remainder() {
        let rows = (0..400).map(|i| row(i, "x", "y")).collect();
        let plan = planned(
            vec![ChangeEvent::insert("d", "t", pk(), rows)],
            &PlanConfig::default(),
        );
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].sets.len(), 2);
    }

    // ==================== Update Tests ====================

    #[test]
    fn test_update_union_of_changed_columns() {
        let plan = planned(
            vec![ChangeEvent::update(
                "d",
                "t",
                pk(),
                vec![row(1, "new", "b"), row(2, "a", "new")],
                vec![row(1, "old", "b"), row(2, "a", "old")],
            )],
            &PlanConfig::default(),
        );

        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].columns, vec!["a", "b"]);
        assert_eq!(plan.batches[0].sets.len(), 2);
    }

    #[test]
    fn test_update_exact_splits_by_column_set() {
        let config = PlanConfig {
            update_columns: UpdateColumnPolicy::Exact,
            ..Default::default()
        };
        let plan = planned(
            vec![ChangeEvent::update(
                "d",
                "t",
                pk(),
                vec![row(1, "new", "b"), row(2, "a", "new"), row(3, "new", "b")],
                vec![row(1, "old", "b"), row(2, "a", "old"), row(3, "old", "b")],
            )],
            &config,
        );

        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].columns, vec!["a"]);
        assert_eq!(plan.batches[0].sets.len(), 2);
        assert_eq!(plan.batches[1].columns, vec!["b"]);
    }

    #[test]
    fn test_update_batches_are_bounded() {
        let config = PlanConfig {
            batch_update_size: 2,
            ..Default::default()
        };
        let new = (0..5).map(|i| row(i, "n", "b")).collect();
        let old = (0..5).map(|i| row(i, "o", "b")).collect();
        let plan = planned(vec![ChangeEvent::update("d", "t", pk(), new, old)], &config);

        let sizes: Vec<usize> = plan.batches.iter().map(|b| b.sets.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    // ==================== Ordering Tests ====================

    #[test]
    fn test_groups_execute_in_priority_order() {
        let plan = planned(
            vec![
                ChangeEvent::delete("d", "t", pk(), vec![row(9, "a", "b")]),
                ChangeEvent::insert("d", "t", pk(), vec![row(1, "a", "b")]),
                ChangeEvent::update("d", "t", pk(), vec![row(1, "c", "b")], vec![row(1, "a", "b")]),
            ],
            &PlanConfig::default(),
        );

        let order: Vec<(u32, RowKind)> = plan.batches.iter().map(|b| (b.priority, b.kind)).collect();
        assert_eq!(
            order,
            vec![
                (1, RowKind::Insert),
                (3, RowKind::Delete),
                (12, RowKind::Update)
            ]
        );
        assert_eq!(plan.groups, 3);
    }

    #[test]
    fn test_tables_keep_first_seen_order_within_group() {
        let plan = planned(
            vec![
                ChangeEvent::insert("d", "zeta", pk(), vec![row(1, "a", "b")]),
                ChangeEvent::insert("d", "alpha", pk(), vec![row(1, "a", "b")]),
            ],
            &PlanConfig::default(),
        );
        let tables: Vec<&str> = plan.batches.iter().map(|b| b.table.table.as_str()).collect();
        assert_eq!(tables, vec!["zeta", "alpha"]);
        assert_eq!(plan.groups, 1);
    }

    #[test]
    fn test_delete_batches_are_bounded() {
        let config = PlanConfig {
            batch_delete_size: 3,
            ..Default::default()
        };
        let rows = (0..7).map(|i| row(i, "a", "b")).collect();
        let plan = planned(vec![ChangeEvent::delete("d", "t", pk(), rows)], &config);
        let sizes: Vec<usize> = plan.batches.iter().map(PlannedBatch::row_count).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(plan.batches.iter().all(|b| b.columns.is_empty()));
    }
}
