//! Property tests for dependency scheduling and planning

use proptest::prelude::*;
use sluice::event::{row_image, ChangeEvent, Column, RowImage, RowKind};
use sluice::normalize::{normalize_all, SingleRowChange};
use sluice::plan::{plan, PlanConfig};
use sluice::schedule::{schedule, SchedulePolicy, LEVEL_STEP};
use sluice::sql_type::SqlType;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Insert(i64),
    Update { from: i64, to: i64 },
    Delete(i64),
}

fn image(id: i64, version: usize) -> RowImage {
    row_image([
        Column::key("id", SqlType::Integer, id),
        Column::new("v", SqlType::VarChar, format!("v{}", version)),
    ])
}

fn events(ops: &[Op]) -> Vec<ChangeEvent> {
    let pk = || vec!["id".to_string()];
    ops.iter()
        .enumerate()
        .map(|(n, op)| match *op {
            Op::Insert(id) => ChangeEvent::insert("db", "t", pk(), vec![image(id, n)]),
            Op::Delete(id) => ChangeEvent::delete("db", "t", pk(), vec![image(id, n)]),
            // The version bump guarantees a changed column.
            Op::Update { from, to } => ChangeEvent::update(
                "db",
                "t",
                pk(),
                vec![image(to, n + 1)],
                vec![image(from, n)],
            ),
        })
        .collect()
}

fn same_key_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..4).prop_map(Op::Insert),
        (0i64..4).prop_map(|id| Op::Update { from: id, to: id }),
        (0i64..4).prop_map(Op::Delete),
    ]
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..4).prop_map(Op::Insert),
        (0i64..4, 0i64..4).prop_map(|(from, to)| Op::Update { from, to }),
        (0i64..4).prop_map(Op::Delete),
    ]
}

fn scheduled(ops: &[Op], policy: SchedulePolicy) -> Vec<SingleRowChange> {
    let mut records = normalize_all(events(ops)).unwrap();
    schedule(&mut records, policy);
    records
}

fn assert_conflicts_ordered(records: &[SingleRowChange]) -> Result<(), TestCaseError> {
    for (j, later) in records.iter().enumerate() {
        for earlier in &records[..j] {
            if later.conflicts_with(earlier) {
                prop_assert!(
                    later.priority > earlier.priority,
                    "conflicting record {} has priority {} <= {}",
                    j,
                    later.priority,
                    earlier.priority
                );
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_nearest_orders_single_signature_records(
        ops in prop::collection::vec(same_key_op(), 1..40)
    ) {
        let records = scheduled(&ops, SchedulePolicy::NearestPredecessor);
        prop_assert!(records.iter().all(|r| r.key_signatures.len() == 1));
        assert_conflicts_ordered(&records)?;
    }

    #[test]
    fn prop_max_orders_all_records(ops in prop::collection::vec(any_op(), 1..40)) {
        let records = scheduled(&ops, SchedulePolicy::MaxPredecessor);
        assert_conflicts_ordered(&records)?;
    }

    #[test]
    fn prop_priority_is_level_plus_kind_offset(
        ops in prop::collection::vec(any_op(), 1..40),
        max in any::<bool>(),
    ) {
        let policy = if max {
            SchedulePolicy::MaxPredecessor
        } else {
            SchedulePolicy::NearestPredecessor
        };
        let mut kind_at: BTreeMap<u32, RowKind> = BTreeMap::new();

        for record in scheduled(&ops, policy) {
            prop_assert_eq!(record.priority % LEVEL_STEP, record.kind.priority_offset());
            let level = record.priority / LEVEL_STEP * LEVEL_STEP;
            prop_assert_eq!(record.priority, level + record.kind.priority_offset());

            let kind = *kind_at.entry(record.priority).or_insert(record.kind);
            prop_assert_eq!(kind, record.kind, "priority {} mixes kinds", record.priority);
        }

        // within one level inserts precede updates precede deletes
        for (priority, kind) in &kind_at {
            for (other, other_kind) in &kind_at {
                if priority / LEVEL_STEP == other / LEVEL_STEP && kind < other_kind {
                    prop_assert!(priority < other);
                }
            }
        }
    }

    #[test]
    fn prop_batches_hold_one_kind_and_ascend(
        ops in prop::collection::vec(any_op(), 1..60),
        merge in 1usize..8,
    ) {
        let records = scheduled(&ops, SchedulePolicy::MaxPredecessor);
        let total = records.len();
        let config = PlanConfig {
            merge_insert_size: merge,
            batch_update_size: merge,
            batch_delete_size: merge,
            ..Default::default()
        };
        let planned = plan(records, &config);

        prop_assert_eq!(planned.row_count(), total);

        let mut kinds: BTreeMap<(u32, RowKind), usize> = BTreeMap::new();
        let mut last = None;
        for batch in &planned.batches {
            for set in &batch.sets {
                for record in set {
                    prop_assert_eq!(record.kind, batch.kind);
                    prop_assert_eq!(record.priority, batch.priority);
                }
            }
            let key = (batch.priority, batch.kind);
            if let Some(previous) = last {
                prop_assert!(previous <= key);
            }
            last = Some(key);
            *kinds.entry(key).or_default() += batch.row_count();
        }
        prop_assert_eq!(kinds.len(), planned.groups);
    }
}
