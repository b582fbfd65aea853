//! Dependency scheduling
//!
//! Assigns every record a priority so that records touching a common row
//! never share a priority group and always run in their original order,
//! while unrelated records may be regrouped freely. A collision raises the
//! level by [`LEVEL_STEP`]; the operation kind then adds its offset so at
//! equal level inserts run first and deletes last.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::normalize::SingleRowChange;

/// Priority distance between dependency levels
pub const LEVEL_STEP: u32 = 10;

/// How a record's level is derived from colliding predecessors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Level after the nearest colliding predecessor only
    #[default]
    NearestPredecessor,
    /// Level after the highest of all colliding predecessors
    MaxPredecessor,
}

/// Assign priorities in place
///
/// Collisions are resolved on bare levels; kind offsets are added only once
/// every level is known, so a level always stays a multiple of
/// [`LEVEL_STEP`] and the offset alone picks the order within it.
pub fn schedule(records: &mut [SingleRowChange], policy: SchedulePolicy) {
    let mut levels: Vec<u32> = Vec::with_capacity(records.len());

    for (i, current) in records.iter().enumerate() {
        let mut colliding = records[..i]
            .iter()
            .zip(&levels)
            .rev()
            .filter(|(earlier, _)| current.conflicts_with(earlier))
            .map(|(_, level)| level + LEVEL_STEP);

        let level = match policy {
            SchedulePolicy::NearestPredecessor => colliding.next(),
            SchedulePolicy::MaxPredecessor => colliding.max(),
        }
        .unwrap_or(0);

        levels.push(level);
    }

    for (record, level) in records.iter_mut().zip(levels) {
        record.priority = level + record.kind.priority_offset();
    }

    trace!(records = records.len(), ?policy, "Priorities assigned");
}
