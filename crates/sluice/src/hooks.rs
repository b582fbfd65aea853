//! Pipeline hooks
//!
//! A pump calls [`ApplyHook::extract`] on the raw entries of every fetched
//! batch before decoding and [`ApplyHook::transform`] on the decoded events
//! before they are applied. Both default to passing their input through.

use crate::event::{ChangeEvent, EntryMessage};

/// Filtering and rewriting points around decoding
pub trait ApplyHook: Send + Sync {
    /// Inspect or filter raw entries before decoding
    fn extract(&self, entries: Vec<EntryMessage>) -> Vec<EntryMessage> {
        entries
    }

    /// Inspect or rewrite decoded events before they are applied
    fn transform(&self, events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        events
    }
}

/// Hook that changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl ApplyHook for PassThrough {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{row_image, Column};
    use crate::sql_type::SqlType;

    struct SkipTable(&'static str);

    impl ApplyHook for SkipTable {
        fn transform(&self, events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
            events.into_iter().filter(|e| e.table != self.0).collect()
        }
    }

    fn event(table: &str) -> ChangeEvent {
        ChangeEvent::insert(
            "db",
            table,
            vec!["id".into()],
            vec![row_image([Column::key("id", SqlType::Integer, 1i64)])],
        )
    }

    #[test]
    fn test_pass_through_keeps_everything() {
        let events = PassThrough.transform(vec![event("a"), event("b")]);
        assert_eq!(events.len(), 2);
        assert!(PassThrough.extract(Vec::new()).is_empty());
    }

    #[test]
    fn test_custom_hook_overrides_one_stage() {
        let hook = SkipTable("audit");
        let events = hook.transform(vec![event("audit"), event("orders")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].table, "orders");
    }
}
