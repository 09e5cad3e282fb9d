use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use microfin_core::{AggregateId, TenantId};

use super::ProjectionError;
use super::cursor_store::ProjectionCursorStore;

/// Whether an incoming event should be folded into the read model.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    Apply,
    /// Already seen (at-least-once redelivery).
    Skip,
}

/// Per-stream checkpoints for one projection.
///
/// Events of a stream must arrive in order: a sequence number at or below the
/// cursor is a duplicate, anything beyond `cursor + 1` is a gap.
pub struct StreamCursors {
    projection_name: &'static str,
    cursors: RwLock<HashMap<(TenantId, AggregateId), u64>>,
    durable: Option<Arc<dyn ProjectionCursorStore>>,
}

impl StreamCursors {
    pub fn new(projection_name: &'static str) -> Self {
        Self { projection_name, cursors: RwLock::new(HashMap::new()), durable: None }
    }

    pub fn with_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn projection_name(&self) -> &'static str {
        self.projection_name
    }

    pub fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        let cached = self
            .cursors
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied());

        match (cached, &self.durable) {
            (Some(seq), _) => seq,
            (None, Some(store)) => store
                .get_cursor(tenant_id, aggregate_id, self.projection_name)
                .unwrap_or(0),
            (None, None) => 0,
        }
    }

    pub fn check(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) -> Result<CursorCheck, ProjectionError> {
        let last = self.last(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::Skip);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(CursorCheck::Apply)
    }

    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert((tenant_id, aggregate_id), seq);
        }
        if let Some(store) = &self.durable {
            store.update_cursor(tenant_id, aggregate_id, self.projection_name, seq);
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
        if let Some(store) = &self.durable {
            store.clear_cursors(tenant_id, self.projection_name);
        }
    }
}

impl core::fmt::Debug for StreamCursors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamCursors")
            .field("projection_name", &self.projection_name)
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingStore {
        seen: RwLock<HashMap<(TenantId, AggregateId), u64>>,
    }

    impl ProjectionCursorStore for RecordingStore {
        fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, _: &str) -> Option<u64> {
            self.seen.read().unwrap().get(&(tenant_id, aggregate_id)).copied()
        }

        fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, _: &str, seq: u64) {
            self.seen.write().unwrap().insert((tenant_id, aggregate_id), seq);
        }

        fn clear_cursors(&self, tenant_id: TenantId, _: &str) {
            self.seen.write().unwrap().retain(|(t, _), _| *t != tenant_id);
        }
    }

    #[test]
    fn duplicates_skip_and_gaps_fail() {
        let cursors = StreamCursors::new("test");
        let (t, a) = (TenantId::new(), AggregateId::new());

        assert_eq!(cursors.check(t, a, 1).unwrap(), CursorCheck::Apply);
        cursors.advance(t, a, 1);
        assert_eq!(cursors.check(t, a, 1).unwrap(), CursorCheck::Skip);
        assert_eq!(cursors.check(t, a, 2).unwrap(), CursorCheck::Apply);
        assert!(matches!(
            cursors.check(t, a, 5),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 5 })
        ));
        assert!(cursors.check(t, a, 0).is_err());
    }

    #[test]
    fn durable_cursors_survive_a_fresh_instance() {
        let store: Arc<dyn ProjectionCursorStore> = Arc::new(RecordingStore::default());
        let (t, a) = (TenantId::new(), AggregateId::new());

        StreamCursors::new("loans").with_store(store.clone()).advance(t, a, 3);

        let restarted = StreamCursors::new("loans").with_store(store.clone());
        assert_eq!(restarted.check(t, a, 3).unwrap(), CursorCheck::Skip);

        restarted.clear_tenant(t);
        assert_eq!(restarted.last(t, a), 0);
    }
}
