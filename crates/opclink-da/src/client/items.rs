// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Item records and the handle-translation table.
//!
//! Every item added to a subscription lives in exactly one [`ItemTable`],
//! keyed by its engine-assigned [`InternalHandle`]. The table translates
//! between the three handle spaces:
//!
//! - the caller's opaque handle, stored and echoed back on results,
//! - the internal handle the engine substitutes on the wire (and which
//!   callers pass back as the opaque "server handle" of a prior result),
//! - the remote handle the endpoint assigned, required for every
//!   subsequent call referencing the item.
//!
//! Lookups never fail hard: a miss degrades to a placeholder record with a
//! sentinel remote handle the endpoint cannot know, so the remote call
//! fails per-item instead of the whole batch erroring out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::client::filter;
use crate::types::{
    CallerHandle, InternalHandle, ItemIdentity, ItemResult, RemoteHandle, ResultFieldMask,
};

// =============================================================================
// ItemRecord
// =============================================================================

/// One live item: its identity and the three-handle relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    /// Identity of the item in the server namespace.
    pub identity: ItemIdentity,

    /// The caller's opaque handle.
    pub caller_handle: CallerHandle,

    /// The engine's handle; the table key.
    pub internal_handle: InternalHandle,

    /// The endpoint's handle; `None` never occurs for registered records
    /// (only successful adds are registered) but placeholders carry the
    /// sentinel here.
    pub remote_handle: Option<RemoteHandle>,
}

impl ItemRecord {
    /// Creates a record for a successfully added item.
    pub fn new(
        identity: ItemIdentity,
        caller_handle: CallerHandle,
        internal_handle: InternalHandle,
        remote_handle: RemoteHandle,
    ) -> Self {
        Self {
            identity,
            caller_handle,
            internal_handle,
            remote_handle: Some(remote_handle),
        }
    }

    /// Record synthesized for an unknown handle, carrying a remote handle
    /// the endpoint cannot be using so the call fails per-item.
    pub(crate) fn placeholder(internal_handle: InternalHandle, sentinel: RemoteHandle) -> Self {
        Self {
            identity: ItemIdentity::unknown(),
            caller_handle: CallerHandle::new(0),
            internal_handle,
            remote_handle: Some(sentinel),
        }
    }

    /// Returns the remote handle, falling back to `sentinel`.
    #[inline]
    pub fn remote_or(&self, sentinel: RemoteHandle) -> RemoteHandle {
        self.remote_handle.unwrap_or(sentinel)
    }
}

// =============================================================================
// ItemTable
// =============================================================================

/// The handle-translation table of one subscription.
///
/// Mutated from caller tasks (add/modify/remove) and read from the event
/// delivery path (filter projection); every access takes the table lock.
/// Internal handles come from a monotone counter and are never reused while
/// the process lives, so no two live records can share one.
#[derive(Debug)]
pub struct ItemTable {
    /// Live records keyed by internal handle.
    records: RwLock<HashMap<InternalHandle, ItemRecord>>,

    /// Next internal handle to hand out.
    next_internal: AtomicU64,

    /// Highest remote handle ever observed; the sentinel is one above it.
    max_remote_seen: AtomicU64,
}

impl ItemTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_internal: AtomicU64::new(1),
            max_remote_seen: AtomicU64::new(0),
        }
    }

    /// Allocates a fresh internal handle.
    pub fn allocate_internal(&self) -> InternalHandle {
        InternalHandle::new(self.next_internal.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns a remote handle the endpoint cannot already be using, even
    /// before any items exist.
    pub fn sentinel_remote_handle(&self) -> RemoteHandle {
        RemoteHandle::new(self.max_remote_seen.load(Ordering::Relaxed) + 1)
    }

    /// Inserts (or overwrites) a record under its internal handle.
    pub fn register(&self, record: ItemRecord) {
        if let Some(remote) = record.remote_handle {
            self.max_remote_seen.fetch_max(remote.value(), Ordering::Relaxed);
        }
        self.records.write().insert(record.internal_handle, record);
    }

    /// Removes the record for `handle`. Idempotent.
    pub fn unregister(&self, handle: InternalHandle) -> Option<ItemRecord> {
        self.records.write().remove(&handle)
    }

    /// Returns a copy of the record for `handle`.
    pub fn get(&self, handle: InternalHandle) -> Option<ItemRecord> {
        self.records.read().get(&handle).cloned()
    }

    /// Resolves caller-supplied handles into records for a remote call.
    ///
    /// Unknown handles produce placeholder records carrying the sentinel
    /// remote handle; the round trip still happens and the caller receives
    /// a per-item error rather than a thrown one.
    pub fn resolve_for_call(&self, handles: &[InternalHandle]) -> Vec<ItemRecord> {
        let sentinel = self.sentinel_remote_handle();
        let records = self.records.read();
        handles
            .iter()
            .map(|handle| {
                records
                    .get(handle)
                    .cloned()
                    .unwrap_or_else(|| ItemRecord::placeholder(*handle, sentinel))
            })
            .collect()
    }

    /// Replaces the caller handle stored for `handle`, if the item is live.
    pub fn set_caller_handle(&self, handle: InternalHandle, caller: CallerHandle) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&handle) {
            Some(record) => {
                record.caller_handle = caller;
                true
            }
            None => false,
        }
    }

    /// Projects identity/time fields onto `results` per `mask`.
    ///
    /// Each result's carried server handle is looked up; hits contribute
    /// name/path/caller-handle as the mask allows, misses clear those
    /// fields. The timestamp survives only with `ITEM_TIME` set.
    pub fn apply_filter(&self, mask: ResultFieldMask, results: &mut [ItemResult]) {
        let records = self.records.read();
        for result in results.iter_mut() {
            let record = result.server_handle.and_then(|h| records.get(&h));
            filter::project(mask, record, result);
        }
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if no items are live.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns a snapshot of all live records.
    pub fn snapshot(&self) -> Vec<ItemRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(table: &ItemTable, name: &str, caller: u64, remote: u64) -> ItemRecord {
        ItemRecord::new(
            ItemIdentity::new(name),
            CallerHandle::new(caller),
            table.allocate_internal(),
            RemoteHandle::new(remote),
        )
    }

    #[test]
    fn test_allocate_internal_is_monotone() {
        let table = ItemTable::new();
        let a = table.allocate_internal();
        let b = table.allocate_internal();
        let c = table.allocate_internal();
        assert!(a.value() < b.value());
        assert!(b.value() < c.value());
    }

    #[test]
    fn test_internal_handles_unique_across_churn() {
        // No two live records ever share an internal handle, even
        // after heavy add/remove cycling.
        let table = ItemTable::new();
        let mut seen = std::collections::HashSet::new();
        for round in 0..10 {
            let rec = record(&table, &format!("tag{}", round), round, 100 + round);
            assert!(seen.insert(rec.internal_handle));
            table.register(rec.clone());
            if round % 2 == 0 {
                table.unregister(rec.internal_handle);
            }
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let table = ItemTable::new();
        let rec = record(&table, "tag1", 1, 100);
        let handle = rec.internal_handle;

        table.register(rec.clone());
        assert_eq!(table.get(handle), Some(rec));
        assert_eq!(table.len(), 1);

        assert!(table.unregister(handle).is_some());
        // Idempotent
        assert!(table.unregister(handle).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_sentinel_exceeds_observed_remote_handles() {
        let table = ItemTable::new();
        assert_eq!(table.sentinel_remote_handle(), RemoteHandle::new(1));

        table.register(record(&table, "tag1", 1, 500));
        table.register(record(&table, "tag2", 2, 120));
        assert_eq!(table.sentinel_remote_handle(), RemoteHandle::new(501));

        // Removal does not lower the sentinel; the server may still know
        // the old handle.
        let snapshot = table.snapshot();
        for rec in snapshot {
            table.unregister(rec.internal_handle);
        }
        assert_eq!(table.sentinel_remote_handle(), RemoteHandle::new(501));
    }

    #[test]
    fn test_resolve_for_call_misses_become_placeholders() {
        let table = ItemTable::new();
        let rec = record(&table, "tag1", 1, 100);
        let live = rec.internal_handle;
        table.register(rec);

        let missing = InternalHandle::new(9999);
        let resolved = table.resolve_for_call(&[live, missing]);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].identity.name, "tag1");
        assert_eq!(resolved[0].remote_handle, Some(RemoteHandle::new(100)));

        assert!(resolved[1].identity.is_empty());
        assert_eq!(resolved[1].internal_handle, missing);
        // Placeholder carries a handle above anything the endpoint issued.
        assert_eq!(resolved[1].remote_handle, Some(RemoteHandle::new(101)));
    }

    #[test]
    fn test_set_caller_handle() {
        let table = ItemTable::new();
        let rec = record(&table, "tag1", 1, 100);
        let handle = rec.internal_handle;
        table.register(rec);

        assert!(table.set_caller_handle(handle, CallerHandle::new(77)));
        assert_eq!(table.get(handle).unwrap().caller_handle, CallerHandle::new(77));

        assert!(!table.set_caller_handle(InternalHandle::new(424242), CallerHandle::new(1)));
    }

    #[test]
    fn test_apply_filter_uses_live_records() {
        let table = ItemTable::new();
        let rec = ItemRecord::new(
            ItemIdentity::with_path("tag1", "plc1"),
            CallerHandle::new(11),
            table.allocate_internal(),
            RemoteHandle::new(100),
        );
        let handle = rec.internal_handle;
        table.register(rec);

        let mut results = vec![
            ItemResult::for_handle(handle),
            ItemResult::for_handle(InternalHandle::new(555)),
        ];
        table.apply_filter(ResultFieldMask::ALL, &mut results);

        assert_eq!(results[0].item_name.as_deref(), Some("tag1"));
        assert_eq!(results[0].item_path.as_deref(), Some("plc1"));
        assert_eq!(results[0].client_handle, Some(CallerHandle::new(11)));
        assert_eq!(results[0].server_handle, Some(handle));

        // The miss keeps its handle but gains no identity.
        assert!(results[1].item_name.is_none());
        assert!(results[1].client_handle.is_none());
        assert_eq!(results[1].server_handle, Some(InternalHandle::new(555)));
    }
}
