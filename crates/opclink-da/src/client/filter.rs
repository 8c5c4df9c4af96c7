// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Result-field projection.
//!
//! One pure function decides which identity/time fields appear on a result
//! record. It is applied uniformly — synchronous results, asynchronous
//! initial acknowledgments, asynchronous completions, and unsolicited
//! change batches all pass through here — always with the mask current at
//! the moment of projection.

use crate::client::items::ItemRecord;
use crate::types::{ItemResult, ResultFieldMask};

/// Projects identity/time fields onto `result` according to `mask`.
///
/// `record` is the table entry the result's server handle resolved to, or
/// `None` on a miss. Hits contribute name, path, and caller handle as the
/// mask allows and pin the result's server handle to the record's internal
/// handle; misses clear all three identity fields. Without `ITEM_TIME` the
/// timestamp is cleared.
///
/// Projection is idempotent: fields are assigned absolutely, never
/// accumulated, so applying the same mask twice yields the same record.
pub(crate) fn project(mask: ResultFieldMask, record: Option<&ItemRecord>, result: &mut ItemResult) {
    match record {
        Some(record) => {
            result.item_name = mask
                .contains(ResultFieldMask::ITEM_NAME)
                .then(|| record.identity.name.clone());
            result.item_path = if mask.contains(ResultFieldMask::ITEM_PATH) {
                record.identity.path.clone()
            } else {
                None
            };
            result.client_handle = mask
                .contains(ResultFieldMask::CLIENT_HANDLE)
                .then_some(record.caller_handle);
            result.server_handle = Some(record.internal_handle);
        }
        None => {
            result.item_name = None;
            result.item_path = None;
            result.client_handle = None;
        }
    }

    if !mask.contains(ResultFieldMask::ITEM_TIME) {
        result.timestamp = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallerHandle, InternalHandle, ItemIdentity, RemoteHandle};

    use chrono::Utc;
    use opclink_core::{Quality, Value};

    fn sample_record() -> ItemRecord {
        ItemRecord::new(
            ItemIdentity::with_path("tag1", "plc1"),
            CallerHandle::new(42),
            InternalHandle::new(7),
            RemoteHandle::new(100),
        )
    }

    fn sample_result() -> ItemResult {
        ItemResult::for_handle(InternalHandle::new(7)).with_data(
            Value::Float64(21.5),
            Quality::Good,
            Some(Utc::now()),
        )
    }

    #[test]
    fn test_mask_all_populates_every_field() {
        let record = sample_record();
        let mut result = sample_result();
        project(ResultFieldMask::ALL, Some(&record), &mut result);

        assert_eq!(result.item_name.as_deref(), Some("tag1"));
        assert_eq!(result.item_path.as_deref(), Some("plc1"));
        assert_eq!(result.client_handle, Some(CallerHandle::new(42)));
        assert_eq!(result.server_handle, Some(InternalHandle::new(7)));
        assert!(result.timestamp.is_some());
        assert!(result.value.is_some());
    }

    #[test]
    fn test_mask_empty_leaves_only_value_and_error() {
        let record = sample_record();
        let mut result = sample_result();
        project(ResultFieldMask::empty(), Some(&record), &mut result);

        assert!(result.item_name.is_none());
        assert!(result.item_path.is_none());
        assert!(result.client_handle.is_none());
        assert!(result.timestamp.is_none());
        // Value, quality and error survive any mask.
        assert_eq!(result.value, Some(Value::Float64(21.5)));
        assert_eq!(result.quality, Some(Quality::Good));
    }

    #[test]
    fn test_projection_is_idempotent() {
        // Same mask, same input, identical output on reapplication.
        let record = sample_record();
        for mask in [
            ResultFieldMask::ALL,
            ResultFieldMask::MINIMAL,
            ResultFieldMask::ITEM_TIME,
            ResultFieldMask::empty(),
        ] {
            let mut once = sample_result();
            project(mask, Some(&record), &mut once);
            let mut twice = once.clone();
            project(mask, Some(&record), &mut twice);
            assert_eq!(once, twice, "mask {:?} not idempotent", mask);
        }
    }

    #[test]
    fn test_lookup_miss_clears_identity() {
        let mut result = sample_result();
        result.item_name = Some("stale".into());
        result.client_handle = Some(CallerHandle::new(9));
        project(ResultFieldMask::ALL, None, &mut result);

        assert!(result.item_name.is_none());
        assert!(result.client_handle.is_none());
        // The carried handle is untouched; the caller may still need it.
        assert_eq!(result.server_handle, Some(InternalHandle::new(7)));
        // ITEM_TIME was set, so the timestamp survives the miss.
        assert!(result.timestamp.is_some());
    }

    #[test]
    fn test_path_requires_both_bit_and_record_path() {
        let record = ItemRecord::new(
            ItemIdentity::new("pathless"),
            CallerHandle::new(1),
            InternalHandle::new(2),
            RemoteHandle::new(3),
        );
        let mut result = ItemResult::for_handle(InternalHandle::new(2));
        project(ResultFieldMask::ALL, Some(&record), &mut result);
        assert!(result.item_path.is_none());
    }
}
