// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Remote endpoint abstraction.
//!
//! This module defines the abstract operations the engine issues against
//! the remote server and the out-of-band event channel the server answers
//! on. The actual wire protocol (COM/DCOM, RPC, loopback) lives entirely
//! behind [`RemoteEndpoint`]; the engine never sees it.
//!
//! Asynchronous operations are correlated by [`TransactionId`]: the engine
//! assigns one per request, hands it to `begin_*`, and the endpoint echoes
//! it back in the matching [`EndpointEvent`]. Transaction id zero is
//! reserved for unsolicited change batches.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opclink_core::{ItemErrorCode, Quality, Value};

use crate::browse::{BrowseElement, BrowseFilters, ContinuationToken};
use crate::error::DaResult;
use crate::types::{InternalHandle, ItemIdentity, RemoteHandle};

// =============================================================================
// TransactionId
// =============================================================================

/// Correlation key linking an asynchronous request to its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u32);

impl TransactionId {
    /// The reserved sentinel for unsolicited change batches.
    pub const DATA_CHANGE: TransactionId = TransactionId(0);

    /// Creates a transaction id.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns `true` if this is the unsolicited-change sentinel.
    #[inline]
    pub const fn is_data_change(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

// =============================================================================
// CancelToken
// =============================================================================

/// Opaque token the endpoint assigns to a cancelable in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CancelToken(pub u64);

impl CancelToken {
    /// Creates a cancel token.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancel-{}", self.0)
    }
}

// =============================================================================
// Per-Item Wire Records
// =============================================================================

/// Definition of an item as the endpoint sees it.
///
/// The engine substitutes its own [`InternalHandle`] for the caller's
/// handle, so the endpoint's callbacks can be resolved to engine-owned
/// records without trusting caller-supplied values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItemDef {
    /// Identity of the item.
    pub identity: ItemIdentity,

    /// The engine handle the endpoint must echo back in events.
    pub internal_handle: InternalHandle,

    /// Whether the item starts active.
    pub active: bool,
}

/// Per-item outcome of an add operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItemOutcome {
    /// The handle the endpoint assigned; absent if the add failed.
    pub remote_handle: Option<RemoteHandle>,

    /// The failure, if the add failed for this item.
    pub error: Option<ItemErrorCode>,
}

impl AddItemOutcome {
    /// Creates a successful outcome.
    pub fn success(remote_handle: RemoteHandle) -> Self {
        Self {
            remote_handle: Some(remote_handle),
            error: None,
        }
    }

    /// Creates a failed outcome.
    pub fn failure(error: ItemErrorCode) -> Self {
        Self {
            remote_handle: None,
            error: Some(error),
        }
    }

    /// Returns `true` if the add succeeded.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-item active-state change sent to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItemModification {
    /// The item to modify.
    pub remote_handle: RemoteHandle,

    /// New active state, when the modification carries one.
    pub active: Option<bool>,
}

/// Per-item result of a synchronous read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadValue {
    /// The value read; absent on failure.
    pub value: Option<Value>,

    /// Quality of the value; absent on failure.
    pub quality: Option<Quality>,

    /// Source timestamp of the value.
    pub timestamp: Option<DateTime<Utc>>,

    /// The failure, if the read failed for this item.
    pub error: Option<ItemErrorCode>,
}

impl ReadValue {
    /// Creates a successful read value.
    pub fn success(value: Value, quality: Quality, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            quality: Some(quality),
            timestamp: Some(timestamp),
            error: None,
        }
    }

    /// Creates a failed read value.
    pub fn failure(error: ItemErrorCode) -> Self {
        Self {
            value: None,
            quality: None,
            timestamp: None,
            error: Some(error),
        }
    }

    /// Returns `true` if the read succeeded.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a `begin_read`/`begin_write` initiating call: per-item
/// validation results plus the token a later cancel must reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginOutcome {
    /// Token for cancelling the in-flight operation.
    pub cancel_token: CancelToken,

    /// Per-item validation errors, in request order. `None` means the item
    /// passed validation and will appear in the completion event.
    pub errors: Vec<Option<ItemErrorCode>>,
}

// =============================================================================
// Events
// =============================================================================

/// Per-item payload of a data-bearing completion or change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCompletion {
    /// The engine handle the endpoint echoes back.
    pub handle: InternalHandle,

    /// The value; absent on per-item failure.
    pub value: Option<Value>,

    /// Quality of the value.
    pub quality: Option<Quality>,

    /// Source timestamp of the value.
    pub timestamp: Option<DateTime<Utc>>,

    /// Per-item failure.
    pub error: Option<ItemErrorCode>,
}

impl ItemCompletion {
    /// Creates a successful data completion.
    pub fn success(
        handle: InternalHandle,
        value: Value,
        quality: Quality,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            handle,
            value: Some(value),
            quality: Some(quality),
            timestamp: Some(timestamp),
            error: None,
        }
    }

    /// Creates a failed completion.
    pub fn failure(handle: InternalHandle, error: ItemErrorCode) -> Self {
        Self {
            handle,
            value: None,
            quality: None,
            timestamp: None,
            error: Some(error),
        }
    }
}

/// Per-item payload of a write completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCompletion {
    /// The engine handle the endpoint echoes back.
    pub handle: InternalHandle,

    /// Per-item failure; `None` means the write succeeded.
    pub error: Option<ItemErrorCode>,
}

/// An event delivered on the endpoint's out-of-band channel.
///
/// Exactly one logical delivery path exists per subscription; the engine's
/// event pump consumes these and resolves them against the request
/// registry (or, for unsolicited changes, fans them out to listeners).
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// An asynchronous read completed.
    ReadComplete {
        /// The transaction the completion belongs to.
        transaction: TransactionId,
        /// Per-item payloads for every item that passed validation.
        items: Vec<ItemCompletion>,
    },

    /// An asynchronous write completed.
    WriteComplete {
        /// The transaction the completion belongs to.
        transaction: TransactionId,
        /// Per-item payloads for every item that passed validation.
        items: Vec<WriteCompletion>,
    },

    /// A cancel request was honored.
    CancelComplete {
        /// The cancelled transaction.
        transaction: TransactionId,
    },

    /// A data change batch. With [`TransactionId::DATA_CHANGE`] this is an
    /// unsolicited change; with a live transaction id it completes a
    /// refresh request.
    DataChange {
        /// The refresh transaction, or the unsolicited sentinel.
        transaction: TransactionId,
        /// Per-item payloads.
        items: Vec<ItemCompletion>,
    },
}

impl EndpointEvent {
    /// Returns the transaction id the event carries.
    pub fn transaction(&self) -> TransactionId {
        match self {
            Self::ReadComplete { transaction, .. }
            | Self::WriteComplete { transaction, .. }
            | Self::CancelComplete { transaction }
            | Self::DataChange { transaction, .. } => *transaction,
        }
    }

    /// Returns a short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ReadComplete { .. } => "read_complete",
            Self::WriteComplete { .. } => "write_complete",
            Self::CancelComplete { .. } => "cancel_complete",
            Self::DataChange { .. } => "data_change",
        }
    }
}

// =============================================================================
// Browse Wire Records
// =============================================================================

/// One page of a remote browse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBrowsePage {
    /// Elements on this page.
    pub elements: Vec<BrowseElement>,

    /// `true` if the server holds further elements.
    pub more: bool,

    /// Token to resume with; absent when enumeration is exhausted.
    pub continuation: Option<ContinuationToken>,
}

// =============================================================================
// RemoteEndpoint Trait
// =============================================================================

/// Abstract remote operations the engine consumes.
///
/// Implementations handle marshaling and the actual transport; the engine
/// only sees these typed batches. All methods take `&self`: an endpoint is
/// shared by caller tasks and must be `Send + Sync`.
///
/// Events (completions, cancel acknowledgments, unsolicited changes) are
/// not returned from these methods; the endpoint delivers them on its own
/// channel, which the owner wires into the engine's event pump.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Returns `true` if the transport link is up.
    fn is_connected(&self) -> bool;

    /// Adds items to the server-side subscription.
    ///
    /// Returns one outcome per input, in input order.
    async fn add_items(&self, defs: &[RemoteItemDef]) -> DaResult<Vec<AddItemOutcome>>;

    /// Applies active-state changes to already-added items.
    ///
    /// Returns one optional error per input, in input order.
    async fn modify_items(
        &self,
        mods: &[RemoteItemModification],
    ) -> DaResult<Vec<Option<ItemErrorCode>>>;

    /// Removes items from the server-side subscription.
    ///
    /// Returns one optional error per input, in input order.
    async fn remove_items(&self, handles: &[RemoteHandle]) -> DaResult<Vec<Option<ItemErrorCode>>>;

    /// Reads item values synchronously.
    ///
    /// `max_age` has one entry per handle: how stale a cached value may be
    /// before the server must refetch from the device.
    async fn read_sync(
        &self,
        handles: &[RemoteHandle],
        max_age: &[Duration],
    ) -> DaResult<Vec<ReadValue>>;

    /// Writes item values synchronously.
    ///
    /// Returns one optional error per input, in input order.
    async fn write_sync(
        &self,
        handles: &[RemoteHandle],
        values: &[Value],
    ) -> DaResult<Vec<Option<ItemErrorCode>>>;

    /// Starts an asynchronous read correlated by `transaction`.
    async fn begin_read(
        &self,
        handles: &[RemoteHandle],
        max_age: &[Duration],
        transaction: TransactionId,
    ) -> DaResult<BeginOutcome>;

    /// Starts an asynchronous write correlated by `transaction`.
    async fn begin_write(
        &self,
        handles: &[RemoteHandle],
        values: &[Value],
        transaction: TransactionId,
    ) -> DaResult<BeginOutcome>;

    /// Starts an asynchronous refresh of every active item, correlated by
    /// `transaction`. The completion arrives as a
    /// [`EndpointEvent::DataChange`] bearing the transaction id.
    async fn begin_refresh(&self, transaction: TransactionId) -> DaResult<CancelToken>;

    /// Requests cancellation of an in-flight operation.
    ///
    /// Best effort: the endpoint answers with
    /// [`EndpointEvent::CancelComplete`] if the cancel wins the race.
    async fn cancel(&self, token: CancelToken) -> DaResult<()>;

    /// Browses the namespace under `origin`.
    ///
    /// Passing a continuation token resumes a prior enumeration.
    async fn browse(
        &self,
        origin: &ItemIdentity,
        continuation: Option<&ContinuationToken>,
        filters: &BrowseFilters,
    ) -> DaResult<RemoteBrowsePage>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_sentinel() {
        assert!(TransactionId::DATA_CHANGE.is_data_change());
        assert!(!TransactionId::new(1).is_data_change());
        assert_eq!(format!("{}", TransactionId::new(9)), "txn-9");
    }

    #[test]
    fn test_add_item_outcome() {
        let ok = AddItemOutcome::success(RemoteHandle::new(100));
        assert!(ok.is_ok());
        assert_eq!(ok.remote_handle, Some(RemoteHandle::new(100)));

        let failed = AddItemOutcome::failure(ItemErrorCode::UnknownItemName);
        assert!(!failed.is_ok());
        assert!(failed.remote_handle.is_none());
    }

    #[test]
    fn test_read_value_constructors() {
        let ok = ReadValue::success(Value::Float64(1.5), Quality::Good, Utc::now());
        assert!(ok.is_ok());
        assert_eq!(ok.value, Some(Value::Float64(1.5)));

        let failed = ReadValue::failure(ItemErrorCode::WriteOnly);
        assert!(!failed.is_ok());
        assert!(failed.value.is_none());
    }

    #[test]
    fn test_event_accessors() {
        let event = EndpointEvent::CancelComplete {
            transaction: TransactionId::new(5),
        };
        assert_eq!(event.transaction(), TransactionId::new(5));
        assert_eq!(event.kind_name(), "cancel_complete");

        let change = EndpointEvent::DataChange {
            transaction: TransactionId::DATA_CHANGE,
            items: vec![],
        };
        assert!(change.transaction().is_data_change());
    }
}
