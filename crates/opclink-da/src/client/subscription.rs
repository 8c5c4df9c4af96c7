// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The subscription engine façade.
//!
//! One [`SubscriptionEngine`] owns one server-side subscription: its item
//! table, its request registry, its result-field filter, and its change
//! listeners. Callers use it from any task; the endpoint's event channel
//! feeds [`SubscriptionEngine::handle_event`] (usually through
//! [`SubscriptionEngine::spawn_event_pump`]) as the single logical
//! delivery path.
//!
//! # Failure semantics
//!
//! - No transport link: the operation returns `NotConnected`.
//! - Per-item failures: error codes on the result entries, never `Err`.
//! - Bad arguments: immediate `ArgumentError`, before any transport call.
//! - Cancel racing a natural completion: quiet no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use opclink_da::client::SubscriptionEngine;
//! use opclink_da::types::{CallerHandle, DaClientConfig, ItemDef};
//!
//! let config = DaClientConfig::builder()
//!     .server_url("opcda://plant-server/OPC.Sim.1")
//!     .build()?;
//! let engine = Arc::new(SubscriptionEngine::new(endpoint, config));
//! engine.spawn_event_pump(events);
//!
//! let added = engine
//!     .add_items(&[ItemDef::new("Line1.Temperature", CallerHandle::new(1))])
//!     .await?;
//! let handle = added[0].server_handle.unwrap();
//! let values = engine.read(&[handle], Duration::ZERO).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use opclink_core::Value;

use crate::browse::{BrowseCursor, BrowseFilters, BrowsePage};
use crate::client::filter;
use crate::client::items::{ItemRecord, ItemTable};
use crate::client::remote::{
    EndpointEvent, ItemCompletion, RemoteEndpoint, RemoteItemDef, RemoteItemModification,
    TransactionId,
};
use crate::client::request::{
    CancelDisposition, CompletionCallback, CompletionDisposition, InitialDisposition,
    PendingRequest, RequestHandle, RequestKind, RequestRegistry,
};
use crate::error::{ArgumentError, DaError, DaResult, OperationError};
use crate::types::{
    CallerHandle, DaClientConfig, InternalHandle, ItemDef, ItemIdentity, ItemModification,
    ItemResult, ModifyMask, ResultFieldMask, SubscriptionSettings,
};

// =============================================================================
// ListenerId
// =============================================================================

/// Identifier of a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// =============================================================================
// ChangeListener
// =============================================================================

/// Receives filtered unsolicited change batches.
///
/// Batches arrive in the order the endpoint emitted them; the engine never
/// reorders or coalesces.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    /// Called for every unsolicited change batch while delivery is enabled.
    async fn on_change(&self, batch: Vec<ItemResult>);
}

/// A channel-backed listener.
pub struct ChannelListener {
    sender: mpsc::Sender<Vec<ItemResult>>,
}

impl ChannelListener {
    /// Creates a listener forwarding into `sender`.
    pub fn new(sender: mpsc::Sender<Vec<ItemResult>>) -> Self {
        Self { sender }
    }

    /// Creates a listener together with its receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<ItemResult>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ChangeListener for ChannelListener {
    async fn on_change(&self, batch: Vec<ItemResult>) {
        // Best effort; a gone receiver is not the engine's problem.
        let _ = self.sender.send(batch).await;
    }
}

/// A broadcast-backed listener for multiple receivers.
pub struct BroadcastListener {
    sender: broadcast::Sender<Vec<ItemResult>>,
}

impl BroadcastListener {
    /// Creates a broadcast listener with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ItemResult>> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ChangeListener for BroadcastListener {
    async fn on_change(&self, batch: Vec<ItemResult>) {
        // No receivers is fine.
        let _ = self.sender.send(batch);
    }
}

// =============================================================================
// EngineStats
// =============================================================================

/// Counters for one engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    items_added: AtomicU64,
    sync_reads: AtomicU64,
    sync_writes: AtomicU64,
    requests_issued: AtomicU64,
    completions_delivered: AtomicU64,
    cancels_completed: AtomicU64,
    change_batches: AtomicU64,
    stale_events: AtomicU64,
}

impl EngineStats {
    fn new() -> Self {
        Self::default()
    }

    /// Total items successfully added.
    pub fn items_added(&self) -> u64 {
        self.items_added.load(Ordering::Relaxed)
    }

    /// Total synchronous reads issued.
    pub fn sync_reads(&self) -> u64 {
        self.sync_reads.load(Ordering::Relaxed)
    }

    /// Total synchronous writes issued.
    pub fn sync_writes(&self) -> u64 {
        self.sync_writes.load(Ordering::Relaxed)
    }

    /// Total asynchronous requests issued.
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }

    /// Total asynchronous completions delivered to continuations.
    pub fn completions_delivered(&self) -> u64 {
        self.completions_delivered.load(Ordering::Relaxed)
    }

    /// Total cancellations completed.
    pub fn cancels_completed(&self) -> u64 {
        self.cancels_completed.load(Ordering::Relaxed)
    }

    /// Total unsolicited change batches dispatched.
    pub fn change_batches(&self) -> u64 {
        self.change_batches.load(Ordering::Relaxed)
    }

    /// Total events dropped as stale or unmatched.
    pub fn stale_events(&self) -> u64 {
        self.stale_events.load(Ordering::Relaxed)
    }
}

// =============================================================================
// SubscriptionEngine
// =============================================================================

/// The caller-facing engine for one subscription.
pub struct SubscriptionEngine {
    /// Abstract remote operations.
    endpoint: Arc<dyn RemoteEndpoint>,

    /// Client configuration captured at construction.
    config: DaClientConfig,

    /// Handle-translation table.
    items: ItemTable,

    /// In-flight asynchronous requests.
    registry: RequestRegistry,

    /// Current result-field filter.
    filter_mask: RwLock<ResultFieldMask>,

    /// Whether unsolicited change batches are delivered.
    enabled: AtomicBool,

    /// Registered change listeners.
    listeners: RwLock<HashMap<ListenerId, Arc<dyn ChangeListener>>>,

    /// Next listener id.
    next_listener: AtomicU64,

    /// Change delivery armed (lazily, on first listener or async call).
    advised: AtomicBool,

    /// Engine disposed; terminal.
    disposed: AtomicBool,

    /// Counters.
    stats: EngineStats,
}

impl SubscriptionEngine {
    /// Creates an engine over `endpoint` with `config`.
    pub fn new(endpoint: Arc<dyn RemoteEndpoint>, config: DaClientConfig) -> Self {
        let enabled = config.subscription.active;
        let filter_mask = config.result_filter;
        Self {
            endpoint,
            config,
            items: ItemTable::new(),
            registry: RequestRegistry::new(),
            filter_mask: RwLock::new(filter_mask),
            enabled: AtomicBool::new(enabled),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            advised: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            stats: EngineStats::new(),
        }
    }

    /// Spawns the event pump consuming the endpoint's event channel.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<EndpointEvent>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                engine.handle_event(event).await;
            }
            tracing::debug!("endpoint event channel closed");
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the subscription settings captured at construction.
    pub fn settings(&self) -> &SubscriptionSettings {
        &self.config.subscription
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &DaClientConfig {
        &self.config
    }

    /// Returns the current result-field filter.
    pub fn result_filter(&self) -> ResultFieldMask {
        *self.filter_mask.read()
    }

    /// Replaces the result-field filter.
    ///
    /// Takes effect for every projection from this moment on, including
    /// completions of requests issued under the previous mask.
    pub fn set_result_filter(&self, mask: ResultFieldMask) {
        *self.filter_mask.write() = mask;
    }

    /// Returns `true` if unsolicited change delivery is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enables or disables unsolicited change delivery; returns the
    /// previous state.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    /// Returns the number of live items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the engine counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Returns `true` if the engine has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> DaResult<()> {
        if self.is_disposed() {
            return Err(DaError::operation(OperationError::Disposed));
        }
        if !self.endpoint.is_connected() {
            return Err(DaError::not_connected());
        }
        Ok(())
    }

    fn arm_delivery(&self) {
        if !self.advised.swap(true, Ordering::SeqCst) {
            tracing::debug!("change delivery armed");
        }
    }

    fn disarm_delivery(&self) {
        if self.advised.swap(false, Ordering::SeqCst) {
            tracing::debug!("change delivery disarmed");
        }
    }

    // =========================================================================
    // Item Management
    // =========================================================================

    /// Adds items to the subscription.
    ///
    /// Successful items are registered in the table and their results
    /// expose the engine handle to use in subsequent calls. Failed items
    /// carry their error and — regardless of the filter — the caller
    /// handle, so the caller can identify which input failed.
    ///
    /// # Errors
    ///
    /// `ArgumentError` for an empty batch; connection errors if the link
    /// is absent or the call itself fails.
    pub async fn add_items(&self, defs: &[ItemDef]) -> DaResult<Vec<ItemResult>> {
        if defs.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        self.ensure_usable()?;

        let internals: Vec<InternalHandle> =
            defs.iter().map(|_| self.items.allocate_internal()).collect();
        let remote_defs: Vec<RemoteItemDef> = defs
            .iter()
            .zip(&internals)
            .map(|(def, internal)| RemoteItemDef {
                identity: def.identity.clone(),
                internal_handle: *internal,
                active: def.active,
            })
            .collect();

        let outcomes = self.endpoint.add_items(&remote_defs).await?;
        if outcomes.len() != defs.len() {
            return Err(DaError::operation(OperationError::malformed(
                "add_items",
                defs.len(),
                outcomes.len(),
            )));
        }

        let mask = self.result_filter();
        let mut results = Vec::with_capacity(defs.len());
        let mut added = 0u64;

        for ((def, internal), outcome) in defs.iter().zip(&internals).zip(&outcomes) {
            let mut result = ItemResult::for_handle(*internal);
            match (outcome.remote_handle, outcome.error) {
                (Some(remote), None) => {
                    let record = ItemRecord::new(
                        def.identity.clone(),
                        def.caller_handle,
                        *internal,
                        remote,
                    );
                    filter::project(mask, Some(&record), &mut result);
                    self.items.register(record);
                    added += 1;
                }
                (_, error) => {
                    // Not registered; project identity from the definition
                    // and force the caller handle visible.
                    let transient = ItemRecord {
                        identity: def.identity.clone(),
                        caller_handle: def.caller_handle,
                        internal_handle: *internal,
                        remote_handle: None,
                    };
                    filter::project(
                        mask | ResultFieldMask::CLIENT_HANDLE,
                        Some(&transient),
                        &mut result,
                    );
                    result.server_handle = None;
                    result.error = error.or(Some(opclink_core::ItemErrorCode::Rejected));
                }
            }
            results.push(result);
        }

        self.stats.items_added.fetch_add(added, Ordering::Relaxed);
        tracing::debug!(
            requested = defs.len(),
            added,
            subscription = self.config.subscription.name.as_deref().unwrap_or(""),
            "items added"
        );
        Ok(results)
    }

    /// Modifies already-added items.
    ///
    /// `mask` selects which fields of each modification apply. Caller
    /// handles change locally; active-state changes go to the endpoint.
    pub async fn modify_items(
        &self,
        mask: ModifyMask,
        mods: &[ItemModification],
    ) -> DaResult<Vec<ItemResult>> {
        if mods.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        if mask.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "mask",
                "no fields selected",
            )));
        }
        self.ensure_usable()?;

        let handles: Vec<InternalHandle> = mods.iter().map(|m| m.server_handle).collect();
        let records = self.items.resolve_for_call(&handles);
        let sentinel = self.items.sentinel_remote_handle();

        let remote_mods: Vec<RemoteItemModification> = records
            .iter()
            .zip(mods)
            .map(|(record, m)| RemoteItemModification {
                remote_handle: record.remote_or(sentinel),
                active: if mask.contains(ModifyMask::ACTIVE) {
                    m.active
                } else {
                    None
                },
            })
            .collect();

        let errors = self.endpoint.modify_items(&remote_mods).await?;
        if errors.len() != mods.len() {
            return Err(DaError::operation(OperationError::malformed(
                "modify_items",
                mods.len(),
                errors.len(),
            )));
        }

        for (m, error) in mods.iter().zip(&errors) {
            if error.is_none() && mask.contains(ModifyMask::CLIENT_HANDLE) {
                if let Some(caller) = m.caller_handle {
                    self.items.set_caller_handle(m.server_handle, caller);
                }
            }
        }

        let mut results: Vec<ItemResult> = mods
            .iter()
            .zip(&errors)
            .map(|(m, error)| {
                let mut result = ItemResult::for_handle(m.server_handle);
                result.error = *error;
                result
            })
            .collect();
        self.items.apply_filter(self.result_filter(), &mut results);
        Ok(results)
    }

    /// Removes items from the subscription.
    ///
    /// Successfully removed items are unregistered; their handles go stale
    /// and later calls referencing them fail per-item.
    pub async fn remove_items(&self, handles: &[InternalHandle]) -> DaResult<Vec<ItemResult>> {
        if handles.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        self.ensure_usable()?;

        let records = self.items.resolve_for_call(handles);
        let sentinel = self.items.sentinel_remote_handle();
        let remote_handles: Vec<_> = records.iter().map(|r| r.remote_or(sentinel)).collect();

        let errors = self.endpoint.remove_items(&remote_handles).await?;
        if errors.len() != handles.len() {
            return Err(DaError::operation(OperationError::malformed(
                "remove_items",
                handles.len(),
                errors.len(),
            )));
        }

        let mut results: Vec<ItemResult> = handles
            .iter()
            .zip(&errors)
            .map(|(handle, error)| {
                let mut result = ItemResult::for_handle(*handle);
                result.error = *error;
                result
            })
            .collect();
        // Project while the records are still live, then drop them.
        self.items.apply_filter(self.result_filter(), &mut results);
        for (handle, error) in handles.iter().zip(&errors) {
            if error.is_none() {
                self.items.unregister(*handle);
            }
        }
        Ok(results)
    }

    // =========================================================================
    // Synchronous IO
    // =========================================================================

    /// Reads item values, blocking the caller for the round trip.
    ///
    /// `max_age` bounds how stale a server-cached value may be.
    pub async fn read(
        &self,
        handles: &[InternalHandle],
        max_age: Duration,
    ) -> DaResult<Vec<ItemResult>> {
        if handles.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        self.ensure_usable()?;

        let records = self.items.resolve_for_call(handles);
        let sentinel = self.items.sentinel_remote_handle();
        let remote_handles: Vec<_> = records.iter().map(|r| r.remote_or(sentinel)).collect();
        let max_ages = vec![max_age; handles.len()];

        let values = self.endpoint.read_sync(&remote_handles, &max_ages).await?;
        if values.len() != handles.len() {
            return Err(DaError::operation(OperationError::malformed(
                "read_sync",
                handles.len(),
                values.len(),
            )));
        }

        let mut results: Vec<ItemResult> = handles
            .iter()
            .zip(values)
            .map(|(handle, value)| ItemResult {
                server_handle: Some(*handle),
                value: value.value,
                quality: value.quality,
                timestamp: value.timestamp,
                error: value.error,
                ..ItemResult::default()
            })
            .collect();
        self.items.apply_filter(self.result_filter(), &mut results);
        self.stats.sync_reads.fetch_add(1, Ordering::Relaxed);
        Ok(results)
    }

    /// Writes item values, blocking the caller for the round trip.
    pub async fn write(
        &self,
        handles: &[InternalHandle],
        values: &[Value],
    ) -> DaResult<Vec<ItemResult>> {
        if handles.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        if handles.len() != values.len() {
            return Err(DaError::argument(ArgumentError::length_mismatch(
                "items",
                handles.len(),
                "values",
                values.len(),
            )));
        }
        self.ensure_usable()?;

        let records = self.items.resolve_for_call(handles);
        let sentinel = self.items.sentinel_remote_handle();
        let remote_handles: Vec<_> = records.iter().map(|r| r.remote_or(sentinel)).collect();

        let errors = self.endpoint.write_sync(&remote_handles, values).await?;
        if errors.len() != handles.len() {
            return Err(DaError::operation(OperationError::malformed(
                "write_sync",
                handles.len(),
                errors.len(),
            )));
        }

        let mut results: Vec<ItemResult> = handles
            .iter()
            .zip(&errors)
            .map(|(handle, error)| {
                let mut result = ItemResult::for_handle(*handle);
                result.error = *error;
                result
            })
            .collect();
        self.items.apply_filter(self.result_filter(), &mut results);
        self.stats.sync_writes.fetch_add(1, Ordering::Relaxed);
        Ok(results)
    }

    // =========================================================================
    // Asynchronous IO
    // =========================================================================

    /// Starts an asynchronous read.
    ///
    /// Returns the per-item validation results and — unless every item
    /// failed validation, in which case `on_complete` has already fired
    /// with those results and there is nothing to cancel — a handle for
    /// [`cancel`](Self::cancel). `on_complete` fires exactly once.
    pub async fn read_async(
        &self,
        handles: &[InternalHandle],
        max_age: Duration,
        cookie: CallerHandle,
        on_complete: impl FnOnce(Vec<ItemResult>) + Send + 'static,
    ) -> DaResult<(Vec<ItemResult>, Option<RequestHandle>)> {
        if handles.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        self.ensure_usable()?;
        self.arm_delivery();

        let records = self.items.resolve_for_call(handles);
        let sentinel = self.items.sentinel_remote_handle();
        let remote_handles: Vec<_> = records.iter().map(|r| r.remote_or(sentinel)).collect();
        let max_ages = vec![max_age; handles.len()];

        let transaction = self.registry.allocate_transaction();
        let request = Arc::new(PendingRequest::new(
            transaction,
            RequestKind::Read,
            cookie,
            self.result_filter(),
            CompletionCallback::Read(Box::new(on_complete)),
        ));
        // Registered before the outbound call returns: the completion
        // event may race ahead of the return value.
        self.registry.insert(Arc::clone(&request))?;

        let outcome = match self
            .endpoint
            .begin_read(&remote_handles, &max_ages, transaction)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                self.registry.remove(transaction);
                return Err(error);
            }
        };
        if outcome.errors.len() != handles.len() {
            self.registry.remove(transaction);
            return Err(DaError::operation(OperationError::malformed(
                "begin_read",
                handles.len(),
                outcome.errors.len(),
            )));
        }

        self.stats.requests_issued.fetch_add(1, Ordering::Relaxed);
        self.finish_issue(request, records, outcome.errors, outcome.cancel_token)
    }

    /// Starts an asynchronous write.
    ///
    /// Same contract as [`read_async`](Self::read_async).
    pub async fn write_async(
        &self,
        handles: &[InternalHandle],
        values: &[Value],
        cookie: CallerHandle,
        on_complete: impl FnOnce(Vec<ItemResult>) + Send + 'static,
    ) -> DaResult<(Vec<ItemResult>, Option<RequestHandle>)> {
        if handles.is_empty() {
            return Err(DaError::argument(ArgumentError::invalid(
                "items",
                "must not be empty",
            )));
        }
        if handles.len() != values.len() {
            return Err(DaError::argument(ArgumentError::length_mismatch(
                "items",
                handles.len(),
                "values",
                values.len(),
            )));
        }
        self.ensure_usable()?;
        self.arm_delivery();

        let records = self.items.resolve_for_call(handles);
        let sentinel = self.items.sentinel_remote_handle();
        let remote_handles: Vec<_> = records.iter().map(|r| r.remote_or(sentinel)).collect();

        let transaction = self.registry.allocate_transaction();
        let request = Arc::new(PendingRequest::new(
            transaction,
            RequestKind::Write,
            cookie,
            self.result_filter(),
            CompletionCallback::Write(Box::new(on_complete)),
        ));
        self.registry.insert(Arc::clone(&request))?;

        let outcome = match self
            .endpoint
            .begin_write(&remote_handles, values, transaction)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                self.registry.remove(transaction);
                return Err(error);
            }
        };
        if outcome.errors.len() != handles.len() {
            self.registry.remove(transaction);
            return Err(DaError::operation(OperationError::malformed(
                "begin_write",
                handles.len(),
                outcome.errors.len(),
            )));
        }

        self.stats.requests_issued.fetch_add(1, Ordering::Relaxed);
        self.finish_issue(request, records, outcome.errors, outcome.cancel_token)
    }

    /// Starts an asynchronous refresh of every active item.
    ///
    /// There is no validation half; the completion arrives as a data
    /// change batch bearing the refresh transaction id.
    pub async fn refresh_async(
        &self,
        cookie: CallerHandle,
        on_complete: impl FnOnce(Vec<ItemResult>) + Send + 'static,
    ) -> DaResult<RequestHandle> {
        self.ensure_usable()?;
        self.arm_delivery();

        let transaction = self.registry.allocate_transaction();
        let request = Arc::new(PendingRequest::new(
            transaction,
            RequestKind::Refresh,
            cookie,
            self.result_filter(),
            CompletionCallback::Read(Box::new(on_complete)),
        ));
        self.registry.insert(Arc::clone(&request))?;

        let token = match self.endpoint.begin_refresh(transaction).await {
            Ok(token) => token,
            Err(error) => {
                self.registry.remove(transaction);
                return Err(error);
            }
        };

        self.stats.requests_issued.fetch_add(1, Ordering::Relaxed);
        if request.note_refresh_token(token) == InitialDisposition::AlreadyCompleted {
            self.registry.remove(transaction);
        }
        Ok(RequestHandle::new(transaction))
    }

    /// Common tail of `read_async`/`write_async`: build and filter the
    /// validation results, resolve the all-invalid fast path, or park the
    /// request for its completion event.
    fn finish_issue(
        &self,
        request: Arc<PendingRequest>,
        records: Vec<ItemRecord>,
        errors: Vec<Option<opclink_core::ItemErrorCode>>,
        cancel_token: crate::client::remote::CancelToken,
    ) -> DaResult<(Vec<ItemResult>, Option<RequestHandle>)> {
        let transaction = request.transaction();
        let mask = request.issued_mask();

        let mut initial = Vec::with_capacity(records.len());
        for (record, error) in records.iter().zip(&errors) {
            let mut result = ItemResult::for_handle(record.internal_handle);
            result.error = *error;
            let looked_up = self.items.get(record.internal_handle);
            filter::project(mask, looked_up.as_ref(), &mut result);
            initial.push(result);
        }

        if errors.iter().all(Option::is_some) {
            // No item can ever produce a completion event; resolve on the
            // issuing task.
            self.registry.remove(transaction);
            if let Some(callback) = request.resolve_all_invalid() {
                let results = initial.clone();
                match callback {
                    CompletionCallback::Read(cb) => cb(results),
                    CompletionCallback::Write(cb) => cb(results),
                    CompletionCallback::Cancel(cb) => cb(RequestHandle::new(transaction)),
                }
                self.stats
                    .completions_delivered
                    .fetch_add(1, Ordering::Relaxed);
            }
            return Ok((initial, None));
        }

        match request.note_initial(initial.clone(), cancel_token) {
            InitialDisposition::AwaitingCompletion => {}
            InitialDisposition::AlreadyCompleted => {
                // The event outran us and already fired the continuation;
                // only this bookkeeping remained.
                self.registry.remove(transaction);
            }
        }
        Ok((initial, Some(RequestHandle::new(transaction))))
    }

    /// Cancels an in-flight asynchronous request.
    ///
    /// Best effort and racy by design: a cancel losing the race to the
    /// natural completion returns `Ok(false)` quietly, and `on_cancelled`
    /// never fires. `Ok(true)` means the cancel was forwarded; the
    /// cancellation continuation fires when the endpoint acknowledges.
    pub async fn cancel(
        &self,
        handle: RequestHandle,
        on_cancelled: impl FnOnce(RequestHandle) + Send + 'static,
    ) -> DaResult<bool> {
        let transaction = handle.transaction();
        let Some(request) = self.registry.lookup(transaction) else {
            // Already completed naturally; not an error.
            return Ok(false);
        };

        match request.request_cancel(Box::new(on_cancelled)) {
            CancelDisposition::AlreadyCompleted => Ok(false),
            CancelDisposition::Forward(token) => {
                match token {
                    Some(token) => self.endpoint.cancel(token).await?,
                    // Unreachable through the public API: the handle only
                    // exists once the initiating call recorded the token.
                    None => tracing::debug!(%transaction, "cancel before token recorded"),
                }
                Ok(true)
            }
        }
    }

    // =========================================================================
    // Event Delivery
    // =========================================================================

    /// Applies one endpoint event.
    ///
    /// This is the single logical delivery path; feed it from the
    /// endpoint's event channel, usually via
    /// [`spawn_event_pump`](Self::spawn_event_pump).
    pub async fn handle_event(&self, event: EndpointEvent) {
        if self.is_disposed() {
            tracing::debug!(kind = event.kind_name(), "event after dispose dropped");
            return;
        }

        match event {
            EndpointEvent::ReadComplete { transaction, items } => {
                self.complete_data(transaction, completion_results(items));
            }
            EndpointEvent::WriteComplete { transaction, items } => {
                let results = items
                    .into_iter()
                    .map(|item| {
                        let mut result = ItemResult::for_handle(item.handle);
                        result.error = item.error;
                        result
                    })
                    .collect();
                self.complete_data(transaction, results);
            }
            EndpointEvent::CancelComplete { transaction } => {
                self.complete_cancel(transaction);
            }
            EndpointEvent::DataChange { transaction, items } => {
                if transaction.is_data_change() {
                    self.dispatch_changes(completion_results(items)).await;
                } else {
                    // A refresh completion rides the data change event,
                    // keyed by its transaction id.
                    self.complete_data(transaction, completion_results(items));
                }
            }
        }
    }

    /// Resolves a data-bearing completion against the registry.
    fn complete_data(&self, transaction: TransactionId, raw: Vec<ItemResult>) {
        let Some(request) = self.registry.lookup(transaction) else {
            // Expected outcome of a resolved race, not a fault.
            self.stats.stale_events.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%transaction, "unmatched completion dropped");
            return;
        };

        match request.complete_with(raw) {
            CompletionDisposition::Duplicate => {
                self.stats.stale_events.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%transaction, "duplicate completion dropped");
            }
            CompletionDisposition::Cancelled(cb) => {
                self.registry.remove(transaction);
                cb(RequestHandle::new(transaction));
                self.stats.cancels_completed.fetch_add(1, Ordering::Relaxed);
            }
            CompletionDisposition::Deliver {
                callback,
                mut results,
                remove_entry,
            } => {
                if remove_entry {
                    self.registry.remove(transaction);
                }
                // Result shaping reflects the subscription's configuration
                // now, not at issue time.
                self.items.apply_filter(self.result_filter(), &mut results);
                match callback {
                    CompletionCallback::Read(cb) => cb(results),
                    CompletionCallback::Write(cb) => cb(results),
                    CompletionCallback::Cancel(cb) => cb(RequestHandle::new(transaction)),
                }
                self.stats
                    .completions_delivered
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    %transaction,
                    kind = %request.kind(),
                    cookie = %request.cookie(),
                    "completion delivered"
                );
            }
        }
    }

    /// Resolves a cancel acknowledgment.
    fn complete_cancel(&self, transaction: TransactionId) {
        let Some(request) = self.registry.lookup(transaction) else {
            self.stats.stale_events.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%transaction, "unmatched cancel ack dropped");
            return;
        };

        match request.resolve_cancel_complete() {
            Some(cb) => {
                self.registry.remove(transaction);
                cb(RequestHandle::new(transaction));
                self.stats.cancels_completed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.stats.stale_events.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%transaction, "spurious cancel ack dropped");
            }
        }
    }

    /// Fans an unsolicited change batch out to the listeners.
    async fn dispatch_changes(&self, mut results: Vec<ItemResult>) {
        if !self.enabled() {
            tracing::trace!("change batch suppressed (disabled)");
            return;
        }

        self.items.apply_filter(self.result_filter(), &mut results);

        let listeners: Vec<Arc<dyn ChangeListener>> =
            self.listeners.read().values().cloned().collect();
        for listener in &listeners {
            listener.on_change(results.clone()).await;
        }
        self.stats.change_batches.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Change Listeners
    // =========================================================================

    /// Registers a change listener; arms delivery on the first one.
    pub fn subscribe_changes(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, listener);
        self.arm_delivery();
        id
    }

    /// Unregisters a change listener; disarms delivery when the last one
    /// goes. Returns `false` if the id was unknown.
    pub fn unsubscribe_changes(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let removed = listeners.remove(&id).is_some();
        if removed && listeners.is_empty() {
            drop(listeners);
            self.disarm_delivery();
        }
        removed
    }

    // =========================================================================
    // Browse
    // =========================================================================

    /// Browses the namespace under `origin`.
    pub async fn browse(
        &self,
        origin: ItemIdentity,
        filters: BrowseFilters,
    ) -> DaResult<BrowsePage> {
        self.ensure_usable()?;
        let page = self.endpoint.browse(&origin, None, &filters).await?;
        Ok(package_page(origin, filters, page))
    }

    /// Fetches the next page of a paged browse.
    ///
    /// Consumes the cursor; the returned page carries a fresh one while
    /// elements remain, and `None` once the cursor is retired.
    pub async fn browse_next(&self, cursor: BrowseCursor) -> DaResult<BrowsePage> {
        self.ensure_usable()?;
        let page = self
            .endpoint
            .browse(&cursor.origin, Some(&cursor.continuation), &cursor.filters)
            .await?;
        Ok(package_page(cursor.origin, cursor.filters, page))
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Tears the engine down. Idempotent.
    ///
    /// Drains the request registry under the delivery lock (pending
    /// continuations are dropped unfired), clears items and listeners, and
    /// disarms change delivery. Events arriving afterwards are dropped.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = self.registry.drain();
        self.listeners.write().clear();
        self.items.clear();
        self.disarm_delivery();
        tracing::info!(
            pending_dropped = drained.len(),
            subscription = self.config.subscription.name.as_deref().unwrap_or(""),
            "subscription engine disposed"
        );
    }
}

impl fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("items", &self.items.len())
            .field("enabled", &self.enabled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Turns event payloads into unfiltered result records.
fn completion_results(items: Vec<ItemCompletion>) -> Vec<ItemResult> {
    items
        .into_iter()
        .map(|item| ItemResult {
            server_handle: Some(item.handle),
            value: item.value,
            quality: item.quality,
            timestamp: item.timestamp,
            error: item.error,
            ..ItemResult::default()
        })
        .collect()
}

/// Packages a remote page, retiring the cursor when the server reports no
/// further elements or hands back an empty token.
fn package_page(
    origin: ItemIdentity,
    filters: BrowseFilters,
    page: crate::client::remote::RemoteBrowsePage,
) -> BrowsePage {
    let cursor = match (page.more, page.continuation) {
        (true, Some(token)) if !token.is_empty() => {
            Some(BrowseCursor::new(origin, filters, token))
        }
        _ => None,
    };
    BrowsePage {
        elements: page.elements,
        cursor,
    }
}

// =============================================================================
// Tests
// =============================================================================
