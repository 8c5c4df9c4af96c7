// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pending asynchronous requests and their registry.
//!
//! Every asynchronous read/write/refresh produces two halves that arrive
//! on different paths and in either order:
//!
//! 1. the **initiating call return** (caller task): per-item validation
//!    results plus the cancel token, and
//! 2. the **completion event** (event delivery path): the data.
//!
//! A [`PendingRequest`] owns that race. Its state is guarded by a
//! request-local lock so the two halves of the *same* request serialize
//! while different requests never block each other; the registry map has
//! its own lock, shared with event delivery and disposal. State methods
//! return dispositions instead of firing callbacks, so callers invoke the
//! continuation only after every lock is released.
//!
//! The continuation itself is a tagged union over the completion kinds —
//! read, write, cancel — matched exhaustively at resolution time, and an
//! `FnOnce` inside, so firing it twice is unrepresentable.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::remote::{CancelToken, TransactionId};
use crate::error::{DaError, OperationError};
use crate::types::{CallerHandle, InternalHandle, ItemResult, ResultFieldMask};

// =============================================================================
// RequestKind
// =============================================================================

/// The operation a pending request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Asynchronous read.
    Read,

    /// Asynchronous write.
    Write,

    /// Asynchronous refresh of all active items.
    Refresh,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

// =============================================================================
// RequestHandle
// =============================================================================

/// Caller-facing handle to an in-flight asynchronous request.
///
/// Absent when the request resolved synchronously (nothing to cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    transaction: TransactionId,
}

impl RequestHandle {
    pub(crate) fn new(transaction: TransactionId) -> Self {
        Self { transaction }
    }

    /// Returns the transaction id behind this handle.
    #[inline]
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.transaction.value())
    }
}

// =============================================================================
// CompletionCallback
// =============================================================================

/// Continuation for a data-bearing completion.
pub type DataCallback = Box<dyn FnOnce(Vec<ItemResult>) + Send + 'static>;

/// Continuation for a completed cancellation.
pub type CancelCallback = Box<dyn FnOnce(RequestHandle) + Send + 'static>;

/// The continuation stored on a pending request, tagged by completion kind.
///
/// Resolution matches this exhaustively; there is no runtime type probing
/// and no way to fire a continuation twice.
pub enum CompletionCallback {
    /// Completes an asynchronous read (or refresh; refreshes deliver
    /// read-shaped results).
    Read(DataCallback),

    /// Completes an asynchronous write.
    Write(DataCallback),

    /// Completes a cancellation.
    Cancel(CancelCallback),
}

impl CompletionCallback {
    /// Returns a short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Cancel(_) => "cancel",
        }
    }
}

impl fmt::Debug for CompletionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompletionCallback")
            .field(&self.kind_name())
            .finish()
    }
}

// =============================================================================
// Dispositions
// =============================================================================

/// What the issuing task must do after recording the initiating-call
/// return.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InitialDisposition {
    /// The completion event is still outstanding.
    AwaitingCompletion,

    /// The completion event outran the initiating call and already fired
    /// the continuation; only bookkeeping remained, and the registry entry
    /// can now be dropped.
    AlreadyCompleted,
}

/// What the event-delivery task must do after a completion event matched a
/// pending request.
pub(crate) enum CompletionDisposition {
    /// Duplicate delivery; drop the event.
    Duplicate,

    /// Cancellation was requested before the natural completion landed;
    /// resolve through the cancellation continuation and drop the entry.
    Cancelled(CancelCallback),

    /// Deliver the merged results through the continuation. `remove_entry`
    /// is `false` when the event outran the initiating call, which still
    /// owes the registry its bookkeeping pass.
    Deliver {
        callback: CompletionCallback,
        results: Vec<ItemResult>,
        remove_entry: bool,
    },
}

/// What the cancelling task must do after flagging a request.
pub(crate) enum CancelDisposition {
    /// The request already completed naturally; quiet no-op.
    AlreadyCompleted,

    /// Forward the stored token to the endpoint.
    Forward(Option<CancelToken>),
}

// =============================================================================
// PendingRequest
// =============================================================================

/// State of a pending request, guarded by the request-local lock.
struct RequestState {
    /// Validation results from the initiating call, once it returned.
    initial: Option<Vec<ItemResult>>,

    /// Token for cancelling, once the endpoint acknowledged the request.
    cancel_token: Option<CancelToken>,

    /// The continuation fired (or claimed for firing). Terminal.
    completed: bool,

    /// `cancel()` replaced the continuation.
    cancel_requested: bool,

    /// The continuation; taken exactly once.
    callback: Option<CompletionCallback>,
}

/// One outstanding asynchronous operation.
pub struct PendingRequest {
    transaction: TransactionId,
    kind: RequestKind,
    cookie: CallerHandle,
    issued_mask: ResultFieldMask,
    state: Mutex<RequestState>,
}

impl PendingRequest {
    /// Creates a pending request holding `callback`.
    pub(crate) fn new(
        transaction: TransactionId,
        kind: RequestKind,
        cookie: CallerHandle,
        issued_mask: ResultFieldMask,
        callback: CompletionCallback,
    ) -> Self {
        Self {
            transaction,
            kind,
            cookie,
            issued_mask,
            state: Mutex::new(RequestState {
                initial: None,
                cancel_token: None,
                completed: false,
                cancel_requested: false,
                callback: Some(callback),
            }),
        }
    }

    /// Returns the transaction id.
    #[inline]
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Returns the operation kind.
    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Returns the request-level caller cookie.
    #[inline]
    pub fn cookie(&self) -> CallerHandle {
        self.cookie
    }

    /// Returns the filter mask snapshot taken at issue time.
    #[inline]
    pub fn issued_mask(&self) -> ResultFieldMask {
        self.issued_mask
    }

    /// Records the initiating-call return while a completion is pending.
    ///
    /// If the completion event already fired the continuation, only the
    /// token is recorded and the caller learns the entry is finished.
    pub(crate) fn note_initial(
        &self,
        initial: Vec<ItemResult>,
        token: CancelToken,
    ) -> InitialDisposition {
        let mut state = self.state.lock();
        state.cancel_token = Some(token);
        if state.completed {
            InitialDisposition::AlreadyCompleted
        } else {
            state.initial = Some(initial);
            InitialDisposition::AwaitingCompletion
        }
    }

    /// Records the cancel token for a refresh (no validation half exists).
    pub(crate) fn note_refresh_token(&self, token: CancelToken) -> InitialDisposition {
        let mut state = self.state.lock();
        state.cancel_token = Some(token);
        if state.completed {
            InitialDisposition::AlreadyCompleted
        } else {
            InitialDisposition::AwaitingCompletion
        }
    }

    /// Claims the continuation for the all-invalid synchronous fast path.
    ///
    /// Every item failed validation, so no completion event will ever
    /// arrive; the request resolves on the issuing task.
    pub(crate) fn resolve_all_invalid(&self) -> Option<CompletionCallback> {
        let mut state = self.state.lock();
        if state.completed {
            return None;
        }
        state.completed = true;
        state.callback.take()
    }

    /// Applies a completion event.
    ///
    /// Merging against a present initial half matches items by internal
    /// handle, never by array position.
    pub(crate) fn complete_with(&self, completion: Vec<ItemResult>) -> CompletionDisposition {
        let mut state = self.state.lock();
        if state.completed {
            return CompletionDisposition::Duplicate;
        }
        state.completed = true;

        if state.cancel_requested {
            return match state.callback.take() {
                Some(CompletionCallback::Cancel(cb)) => CompletionDisposition::Cancelled(cb),
                // cancel_requested always swaps in a Cancel continuation;
                // anything else means it was already claimed.
                _ => CompletionDisposition::Duplicate,
            };
        }

        let results = match state.initial.take() {
            Some(initial) => merge_halves(initial, completion),
            None => completion,
        };

        match state.callback.take() {
            Some(callback) => CompletionDisposition::Deliver {
                callback,
                results,
                // The initiating call has not returned yet exactly when no
                // cancel token was recorded; it still owes bookkeeping.
                remove_entry: state.cancel_token.is_some(),
            },
            None => CompletionDisposition::Duplicate,
        }
    }

    /// Replaces the continuation with a cancellation continuation.
    pub(crate) fn request_cancel(&self, callback: CancelCallback) -> CancelDisposition {
        let mut state = self.state.lock();
        if state.completed {
            return CancelDisposition::AlreadyCompleted;
        }
        state.cancel_requested = true;
        state.callback = Some(CompletionCallback::Cancel(callback));
        CancelDisposition::Forward(state.cancel_token)
    }

    /// Claims the cancellation continuation for a `CancelComplete` event.
    ///
    /// Returns `None` when no cancel is outstanding (stale or spurious
    /// event); the state is left untouched in that case.
    pub(crate) fn resolve_cancel_complete(&self) -> Option<CancelCallback> {
        let mut state = self.state.lock();
        if state.completed || !state.cancel_requested {
            return None;
        }
        state.completed = true;
        match state.callback.take() {
            Some(CompletionCallback::Cancel(cb)) => Some(cb),
            other => {
                state.callback = other;
                None
            }
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("transaction", &self.transaction)
            .field("kind", &self.kind)
            .field("cookie", &self.cookie)
            .finish()
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Merges the completion half into the initial half.
///
/// The initial half fixes the result order (the caller's input order); the
/// completion half contributes data by matching internal handles. Items the
/// completion never mentions keep their validation entries. Completion
/// entries for handles the initial half does not contain are dropped — the
/// initial half is authoritative for which items belong to the request.
fn merge_halves(initial: Vec<ItemResult>, completion: Vec<ItemResult>) -> Vec<ItemResult> {
    let mut by_handle: HashMap<InternalHandle, ItemResult> = completion
        .into_iter()
        .filter_map(|item| item.server_handle.map(|handle| (handle, item)))
        .collect();

    let mut merged = initial;
    for slot in merged.iter_mut() {
        let Some(handle) = slot.server_handle else {
            continue;
        };
        if let Some(done) = by_handle.remove(&handle) {
            slot.value = done.value;
            slot.quality = done.quality;
            slot.timestamp = done.timestamp;
            slot.error = done.error;
        }
    }

    if !by_handle.is_empty() {
        tracing::debug!(
            orphans = by_handle.len(),
            "completion carried handles outside the request's item set"
        );
    }

    merged
}

// =============================================================================
// RequestRegistry
// =============================================================================

struct RegistryInner {
    requests: HashMap<TransactionId, Arc<PendingRequest>>,
    disposed: bool,
}

/// The table of in-flight requests for one subscription.
///
/// Mutated by issuing tasks (insert) and the event delivery path
/// (lookup/remove); disposal drains it under the same lock delivery uses,
/// so no event can resolve a request concurrently with teardown.
pub struct RequestRegistry {
    inner: Mutex<RegistryInner>,
    next_transaction: AtomicU32,
}

impl RequestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                requests: HashMap::new(),
                disposed: false,
            }),
            next_transaction: AtomicU32::new(1),
        }
    }

    /// Allocates the next transaction id, skipping the reserved zero.
    pub fn allocate_transaction(&self) -> TransactionId {
        loop {
            let raw = self.next_transaction.fetch_add(1, Ordering::Relaxed);
            if raw != 0 {
                return TransactionId::new(raw);
            }
        }
    }

    /// Registers a pending request under its transaction id.
    ///
    /// Must happen before the outbound `begin_*` call returns: the event
    /// carrying the other half may race ahead of the return value.
    ///
    /// # Errors
    ///
    /// Fails once the registry is disposed.
    pub fn insert(&self, request: Arc<PendingRequest>) -> Result<(), DaError> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(DaError::operation(OperationError::Disposed));
        }
        inner.requests.insert(request.transaction(), request);
        Ok(())
    }

    /// Returns the pending request for `transaction`, if any.
    pub fn lookup(&self, transaction: TransactionId) -> Option<Arc<PendingRequest>> {
        self.inner.lock().requests.get(&transaction).cloned()
    }

    /// Removes and returns the pending request for `transaction`.
    pub fn remove(&self, transaction: TransactionId) -> Option<Arc<PendingRequest>> {
        self.inner.lock().requests.remove(&transaction)
    }

    /// Marks the registry disposed and drains every pending request.
    ///
    /// Later inserts fail and later lookups miss, so in-flight events
    /// resolve to drops.
    pub fn drain(&self) -> Vec<Arc<PendingRequest>> {
        let mut inner = self.inner.lock();
        inner.disposed = true;
        inner.requests.drain().map(|(_, request)| request).collect()
    }

    /// Returns the number of in-flight requests.
    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Returns `true` if no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().requests.is_empty()
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RequestRegistry")
            .field("in_flight", &inner.requests.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use opclink_core::{ItemErrorCode, Quality, Value};

    fn result_for(handle: u64) -> ItemResult {
        ItemResult::for_handle(InternalHandle::new(handle))
    }

    fn pending(kind: RequestKind, fired: Arc<AtomicUsize>) -> PendingRequest {
        let callback = match kind {
            RequestKind::Write => CompletionCallback::Write(Box::new(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })),
            _ => CompletionCallback::Read(Box::new(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })),
        };
        PendingRequest::new(
            TransactionId::new(1),
            kind,
            CallerHandle::new(0),
            ResultFieldMask::ALL,
            callback,
        )
    }

    #[test]
    fn test_transaction_allocation_skips_zero() {
        let registry = RequestRegistry::new();
        let first = registry.allocate_transaction();
        assert_eq!(first, TransactionId::new(1));
        assert!(!registry.allocate_transaction().is_data_change());
    }

    #[test]
    fn test_initial_then_completion() {
        // Ordering A: the initiating call returns before the event.
        let fired = Arc::new(AtomicUsize::new(0));
        let request = pending(RequestKind::Read, fired.clone());

        let disposition = request.note_initial(vec![result_for(1)], CancelToken::new(10));
        assert_eq!(disposition, InitialDisposition::AwaitingCompletion);

        match request.complete_with(vec![result_for(1)]) {
            CompletionDisposition::Deliver {
                callback,
                results,
                remove_entry,
            } => {
                assert!(remove_entry);
                assert_eq!(results.len(), 1);
                match callback {
                    CompletionCallback::Read(cb) => cb(results),
                    other => panic!("expected read callback, got {}", other.kind_name()),
                }
            }
            _ => panic!("expected delivery"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // A duplicate completion is inert.
        assert!(matches!(
            request.complete_with(vec![result_for(1)]),
            CompletionDisposition::Duplicate
        ));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_then_initial() {
        // Ordering B: the event outruns the initiating call return.
        let fired = Arc::new(AtomicUsize::new(0));
        let request = pending(RequestKind::Read, fired.clone());

        match request.complete_with(vec![result_for(1)]) {
            CompletionDisposition::Deliver {
                callback,
                results,
                remove_entry,
            } => {
                // The initiating call has not returned; the entry stays
                // registered for its bookkeeping pass.
                assert!(!remove_entry);
                match callback {
                    CompletionCallback::Read(cb) => cb(results),
                    other => panic!("expected read callback, got {}", other.kind_name()),
                }
            }
            _ => panic!("expected delivery"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Rule 2 then performs bookkeeping only; no second invocation.
        let disposition = request.note_initial(vec![result_for(1)], CancelToken::new(10));
        assert_eq!(disposition, InitialDisposition::AlreadyCompleted);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_invalid_fast_path_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let request = pending(RequestKind::Write, fired.clone());

        let callback = request.resolve_all_invalid().expect("callback available");
        match callback {
            CompletionCallback::Write(cb) => cb(vec![]),
            other => panic!("expected write callback, got {}", other.kind_name()),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(request.resolve_all_invalid().is_none());
        assert!(matches!(
            request.complete_with(vec![]),
            CompletionDisposition::Duplicate
        ));
    }

    #[test]
    fn test_cancel_after_completion_is_quiet() {
        let fired = Arc::new(AtomicUsize::new(0));
        let request = pending(RequestKind::Read, fired.clone());
        request.note_initial(vec![result_for(1)], CancelToken::new(10));

        match request.complete_with(vec![result_for(1)]) {
            CompletionDisposition::Deliver { .. } => {}
            _ => panic!("expected delivery"),
        }

        // A cancel losing the race is a no-op, never an error.
        let disposition = request.request_cancel(Box::new(|_| panic!("must never fire")));
        assert!(matches!(disposition, CancelDisposition::AlreadyCompleted));
    }

    #[test]
    fn test_cancel_then_cancel_complete() {
        let request = pending(RequestKind::Read, Arc::new(AtomicUsize::new(0)));
        request.note_initial(vec![result_for(1)], CancelToken::new(10));

        let cancelled = Arc::new(AtomicUsize::new(0));
        let observed = cancelled.clone();
        match request.request_cancel(Box::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        })) {
            CancelDisposition::Forward(token) => assert_eq!(token, Some(CancelToken::new(10))),
            CancelDisposition::AlreadyCompleted => panic!("request was pending"),
        }

        let cb = request.resolve_cancel_complete().expect("cancel pending");
        cb(RequestHandle::new(TransactionId::new(1)));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);

        // Terminal: nothing further resolves.
        assert!(request.resolve_cancel_complete().is_none());
        assert!(matches!(
            request.complete_with(vec![]),
            CompletionDisposition::Duplicate
        ));
    }

    #[test]
    fn test_natural_completion_resolves_pending_cancel() {
        let request = pending(RequestKind::Read, Arc::new(AtomicUsize::new(0)));
        request.note_initial(vec![result_for(1)], CancelToken::new(10));

        let cancelled = Arc::new(AtomicUsize::new(0));
        let observed = cancelled.clone();
        request.request_cancel(Box::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        // The natural completion lands before CancelComplete: the request
        // resolves through the cancellation continuation, exactly once.
        match request.complete_with(vec![result_for(1)]) {
            CompletionDisposition::Cancelled(cb) => {
                cb(RequestHandle::new(TransactionId::new(1)));
            }
            _ => panic!("expected cancellation resolution"),
        }
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(request.resolve_cancel_complete().is_none());
    }

    #[test]
    fn test_spurious_cancel_complete_is_inert() {
        let fired = Arc::new(AtomicUsize::new(0));
        let request = pending(RequestKind::Read, fired.clone());
        request.note_initial(vec![result_for(1)], CancelToken::new(10));

        // No cancel was requested; the event must not consume the
        // continuation.
        assert!(request.resolve_cancel_complete().is_none());

        match request.complete_with(vec![result_for(1)]) {
            CompletionDisposition::Deliver { callback, results, .. } => match callback {
                CompletionCallback::Read(cb) => cb(results),
                other => panic!("expected read callback, got {}", other.kind_name()),
            },
            _ => panic!("expected delivery"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_merge_matches_by_handle_not_position() {
        // Item A is valid with late data, item B carries its validation
        // error; completion arrives in reverse order.
        let initial = vec![
            result_for(1),
            result_for(2).with_error(ItemErrorCode::UnknownHandle),
        ];
        let completion = vec![
            // Only A completed, listed after a handle outside the set.
            result_for(7).with_data(Value::Int32(0), Quality::Good, None),
            result_for(1).with_data(Value::Float64(3.5), Quality::Good, None),
        ];

        let merged = merge_halves(initial, completion);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].server_handle, Some(InternalHandle::new(1)));
        assert_eq!(merged[0].value, Some(Value::Float64(3.5)));
        assert!(merged[0].is_ok());
        assert_eq!(merged[1].server_handle, Some(InternalHandle::new(2)));
        assert_eq!(merged[1].error, Some(ItemErrorCode::UnknownHandle));
        assert!(merged[1].value.is_none());
    }

    #[test]
    fn test_registry_insert_lookup_remove() {
        let registry = RequestRegistry::new();
        let txn = registry.allocate_transaction();
        let request = Arc::new(pending(RequestKind::Read, Arc::new(AtomicUsize::new(0))));

        registry.insert(request.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(request.transaction()).is_some());

        assert!(registry.remove(request.transaction()).is_some());
        assert!(registry.remove(request.transaction()).is_none());
        assert!(registry.is_empty());
        let _ = txn;
    }

    #[test]
    fn test_registry_drain_blocks_inserts() {
        let registry = RequestRegistry::new();
        let request = Arc::new(pending(RequestKind::Read, Arc::new(AtomicUsize::new(0))));
        registry.insert(request).unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty());

        let late = Arc::new(pending(RequestKind::Read, Arc::new(AtomicUsize::new(0))));
        assert!(registry.insert(late).is_err());
    }
}
