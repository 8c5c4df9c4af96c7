// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Data Access client engine for tag-based, subscription-oriented servers.
//!
//! This crate implements the client side of an OPC-classic style Data
//! Access protocol: a remote endpoint exposes named data items ("tags")
//! grouped into subscriptions; the client adds and removes items, reads
//! and writes values synchronously or asynchronously, receives unsolicited
//! change notifications, and can cancel in-flight operations.
//!
//! The heart of the crate is the subscription engine:
//!
//! - **Handle translation** between caller-supplied identities, the
//!   engine's internal indirection handle, and the opaque handle the
//!   remote endpoint assigns.
//! - **Request correlation**: asynchronous read/write/refresh operations
//!   are matched with their out-of-band completion events by transaction
//!   id, tolerating either arrival order of the initiating call's return
//!   and the completion.
//! - **Result filtering**: a runtime-configurable mask decides which
//!   identity/time fields results carry, applied uniformly to synchronous
//!   calls, asynchronous completions, and change notifications.
//! - **Cancellation**: best-effort, race-safe cancel of in-flight
//!   asynchronous operations.
//!
//! The wire protocol is out of scope: the engine drives an abstract
//! [`RemoteEndpoint`](client::RemoteEndpoint) and consumes its event
//! channel, so any transport (COM/DCOM bridge, RPC, in-process fake) can
//! sit behind it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use opclink_da::client::SubscriptionEngine;
//! use opclink_da::types::{CallerHandle, DaClientConfig, ItemDef};
//!
//! let config = DaClientConfig::builder()
//!     .server_url("opcda://plant-server/OPC.Sim.1")
//!     .build()?;
//!
//! let engine = Arc::new(SubscriptionEngine::new(endpoint, config));
//! engine.spawn_event_pump(event_rx);
//!
//! let added = engine
//!     .add_items(&[ItemDef::new("Line1.Furnace.Temperature", CallerHandle::new(1))])
//!     .await?;
//! let handle = added[0].server_handle.expect("item added");
//!
//! // Synchronous read
//! let results = engine.read(&[handle], Duration::ZERO).await?;
//!
//! // Asynchronous read; the continuation fires exactly once
//! let (initial, request) = engine
//!     .read_async(&[handle], Duration::ZERO, CallerHandle::new(99), |results| {
//!         println!("completed: {:?}", results);
//!     })
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod browse;
pub mod client;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{
    ArgumentError, BrowseError, ConnectionError, DaError, DaResult, ErrorSeverity,
    OperationError, SubscriptionError,
};

pub use types::{
    CallerHandle, DaClientConfig, DaClientConfigBuilder, InternalHandle, ItemDef, ItemIdentity,
    ItemModification, ItemResult, ModifyMask, RemoteHandle, ResultFieldMask,
    SubscriptionSettings,
};

// Re-export the engine surface
pub use client::{
    BroadcastListener, ChangeListener, ChannelListener, EndpointEvent, EngineStats, ListenerId,
    RemoteEndpoint, RequestHandle, SubscriptionEngine, TransactionId,
};

// Re-export browse types
pub use browse::{
    BrowseCursor, BrowseElement, BrowseElementFilter, BrowseFilters, BrowsePage,
    ContinuationToken,
};

// Re-export the value model
pub use opclink_core::{ItemErrorCode, Quality, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
