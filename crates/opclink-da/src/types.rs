// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Data Access client types.
//!
//! This module provides the identity and handle vocabulary of the engine:
//!
//! - **ItemIdentity**: name/path identity of a tag on the server
//! - **Handles**: the three distinct handle spaces (caller, internal, remote)
//!   as separate newtypes that cannot be mixed up
//! - **ResultFieldMask**: which identity/time fields appear on results
//! - **ItemDef / ItemResult**: the per-item records flowing in and out
//! - **DaClientConfig**: client configuration with builder
//! - **SubscriptionSettings**: server-side subscription state
//!
//! # Examples
//!
//! ```
//! use opclink_da::types::{DaClientConfig, ItemIdentity, ResultFieldMask};
//!
//! let identity = ItemIdentity::new("Line1.Furnace.Temperature");
//!
//! let config = DaClientConfig::builder()
//!     .server_url("opcda://plant-server/OPC.Sim.1")
//!     .result_filter(ResultFieldMask::ALL)
//!     .build()
//!     .unwrap();
//! # let _ = (identity, config);
//! ```

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opclink_core::{ItemErrorCode, Quality, Value};

use crate::error::{ArgumentError, DaError};

// =============================================================================
// ItemIdentity
// =============================================================================

/// The identity of an item in the server's namespace.
///
/// Two items are the same identity iff both name and path match. The
/// identity is immutable once the item has been added to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentity {
    /// Fully qualified item name.
    pub name: String,

    /// Optional secondary identifier (access path).
    pub path: Option<String>,
}

impl ItemIdentity {
    /// Creates an identity from an item name.
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// Creates an identity with an access path.
    #[inline]
    pub fn with_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }

    /// Returns `true` if the name is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Placeholder identity for records synthesized on a failed lookup.
    pub(crate) fn unknown() -> Self {
        Self {
            name: String::new(),
            path: None,
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}@{}", self.name, path),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for ItemIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Opaque handle supplied by the caller when an item is added.
///
/// Never interpreted by the engine; only stored and echoed back on results,
/// subject to the result-field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerHandle(pub u64);

impl CallerHandle {
    /// Creates a new caller handle.
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

impl fmt::Display for CallerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

impl From<u64> for CallerHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Engine-assigned item handle, unique within a subscription for the life
/// of the process and never reused while the item is live.
///
/// This is the value the engine hands to the remote endpoint in place of
/// the caller handle, and the opaque "server handle" callers pass back into
/// subsequent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalHandle(pub u64);

impl InternalHandle {
    /// Creates a new internal handle.
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

impl fmt::Display for InternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ih-{}", self.0)
    }
}

impl From<u64> for InternalHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Handle assigned by the remote endpoint when an item is added there.
///
/// Required for every subsequent read/write/remove referencing the item.
/// Never crosses the engine's caller-facing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle(pub u64);

impl RemoteHandle {
    /// Creates a new remote handle.
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

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rh-{}", self.0)
    }
}

impl From<u64> for RemoteHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// =============================================================================
// Masks
// =============================================================================

bitflags! {
    /// Selects which identity/time fields are present on result records.
    ///
    /// The mask is stored per subscription and may change at runtime; every
    /// outgoing result is projected through the mask current at the moment
    /// of projection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ResultFieldMask: u32 {
        /// Include the item name.
        const ITEM_NAME = 0b0001;
        /// Include the item access path.
        const ITEM_PATH = 0b0010;
        /// Include the caller-supplied handle.
        const CLIENT_HANDLE = 0b0100;
        /// Include the value timestamp.
        const ITEM_TIME = 0b1000;

        /// Every field populated.
        const ALL = Self::ITEM_NAME.bits()
            | Self::ITEM_PATH.bits()
            | Self::CLIENT_HANDLE.bits()
            | Self::ITEM_TIME.bits();

        /// The minimal useful projection.
        const MINIMAL = Self::ITEM_NAME.bits() | Self::CLIENT_HANDLE.bits();
    }
}

impl Default for ResultFieldMask {
    fn default() -> Self {
        Self::MINIMAL
    }
}

bitflags! {
    /// Selects which fields of an [`ItemModification`] apply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModifyMask: u32 {
        /// Replace the caller handle stored for the item.
        const CLIENT_HANDLE = 0b01;
        /// Change the item's active state on the server.
        const ACTIVE = 0b10;
    }
}

// =============================================================================
// Item Definitions
// =============================================================================

/// Definition of an item to add to the subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDef {
    /// Identity of the item in the server namespace.
    pub identity: ItemIdentity,

    /// Caller's opaque handle for this item.
    pub caller_handle: CallerHandle,

    /// Whether the item starts active (eligible for change notifications).
    pub active: bool,
}

impl ItemDef {
    /// Creates an active item definition.
    pub fn new(identity: impl Into<ItemIdentity>, caller_handle: CallerHandle) -> Self {
        Self {
            identity: identity.into(),
            caller_handle,
            active: true,
        }
    }

    /// Sets the initial active state.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// A requested change to an already-added item.
///
/// Which fields apply is governed by the [`ModifyMask`] passed alongside;
/// fields outside the mask are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemModification {
    /// The item to modify, by the handle a prior result exposed.
    pub server_handle: InternalHandle,

    /// Replacement caller handle.
    pub caller_handle: Option<CallerHandle>,

    /// Replacement active state.
    pub active: Option<bool>,
}

impl ItemModification {
    /// Creates a modification targeting one item.
    pub fn new(server_handle: InternalHandle) -> Self {
        Self {
            server_handle,
            caller_handle: None,
            active: None,
        }
    }

    /// Sets a replacement caller handle.
    pub fn caller_handle(mut self, handle: CallerHandle) -> Self {
        self.caller_handle = Some(handle);
        self
    }

    /// Sets a replacement active state.
    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }
}

// =============================================================================
// ItemResult
// =============================================================================

/// The per-item record every operation returns.
///
/// Identity and time fields are present only as the subscription's
/// [`ResultFieldMask`] allows. Per-item failures are carried in `error`;
/// they are never surfaced as call-level errors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemResult {
    /// Item name, when `ITEM_NAME` is selected.
    pub item_name: Option<String>,

    /// Item access path, when `ITEM_PATH` is selected.
    pub item_path: Option<String>,

    /// The caller's handle, when `CLIENT_HANDLE` is selected.
    pub client_handle: Option<CallerHandle>,

    /// The engine's handle for the item; pass this back into subsequent
    /// calls to reference the same item.
    pub server_handle: Option<InternalHandle>,

    /// The value, for data-bearing operations.
    pub value: Option<Value>,

    /// Value quality, for data-bearing operations.
    pub quality: Option<Quality>,

    /// Value timestamp, when `ITEM_TIME` is selected.
    pub timestamp: Option<DateTime<Utc>>,

    /// Per-item error, if the operation failed for this item.
    pub error: Option<ItemErrorCode>,
}

impl ItemResult {
    /// Creates an empty result referencing an item.
    pub fn for_handle(server_handle: InternalHandle) -> Self {
        Self {
            server_handle: Some(server_handle),
            ..Self::default()
        }
    }

    /// Sets the per-item error.
    pub fn with_error(mut self, error: ItemErrorCode) -> Self {
        self.error = Some(error);
        self
    }

    /// Sets value, quality and timestamp.
    pub fn with_data(
        mut self,
        value: Value,
        quality: Quality,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        self.value = Some(value);
        self.quality = Some(quality);
        self.timestamp = timestamp;
        self
    }

    /// Returns `true` if the operation succeeded for this item.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Server-side subscription state captured at engine construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Human-readable subscription name.
    pub name: Option<String>,

    /// Rate at which the server samples and reports changes.
    pub update_rate: Duration,

    /// Percent deadband applied to analog items; `0.0` reports every change.
    pub deadband_percent: f32,

    /// Whether change notifications start enabled.
    pub active: bool,

    /// Keep-alive interval for otherwise-silent subscriptions.
    pub keep_alive: Option<Duration>,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            name: None,
            update_rate: Duration::from_millis(1000),
            deadband_percent: 0.0,
            active: true,
            keep_alive: None,
        }
    }
}

impl SubscriptionSettings {
    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero update rate or a deadband outside 0-100.
    pub fn validate(&self) -> Result<(), DaError> {
        if self.update_rate.is_zero() {
            return Err(DaError::argument(ArgumentError::invalid(
                "update_rate",
                "must be greater than zero",
            )));
        }
        if !(0.0..=100.0).contains(&self.deadband_percent) {
            return Err(DaError::argument(ArgumentError::invalid(
                "deadband_percent",
                "must be within 0.0..=100.0",
            )));
        }
        Ok(())
    }
}

// =============================================================================
// DaClientConfig
// =============================================================================

/// Client configuration.
///
/// Built through [`DaClientConfigBuilder`]; validation happens at
/// [`build`](DaClientConfigBuilder::build).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaClientConfig {
    /// Server connection URL (opaque to the engine).
    pub server_url: String,

    /// Initial result-field filter for the subscription.
    pub result_filter: ResultFieldMask,

    /// Subscription state.
    pub subscription: SubscriptionSettings,

    /// Capacity of the endpoint event channel.
    pub event_channel_capacity: usize,

    /// Timeout applied to synchronous remote round trips.
    pub request_timeout: Duration,
}

impl DaClientConfig {
    /// Returns a configuration builder.
    pub fn builder() -> DaClientConfigBuilder {
        DaClientConfigBuilder::new()
    }
}

/// Builder for [`DaClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct DaClientConfigBuilder {
    server_url: Option<String>,
    result_filter: ResultFieldMask,
    subscription: SubscriptionSettings,
    event_channel_capacity: Option<usize>,
    request_timeout: Option<Duration>,
}

impl DaClientConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server connection URL. Required.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets the initial result-field filter.
    pub fn result_filter(mut self, mask: ResultFieldMask) -> Self {
        self.result_filter = mask;
        self
    }

    /// Sets the subscription state.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.subscription = settings;
        self
    }

    /// Sets the subscription update rate.
    pub fn update_rate(mut self, rate: Duration) -> Self {
        self.subscription.update_rate = rate;
        self
    }

    /// Sets the event channel capacity.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = Some(capacity);
        self
    }

    /// Sets the synchronous request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is missing or empty, the event
    /// channel capacity is zero, or the subscription settings are invalid.
    pub fn build(self) -> Result<DaClientConfig, DaError> {
        let server_url = match self.server_url {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(DaError::argument(ArgumentError::missing("server_url")));
            }
        };

        let event_channel_capacity = self.event_channel_capacity.unwrap_or(256);
        if event_channel_capacity == 0 {
            return Err(DaError::argument(ArgumentError::invalid(
                "event_channel_capacity",
                "must be greater than zero",
            )));
        }

        self.subscription.validate()?;

        Ok(DaClientConfig {
            server_url,
            result_filter: self.result_filter,
            subscription: self.subscription,
            event_channel_capacity,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
