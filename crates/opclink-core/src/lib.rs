// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opclink-core
//!
//! Core value model shared by the opclink Data Access client crates.
//!
//! This crate provides the protocol-agnostic foundation for tag values:
//!
//! - **`Value`**: a closed sum type over every scalar kind the protocol
//!   carries. New kinds are added by extending the enum and its matches,
//!   never via runtime type names.
//! - **`Quality`**: the value quality indicator with its vendor
//!   status-code mapping.
//! - **`ItemErrorCode`**: the per-item error vocabulary. Per-item failures
//!   are data attached to a result record, never exceptions.
//!
//! No I/O and no async machinery lives here; higher layers (the client
//! engine, any transport) depend on this crate, never the other way around.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod types;

pub use types::{BadReason, ItemErrorCode, Quality, UncertainReason, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
