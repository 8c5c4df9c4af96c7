// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core value types for the Data Access client.
//!
//! This module defines the three vocabularies every result record is built
//! from: the [`Value`] sum type, the [`Quality`] indicator, and the
//! [`ItemErrorCode`] per-item error codes.
//!
//! # Examples
//!
//! ```
//! use opclink_core::types::{Quality, Value};
//!
//! let temp = Value::Float64(25.5);
//! assert_eq!(temp.as_f64(), Some(25.5));
//! assert!(Quality::Good.is_usable());
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Value
// =============================================================================

/// A tag value.
///
/// This enum is the closed set of scalar kinds the Data Access protocol
/// carries. Dispatch over value kinds is always an exhaustive match on this
/// type; adding a kind means extending the enum and every match, which the
/// compiler enforces.
///
/// # Examples
///
/// ```
/// use opclink_core::types::Value;
///
/// let setpoint = Value::Float64(72.0);
/// assert_eq!(setpoint.as_f64(), Some(72.0));
///
/// let running = Value::Bool(true);
/// assert_eq!(running.as_bool(), Some(true));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Bool(bool),

    /// Signed 8-bit integer
    Int8(i8),

    /// Signed 16-bit integer
    Int16(i16),

    /// Signed 32-bit integer
    Int32(i32),

    /// Signed 64-bit integer
    Int64(i64),

    /// Unsigned 8-bit integer
    UInt8(u8),

    /// Unsigned 16-bit integer
    UInt16(u16),

    /// Unsigned 32-bit integer
    UInt32(u32),

    /// Unsigned 64-bit integer
    UInt64(u64),

    /// 32-bit floating point
    Float32(f32),

    /// 64-bit floating point
    Float64(f64),

    /// UTF-8 string
    String(String),

    /// Raw bytes
    Bytes(Vec<u8>),

    /// Array of values
    Array(Vec<Value>),

    /// Date and time with timezone
    DateTime(DateTime<Utc>),

    /// Null/undefined value
    Null,
}

impl Value {
    /// Returns the kind name of this value.
    ///
    /// # Examples
    ///
    /// ```
    /// use opclink_core::types::Value;
    ///
    /// assert_eq!(Value::Float64(1.0).kind_name(), "float64");
    /// assert_eq!(Value::Bool(true).kind_name(), "bool");
    /// ```
    #[inline]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::DateTime(_) => "datetime",
            Value::Null => "null",
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` if this is a numeric value (integer or float).
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int8(_)
                | Value::Int16(_)
                | Value::Int32(_)
                | Value::Int64(_)
                | Value::UInt8(_)
                | Value::UInt16(_)
                | Value::UInt32(_)
                | Value::UInt64(_)
                | Value::Float32(_)
                | Value::Float64(_)
        )
    }

    /// Attempts to convert this value to a boolean.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Float32(v) => Some(*v as i64),
            Value::Float64(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int8(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt8(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get this value as a string reference.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to get this value as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to get this value as an array reference.
    #[inline]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Array(v) => write!(f, "[{} elements]", v.len()),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Null => write!(f, "null"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int8, i8);
impl_from_for_value!(Int16, i16);
impl_from_for_value!(Int32, i32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(UInt8, u8);
impl_from_for_value!(UInt16, u16);
impl_from_for_value!(UInt32, u32);
impl_from_for_value!(UInt64, u64);
impl_from_for_value!(Float32, f32);
impl_from_for_value!(Float64, f64);
impl_from_for_value!(String, String);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

// =============================================================================
// Quality
// =============================================================================

/// The quality status of a tag value.
///
/// Follows the classic Data Access quality model: a major status with a
/// substatus reason, mapped to and from the vendor status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "reason")]
pub enum Quality {
    /// The value is good and reliable.
    #[default]
    Good,

    /// The value is uncertain but may be usable.
    Uncertain(UncertainReason),

    /// The value is bad and should not be used.
    Bad(BadReason),
}

impl Quality {
    /// Returns `true` if the quality is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        matches!(self, Quality::Good)
    }

    /// Returns `true` if the quality is usable (good or uncertain).
    #[inline]
    pub fn is_usable(&self) -> bool {
        matches!(self, Quality::Good | Quality::Uncertain(_))
    }

    /// Returns `true` if the quality is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        matches!(self, Quality::Bad(_))
    }

    /// Creates a bad quality with an unknown reason.
    #[inline]
    pub fn bad() -> Self {
        Quality::Bad(BadReason::Unknown)
    }

    /// Creates an uncertain quality with an unknown reason.
    #[inline]
    pub fn uncertain() -> Self {
        Quality::Uncertain(UncertainReason::Unknown)
    }

    /// Creates a quality from the vendor status word.
    ///
    /// The major status lives in bits 6-7 (`0b11` good, `0b01` uncertain,
    /// `0b00` bad), the substatus in bits 2-5.
    pub fn from_status_word(word: u16) -> Self {
        match word & 0x00C0 {
            0x00C0 => Quality::Good,
            0x0040 => match word & 0x003C {
                0x0004 => Quality::Uncertain(UncertainReason::LastKnownValue),
                0x0014 => Quality::Uncertain(UncertainReason::EngineeringUnitsExceeded),
                _ => Quality::Uncertain(UncertainReason::Unknown),
            },
            _ => match word & 0x003C {
                0x0018 => Quality::Bad(BadReason::CommFailure),
                0x001C => Quality::Bad(BadReason::OutOfService),
                0x0004 => Quality::Bad(BadReason::ConfigError),
                0x0010 => Quality::Bad(BadReason::SensorFailure),
                _ => Quality::Bad(BadReason::Unknown),
            },
        }
    }

    /// Converts to the vendor status word.
    pub fn to_status_word(&self) -> u16 {
        match self {
            Quality::Good => 0x00C0,
            Quality::Uncertain(UncertainReason::LastKnownValue) => 0x0044,
            Quality::Uncertain(UncertainReason::EngineeringUnitsExceeded) => 0x0054,
            Quality::Uncertain(_) => 0x0040,
            Quality::Bad(BadReason::CommFailure) => 0x0018,
            Quality::Bad(BadReason::OutOfService) => 0x001C,
            Quality::Bad(BadReason::ConfigError) => 0x0004,
            Quality::Bad(BadReason::SensorFailure) => 0x0010,
            Quality::Bad(_) => 0x0000,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Good => write!(f, "Good"),
            Quality::Uncertain(reason) => write!(f, "Uncertain: {}", reason),
            Quality::Bad(reason) => write!(f, "Bad: {}", reason),
        }
    }
}

/// Reasons for uncertain data quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UncertainReason {
    /// Using last known value due to communication issues.
    LastKnownValue,

    /// Value exceeds engineering units but may still be valid.
    EngineeringUnitsExceeded,

    /// Initial value before first read.
    InitialValue,

    /// Unknown reason.
    #[default]
    Unknown,
}

impl fmt::Display for UncertainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncertainReason::LastKnownValue => write!(f, "LastKnownValue"),
            UncertainReason::EngineeringUnitsExceeded => write!(f, "EngineeringUnitsExceeded"),
            UncertainReason::InitialValue => write!(f, "InitialValue"),
            UncertainReason::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Reasons for bad data quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BadReason {
    /// Communication with the data source has failed.
    CommFailure,

    /// The item is out of service.
    OutOfService,

    /// A configuration error makes the value unusable.
    ConfigError,

    /// The underlying sensor has failed.
    SensorFailure,

    /// Unknown reason.
    #[default]
    Unknown,
}

impl fmt::Display for BadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadReason::CommFailure => write!(f, "CommFailure"),
            BadReason::OutOfService => write!(f, "OutOfService"),
            BadReason::ConfigError => write!(f, "ConfigError"),
            BadReason::SensorFailure => write!(f, "SensorFailure"),
            BadReason::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// ItemErrorCode
// =============================================================================

/// Per-item error codes.
///
/// These are result data, not exceptions: a failed item carries its code in
/// the result record while the rest of the batch proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorCode {
    /// The supplied item handle is not known to the server.
    UnknownHandle,

    /// The item name does not resolve to an address in the namespace.
    UnknownItemName,

    /// The item path is malformed or unknown.
    InvalidItemPath,

    /// The value's kind cannot be accepted for this item.
    BadType,

    /// The value is outside the item's accepted range.
    OutOfRange,

    /// The item cannot be written.
    ReadOnly,

    /// The item cannot be read.
    WriteOnly,

    /// The server rejected the operation for this item without detail.
    Rejected,
}

impl ItemErrorCode {
    /// Returns the wire code for this error.
    pub fn code(&self) -> u32 {
        match self {
            ItemErrorCode::UnknownHandle => 0xC000_0001,
            ItemErrorCode::UnknownItemName => 0xC000_0002,
            ItemErrorCode::InvalidItemPath => 0xC000_0003,
            ItemErrorCode::BadType => 0xC000_0004,
            ItemErrorCode::OutOfRange => 0xC000_0005,
            ItemErrorCode::ReadOnly => 0xC000_0006,
            ItemErrorCode::WriteOnly => 0xC000_0007,
            ItemErrorCode::Rejected => 0xC000_00FF,
        }
    }

    /// Creates an error code from the wire code, if recognized.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0xC000_0001 => Some(ItemErrorCode::UnknownHandle),
            0xC000_0002 => Some(ItemErrorCode::UnknownItemName),
            0xC000_0003 => Some(ItemErrorCode::InvalidItemPath),
            0xC000_0004 => Some(ItemErrorCode::BadType),
            0xC000_0005 => Some(ItemErrorCode::OutOfRange),
            0xC000_0006 => Some(ItemErrorCode::ReadOnly),
            0xC000_0007 => Some(ItemErrorCode::WriteOnly),
            0xC000_00FF => Some(ItemErrorCode::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ItemErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemErrorCode::UnknownHandle => write!(f, "unknown item handle"),
            ItemErrorCode::UnknownItemName => write!(f, "unknown item name"),
            ItemErrorCode::InvalidItemPath => write!(f, "invalid item path"),
            ItemErrorCode::BadType => write!(f, "value type not accepted"),
            ItemErrorCode::OutOfRange => write!(f, "value out of range"),
            ItemErrorCode::ReadOnly => write!(f, "item is read-only"),
            ItemErrorCode::WriteOnly => write!(f, "item is write-only"),
            ItemErrorCode::Rejected => write!(f, "rejected by server"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_names() {
        assert_eq!(Value::Bool(true).kind_name(), "bool");
        assert_eq!(Value::Float64(1.0).kind_name(), "float64");
        assert_eq!(Value::String("x".into()).kind_name(), "string");
        assert_eq!(Value::Null.kind_name(), "null");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int32(42).as_i64(), Some(42));
        assert_eq!(Value::Int32(42).as_f64(), Some(42.0));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Value::String("abc".into()).as_str(), Some("abc"));
        assert_eq!(Value::String("abc".into()).as_i64(), None);
    }

    #[test]
    fn test_value_from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(1.5f64), Value::Float64(1.5));
        assert_eq!(Value::from("tag"), Value::String("tag".into()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_value_is_numeric() {
        assert!(Value::Int8(1).is_numeric());
        assert!(Value::Float32(1.0).is_numeric());
        assert!(!Value::Bool(true).is_numeric());
        assert!(!Value::Null.is_numeric());
    }

    #[test]
    fn test_quality_predicates() {
        assert!(Quality::Good.is_good());
        assert!(Quality::Good.is_usable());
        assert!(Quality::uncertain().is_usable());
        assert!(!Quality::uncertain().is_good());
        assert!(Quality::bad().is_bad());
        assert!(!Quality::bad().is_usable());
    }

    #[test]
    fn test_quality_status_word_round_trip() {
        for quality in [
            Quality::Good,
            Quality::Uncertain(UncertainReason::LastKnownValue),
            Quality::Bad(BadReason::CommFailure),
            Quality::Bad(BadReason::OutOfService),
            Quality::Bad(BadReason::Unknown),
        ] {
            assert_eq!(Quality::from_status_word(quality.to_status_word()), quality);
        }
    }

    #[test]
    fn test_item_error_code_round_trip() {
        for code in [
            ItemErrorCode::UnknownHandle,
            ItemErrorCode::BadType,
            ItemErrorCode::OutOfRange,
            ItemErrorCode::ReadOnly,
            ItemErrorCode::WriteOnly,
            ItemErrorCode::Rejected,
        ] {
            assert_eq!(ItemErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ItemErrorCode::from_code(0xDEAD_BEEF), None);
    }
}
