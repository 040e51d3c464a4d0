//! Trace and span identifiers.
//!
//! Mirrors the teacher's `opentelemetry::trace::{TraceId, SpanId}` (fixed-width
//! byte arrays rendered as lowercase hex) rather than reaching for a generic
//! "id" newtype around `String`, so invalid/zero ids are a compile-time
//! distinguishable state (`TraceId::INVALID`) instead of a runtime check on
//! string length.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// A parse failure for `TraceId`/`SpanId` from a hex string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("expected {expected} hex characters, found {found}")]
    WrongLength { expected: usize, found: usize },
    #[error("invalid hex digit in id")]
    InvalidHex,
}

/// 32-hex-char identifier, unique per trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub const INVALID: TraceId = TraceId([0; 16]);

    /// Generates a fresh trace id from a version-4 UUID's bytes.
    pub fn new_random() -> Self {
        TraceId(*Uuid::new_v4().as_bytes())
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0; 16]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(bytes)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = parse_hex_bytes::<16>(s)?;
        Ok(TraceId(bytes))
    }
}

/// 16-hex-char identifier, unique per span.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId([u8; 8]);

impl SpanId {
    pub const INVALID: SpanId = SpanId([0; 8]);

    /// Generates a fresh span id from the last 8 bytes (16 hex chars) of a
    /// version-4 UUID, per the "spanId is the last 16 hex chars of a fresh
    /// uuid" property.
    pub fn new_random() -> Self {
        let uuid = Uuid::new_v4();
        let all = uuid.as_bytes();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&all[8..16]);
        SpanId(bytes)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0; 8]
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(bytes)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

impl FromStr for SpanId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = parse_hex_bytes::<8>(s)?;
        Ok(SpanId(bytes))
    }
}

fn parse_hex_bytes<const N: usize>(s: &str) -> Result<[u8; N], IdParseError> {
    if s.len() != N * 2 {
        return Err(IdParseError::WrongLength {
            expected: N * 2,
            found: s.len(),
        });
    }
    let mut out = [0u8; N];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hi = hex_val(chunk[0]).ok_or(IdParseError::InvalidHex)?;
        let lo = hex_val(chunk[1]).ok_or(IdParseError::InvalidHex)?;
        out[i] = (hi << 4) | lo;
    }
    Ok(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// A fresh 32-hex-char UUIDv4, used for `event_id`.
pub fn new_event_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn trace_id_round_trips_through_display_and_parse() {
        let id = TraceId::new_random();
        let s = id.to_string();
        assert_eq!(s.len(), 32);
        assert_eq!(s.parse::<TraceId>().unwrap(), id);
    }

    #[test]
    fn span_id_round_trips_through_display_and_parse() {
        let id = SpanId::new_random();
        let s = id.to_string();
        assert_eq!(s.len(), 16);
        assert_eq!(s.parse::<SpanId>().unwrap(), id);
    }

    #[test]
    fn invalid_ids_are_all_zero() {
        assert!(!TraceId::INVALID.is_valid());
        assert!(!SpanId::INVALID.is_valid());
        assert!(TraceId::new_random().is_valid());
    }

    #[test]
    fn event_ids_are_unique_and_well_formed() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = new_event_id();
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(id), "event_id collision");
        }
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("abc".parse::<TraceId>().is_err());
    }

    #[test]
    fn parse_rejects_invalid_hex() {
        assert!("zz000000000000000000000000000000".parse::<TraceId>().is_err());
    }
}
