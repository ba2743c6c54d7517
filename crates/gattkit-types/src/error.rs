//! Error types for parsing identifiers and attribute UUIDs.

use thiserror::Error;

/// Errors that can occur while parsing textual representations of
/// gattkit types, such as [`BleUuid`](crate::uuid::BleUuid) strings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The input is not a recognized UUID form.
    ///
    /// Accepted forms are a 4 or 8 digit hex short UUID (with or without
    /// a `0x` prefix) or a full RFC 4122 UUID string.
    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
