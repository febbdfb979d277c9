//! Error types for BER parsing and LDAP message decoding.

use thiserror::Error;

/// Result alias for protocol-level operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding LDAP protocol elements.
///
/// Any of these on a live connection means the byte stream can no longer
/// be trusted; callers are expected to tear the connection down rather
/// than resynchronize.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An element header or body ran past the end of the buffer.
    #[error("truncated BER element")]
    Truncated,

    /// Indefinite lengths are forbidden by LDAP's BER profile.
    #[error("indefinite BER length is not permitted")]
    IndefiniteLength,

    /// A length octet count outside the supported range.
    #[error("unsupported BER length form ({octets} octets)")]
    LengthTooLong { octets: usize },

    /// A single message larger than the configured ceiling.
    #[error("message of {length} bytes exceeds the {max} byte limit")]
    MessageTooLarge { length: usize, max: usize },

    /// An element carried a different tag than the grammar requires.
    #[error("unexpected tag 0x{found:02x} (expected 0x{expected:02x})")]
    UnexpectedTag { expected: u8, found: u8 },

    /// A protocol op tag this implementation does not know.
    #[error("unknown protocol op tag 0x{tag:02x}")]
    UnknownOp { tag: u8 },

    /// INTEGER or ENUMERATED with an empty or oversized body.
    #[error("invalid integer encoding ({length} content octets)")]
    InvalidInteger { length: usize },

    /// BOOLEAN with a body that is not exactly one octet.
    #[error("invalid boolean encoding")]
    InvalidBoolean,

    /// A directory string that is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// Structural violations not covered by a more specific variant.
    #[error("malformed {element}: {detail}")]
    Malformed {
        element: &'static str,
        detail: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(element: &'static str, detail: &'static str) -> Self {
        Self::Malformed { element, detail }
    }
}
