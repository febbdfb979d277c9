//! Client error taxonomy.
//!
//! The variants fall into three families that callers treat
//! differently: setup failures ([`LdapError::ConnectFailed`]), loss of
//! an established link ([`LdapError::ConnectionClosed`], broadcast to
//! every waiting task), and per-operation failures that leave the
//! connection usable.

use std::io;

use thiserror::Error;
use xavyo_ldap_proto::{LdapResult, ProtocolError};

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, LdapError>;

#[derive(Debug, Error)]
pub enum LdapError {
    /// Every candidate server was tried and none produced a connection.
    ///
    /// `last` names the final candidate and its failure; earlier
    /// failures are logged as they happen.
    #[error("connection setup failed after {attempted} candidate(s): {last}")]
    ConnectFailed {
        attempted: usize,
        last: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The connection died while operations were outstanding. Every
    /// task waiting on the connection observes this same reason.
    #[error("connection lost: {reason}")]
    ConnectionClosed { reason: String },

    /// The wait was cancelled from outside, not by the connection.
    #[error("response wait interrupted")]
    Interrupted,

    /// The peer sent bytes that do not parse as LDAP.
    #[error("protocol violation")]
    Protocol(#[from] ProtocolError),

    /// Transport I/O failed under an established connection.
    #[error("transport i/o error")]
    Io(#[from] io::Error),

    /// The server answered with a non-success result code.
    #[error("ldap result {}: {}", .result.code, .result.diagnostic)]
    ResultError { result: LdapResult },

    /// The server answered something other than what the operation
    /// can accept.
    #[error("unexpected response to {expected}: got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: String,
    },

    /// Referral chasing exceeded the configured hop budget.
    #[error("referral limit of {limit} hop(s) exceeded at {url}")]
    ReferralLimitExceeded { limit: u32, url: String },

    /// A referral URL this client cannot interpret.
    #[error("unsupported referral url: {url}")]
    InvalidReferralUrl { url: String },

    /// Rejected before any I/O happened.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl LdapError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    pub(crate) fn connect_failed(
        attempted: usize,
        last: Option<(String, io::Error)>,
    ) -> Self {
        match last {
            Some((server, source)) => Self::ConnectFailed {
                attempted,
                last: format!("{server}: {source}"),
                source: Some(source),
            },
            None => Self::ConnectFailed {
                attempted,
                last: "no candidate servers configured".to_owned(),
                source: None,
            },
        }
    }

    /// True when no connection was ever established.
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. })
    }

    /// True when an established connection was lost and every
    /// outstanding operation on it is gone with it.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    /// True for failures of a single operation that leave the
    /// connection itself healthy.
    pub fn is_operation_error(&self) -> bool {
        matches!(
            self,
            Self::ResultError { .. }
                | Self::UnexpectedResponse { .. }
                | Self::ReferralLimitExceeded { .. }
                | Self::InvalidReferralUrl { .. }
        )
    }
}

/// Turns a non-success [`LdapResult`] into an error, keeping referral
/// results intact for the referral-chasing layer.
pub trait LdapResultExt {
    fn success(self) -> ClientResult<LdapResult>;
}

impl LdapResultExt for LdapResult {
    fn success(self) -> ClientResult<LdapResult> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LdapError::ResultError { result: self })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xavyo_ldap_proto::ResultCode;

    #[test]
    fn classification_helpers() {
        let connect = LdapError::connect_failed(
            2,
            Some((
                "ldap2.example.com:389".into(),
                io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            )),
        );
        assert!(connect.is_connect_error());
        assert!(!connect.is_connection_lost());

        let lost = LdapError::closed("read error: reset by peer");
        assert!(lost.is_connection_lost());
        assert!(!lost.is_operation_error());

        let mut result = LdapResult::with_code(ResultCode::NoSuchObject);
        result.diagnostic = "no such entry".into();
        let op = LdapError::ResultError { result };
        assert!(op.is_operation_error());
        assert!(format!("{op}").contains("no such entry"));
    }

    #[test]
    fn success_helper_passes_and_fails() {
        assert!(LdapResult::success().success().is_ok());
        assert!(matches!(
            LdapResult::with_code(ResultCode::Busy).success(),
            Err(LdapError::ResultError { .. })
        ));
    }

    #[test]
    fn connect_failed_names_last_candidate() {
        let err = LdapError::connect_failed(
            3,
            Some((
                "ldap3.example.com:389".into(),
                io::Error::new(io::ErrorKind::TimedOut, "timed out"),
            )),
        );
        let text = format!("{err}");
        assert!(text.contains("3 candidate(s)"));
        assert!(text.contains("ldap3.example.com:389"));
    }
}
