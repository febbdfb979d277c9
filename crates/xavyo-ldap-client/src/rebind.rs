//! Authentication policy for referral chasing.
//!
//! When an operation is referred to another server the client opens a
//! connection there and must decide how to bind before re-issuing the
//! operation. A [`RebindPolicy`] makes that call per target server;
//! the default is to proceed anonymously.

use crate::error::{ClientResult, LdapError};

/// Credentials for a simple bind against a referred-to server.
#[derive(Clone, PartialEq, Eq)]
pub struct RebindAuth {
    pub dn: String,
    pub password: String,
}

impl RebindAuth {
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for RebindAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebindAuth")
            .field("dn", &self.dn)
            .field("password", &"***")
            .finish()
    }
}

/// Chooses bind credentials for a referral target. `None` means bind
/// anonymously.
pub trait RebindPolicy: Send + Sync {
    fn credentials_for(&self, host: &str, port: u16) -> Option<RebindAuth>;
}

/// Always proceeds anonymously. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousRebind;

impl RebindPolicy for AnonymousRebind {
    fn credentials_for(&self, _host: &str, _port: u16) -> Option<RebindAuth> {
        None
    }
}

/// Presents the same credentials to every referral target.
#[derive(Debug, Clone)]
pub struct StaticRebind {
    auth: RebindAuth,
}

impl StaticRebind {
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth: RebindAuth::new(dn, password),
        }
    }
}

impl RebindPolicy for StaticRebind {
    fn credentials_for(&self, _host: &str, _port: u16) -> Option<RebindAuth> {
        Some(self.auth.clone())
    }
}

/// Host and port named by a referral URL. Any DN or query part of the
/// URL is ignored; the original operation is re-issued as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReferralTarget {
    pub host: String,
    pub port: u16,
}

/// Parses `ldap://host[:port][/...]`. The scheme decides the default
/// port, 389 for `ldap` and 636 for `ldaps`.
pub(crate) fn parse_referral_url(url: &str) -> ClientResult<ReferralTarget> {
    let (rest, default_port) = if let Some(rest) = url.strip_prefix("ldap://") {
        (rest, 389)
    } else if let Some(rest) = url.strip_prefix("ldaps://") {
        (rest, 636)
    } else {
        return Err(LdapError::InvalidReferralUrl {
            url: url.to_owned(),
        });
    };
    let end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..end];
    if authority.is_empty() {
        return Err(LdapError::InvalidReferralUrl {
            url: url.to_owned(),
        });
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| LdapError::InvalidReferralUrl {
                url: url.to_owned(),
            })?;
            if host.is_empty() {
                return Err(LdapError::InvalidReferralUrl {
                    url: url.to_owned(),
                });
            }
            Ok(ReferralTarget {
                host: host.to_owned(),
                port,
            })
        }
        None => Ok(ReferralTarget {
            host: authority.to_owned(),
            port: default_port,
        }),
    }
}
