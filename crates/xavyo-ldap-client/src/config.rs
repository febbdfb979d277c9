//! Client configuration.
//!
//! Timeouts are stored as plain integers so the whole struct
//! round-trips through serde without custom impls; callers get
//! [`Duration`] through the accessor methods.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientResult, LdapError};

const DEFAULT_PORT: u16 = 389;

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_backlog() -> usize {
    100
}

fn default_max_referral_hops() -> u32 {
    3
}

/// One directory server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddr {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How connection setup walks the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectPolicy {
    /// One candidate at a time, in list order.
    #[default]
    Serial,
    /// Staggered fan-out: attempts launch `stagger_ms` apart and the
    /// first to succeed wins. Zero launches every attempt at once.
    Parallel { stagger_ms: u64 },
}

impl ConnectPolicy {
    /// Fan-out with no stagger at all.
    pub fn parallel() -> Self {
        ConnectPolicy::Parallel { stagger_ms: 0 }
    }

    pub fn parallel_staggered(stagger: Duration) -> Self {
        ConnectPolicy::Parallel {
            stagger_ms: stagger.as_millis() as u64,
        }
    }
}

/// Settings for one logical client, covering setup, correlation and
/// referral behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Candidate servers in preference order. Must not be empty.
    pub servers: Vec<ServerAddr>,

    #[serde(default)]
    pub policy: ConnectPolicy,

    /// Per-candidate connect budget.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Buffered responses per correlation queue before the reader
    /// stops pulling from the socket.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,

    /// Chase referral results instead of surfacing them as errors.
    #[serde(default)]
    pub follow_referrals: bool,

    /// Referral hops allowed per operation before giving up.
    #[serde(default = "default_max_referral_hops")]
    pub max_referral_hops: u32,
}

impl LdapConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            servers: vec![ServerAddr::new(host, port)],
            policy: ConnectPolicy::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_backlog: default_max_backlog(),
            follow_referrals: false,
            max_referral_hops: default_max_referral_hops(),
        }
    }

    /// Appends a fallback server to the candidate list.
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.servers.push(ServerAddr::new(host, port));
        self
    }

    pub fn with_policy(mut self, policy: ConnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = max_backlog;
        self
    }

    pub fn with_follow_referrals(mut self, follow: bool) -> Self {
        self.follow_referrals = follow;
        self
    }

    pub fn with_max_referral_hops(mut self, hops: u32) -> Self {
        self.max_referral_hops = hops;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stagger(&self) -> Option<Duration> {
        match self.policy {
            ConnectPolicy::Serial => None,
            ConnectPolicy::Parallel { stagger_ms } => Some(Duration::from_millis(stagger_ms)),
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.servers.is_empty() {
            return Err(LdapError::invalid_config("no servers configured"));
        }
        if let Some(bad) = self.servers.iter().find(|s| s.host.is_empty()) {
            return Err(LdapError::invalid_config(format!(
                "server with empty host (port {})",
                bad.port
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(LdapError::invalid_config("connect_timeout_ms must be > 0"));
        }
        if self.max_backlog == 0 {
            return Err(LdapError::invalid_config("max_backlog must be > 0"));
        }
        Ok(())
    }
}
