//! # LDAP Client Core
//!
//! Async client-side LDAP protocol engine: multi-server connection
//! setup with failover, a response correlator that routes server
//! messages to per-operation queues, and the operation surface built
//! on both.
//!
//! ## Features
//!
//! - Prioritized multi-server failover (serial or staggered parallel race)
//! - Message correlation with ordered per-operation result streams
//! - Streaming search results with abandon support
//! - Referral chasing with a pluggable rebind policy
//! - Read-side back pressure against slow consumers
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_ldap_client::{LdapClient, LdapConfig, LdapResultExt};
//! use xavyo_ldap_client::proto::{Filter, Scope, SearchRequest};
//!
//! let config = LdapConfig::new("ldap.example.com", 389)
//!     .with_server("ldap2.example.com", 389);
//! let (conn, mut client) = LdapClient::connect(config).await?;
//! tokio::spawn(conn.drive());
//!
//! client.simple_bind("cn=admin,dc=example,dc=com", "secret").await?.success()?;
//! let search = SearchRequest::new("dc=example,dc=com", Scope::Subtree, Filter::eq("uid", "jdoe"));
//! let (entries, _result) = client.search(search).await?.collect().await?;
//! client.unbind().await?;
//! ```

pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod pool;
pub mod queue;
pub mod rebind;
pub mod search;
pub mod sort;
pub mod transport;

// Re-exports
pub use client::LdapClient;
pub use config::{ConnectPolicy, LdapConfig, ServerAddr};
pub use conn::LdapConnection;
pub use error::{ClientResult, LdapError, LdapResultExt};
pub use pool::{ServerPool, ServerStatus};
pub use queue::MessageQueue;
pub use rebind::{AnonymousRebind, RebindAuth, RebindPolicy, StaticRebind};
pub use search::{SearchItem, SearchStream};
pub use sort::{compare_entries, sort_entries, SortKey};
pub use transport::{Connector, TcpConnector, Transport, TransportStream};

pub use xavyo_ldap_proto as proto;
