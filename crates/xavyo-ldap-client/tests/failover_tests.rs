//! Multi-server failover and referral tests over real TCP.
//!
//! Tests cover:
//! - Serial and parallel candidate selection with dead servers
//! - Candidate reordering after involuntary loss
//! - Voluntary close keeping the candidate preferred
//! - Referral chasing, rebind credentials, hop teardown, and the hop budget

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::mock_server::{MockLdapServer, SearchScript};
use tokio::net::TcpListener;
use tokio::time::sleep;

use xavyo_ldap_client::proto::{Filter, ResultCode, Scope, SearchRequest};
use xavyo_ldap_client::{
    ConnectPolicy, LdapClient, LdapConfig, LdapError, ServerPool, ServerStatus, StaticRebind,
    TcpConnector,
};

/// A loopback port with nothing listening on it.
async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn subtree_search(base: &str) -> SearchRequest {
    SearchRequest::new(base, Scope::Subtree, Filter::present("objectClass"))
}

// =============================================================================
// Candidate selection
// =============================================================================

#[tokio::test]
async fn test_serial_failover_skips_dead_candidate() {
    let dead = refused_port().await;
    let server = MockLdapServer::start().await;

    let config = LdapConfig::new("127.0.0.1", dead).with_server(server.host(), server.port());
    let (conn, mut client) = LdapClient::connect(config).await.unwrap();
    conn.spawn();

    assert!(client.simple_bind("cn=a", "x").await.unwrap().is_success());

    let snapshot = client.pool().snapshot().await;
    assert_eq!(snapshot[0].addr.port, dead);
    assert_eq!(snapshot[0].status, ServerStatus::Failed);
    assert_eq!(snapshot[1].addr.port, server.port());
    assert_eq!(snapshot[1].status, ServerStatus::Connected);
}

#[tokio::test]
async fn test_all_candidates_down_reports_attempts() {
    let config = LdapConfig::new("127.0.0.1", refused_port().await)
        .with_server("127.0.0.1", refused_port().await);

    match LdapClient::connect(config).await {
        Err(LdapError::ConnectFailed { attempted, .. }) => assert_eq!(attempted, 2),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_parallel_race_finds_single_reachable() {
    let server = MockLdapServer::start().await;
    let config = LdapConfig::new("127.0.0.1", refused_port().await)
        .with_server("127.0.0.1", refused_port().await)
        .with_server(server.host(), server.port())
        .with_policy(ConnectPolicy::parallel());

    let (conn, mut client) = LdapClient::connect(config).await.unwrap();
    conn.spawn();

    assert!(client.simple_bind("cn=a", "x").await.unwrap().is_success());
    let active = client.pool().active().await.unwrap();
    assert_eq!(active.addr.port, server.port());
}

#[tokio::test]
async fn test_invalidate_demotes_and_next_open_picks_other() {
    let unreachable = refused_port().await;
    let b = MockLdapServer::start().await;
    let c = MockLdapServer::start().await;

    let config = LdapConfig::new("127.0.0.1", unreachable)
        .with_server(b.host(), b.port())
        .with_server(c.host(), c.port());
    let pool = ServerPool::new(&config, Arc::new(TcpConnector));

    let _first = pool.open().await.unwrap();
    assert_eq!(pool.active().await.unwrap().addr.port, b.port());

    pool.invalidate().await;
    let snapshot = pool.snapshot().await;
    assert_eq!(snapshot.last().unwrap().addr.port, b.port());
    assert_eq!(snapshot.last().unwrap().status, ServerStatus::Failed);

    // B is now tried last; C wins the next setup.
    let _second = pool.open().await.unwrap();
    assert_eq!(pool.active().await.unwrap().addr.port, c.port());
}

#[tokio::test]
async fn test_unbind_keeps_candidate_preferred() {
    let server = MockLdapServer::start().await;
    let (conn, mut client) = LdapClient::connect(server.config()).await.unwrap();
    let driver = conn.spawn();

    client.unbind().await.unwrap();
    driver.await.unwrap().unwrap();

    sleep(Duration::from_millis(30)).await;
    assert_eq!(server.unbind_count().await, 1);
    let snapshot = client.pool().snapshot().await;
    assert_eq!(snapshot[0].status, ServerStatus::Disconnected);
}

#[tokio::test]
async fn test_server_death_mid_search_invalidates_candidate() {
    let server = MockLdapServer::start().await;
    server.set_search(SearchScript::DieAfter(2)).await;
    let mut client = server.client().await;

    let mut stream = client.search(subtree_search("dc=example")).await.unwrap();

    let mut entries = 0;
    let err = loop {
        match stream.next().await {
            Ok(Some(_)) => entries += 1,
            Ok(None) => panic!("search completed on a dead connection"),
            Err(err) => break err,
        }
    };
    assert_eq!(entries, 2);
    assert!(matches!(err, LdapError::ConnectionClosed { .. }));

    let snapshot = client.pool().snapshot().await;
    assert_eq!(snapshot[0].status, ServerStatus::Failed);
}

// =============================================================================
// Referrals
// =============================================================================

#[tokio::test]
async fn test_referral_surfaced_when_following_disabled() {
    let a = MockLdapServer::start().await;
    let b = MockLdapServer::start().await;
    a.refer_operations_to(vec![b.url()]).await;

    let mut client = a.client().await;
    let result = client.delete("cn=elsewhere,dc=example").await.unwrap();
    assert_eq!(result.code, ResultCode::Referral);
    assert_eq!(result.referral, [b.url()]);
    assert!(b.binds().await.is_empty());
}

#[tokio::test]
async fn test_referral_followed_with_rebind_credentials() {
    let a = MockLdapServer::start().await;
    let b = MockLdapServer::start().await;
    a.refer_operations_to(vec![b.url()]).await;

    let config = a.config().with_follow_referrals(true);
    let (conn, client) = LdapClient::connect(config).await.unwrap();
    conn.spawn();
    let mut client =
        client.with_rebind_policy(Arc::new(StaticRebind::new("cn=svc,dc=example", "pw")));

    client.simple_bind("cn=admin,dc=example", "root").await.unwrap();
    let result = client.delete("cn=gone,dc=example").await.unwrap();
    assert!(result.is_success());

    // The original credentials went to A, the rebind policy's to B.
    assert_eq!(a.binds().await, ["cn=admin,dc=example"]);
    assert_eq!(b.binds().await, ["cn=svc,dc=example"]);

    // The hop connection is closed once the operation lands.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(b.unbind_count().await, 1);
}

#[tokio::test]
async fn test_failed_hop_bind_still_closes_hop_connection() {
    let a = MockLdapServer::start().await;
    let b = MockLdapServer::start().await;
    a.refer_operations_to(vec![b.url()]).await;
    b.set_bind_code(ResultCode::InvalidCredentials).await;

    let config = a.config().with_follow_referrals(true);
    let (conn, mut client) = LdapClient::connect(config).await.unwrap();
    conn.spawn();

    match client.delete("cn=gone,dc=example").await {
        Err(LdapError::ResultError { result }) => {
            assert_eq!(result.code, ResultCode::InvalidCredentials);
        }
        other => panic!("expected the hop bind to fail, got {other:?}"),
    }

    // The hop connection is torn down even though the hop failed.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(b.unbind_count().await, 1);
}

#[tokio::test]
async fn test_referral_loop_exhausts_hop_budget() {
    let a = MockLdapServer::start().await;
    let b = MockLdapServer::start().await;
    a.refer_operations_to(vec![b.url()]).await;
    b.refer_operations_to(vec![a.url()]).await;

    let config = a
        .config()
        .with_follow_referrals(true)
        .with_max_referral_hops(2);
    let (conn, mut client) = LdapClient::connect(config).await.unwrap();
    conn.spawn();

    match client.delete("cn=ping,dc=example").await {
        Err(LdapError::ReferralLimitExceeded { limit, .. }) => assert_eq!(limit, 2),
        other => panic!("expected ReferralLimitExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_referral_result_kept_as_result() {
    let server = MockLdapServer::start().await;
    server
        .set_search(SearchScript::Refer(vec![
            "ldap://other.example.com:10389".to_owned(),
        ]))
        .await;
    let mut client = server.client().await;

    let stream = client.search(subtree_search("dc=example")).await.unwrap();
    let (entries, result) = stream.collect().await.unwrap();
    assert!(entries.is_empty());
    assert_eq!(result.code, ResultCode::Referral);
    assert_eq!(result.referral, ["ldap://other.example.com:10389"]);
}
