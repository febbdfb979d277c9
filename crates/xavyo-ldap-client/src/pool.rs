//! Candidate server pool and connection setup.
//!
//! The pool owns the ordered candidate list and everything about how a
//! connection gets established: retry ordering, serial or staggered
//! parallel attempts, per-candidate timeouts, and the bookkeeping when
//! an established link goes away. It hands the winning transport to
//! the caller and keeps only the candidate's index; the socket itself
//! is owned by the connection driver from that point on.
//!
//! All mutation happens under one async mutex, so a setup sequence,
//! an invalidation, or a voluntary disconnect each observe and leave a
//! consistent list.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{ConnectPolicy, LdapConfig, ServerAddr};
use crate::error::{ClientResult, LdapError};
use crate::transport::{Connector, TransportStream};

/// Connection history of one candidate, which drives retry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Currently carrying the active connection.
    Connected,
    /// A previous connection ended voluntarily.
    Disconnected,
    /// Never attempted.
    NeverUsed,
    /// The last attempt or connection failed.
    Failed,
}

impl ServerStatus {
    /// Lower ranks are tried first. A cleanly closed server is the
    /// best bet, an untried one is next, and a known-bad one is the
    /// last resort.
    fn retry_rank(self) -> u8 {
        match self {
            ServerStatus::Connected => 0,
            ServerStatus::Disconnected => 1,
            ServerStatus::NeverUsed => 2,
            ServerStatus::Failed => 3,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Connected => "connected",
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::NeverUsed => "never-used",
            ServerStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One candidate and its status, as copied out by [`ServerPool::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub addr: ServerAddr,
    pub status: ServerStatus,
}

#[derive(Debug)]
struct PoolState {
    entries: Vec<ServerEntry>,
    /// Index of the entry carrying the active connection.
    active: Option<usize>,
}

/// Prioritized, self-reordering list of directory servers.
pub struct ServerPool {
    state: Mutex<PoolState>,
    connector: Arc<dyn Connector>,
    policy: ConnectPolicy,
    connect_timeout: Duration,
}

impl fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPool")
            .field("policy", &self.policy)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ServerPool {
    pub fn new(config: &LdapConfig, connector: Arc<dyn Connector>) -> Self {
        let entries = config
            .servers
            .iter()
            .map(|addr| ServerEntry {
                addr: addr.clone(),
                status: ServerStatus::NeverUsed,
            })
            .collect();
        Self {
            state: Mutex::new(PoolState {
                entries,
                active: None,
            }),
            connector,
            policy: config.policy,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Establishes a connection to the best available candidate.
    ///
    /// Candidates are re-sorted by status first, then tried according
    /// to the configured policy. On success the winner is marked
    /// [`ServerStatus::Connected`] and remembered as active; every
    /// candidate that failed along the way is marked
    /// [`ServerStatus::Failed`].
    pub async fn open(&self) -> ClientResult<TransportStream> {
        let mut state = self.state.lock().await;
        state.active = None;
        state.entries.sort_by_key(|e| e.status.retry_rank());

        let outcome = match self.policy {
            ConnectPolicy::Serial => self.open_serial(&mut state.entries).await,
            ConnectPolicy::Parallel { stagger_ms } => {
                self.open_parallel(&mut state.entries, Duration::from_millis(stagger_ms))
                    .await
            }
        };

        match outcome {
            Ok((idx, stream)) => {
                state.entries[idx].status = ServerStatus::Connected;
                state.active = Some(idx);
                info!(server = %state.entries[idx].addr, "ldap connection established");
                Ok(stream)
            }
            Err(err) => Err(err),
        }
    }

    async fn attempt(&self, addr: &ServerAddr) -> io::Result<TransportStream> {
        attempt_with(&self.connector, addr, self.connect_timeout).await
    }

    async fn open_serial(
        &self,
        entries: &mut [ServerEntry],
    ) -> ClientResult<(usize, TransportStream)> {
        let mut last: Option<(String, io::Error)> = None;
        for idx in 0..entries.len() {
            let addr = entries[idx].addr.clone();
            debug!(server = %addr, "attempting ldap connect");
            match self.attempt(&addr).await {
                Ok(stream) => return Ok((idx, stream)),
                Err(err) => {
                    debug!(server = %addr, error = %err, "candidate unreachable");
                    entries[idx].status = ServerStatus::Failed;
                    last = Some((addr.to_string(), err));
                }
            }
        }
        Err(LdapError::connect_failed(entries.len(), last))
    }

    /// Staggered fan-out. Attempts launch `stagger` apart; the first
    /// to succeed wins, stragglers are aborted, and any socket a
    /// losing attempt managed to open is closed before this returns.
    async fn open_parallel(
        &self,
        entries: &mut [ServerEntry],
        stagger: Duration,
    ) -> ClientResult<(usize, TransportStream)> {
        let total = entries.len();
        let mut set: JoinSet<(usize, io::Result<TransportStream>)> = JoinSet::new();
        let mut winner: Option<(usize, TransportStream)> = None;
        let mut last: Option<(String, io::Error)> = None;

        let mut spawned = 0;
        while spawned < total && winner.is_none() {
            let idx = spawned;
            let addr = entries[idx].addr.clone();
            let connector = self.connector.clone();
            let budget = self.connect_timeout;
            debug!(server = %addr, "launching connect attempt");
            set.spawn(async move {
                let result = attempt_with(&connector, &addr, budget).await;
                (idx, result)
            });
            spawned += 1;

            if spawned == total {
                break;
            }
            if stagger.is_zero() {
                continue;
            }
            // Give the attempts already in flight a head start. The
            // pause ends early if one of them wins, or if all of them
            // have already failed and waiting would serve nothing.
            let pause = tokio::time::sleep(stagger);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    joined = set.join_next() => match joined {
                        Some(Ok((idx, Ok(stream)))) => {
                            winner = Some((idx, stream));
                            break;
                        }
                        Some(Ok((idx, Err(err)))) => {
                            debug!(server = %entries[idx].addr, error = %err, "candidate unreachable");
                            entries[idx].status = ServerStatus::Failed;
                            last = Some((entries[idx].addr.to_string(), err));
                        }
                        Some(Err(join_err)) => {
                            debug!(error = %join_err, "connect attempt did not finish");
                        }
                        None => break,
                    },
                    _ = &mut pause => break,
                }
            }
        }

        while winner.is_none() {
            match set.join_next().await {
                Some(Ok((idx, Ok(stream)))) => winner = Some((idx, stream)),
                Some(Ok((idx, Err(err)))) => {
                    debug!(server = %entries[idx].addr, error = %err, "candidate unreachable");
                    entries[idx].status = ServerStatus::Failed;
                    last = Some((entries[idx].addr.to_string(), err));
                }
                Some(Err(join_err)) => {
                    debug!(error = %join_err, "connect attempt did not finish");
                }
                None => break,
            }
        }

        match winner {
            Some((idx, stream)) => {
                // The race is decided. Abort what is still in flight
                // and close any socket a finished loser opened. An
                // aborted attempt never produced a socket, so its
                // candidate keeps its previous status.
                set.abort_all();
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok((lost, Ok(late_stream))) => {
                            entries[lost].status = ServerStatus::Failed;
                            debug!(server = %entries[lost].addr, "closing losing connect attempt");
                            drop(late_stream);
                        }
                        Ok((lost, Err(err))) => {
                            debug!(server = %entries[lost].addr, error = %err, "candidate unreachable");
                            entries[lost].status = ServerStatus::Failed;
                        }
                        Err(_aborted) => {}
                    }
                }
                Ok((idx, stream))
            }
            None => Err(LdapError::connect_failed(total, last)),
        }
    }

    /// Records the involuntary loss of the active connection: the
    /// candidate is marked failed and demoted to the back of the list
    /// so the next setup tries everything else first.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        let Some(idx) = state.active.take() else {
            return;
        };
        let mut entry = state.entries.remove(idx);
        entry.status = ServerStatus::Failed;
        warn!(server = %entry.addr, "active ldap server lost, demoting");
        state.entries.push(entry);
    }

    /// Records a voluntary close of the active connection. The server
    /// keeps its place in the order and is preferred on the next
    /// setup. Calling this without an active connection is a no-op.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        let Some(idx) = state.active.take() else {
            return;
        };
        state.entries[idx].status = ServerStatus::Disconnected;
        debug!(server = %state.entries[idx].addr, "ldap connection released");
    }

    /// Independent copy of the candidate list and settings, with no
    /// active connection. Used to derive a pool for a referral or
    /// other handoff without disturbing this one. A candidate this
    /// pool shows as connected carries over as disconnected; the copy
    /// holds no connection to it.
    pub async fn clone_for_handoff(&self) -> ServerPool {
        let state = self.state.lock().await;
        let entries = state
            .entries
            .iter()
            .cloned()
            .map(|mut entry| {
                if entry.status == ServerStatus::Connected {
                    entry.status = ServerStatus::Disconnected;
                }
                entry
            })
            .collect();
        ServerPool {
            state: Mutex::new(PoolState {
                entries,
                active: None,
            }),
            connector: self.connector.clone(),
            policy: self.policy,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Moves (or inserts) a server to the front of the list so the
    /// next setup tries it first.
    pub async fn prefer(&self, host: &str, port: u16) {
        let mut state = self.state.lock().await;
        let active_addr = state.active.map(|i| state.entries[i].addr.clone());
        let mut entry = match state
            .entries
            .iter()
            .position(|e| e.addr.host == host && e.addr.port == port)
        {
            Some(pos) => state.entries.remove(pos),
            None => ServerEntry {
                addr: ServerAddr::new(host, port),
                status: ServerStatus::NeverUsed,
            },
        };
        // Setup re-sorts by status, so the front seat only holds if
        // the pinned entry also carries the best non-active rank.
        if entry.status != ServerStatus::Connected {
            entry.status = ServerStatus::Disconnected;
        }
        state.entries.insert(0, entry);
        state.active =
            active_addr.and_then(|addr| state.entries.iter().position(|e| e.addr == addr));
    }

    /// Copy of the candidate list in its current order.
    pub async fn snapshot(&self) -> Vec<ServerEntry> {
        self.state.lock().await.entries.clone()
    }

    /// The candidate carrying the active connection, if any.
    pub async fn active(&self) -> Option<ServerEntry> {
        let state = self.state.lock().await;
        state.active.map(|i| state.entries[i].clone())
    }
}

async fn attempt_with(
    connector: &Arc<dyn Connector>,
    addr: &ServerAddr,
    budget: Duration,
) -> io::Result<TransportStream> {
    match timeout(budget, connector.connect(&addr.host, addr.port)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out after {budget:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Instant;

    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

    #[derive(Clone)]
    enum Script {
        Accept,
        AcceptAfter(Duration),
        Refuse,
        RefuseAfter(Duration),
        Hang,
    }

    /// Stream wrapper that counts drops, so tests can prove losing
    /// sockets get closed.
    struct TrackedStream {
        inner: DuplexStream,
        closed: Arc<AtomicUsize>,
    }

    impl Drop for TrackedStream {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AsyncRead for TrackedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TrackedStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    #[derive(Default)]
    struct ScriptedConnector {
        scripts: std::sync::Mutex<HashMap<String, Script>>,
        attempts: std::sync::Mutex<Vec<String>>,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
            let connector = Self::default();
            {
                let mut map = connector.scripts.lock().unwrap();
                for (key, script) in scripts {
                    map.insert((*key).to_owned(), script.clone());
                }
            }
            Arc::new(connector)
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, host: &str, port: u16) -> io::Result<TransportStream> {
            let key = format!("{host}:{port}");
            self.attempts.lock().unwrap().push(key.clone());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or(Script::Refuse);
            match script {
                Script::Accept => {}
                Script::AcceptAfter(delay) => tokio::time::sleep(delay).await,
                Script::Refuse => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                }
                Script::RefuseAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
                }
                Script::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (local, _remote) = tokio::io::duplex(64);
            Ok(Box::new(TrackedStream {
                inner: local,
                closed: self.closed.clone(),
            }))
        }
    }

    fn config(hosts: &[&str]) -> LdapConfig {
        let mut config = LdapConfig::new(hosts[0], 389);
        for host in &hosts[1..] {
            config = config.with_server(*host, 389);
        }
        config
    }

    fn statuses(entries: &[ServerEntry]) -> Vec<(String, ServerStatus)> {
        entries
            .iter()
            .map(|e| (e.addr.host.clone(), e.status))
            .collect()
    }

    #[tokio::test]
    async fn serial_stops_at_first_reachable() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Refuse),
            ("b:389", Script::Accept),
            ("c:389", Script::Accept),
        ]);
        let pool = ServerPool::new(&config(&["a", "b", "c"]), connector.clone());

        let stream = pool.open().await.unwrap();
        drop(stream);

        assert_eq!(connector.attempts(), vec!["a:389", "b:389"]);
        assert_eq!(
            statuses(&pool.snapshot().await),
            vec![
                ("a".into(), ServerStatus::Failed),
                ("b".into(), ServerStatus::Connected),
                ("c".into(), ServerStatus::NeverUsed),
            ]
        );
        assert_eq!(pool.active().await.unwrap().addr.host, "b");
    }

    #[tokio::test]
    async fn serial_exhaustion_reports_last_failure() {
        let connector =
            ScriptedConnector::new(&[("a:389", Script::Refuse), ("b:389", Script::Refuse)]);
        let pool = ServerPool::new(&config(&["a", "b"]), connector);

        match pool.open().await {
            Err(LdapError::ConnectFailed { attempted, last, .. }) => {
                assert_eq!(attempted, 2);
                assert!(last.contains("b:389"), "last failure was {last}");
            }
            Err(other) => panic!("expected ConnectFailed, got {other:?}"),
            Ok(_) => panic!("expected ConnectFailed, got a stream"),
        }
        assert!(pool.active().await.is_none());
    }

    #[tokio::test]
    async fn retry_order_prefers_disconnected_then_unused_then_failed() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Accept),
            ("b:389", Script::Accept),
            ("c:389", Script::Accept),
        ]);
        let pool = ServerPool::new(&config(&["a", "b", "c"]), connector.clone());
        {
            let mut state = pool.state.lock().await;
            state.entries[0].status = ServerStatus::Failed; // a
            state.entries[1].status = ServerStatus::NeverUsed; // b
            state.entries[2].status = ServerStatus::Disconnected; // c
        }

        pool.open().await.unwrap();

        // Disconnected beats never-used beats failed.
        assert_eq!(connector.attempts(), vec!["c:389"]);
        assert_eq!(pool.active().await.unwrap().addr.host, "c");
    }

    #[tokio::test]
    async fn sort_is_stable_for_equal_status() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Accept),
            ("b:389", Script::Accept),
        ]);
        let pool = ServerPool::new(&config(&["a", "b"]), connector.clone());

        pool.open().await.unwrap();
        // Both never-used: configuration order decides.
        assert_eq!(connector.attempts(), vec!["a:389"]);
    }

    #[tokio::test]
    async fn parallel_race_cancels_hung_attempt() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Hang),
            ("b:389", Script::AcceptAfter(Duration::from_millis(30))),
            ("c:389", Script::Refuse),
        ]);
        let cfg = config(&["a", "b", "c"]).with_policy(ConnectPolicy::parallel());
        let pool = ServerPool::new(&cfg, connector.clone());

        let stream = pool.open().await.unwrap();

        let mut attempts = connector.attempts();
        attempts.sort();
        assert_eq!(attempts, vec!["a:389", "b:389", "c:389"]);

        let snapshot = pool.snapshot().await;
        let status_of = |host: &str| {
            snapshot
                .iter()
                .find(|e| e.addr.host == host)
                .map(|e| e.status)
                .unwrap()
        };
        assert_eq!(status_of("b"), ServerStatus::Connected);
        assert_eq!(status_of("c"), ServerStatus::Failed);
        // The hung attempt was aborted before producing a socket, so
        // its candidate was never judged.
        assert_eq!(status_of("a"), ServerStatus::NeverUsed);

        // The claimed stream is the only socket ever opened, and it
        // stays open until the caller drops it.
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parallel_closes_losing_socket() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Accept),
            ("b:389", Script::Accept),
        ]);
        let cfg = config(&["a", "b"]).with_policy(ConnectPolicy::parallel());
        let pool = ServerPool::new(&cfg, connector.clone());

        let stream = pool.open().await.unwrap();

        // Both attempts completed; one stream was claimed, the other
        // was closed during cleanup.
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);

        let snapshot = pool.snapshot().await;
        let connected = snapshot
            .iter()
            .filter(|e| e.status == ServerStatus::Connected)
            .count();
        let failed = snapshot
            .iter()
            .filter(|e| e.status == ServerStatus::Failed)
            .count();
        assert_eq!((connected, failed), (1, 1));

        drop(stream);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stagger_gives_the_leader_a_head_start() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::AcceptAfter(Duration::from_millis(50))),
            ("b:389", Script::Accept),
        ]);
        let cfg = config(&["a", "b"])
            .with_policy(ConnectPolicy::parallel_staggered(Duration::from_millis(400)));
        let pool = ServerPool::new(&cfg, connector.clone());

        pool.open().await.unwrap();

        // The leader won inside its stagger window; the second
        // candidate was never even attempted.
        assert_eq!(connector.attempts(), vec!["a:389"]);
        assert_eq!(pool.active().await.unwrap().addr.host, "a");
    }

    #[tokio::test]
    async fn stagger_moves_on_early_when_leader_fails() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Refuse),
            ("b:389", Script::Accept),
        ]);
        let cfg = config(&["a", "b"])
            .with_policy(ConnectPolicy::parallel_staggered(Duration::from_millis(400)));
        let pool = ServerPool::new(&cfg, connector.clone());

        let started = Instant::now();
        pool.open().await.unwrap();

        // No reason to sit out the stagger once every attempt in
        // flight has already failed.
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(connector.attempts(), vec!["a:389", "b:389"]);
    }

    #[tokio::test]
    async fn parallel_exhaustion_reports_failure() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Refuse),
            ("b:389", Script::RefuseAfter(Duration::from_millis(20))),
        ]);
        let cfg = config(&["a", "b"]).with_policy(ConnectPolicy::parallel());
        let pool = ServerPool::new(&cfg, connector);

        match pool.open().await {
            Err(LdapError::ConnectFailed { attempted, .. }) => assert_eq!(attempted, 2),
            Err(other) => panic!("expected ConnectFailed, got {other:?}"),
            Ok(_) => panic!("expected ConnectFailed, got a stream"),
        }
    }

    #[tokio::test]
    async fn connect_timeout_fails_the_candidate() {
        let connector =
            ScriptedConnector::new(&[("a:389", Script::Hang), ("b:389", Script::Accept)]);
        let cfg = config(&["a", "b"]).with_connect_timeout(Duration::from_millis(50));
        let pool = ServerPool::new(&cfg, connector.clone());

        pool.open().await.unwrap();

        assert_eq!(connector.attempts(), vec!["a:389", "b:389"]);
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot[0].status, ServerStatus::Failed);
        assert_eq!(snapshot[1].status, ServerStatus::Connected);
    }

    #[tokio::test]
    async fn invalidate_demotes_and_next_open_avoids_it() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Accept),
            ("b:389", Script::Accept),
            ("c:389", Script::Accept),
        ]);
        let pool = ServerPool::new(&config(&["a", "b", "c"]), connector.clone());

        pool.open().await.unwrap();
        assert_eq!(pool.active().await.unwrap().addr.host, "a");

        pool.invalidate().await;
        assert!(pool.active().await.is_none());
        assert_eq!(
            statuses(&pool.snapshot().await),
            vec![
                ("b".into(), ServerStatus::NeverUsed),
                ("c".into(), ServerStatus::NeverUsed),
                ("a".into(), ServerStatus::Failed),
            ]
        );

        pool.open().await.unwrap();
        assert_eq!(pool.active().await.unwrap().addr.host, "b");
    }

    #[tokio::test]
    async fn disconnect_keeps_preference_and_is_idempotent() {
        let connector =
            ScriptedConnector::new(&[("a:389", Script::Accept), ("b:389", Script::Accept)]);
        let pool = ServerPool::new(&config(&["a", "b"]), connector.clone());

        pool.open().await.unwrap();
        pool.disconnect().await;
        pool.disconnect().await;

        assert_eq!(
            statuses(&pool.snapshot().await),
            vec![
                ("a".into(), ServerStatus::Disconnected),
                ("b".into(), ServerStatus::NeverUsed),
            ]
        );

        // A cleanly closed server is first choice on reconnect.
        pool.open().await.unwrap();
        assert_eq!(pool.active().await.unwrap().addr.host, "a");
    }

    #[tokio::test]
    async fn handoff_copy_is_independent() {
        let connector = ScriptedConnector::new(&[
            ("a:389", Script::Accept),
            ("referred:10389", Script::Accept),
        ]);
        let pool = ServerPool::new(&config(&["a"]), connector.clone());
        pool.open().await.unwrap();

        let handoff = pool.clone_for_handoff().await;
        assert!(handoff.active().await.is_none());

        handoff.prefer("referred", 10389).await;
        handoff.open().await.unwrap();

        assert_eq!(handoff.active().await.unwrap().addr.host, "referred");
        // The original pool never saw any of it.
        assert_eq!(pool.active().await.unwrap().addr.host, "a");
        assert_eq!(pool.snapshot().await.len(), 1);
    }
}
