//! Operation-level client handle.
//!
//! An [`LdapClient`] is a cheap clone sharing one connection; cloning
//! it is how concurrent operations are issued. Each operation gets a
//! fresh message ID, registers its correlation queue before the first
//! byte is written, and then waits on that queue alone, so responses
//! can never race past their consumer or interleave across handles.

use std::sync::Arc;

use tracing::debug;

use xavyo_ldap_proto::{
    AddRequest, Attribute, BindRequest, CompareRequest, Control, ExtendedRequest,
    ExtendedResponse, LdapMessage, LdapResult, MessageId, ModifyChange, ModifyDnRequest,
    ModifyRequest, ProtocolOp, ResultCode, SearchRequest,
};

use crate::config::LdapConfig;
use crate::conn::{establish, ConnShared, LdapConnection};
use crate::error::{ClientResult, LdapError, LdapResultExt};
use crate::pool::ServerPool;
use crate::queue::MessageQueue;
use crate::rebind::{parse_referral_url, AnonymousRebind, RebindPolicy};
use crate::search::SearchStream;
use crate::transport::{Connector, TcpConnector};

/// Handle for issuing operations over one LDAP connection.
#[derive(Clone)]
pub struct LdapClient {
    shared: Arc<ConnShared>,
    pool: Arc<ServerPool>,
    config: Arc<LdapConfig>,
    rebind: Arc<dyn RebindPolicy>,
    next_controls: Vec<Control>,
}

impl LdapClient {
    /// Connects to the best candidate in `config` over plain TCP.
    ///
    /// Returns the connection driver and the first client handle. The
    /// driver must be given its own task, typically
    /// `tokio::spawn(conn.drive())`, before any operation can
    /// complete.
    pub async fn connect(config: LdapConfig) -> ClientResult<(LdapConnection, LdapClient)> {
        Self::connect_with(config, Arc::new(TcpConnector)).await
    }

    /// Same as [`connect`], with a caller-supplied transport factory.
    ///
    /// [`connect`]: LdapClient::connect
    pub async fn connect_with(
        config: LdapConfig,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<(LdapConnection, LdapClient)> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = Arc::new(ServerPool::new(&config, connector));
        Self::from_pool(pool, config, Arc::new(AnonymousRebind)).await
    }

    async fn from_pool(
        pool: Arc<ServerPool>,
        config: Arc<LdapConfig>,
        rebind: Arc<dyn RebindPolicy>,
    ) -> ClientResult<(LdapConnection, LdapClient)> {
        let stream = pool.open().await?;
        let (conn, shared) = establish(stream, pool.clone(), config.max_backlog);
        let client = LdapClient {
            shared,
            pool,
            config,
            rebind,
            next_controls: Vec::new(),
        };
        Ok((conn, client))
    }

    /// Credentials to present when chasing referrals to other servers.
    pub fn with_rebind_policy(mut self, policy: Arc<dyn RebindPolicy>) -> Self {
        self.rebind = policy;
        self
    }

    /// Attaches controls to the next operation issued on this handle.
    /// They apply to that one operation only.
    pub fn with_controls(&mut self, controls: Vec<Control>) -> &mut Self {
        self.next_controls = controls;
        self
    }

    /// The candidate pool backing this connection.
    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// True once the underlying connection has been closed or lost.
    pub async fn is_closed(&self) -> bool {
        self.shared.router.close_reason().await.is_some()
    }

    /// Registers interest, then writes. In that order: once the
    /// request is on the wire its response must already have a home.
    async fn submit(&mut self, op: ProtocolOp) -> ClientResult<(MessageId, MessageQueue)> {
        let controls = std::mem::take(&mut self.next_controls);
        let id = self.shared.allocate_id();
        let queue = self.shared.router.register(id).await?;
        let msg = LdapMessage::with_controls(id, op, controls);
        if let Err(err) = self.shared.send(&msg).await {
            self.shared.router.abandon(id).await;
            return Err(err);
        }
        Ok((id, queue))
    }

    async fn await_terminal(queue: &MessageQueue, expected: &'static str) -> ClientResult<LdapMessage> {
        match queue.await_next().await? {
            Some(msg) => Ok(msg),
            None => Err(LdapError::UnexpectedResponse {
                expected,
                actual: "end of responses".to_owned(),
            }),
        }
    }

    fn expect_response(msg: LdapMessage, expected: &'static str) -> ClientResult<LdapResult> {
        let name = msg.op.name();
        match msg.op.into_result() {
            Some(result) if name == expected => Ok(result),
            _ => Err(LdapError::UnexpectedResponse {
                expected,
                actual: name.to_owned(),
            }),
        }
    }

    /// One round trip with no referral handling.
    async fn resolve_plain(
        &mut self,
        op: ProtocolOp,
        expected: &'static str,
    ) -> ClientResult<LdapResult> {
        let (_, queue) = self.submit(op).await?;
        let msg = Self::await_terminal(&queue, expected).await?;
        Self::expect_response(msg, expected)
    }

    /// One round trip, chasing referral results when configured to.
    async fn resolve(&mut self, op: ProtocolOp, expected: &'static str) -> ClientResult<LdapResult> {
        if !self.config.follow_referrals {
            return self.resolve_plain(op, expected).await;
        }
        let result = self.resolve_plain(op.clone(), expected).await?;
        if !result.is_referral() {
            return Ok(result);
        }
        self.chase_referral(op, expected, result).await
    }

    /// Re-issues `op` against each referred server in turn, binding
    /// there per the rebind policy, until a non-referral result or the
    /// hop budget runs out. Each hop gets its own connection derived
    /// from this pool, and that connection is closed when the hop is
    /// done with it.
    async fn chase_referral(
        &self,
        op: ProtocolOp,
        expected: &'static str,
        mut result: LdapResult,
    ) -> ClientResult<LdapResult> {
        let limit = self.config.max_referral_hops;
        for hop in 0..limit {
            let Some(url) = result.referral.first().cloned() else {
                return Err(LdapError::InvalidReferralUrl {
                    url: "referral result without URLs".to_owned(),
                });
            };
            let target = parse_referral_url(&url)?;
            debug!(hop, url = %url, "following referral");

            let handoff = self.pool.clone_for_handoff().await;
            handoff.prefer(&target.host, target.port).await;

            // The derived handle must not chase on its own; hops are
            // counted here.
            let mut hop_config = (*self.config).clone();
            hop_config.follow_referrals = false;

            let (conn, mut derived) = LdapClient::from_pool(
                Arc::new(handoff),
                Arc::new(hop_config),
                self.rebind.clone(),
            )
            .await?;
            let _driver = conn.spawn();

            let bind = match self.rebind.credentials_for(&target.host, target.port) {
                Some(auth) => BindRequest::simple(auth.dn, auth.password),
                None => BindRequest::simple("", ""),
            };
            let outcome = Self::hop_round_trip(&mut derived, bind, op.clone(), expected).await;

            // The hop connection comes down whether or not the hop
            // worked.
            if let Err(err) = derived.unbind().await {
                debug!(error = %err, "referral connection close failed");
            }
            let next = outcome?;

            if !next.is_referral() {
                return Ok(next);
            }
            result = next;
        }
        Err(LdapError::ReferralLimitExceeded {
            limit,
            url: result.referral.first().cloned().unwrap_or_default(),
        })
    }

    /// Binds on a hop connection, then re-issues the operation there.
    async fn hop_round_trip(
        derived: &mut LdapClient,
        bind: BindRequest,
        op: ProtocolOp,
        expected: &'static str,
    ) -> ClientResult<LdapResult> {
        derived
            .resolve_plain(ProtocolOp::BindRequest(bind), "bindResponse")
            .await?
            .success()?;
        derived.resolve_plain(op, expected).await
    }

    /// Authenticates with a DN and password. An empty DN and password
    /// is the anonymous bind.
    pub async fn simple_bind(&mut self, dn: &str, password: &str) -> ClientResult<LdapResult> {
        self.resolve_plain(
            ProtocolOp::BindRequest(BindRequest::simple(dn, password)),
            "bindResponse",
        )
        .await
    }

    /// Starts a search and returns the stream of its results.
    pub async fn search(&mut self, request: SearchRequest) -> ClientResult<SearchStream> {
        let (id, queue) = self.submit(ProtocolOp::SearchRequest(request)).await?;
        Ok(SearchStream::new(self.clone(), id, queue))
    }

    pub async fn modify(
        &mut self,
        dn: &str,
        changes: Vec<ModifyChange>,
    ) -> ClientResult<LdapResult> {
        self.resolve(
            ProtocolOp::ModifyRequest(ModifyRequest {
                dn: dn.to_owned(),
                changes,
            }),
            "modifyResponse",
        )
        .await
    }

    pub async fn add(&mut self, dn: &str, attrs: Vec<Attribute>) -> ClientResult<LdapResult> {
        self.resolve(
            ProtocolOp::AddRequest(AddRequest {
                dn: dn.to_owned(),
                attrs,
            }),
            "addResponse",
        )
        .await
    }

    pub async fn delete(&mut self, dn: &str) -> ClientResult<LdapResult> {
        self.resolve(ProtocolOp::DelRequest(dn.to_owned()), "delResponse")
            .await
    }

    pub async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> ClientResult<LdapResult> {
        self.resolve(
            ProtocolOp::ModifyDnRequest(ModifyDnRequest {
                dn: dn.to_owned(),
                new_rdn: new_rdn.to_owned(),
                delete_old_rdn,
                new_superior: new_superior.map(str::to_owned),
            }),
            "modDNResponse",
        )
        .await
    }

    /// Attribute value assertion. `Ok(true)` for compareTrue,
    /// `Ok(false)` for compareFalse, an error for anything else.
    pub async fn compare(
        &mut self,
        dn: &str,
        attr: &str,
        value: &[u8],
    ) -> ClientResult<bool> {
        let result = self
            .resolve(
                ProtocolOp::CompareRequest(CompareRequest {
                    dn: dn.to_owned(),
                    attr: attr.to_owned(),
                    value: value.to_vec(),
                }),
                "compareResponse",
            )
            .await?;
        match result.code {
            ResultCode::CompareTrue => Ok(true),
            ResultCode::CompareFalse => Ok(false),
            _ => Err(LdapError::ResultError { result }),
        }
    }

    /// Extended operation round trip, returning the full response so
    /// callers can get at the response name and value.
    pub async fn extended(&mut self, request: ExtendedRequest) -> ClientResult<ExtendedResponse> {
        let (_, queue) = self.submit(ProtocolOp::ExtendedRequest(request)).await?;
        let msg = Self::await_terminal(&queue, "extendedResp").await?;
        match msg.op {
            ProtocolOp::ExtendedResponse(resp) => Ok(resp),
            other => Err(LdapError::UnexpectedResponse {
                expected: "extendedResp",
                actual: other.name().to_owned(),
            }),
        }
    }

    /// Tells the server to stop working on an operation and stops
    /// routing its responses. Abandon has no response of its own.
    pub async fn abandon(&mut self, id: MessageId) -> ClientResult<()> {
        self.shared.router.abandon(id).await;
        let msg = LdapMessage::new(self.shared.allocate_id(), ProtocolOp::AbandonRequest(id));
        self.shared.send(&msg).await
    }

    /// Graceful close: sends UnbindRequest, releases the server in the
    /// pool as voluntarily disconnected, and stops the driver. Any
    /// still-outstanding operations fail with `ConnectionClosed`.
    pub async fn unbind(&mut self) -> ClientResult<()> {
        let msg = LdapMessage::new(self.shared.allocate_id(), ProtocolOp::UnbindRequest);
        let sent = self.shared.send(&msg).await;
        self.pool.disconnect().await;
        self.shared.begin_close();
        sent
    }
}

impl std::fmt::Debug for LdapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapClient")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
