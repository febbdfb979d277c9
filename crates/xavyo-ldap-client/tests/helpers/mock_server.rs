//! Scripted LDAP server for integration testing.
//!
//! Listens on a loopback port and speaks real BER frames, so tests
//! exercise the client end to end through its codec, driver, and
//! correlator. Every received request is recorded; responses follow
//! whatever script the test mounts.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::sleep;

use xavyo_ldap_client::proto::codec::{decode_message, encode_message};
use xavyo_ldap_client::proto::{
    Attribute, LdapMessage, LdapResult, MessageId, ProtocolOp, ResultCode, SearchEntry,
    NOTICE_OF_DISCONNECTION, UNSOLICITED_ID,
};
use xavyo_ldap_client::proto::{BindResponse, ExtendedResponse};
use xavyo_ldap_client::{LdapClient, LdapConfig};

/// How the server answers a search request.
#[derive(Debug, Clone)]
pub enum SearchScript {
    /// Entries, optional continuation references, then a success done.
    Entries {
        entries: Vec<SearchEntry>,
        references: Vec<Vec<String>>,
    },
    /// A referral result with these URLs and no entries.
    Refer(Vec<String>),
    /// Send this many entries, then drop the connection mid-search.
    DieAfter(usize),
}

impl SearchScript {
    pub fn entries(entries: Vec<SearchEntry>) -> Self {
        SearchScript::Entries {
            entries,
            references: Vec::new(),
        }
    }
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

struct ServerState {
    search: Mutex<SearchScript>,
    /// Delay before each search entry is written.
    entry_delay: Mutex<Duration>,
    bind_code: Mutex<ResultCode>,
    compare_code: Mutex<ResultCode>,
    /// When set, write-class operations answer with this referral.
    refer_ops: Mutex<Option<Vec<String>>>,
    /// Bind DNs in arrival order.
    binds: Mutex<Vec<String>>,
    unbinds: Mutex<usize>,
    /// Message IDs named by AbandonRequests.
    abandons: Mutex<Vec<MessageId>>,
    /// Per request: op name and the control OIDs attached to it.
    controls_seen: Mutex<Vec<(String, Vec<String>)>>,
    /// Write halves of live connections, for unsolicited pushes.
    writers: Mutex<Vec<SharedWriter>>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            search: Mutex::new(SearchScript::entries(Vec::new())),
            entry_delay: Mutex::new(Duration::ZERO),
            bind_code: Mutex::new(ResultCode::Success),
            compare_code: Mutex::new(ResultCode::CompareTrue),
            refer_ops: Mutex::new(None),
            binds: Mutex::new(Vec::new()),
            unbinds: Mutex::new(0),
            abandons: Mutex::new(Vec::new()),
            controls_seen: Mutex::new(Vec::new()),
            writers: Mutex::new(Vec::new()),
        }
    }
}

/// A scripted LDAP server on a loopback port.
pub struct MockLdapServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockLdapServer {
    /// Binds a fresh port and starts accepting connections.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_conn(stream, accept_state.clone()));
            }
        });
        Self { addr, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `ldap://` URL of this server, as a referral would carry it.
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.host(), self.port())
    }

    /// Single-candidate config pointing at this server.
    pub fn config(&self) -> LdapConfig {
        LdapConfig::new(self.host(), self.port())
    }

    /// Connects a client and spawns its driver.
    pub async fn client(&self) -> LdapClient {
        let (conn, client) = LdapClient::connect(self.config()).await.unwrap();
        conn.spawn();
        client
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    pub async fn set_search(&self, script: SearchScript) {
        *self.state.search.lock().await = script;
    }

    /// Spaces out search entries so concurrent streams interleave.
    pub async fn set_entry_delay(&self, delay: Duration) {
        *self.state.entry_delay.lock().await = delay;
    }

    pub async fn set_bind_code(&self, code: ResultCode) {
        *self.state.bind_code.lock().await = code;
    }

    pub async fn set_compare_code(&self, code: ResultCode) {
        *self.state.compare_code.lock().await = code;
    }

    /// Makes write-class operations (modify, add, delete, modify DN)
    /// answer with a referral to `urls` instead of doing the work.
    pub async fn refer_operations_to(&self, urls: Vec<String>) {
        *self.state.refer_ops.lock().await = Some(urls);
    }

    /// Pushes a Notice of Disconnection to every live connection.
    pub async fn send_disconnect_notice(&self) {
        let msg = LdapMessage::new(
            UNSOLICITED_ID,
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult::with_code(ResultCode::Unavailable),
                name: Some(NOTICE_OF_DISCONNECTION.to_owned()),
                value: None,
            }),
        );
        for writer in self.state.writers.lock().await.iter() {
            write_msg(writer, &msg).await;
        }
    }

    // =========================================================================
    // Recorded observations
    // =========================================================================

    pub async fn binds(&self) -> Vec<String> {
        self.state.binds.lock().await.clone()
    }

    pub async fn unbind_count(&self) -> usize {
        *self.state.unbinds.lock().await
    }

    pub async fn abandoned(&self) -> Vec<MessageId> {
        self.state.abandons.lock().await.clone()
    }

    pub async fn controls_seen(&self) -> Vec<(String, Vec<String>)> {
        self.state.controls_seen.lock().await.clone()
    }
}

async fn serve_conn(stream: TcpStream, state: Arc<ServerState>) {
    let (mut reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    state.writers.lock().await.push(writer.clone());

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        loop {
            match decode_message(&mut buf) {
                Ok(Some(msg)) => {
                    if !handle(msg, &writer, &state).await {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match reader.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Answers one request. Returns false when the connection should end.
async fn handle(msg: LdapMessage, writer: &SharedWriter, state: &Arc<ServerState>) -> bool {
    let oids = msg.controls.iter().map(|c| c.oid.clone()).collect();
    state
        .controls_seen
        .lock()
        .await
        .push((msg.op.name().to_owned(), oids));

    let id = msg.id;
    match msg.op {
        ProtocolOp::BindRequest(req) => {
            state.binds.lock().await.push(req.dn);
            let code = *state.bind_code.lock().await;
            let response = ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::with_code(code),
                server_sasl_creds: None,
            });
            write_msg(writer, &LdapMessage::new(id, response)).await;
            true
        }
        ProtocolOp::SearchRequest(_) => {
            let script = state.search.lock().await.clone();
            run_search(id, script, writer.clone(), state.clone()).await
        }
        ProtocolOp::ModifyRequest(_) => {
            respond_write_op(id, writer, state, ProtocolOp::ModifyResponse).await;
            true
        }
        ProtocolOp::AddRequest(_) => {
            respond_write_op(id, writer, state, ProtocolOp::AddResponse).await;
            true
        }
        ProtocolOp::DelRequest(_) => {
            respond_write_op(id, writer, state, ProtocolOp::DelResponse).await;
            true
        }
        ProtocolOp::ModifyDnRequest(_) => {
            respond_write_op(id, writer, state, ProtocolOp::ModifyDnResponse).await;
            true
        }
        ProtocolOp::CompareRequest(_) => {
            let code = *state.compare_code.lock().await;
            let response = ProtocolOp::CompareResponse(LdapResult::with_code(code));
            write_msg(writer, &LdapMessage::new(id, response)).await;
            true
        }
        ProtocolOp::ExtendedRequest(req) => {
            let response = ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult::success(),
                name: Some(req.name),
                value: req.value,
            });
            write_msg(writer, &LdapMessage::new(id, response)).await;
            true
        }
        ProtocolOp::AbandonRequest(target) => {
            state.abandons.lock().await.push(target);
            true
        }
        ProtocolOp::UnbindRequest => {
            *state.unbinds.lock().await += 1;
            false
        }
        _ => {
            let response = ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult::with_code(ResultCode::ProtocolError),
                name: None,
                value: None,
            });
            write_msg(writer, &LdapMessage::new(id, response)).await;
            true
        }
    }
}

async fn respond_write_op(
    id: MessageId,
    writer: &SharedWriter,
    state: &Arc<ServerState>,
    wrap: fn(LdapResult) -> ProtocolOp,
) {
    let result = match state.refer_ops.lock().await.clone() {
        Some(urls) => LdapResult {
            code: ResultCode::Referral,
            matched_dn: String::new(),
            diagnostic: String::new(),
            referral: urls,
        },
        None => LdapResult::success(),
    };
    write_msg(writer, &LdapMessage::new(id, wrap(result))).await;
}

/// Runs one search script. Entry responses are written from their own
/// task so overlapping searches interleave on the wire.
async fn run_search(
    id: MessageId,
    script: SearchScript,
    writer: SharedWriter,
    state: Arc<ServerState>,
) -> bool {
    match script {
        SearchScript::Entries {
            entries,
            references,
        } => {
            let delay = *state.entry_delay.lock().await;
            tokio::spawn(async move {
                for entry in entries {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    let op = ProtocolOp::SearchResultEntry(entry);
                    write_msg(&writer, &LdapMessage::new(id, op)).await;
                }
                for urls in references {
                    let op = ProtocolOp::SearchResultReference(urls);
                    write_msg(&writer, &LdapMessage::new(id, op)).await;
                }
                let done = ProtocolOp::SearchResultDone(LdapResult::success());
                write_msg(&writer, &LdapMessage::new(id, done)).await;
            });
            true
        }
        SearchScript::Refer(urls) => {
            let done = ProtocolOp::SearchResultDone(LdapResult {
                code: ResultCode::Referral,
                matched_dn: String::new(),
                diagnostic: String::new(),
                referral: urls,
            });
            write_msg(&writer, &LdapMessage::new(id, done)).await;
            true
        }
        SearchScript::DieAfter(count) => {
            let delay = *state.entry_delay.lock().await;
            for n in 0..count {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                let entry = person_entry(&format!("cn=entry{n},dc=example"), &[]);
                let op = ProtocolOp::SearchResultEntry(entry);
                write_msg(&writer, &LdapMessage::new(id, op)).await;
            }
            let _ = writer.lock().await.shutdown().await;
            false
        }
    }
}

async fn write_msg(writer: &SharedWriter, msg: &LdapMessage) {
    let bytes = encode_message(msg);
    let _ = writer.lock().await.write_all(&bytes).await;
}

/// Builds a test entry with single-valued string attributes.
pub fn person_entry(dn: &str, attrs: &[(&str, &str)]) -> SearchEntry {
    SearchEntry::new(
        dn,
        attrs
            .iter()
            .map(|(name, value)| Attribute::single(*name, *value))
            .collect(),
    )
}
