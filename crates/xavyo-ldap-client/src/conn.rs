//! Connection driver.
//!
//! [`LdapConnection`] owns the read half of the transport and is the
//! single producer for the connection's [`MessageRouter`]. It must be
//! driven on its own task; every [`LdapClient`] handle shares the
//! write half through [`ConnShared`].
//!
//! [`LdapClient`]: crate::client::LdapClient

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use xavyo_ldap_proto::{
    codec, LdapMessage, MessageId, ProtocolOp, NOTICE_OF_DISCONNECTION, UNSOLICITED_ID,
};

use crate::error::ClientResult;
use crate::pool::ServerPool;
use crate::queue::{Deliver, MessageRouter};
use crate::transport::TransportStream;

const READ_CHUNK: usize = 8 * 1024;

/// State shared between the driver and every client handle.
pub(crate) struct ConnShared {
    writer: Mutex<WriteHalf<TransportStream>>,
    pub(crate) router: Arc<MessageRouter>,
    next_id: AtomicI32,
    /// Voluntary close in progress; socket errors after this point are
    /// expected and must not demote the server.
    closing: AtomicBool,
    shutdown: Notify,
}

impl ConnShared {
    pub(crate) fn allocate_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Encodes and writes one message. Serialized across handles by
    /// the writer lock, so concurrent submitters cannot interleave
    /// partial frames.
    pub(crate) async fn send(&self, msg: &LdapMessage) -> ClientResult<()> {
        let bytes = codec::encode_message(msg);
        trace!(id = msg.id, op = msg.op.name(), len = bytes.len(), "sending request");
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Begins a voluntary close: further reads are treated as routine
    /// teardown and the driver is woken to exit.
    pub(crate) fn begin_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Splits a fresh transport into a driver and its shared half.
pub(crate) fn establish(
    stream: TransportStream,
    pool: Arc<ServerPool>,
    max_backlog: usize,
) -> (LdapConnection, Arc<ConnShared>) {
    let (reader, writer) = tokio::io::split(stream);
    let shared = Arc::new(ConnShared {
        writer: Mutex::new(writer),
        router: MessageRouter::new(max_backlog),
        next_id: AtomicI32::new(1),
        closing: AtomicBool::new(false),
        shutdown: Notify::new(),
    });
    let conn = LdapConnection {
        reader,
        shared: shared.clone(),
        pool,
        buf: BytesMut::with_capacity(READ_CHUNK),
    };
    (conn, shared)
}

/// The read side of one LDAP connection.
///
/// Decodes inbound messages and routes each to the queue awaiting its
/// ID. Pauses reading whenever a queue is saturated, which pushes
/// backpressure down to the socket. On any transport or protocol
/// failure it fails every outstanding operation with one shared reason
/// and tells the pool the server is gone.
pub struct LdapConnection {
    reader: ReadHalf<TransportStream>,
    shared: Arc<ConnShared>,
    pool: Arc<ServerPool>,
    buf: BytesMut,
}

impl fmt::Debug for LdapConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConnection")
            .field("pool", &self.pool)
            .field("buffered", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl LdapConnection {
    /// Runs the connection to completion. Returns `Ok` for voluntary
    /// or peer-initiated closes and `Err` for transport or protocol
    /// failures; either way all waiting operations have been failed
    /// over to [`ConnectionClosed`] by the time this returns.
    ///
    /// [`ConnectionClosed`]: crate::error::LdapError::ConnectionClosed
    pub async fn drive(mut self) -> ClientResult<()> {
        let result = self.read_loop().await;
        match &result {
            Ok(()) => debug!("ldap connection driver finished"),
            Err(err) => warn!(error = %err, "ldap connection driver failed"),
        }
        result
    }

    /// Convenience for the common `tokio::spawn(conn.drive())`.
    pub fn spawn(self) -> JoinHandle<ClientResult<()>> {
        tokio::spawn(self.drive())
    }

    async fn read_loop(&mut self) -> ClientResult<()> {
        loop {
            // Deliver phase: drain every complete message already
            // buffered before touching the socket again.
            loop {
                if self.shared.is_closing() {
                    return self.finish().await;
                }
                match codec::decode_message(&mut self.buf) {
                    Ok(Some(msg)) => self.dispatch(msg).await?,
                    Ok(None) => break,
                    Err(err) => {
                        self.fail(&format!("protocol error: {err}")).await;
                        return Err(err.into());
                    }
                }
            }

            // Read phase. The shutdown notification is armed before
            // the closing check so a close started in between still
            // wakes the select below.
            let shutdown = self.shared.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();
            if self.shared.is_closing() {
                return self.finish().await;
            }
            tokio::select! {
                _ = shutdown.as_mut() => return self.finish().await,
                read = self.reader.read_buf(&mut self.buf) => match read {
                    Ok(0) => {
                        if self.shared.is_closing() {
                            return self.finish().await;
                        }
                        self.fail("connection closed by server").await;
                        return Ok(());
                    }
                    Ok(n) => trace!(bytes = n, "read from server"),
                    Err(err) => {
                        self.fail(&format!("read error: {err}")).await;
                        return Err(err.into());
                    }
                },
            }
        }
    }

    async fn dispatch(&self, msg: LdapMessage) -> ClientResult<()> {
        if msg.id == UNSOLICITED_ID {
            return self.handle_unsolicited(msg).await;
        }
        trace!(id = msg.id, op = msg.op.name(), "response received");
        match self.shared.router.deliver(msg).await {
            Deliver::Routed { saturated: Some(queue) } => {
                // Consumer backlog is full; stop reading until it
                // drains or the connection is being torn down.
                let shutdown = self.shared.shutdown.notified();
                tokio::pin!(shutdown);
                shutdown.as_mut().enable();
                if !self.shared.is_closing() {
                    tokio::select! {
                        _ = queue.wait_drained() => {}
                        _ = shutdown.as_mut() => {}
                    }
                }
                Ok(())
            }
            Deliver::Routed { saturated: None } | Deliver::Dropped => Ok(()),
        }
    }

    /// Unsolicited notifications arrive with message ID zero. The only
    /// one acted on is the notice of disconnection, which fails the
    /// connection the same way a transport error would.
    async fn handle_unsolicited(&self, msg: LdapMessage) -> ClientResult<()> {
        if let ProtocolOp::ExtendedResponse(resp) = &msg.op {
            if resp.name.as_deref() == Some(NOTICE_OF_DISCONNECTION) {
                warn!(
                    code = %resp.result.code,
                    diagnostic = %resp.result.diagnostic,
                    "server sent notice of disconnection"
                );
                self.fail(&format!(
                    "server notice of disconnection: {}",
                    resp.result.diagnostic
                ))
                .await;
                return Err(crate::error::LdapError::closed(
                    "server notice of disconnection",
                ));
            }
        }
        debug!(op = msg.op.name(), "ignoring unsolicited notification");
        Ok(())
    }

    async fn finish(&self) -> ClientResult<()> {
        self.shared.router.broadcast("connection closed").await;
        Ok(())
    }

    async fn fail(&self, reason: &str) {
        self.shared.router.broadcast(reason).await;
        self.pool.invalidate().await;
    }
}
