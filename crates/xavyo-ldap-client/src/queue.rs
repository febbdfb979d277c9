//! Response correlation.
//!
//! Each connection runs one [`MessageRouter`]: a map from outstanding
//! message IDs to the [`MessageQueue`] that will consume them. The
//! connection driver is the only caller of [`MessageRouter::deliver`];
//! any number of tasks may sit in [`MessageQueue::await_next`].
//!
//! Lock order is router state, then queue core. Queue cores are leaf
//! locks and are never held across an await point.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use xavyo_ldap_proto::{LdapMessage, MessageId};

use crate::error::{ClientResult, LdapError};

/// What [`MessageRouter::deliver`] did with a message.
#[derive(Debug)]
pub(crate) enum Deliver {
    /// Message is buffered. When `saturated` is set, the receiving
    /// queue hit its backlog mark and the caller should pause reading
    /// until [`QueueShared::wait_drained`] returns.
    Routed { saturated: Option<Arc<QueueShared>> },
    /// No live owner for the ID; the message was discarded.
    Dropped,
}

#[derive(Debug)]
struct OwnedId {
    id: MessageId,
    /// Terminal response delivered but not yet drained.
    retired: bool,
}

#[derive(Debug)]
struct QueueCore {
    buf: VecDeque<LdapMessage>,
    owned: Vec<OwnedId>,
    /// Connection-level failure, reported once the buffer is drained.
    error: Option<String>,
    interrupted: bool,
}

#[derive(Debug)]
pub(crate) struct QueueShared {
    core: Mutex<QueueCore>,
    /// Wakes consumers in `await_next`.
    wake: Notify,
    /// Wakes the reader parked in `wait_drained`.
    drained: Notify,
    max_backlog: usize,
}

impl QueueShared {
    fn resume_mark(&self) -> usize {
        self.max_backlog / 2
    }

    /// Parks until the backlog falls back to half the high mark, or
    /// the queue is failed. Uses the enable-then-check pattern so a
    /// notification between the check and the await is never lost.
    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let core = self.core.lock().await;
                if core.buf.len() <= self.resume_mark() || core.error.is_some() {
                    return;
                }
            }
            notified.as_mut().await;
        }
    }
}

#[derive(Debug)]
struct RouterState {
    queues: HashMap<MessageId, Arc<QueueShared>>,
    /// Set once, with the reason every subsequent caller sees.
    closed: Option<String>,
}

/// Per-connection correlation table.
#[derive(Debug)]
pub(crate) struct MessageRouter {
    state: Mutex<RouterState>,
    max_backlog: usize,
}

impl MessageRouter {
    pub(crate) fn new(max_backlog: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RouterState {
                queues: HashMap::new(),
                closed: None,
            }),
            max_backlog,
        })
    }

    /// Creates a queue owning `id`. Fails if the connection is already
    /// down, so a submitter cannot wait on a response that will never
    /// come.
    pub(crate) async fn register(self: &Arc<Self>, id: MessageId) -> ClientResult<MessageQueue> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.closed {
            return Err(LdapError::closed(reason.clone()));
        }
        let shared = Arc::new(QueueShared {
            core: Mutex::new(QueueCore {
                buf: VecDeque::new(),
                owned: vec![OwnedId { id, retired: false }],
                error: None,
                interrupted: false,
            }),
            wake: Notify::new(),
            drained: Notify::new(),
            max_backlog: self.max_backlog,
        });
        state.queues.insert(id, shared.clone());
        Ok(MessageQueue {
            shared,
            router: self.clone(),
        })
    }

    /// Routes one inbound message to the queue owning its ID.
    pub(crate) async fn deliver(&self, msg: LdapMessage) -> Deliver {
        let state = self.state.lock().await;
        if state.closed.is_some() {
            return Deliver::Dropped;
        }
        let Some(shared) = state.queues.get(&msg.id).cloned() else {
            debug!(id = msg.id, op = msg.op.name(), "no owner for message, dropping");
            return Deliver::Dropped;
        };
        let mut core = shared.core.lock().await;
        let Some(owned) = core.owned.iter_mut().find(|o| o.id == msg.id) else {
            return Deliver::Dropped;
        };
        if owned.retired {
            // Terminal response already seen for this ID.
            return Deliver::Dropped;
        }
        if msg.op.is_terminal_response() {
            owned.retired = true;
        }
        core.buf.push_back(msg);
        let saturated = core.buf.len() >= shared.max_backlog;
        drop(core);
        drop(state);
        shared.wake.notify_waiters();
        Deliver::Routed {
            saturated: saturated.then(|| shared.clone()),
        }
    }

    /// Drops the routing entry for an ID whose terminal response has
    /// been consumed.
    async fn forget(&self, id: MessageId) {
        self.state.lock().await.queues.remove(&id);
    }

    /// Removes an ID entirely: routing entry, ownership, and anything
    /// buffered for it. Later deliveries for the ID are dropped.
    pub(crate) async fn abandon(&self, id: MessageId) {
        let mut state = self.state.lock().await;
        let Some(shared) = state.queues.remove(&id) else {
            return;
        };
        let mut core = shared.core.lock().await;
        core.owned.retain(|o| o.id != id);
        core.buf.retain(|m| m.id != id);
        let resumable = core.buf.len() <= shared.resume_mark();
        drop(core);
        drop(state);
        shared.wake.notify_waiters();
        if resumable {
            shared.drained.notify_waiters();
        }
    }

    /// Fails every queue on this connection with one shared reason and
    /// refuses all further registration and delivery. Only the first
    /// reason sticks.
    pub(crate) async fn broadcast(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if state.closed.is_some() {
            return;
        }
        state.closed = Some(reason.to_owned());
        let queues: Vec<Arc<QueueShared>> = state.queues.drain().map(|(_, q)| q).collect();
        for shared in &queues {
            let mut core = shared.core.lock().await;
            if core.error.is_none() {
                core.error = Some(reason.to_owned());
            }
        }
        drop(state);
        for shared in &queues {
            shared.wake.notify_waiters();
            shared.drained.notify_waiters();
        }
    }

    pub(crate) async fn close_reason(&self) -> Option<String> {
        self.state.lock().await.closed.clone()
    }
}

/// Consumer handle for the responses to one or more operations.
///
/// Cloning yields another handle to the same queue; concurrent
/// `await_next` calls are safe and each message is delivered to
/// exactly one of them.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    shared: Arc<QueueShared>,
    router: Arc<MessageRouter>,
}

impl MessageQueue {
    /// Next buffered message for any ID this queue owns.
    ///
    /// Blocks while operations are outstanding and nothing is
    /// buffered. Returns `Ok(None)` once every owned ID has had its
    /// terminal response consumed. A connection failure surfaces as
    /// [`LdapError::ConnectionClosed`] after buffered messages have
    /// been drained.
    pub async fn await_next(&self) -> ClientResult<Option<LdapMessage>> {
        loop {
            let notified = self.shared.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut core = self.shared.core.lock().await;
                if core.interrupted {
                    core.interrupted = false;
                    return Err(LdapError::Interrupted);
                }
                if let Some(msg) = core.buf.pop_front() {
                    let terminal = msg.op.is_terminal_response();
                    if terminal {
                        let id = msg.id;
                        core.owned.retain(|o| o.id != id);
                    }
                    let resumable = core.buf.len() <= self.shared.resume_mark();
                    drop(core);
                    if resumable {
                        self.shared.drained.notify_waiters();
                    }
                    if terminal {
                        self.router.forget(msg.id).await;
                    }
                    return Ok(Some(msg));
                }
                if let Some(reason) = &core.error {
                    return Err(LdapError::closed(reason.clone()));
                }
                if core.owned.is_empty() {
                    return Ok(None);
                }
            }
            notified.as_mut().await;
        }
    }

    /// Moves everything `other` owns into this queue: buffered
    /// messages, outstanding IDs, and any pending failure. Future
    /// deliveries for those IDs land here. `other` is left empty and
    /// inert; its waiters observe an empty queue.
    pub async fn merge(&self, other: &MessageQueue) {
        if Arc::ptr_eq(&self.shared, &other.shared) {
            return;
        }
        let mut state = self.router.state.lock().await;
        let mut src = other.shared.core.lock().await;
        let mut dst = self.shared.core.lock().await;

        let moved: Vec<MessageId> = src.owned.iter().map(|o| o.id).collect();
        dst.owned.append(&mut src.owned);
        dst.buf.extend(src.buf.drain(..));
        if dst.error.is_none() {
            dst.error = src.error.take();
        } else {
            src.error = None;
        }
        for id in &moved {
            state.queues.insert(*id, self.shared.clone());
        }
        drop(dst);
        drop(src);
        drop(state);

        self.shared.wake.notify_waiters();
        other.shared.wake.notify_waiters();
        other.shared.drained.notify_waiters();
        debug!(ids = ?moved, "merged correlation queues");
    }

    /// Wakes the tasks waiting on this queue with
    /// [`LdapError::Interrupted`]. One-shot: the flag clears when
    /// reported, and the queue remains usable afterwards.
    pub async fn interrupt(&self) {
        self.shared.core.lock().await.interrupted = true;
        self.shared.wake.notify_waiters();
    }

    /// Operations still awaiting their terminal response.
    pub async fn outstanding(&self) -> usize {
        self.shared
            .core
            .lock()
            .await
            .owned
            .iter()
            .filter(|o| !o.retired)
            .count()
    }

    /// Messages buffered and not yet consumed.
    pub async fn buffered(&self) -> usize {
        self.shared.core.lock().await.buf.len()
    }
}
