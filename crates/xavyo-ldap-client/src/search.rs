//! Streaming consumption of search results.

use tracing::debug;

use xavyo_ldap_proto::{LdapResult, MessageId, ProtocolOp, SearchEntry};

use crate::client::LdapClient;
use crate::error::{ClientResult, LdapError};
use crate::queue::MessageQueue;

/// One intermediate search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    Entry(SearchEntry),
    /// Continuation reference: URLs of servers holding a part of the
    /// result the responding server does not.
    Referral(Vec<String>),
}

/// Incremental view of one search operation's responses.
///
/// Entries arrive as the server produces them; [`next`] yields each
/// one without waiting for the rest. The terminal SearchResultDone is
/// absorbed into [`result`] and ends the stream.
///
/// [`next`]: SearchStream::next
/// [`result`]: SearchStream::result
pub struct SearchStream {
    client: LdapClient,
    id: MessageId,
    queue: MessageQueue,
    done: Option<LdapResult>,
    abandoned: bool,
}

impl SearchStream {
    pub(crate) fn new(client: LdapClient, id: MessageId, queue: MessageQueue) -> Self {
        Self {
            client,
            id,
            queue,
            done: None,
            abandoned: false,
        }
    }

    /// Message ID of the underlying search operation.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Next entry or continuation reference, `Ok(None)` once the
    /// search is over. Blocks until the server sends something.
    pub async fn next(&mut self) -> ClientResult<Option<SearchItem>> {
        if self.done.is_some() || self.abandoned {
            return Ok(None);
        }
        match self.queue.await_next().await? {
            Some(msg) => match msg.op {
                ProtocolOp::SearchResultEntry(entry) => Ok(Some(SearchItem::Entry(entry))),
                ProtocolOp::SearchResultReference(urls) => Ok(Some(SearchItem::Referral(urls))),
                ProtocolOp::SearchResultDone(result) => {
                    self.done = Some(result);
                    Ok(None)
                }
                other => Err(LdapError::UnexpectedResponse {
                    expected: "searchResEntry",
                    actual: other.name().to_owned(),
                }),
            },
            None => Ok(None),
        }
    }

    /// The terminal result, once [`next`] has returned `Ok(None)`.
    ///
    /// [`next`]: SearchStream::next
    pub fn result(&self) -> Option<&LdapResult> {
        self.done.as_ref()
    }

    /// Consumes the stream, yielding the terminal result. Errors if
    /// the stream was abandoned or never ran to completion.
    pub fn into_result(self) -> ClientResult<LdapResult> {
        self.done.ok_or(LdapError::UnexpectedResponse {
            expected: "searchResDone",
            actual: "incomplete search".to_owned(),
        })
    }

    /// Drains the stream, collecting entries and dropping continuation
    /// references, and returns them with the terminal result.
    pub async fn collect(mut self) -> ClientResult<(Vec<SearchEntry>, LdapResult)> {
        let mut entries = Vec::new();
        while let Some(item) = self.next().await? {
            match item {
                SearchItem::Entry(entry) => entries.push(entry),
                SearchItem::Referral(urls) => {
                    debug!(?urls, "dropping search continuation reference");
                }
            }
        }
        let result = self.into_result()?;
        Ok((entries, result))
    }

    /// Abandons the search: tells the server to stop and ends the
    /// stream locally. Responses already in flight are dropped.
    pub async fn abandon(&mut self) -> ClientResult<()> {
        if self.done.is_some() || self.abandoned {
            return Ok(());
        }
        self.abandoned = true;
        self.client.abandon(self.id).await
    }
}

impl std::fmt::Debug for SearchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchStream")
            .field("id", &self.id)
            .field("done", &self.done.is_some())
            .field("abandoned", &self.abandoned)
            .finish()
    }
}
