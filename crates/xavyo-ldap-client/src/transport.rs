//! Transport abstraction between the pool and the sockets it opens.
//!
//! The pool never names a socket type. It asks a [`Connector`] for a
//! [`TransportStream`], which is any ordered byte stream; plain TCP is
//! the stock implementation and tests substitute in-memory pipes. A
//! TLS backend slots in the same way without touching pool or client
//! code.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// An established, ordered byte stream to a directory server.
///
/// `Sync` is part of the contract: the driver future borrows the
/// connection across awaits and still has to be spawnable.
pub trait Transport: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> Transport for T {}

/// Boxed transport, as handed from the pool to the connection driver.
pub type TransportStream = Box<dyn Transport>;

/// Opens transports to candidate servers.
///
/// Implementations must be cancellation-safe: a connect future may be
/// dropped at any point when a parallel race is decided, and must not
/// leak resources when it is.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TransportStream>;
}

/// Plain TCP.
#[derive(Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TransportStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
