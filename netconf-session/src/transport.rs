use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "async-ssh2-lite")]
pub mod ssh;

/// Byte stream a NETCONF session runs over.
///
/// Reading zero bytes means the peer closed the stream, shutting down the write side closes it
/// from our end. Any duplex stream qualifies: an SSH channel, a TLS socket or an in-memory pipe.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
