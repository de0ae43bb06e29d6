use crate::error::{NetconfError, NetconfResult};
use async_ssh2_lite::{ssh2, AsyncChannel, AsyncSession, SessionConfiguration};
use core::future::Future;
use core::pin::Pin;
use core::task::{ready, Context, Poll};
use log::debug;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

type Disconnect = Pin<Box<dyn Future<Output = Result<(), async_ssh2_lite::Error>> + Send>>;

/// The `netconf` SSH subsystem channel of an authenticated session,
/// see [RFC6242 3](https://www.rfc-editor.org/rfc/rfc6242.html#section-3)
///
/// Shutting the transport down closes the channel and disconnects the SSH session. Reads
/// report end of stream from then on.
pub struct SSHTransport {
    session: AsyncSession<TcpStream>,
    channel: Option<AsyncChannel<TcpStream>>,
    disconnect: Option<Disconnect>,
}

impl SSHTransport {
    pub async fn new_with_session(
        session: AsyncSession<TcpStream>,
    ) -> NetconfResult<SSHTransport> {
        if !session.authenticated() {
            return Err(NetconfError::new(
                "ssh session is not authenticated".to_string(),
            ));
        }
        let mut channel = session.channel_session().await?;
        channel.subsystem("netconf").await?;
        debug!("Opened netconf subsystem channel");
        Ok(SSHTransport {
            session,
            channel: Some(channel),
            disconnect: None,
        })
    }

    pub async fn new_with_user_auth(
        addr: &str,
        user_name: &str,
        password: &str,
    ) -> NetconfResult<SSHTransport> {
        let stream = TcpStream::connect(addr).await?;
        let mut configuration = SessionConfiguration::new();
        configuration.set_timeout(10000);
        let mut session = AsyncSession::new(stream, configuration)?;
        session.handshake().await?;
        session.userauth_password(user_name, password).await?;
        SSHTransport::new_with_session(session).await
    }
}

async fn disconnect(
    session: AsyncSession<TcpStream>,
    mut channel: AsyncChannel<TcpStream>,
) -> Result<(), async_ssh2_lite::Error> {
    channel.send_eof().await?;
    channel.close().await?;
    session
        .disconnect(Some(ssh2::ByApplication), "Shutdown", None)
        .await?;
    debug!("Disconnected ssh session");
    Ok(())
}

fn channel_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "netconf channel is closed")
}

impl AsyncRead for SSHTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().channel.as_mut() {
            Some(channel) => Pin::new(channel).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for SSHTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().channel.as_mut() {
            Some(channel) => Pin::new(channel).poll_write(cx, buf),
            None => Poll::Ready(Err(channel_closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().channel.as_mut() {
            Some(channel) => Pin::new(channel).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.disconnect.is_none() {
            let Some(channel) = this.channel.as_mut() else {
                return Poll::Ready(Ok(()));
            };
            ready!(Pin::new(channel).poll_flush(cx))?;
            if let Some(channel) = this.channel.take() {
                this.disconnect = Some(Box::pin(disconnect(this.session.clone(), channel)));
            }
        }
        let Some(pending) = this.disconnect.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(pending.as_mut().poll(cx));
        this.disconnect = None;
        Poll::Ready(result.map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string())))
    }
}
