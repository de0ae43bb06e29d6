use core::time::Duration;
use thiserror::Error;

pub type NetconfResult<T> = Result<T, NetconfError>;

#[derive(Debug, Error)]
pub enum NetconfError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "async-ssh2-lite")]
    #[error(transparent)]
    Ssh(#[from] async_ssh2_lite::Error),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    SerializingFailure(#[from] quick_xml::DeError),
    #[error(
        "malformed message chunk (expected {:?}, actual {:?})",
        expected,
        actual
    )]
    MalformedChunk { expected: char, actual: char },
    #[error("framing error: {0}")]
    Framing(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("capability exchange failed: {0}")]
    CapabilityExchange(String),
    #[error("reply for unknown message-id {0}")]
    UnknownMessageId(String),
    #[error("<{0}> without message-id attribute")]
    MissingMessageId(String),
    #[error("message-id {0} is already awaiting a reply")]
    DuplicateMessageId(String),
    #[error("transport closed unexpectedly")]
    UnexpectedEof,
    #[error("transport closed: {reason}")]
    TransportClosed { reason: String },
    #[error("session is not connected")]
    NotConnected,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl NetconfError {
    pub fn new(msg: String) -> Self {
        NetconfError::Anyhow(anyhow::Error::msg(msg))
    }

    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        NetconfError::TransportClosed {
            reason: reason.into(),
        }
    }

    /// Errors after which the session cannot carry any more messages.
    pub fn is_fatal(&self) -> bool {
        match self {
            NetconfError::Io(_)
            | NetconfError::MalformedChunk { .. }
            | NetconfError::Framing(_)
            | NetconfError::UnexpectedEof
            | NetconfError::TransportClosed { .. } => true,
            #[cfg(feature = "async-ssh2-lite")]
            NetconfError::Ssh(_) => true,
            _ => false,
        }
    }
}
