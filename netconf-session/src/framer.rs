use crate::error::NetconfResult;
use chunked::ChunkedDecoder;
use eom::EomDecoder;
use log::trace;

mod chunked;
mod eom;

pub const NETCONF_1_0_TERMINATOR: &str = "]]>]]>";
pub const NETCONF_1_1_TERMINATOR: &str = "\n##\n";
/// Largest message a [Framer] buffers unless told otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Message framing as defined in [RFC6242 4.1](https://tools.ietf.org/html/rfc6242#section-4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `]]>]]>` terminated messages, used by base:1.0 and by every `<hello>`.
    EndOfMessage,
    /// Length prefixed chunks, used once both peers advertise base:1.1.
    Chunked,
}

impl Framing {
    pub fn encode(self, message: &str) -> Vec<u8> {
        let bytes = message.as_bytes();
        match self {
            Framing::EndOfMessage => {
                let mut framed = Vec::with_capacity(bytes.len() + NETCONF_1_0_TERMINATOR.len());
                framed.extend_from_slice(bytes);
                framed.extend_from_slice(NETCONF_1_0_TERMINATOR.as_bytes());
                framed
            }
            Framing::Chunked => {
                let header = format!("\n#{}\n", bytes.len());
                let mut framed = Vec::with_capacity(
                    header.len() + bytes.len() + NETCONF_1_1_TERMINATOR.len(),
                );
                framed.extend_from_slice(header.as_bytes());
                framed.extend_from_slice(bytes);
                framed.extend_from_slice(NETCONF_1_1_TERMINATOR.as_bytes());
                framed
            }
        }
    }
}

enum Decoder {
    EndOfMessage(EomDecoder),
    Chunked(ChunkedDecoder),
}

/// Incremental NETCONF message parser.
///
/// Bytes are appended with [Framer::extend] as they arrive from the transport, complete
/// messages are pulled with [Framer::next_message]. Partial data stays buffered between calls.
pub struct Framer {
    read_buffer: Vec<u8>,
    decoder: Decoder,
    max_message_size: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Framer::new()
    }
}

impl Framer {
    pub fn new() -> Framer {
        Framer {
            read_buffer: Vec::new(),
            decoder: Decoder::EndOfMessage(EomDecoder::new()),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Messages growing past `max_message_size` bytes are a framing error.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Framer {
        self.max_message_size = max_message_size;
        self
    }

    pub fn framing(&self) -> Framing {
        match self.decoder {
            Decoder::EndOfMessage(_) => Framing::EndOfMessage,
            Decoder::Chunked(_) => Framing::Chunked,
        }
    }

    /// Switches to chunked framing. Bytes already buffered are decoded as chunks.
    pub fn upgrade(&mut self) {
        if let Decoder::EndOfMessage(_) = self.decoder {
            trace!(
                "Switching to chunked framing with {} bytes buffered",
                self.read_buffer.len()
            );
            self.decoder = Decoder::Chunked(ChunkedDecoder::new());
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.read_buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` when more bytes are needed.
    ///
    /// An error means the byte stream is out of sync and nothing more can be decoded from it.
    pub fn next_message(&mut self) -> NetconfResult<Option<String>> {
        match &mut self.decoder {
            Decoder::EndOfMessage(decoder) => {
                decoder.decode(&mut self.read_buffer, self.max_message_size)
            }
            Decoder::Chunked(decoder) => {
                decoder.decode(&mut self.read_buffer, self.max_message_size)
            }
        }
    }

    /// Appends `bytes` and drains every message they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> NetconfResult<Vec<String>> {
        self.extend(bytes);
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }
}
