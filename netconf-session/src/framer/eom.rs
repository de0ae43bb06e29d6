use crate::error::{NetconfError, NetconfResult};
use crate::framer::NETCONF_1_0_TERMINATOR;
use memmem::{Searcher, TwoWaySearcher};

/// Decoder for `]]>]]>` delimited messages.
pub(super) struct EomDecoder {
    searcher: TwoWaySearcher<'static>,
    // Bytes before this offset are known not to start a terminator.
    search_from: usize,
}

impl EomDecoder {
    pub(super) fn new() -> Self {
        EomDecoder {
            searcher: TwoWaySearcher::new(NETCONF_1_0_TERMINATOR.as_bytes()),
            search_from: 0,
        }
    }

    pub(super) fn decode(
        &mut self,
        read_buffer: &mut Vec<u8>,
        max_message_size: usize,
    ) -> NetconfResult<Option<String>> {
        match self.searcher.search_in(&read_buffer[self.search_from..]) {
            Some(pos) => {
                let end = self.search_from + pos;
                if end > max_message_size {
                    return Err(too_large(max_message_size));
                }
                let message = String::from_utf8_lossy(&read_buffer[..end])
                    .trim()
                    .to_string();
                read_buffer.drain(..end + NETCONF_1_0_TERMINATOR.len());
                self.search_from = 0;
                Ok(Some(message))
            }
            None => {
                self.search_from = read_buffer
                    .len()
                    .saturating_sub(NETCONF_1_0_TERMINATOR.len() - 1);
                if self.search_from > max_message_size {
                    return Err(too_large(max_message_size));
                }
                Ok(None)
            }
        }
    }
}

pub(super) fn too_large(max_message_size: usize) -> NetconfError {
    NetconfError::Framing(format!("message larger than {} bytes", max_message_size))
}
