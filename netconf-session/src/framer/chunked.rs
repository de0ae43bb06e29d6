use crate::error::{NetconfError, NetconfResult};
use crate::framer::eom::too_large;

// chunk-size is at most 4294967295
const MAX_CHUNK_SIZE_DIGITS: usize = 10;

enum Delimiter {
    Chunk { size: usize, len: usize },
    EndOfChunks { len: usize },
}

/// Decoder for RFC6242 chunked framing.
///
/// Chunk payloads are collected until the `\n##\n` end-of-chunks marker arrives. A chunk is
/// only consumed from the read buffer once all of its bytes are present.
pub(super) struct ChunkedDecoder {
    message: Vec<u8>,
    chunks: usize,
}

impl ChunkedDecoder {
    pub(super) fn new() -> Self {
        ChunkedDecoder {
            message: Vec::new(),
            chunks: 0,
        }
    }

    pub(super) fn decode(
        &mut self,
        read_buffer: &mut Vec<u8>,
        max_message_size: usize,
    ) -> NetconfResult<Option<String>> {
        let mut cursor = 0;
        let result = self.scan(read_buffer, &mut cursor, max_message_size);
        read_buffer.drain(..cursor);
        result
    }

    fn scan(
        &mut self,
        read_buffer: &[u8],
        cursor: &mut usize,
        max_message_size: usize,
    ) -> NetconfResult<Option<String>> {
        loop {
            match delimiter(&read_buffer[*cursor..])? {
                None => return Ok(None),
                Some(Delimiter::Chunk { size, len }) => {
                    let fits = self
                        .message
                        .len()
                        .checked_add(size)
                        .is_some_and(|total| total <= max_message_size);
                    if !fits {
                        return Err(too_large(max_message_size));
                    }
                    let start = *cursor + len;
                    let end = start
                        .checked_add(size)
                        .ok_or_else(|| too_large(max_message_size))?;
                    if read_buffer.len() < end {
                        return Ok(None);
                    }
                    self.message.extend_from_slice(&read_buffer[start..end]);
                    self.chunks += 1;
                    *cursor = end;
                }
                Some(Delimiter::EndOfChunks { len }) => {
                    if self.chunks == 0 {
                        return Err(NetconfError::Framing(
                            "end-of-chunks marker without preceding chunk".to_string(),
                        ));
                    }
                    *cursor += len;
                    self.chunks = 0;
                    let message = std::mem::take(&mut self.message);
                    return Ok(Some(String::from_utf8_lossy(&message).into_owned()));
                }
            }
        }
    }
}

fn malformed(expected: u8, actual: u8) -> NetconfError {
    NetconfError::MalformedChunk {
        expected: expected.into(),
        actual: actual.into(),
    }
}

/// Matches a chunk header or end-of-chunks marker at the very start of `buf`.
fn delimiter(buf: &[u8]) -> NetconfResult<Option<Delimiter>> {
    for (idx, expected) in [b'\n', b'#'].into_iter().enumerate() {
        match buf.get(idx) {
            None => return Ok(None),
            Some(&actual) if actual != expected => return Err(malformed(expected, actual)),
            Some(_) => {}
        }
    }
    match buf.get(2) {
        None => Ok(None),
        Some(b'#') => match buf.get(3) {
            None => Ok(None),
            Some(b'\n') => Ok(Some(Delimiter::EndOfChunks { len: 4 })),
            Some(&actual) => Err(malformed(b'\n', actual)),
        },
        Some(_) => chunk_header(buf),
    }
}

fn chunk_header(buf: &[u8]) -> NetconfResult<Option<Delimiter>> {
    let digits = &buf[2..];
    let Some(end) = digits.iter().position(|b| !b.is_ascii_digit()) else {
        if digits.len() > MAX_CHUNK_SIZE_DIGITS {
            return Err(NetconfError::Framing(format!(
                "chunk size longer than {} digits",
                MAX_CHUNK_SIZE_DIGITS
            )));
        }
        return Ok(None);
    };
    if digits[end] != b'\n' {
        return Err(malformed(b'0', digits[end]));
    }

    let digits = &digits[..end];
    if digits.is_empty() {
        return Err(NetconfError::Framing("empty chunk size".to_string()));
    }
    if digits.len() > MAX_CHUNK_SIZE_DIGITS {
        return Err(NetconfError::Framing(format!(
            "chunk size longer than {} digits",
            MAX_CHUNK_SIZE_DIGITS
        )));
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(NetconfError::Framing(format!(
            "chunk size with leading zero: {}",
            String::from_utf8_lossy(digits)
        )));
    }
    let size = String::from_utf8_lossy(digits)
        .parse::<u32>()
        .map_err(|err| NetconfError::Framing(format!("chunk size: {}", err)))?;

    Ok(Some(Delimiter::Chunk {
        size: size as usize,
        len: 2 + end + 1,
    }))
}
