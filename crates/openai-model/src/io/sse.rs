use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is surfaced. Comments (keep-alive lines starting
/// with `:`) and the `event`, `id` and `retry` fields are skipped.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain every complete event already buffered before reading.
            while let Some(block) = self.take_block() {
                if let Some(data) = parse_block(&block)? {
                    return Ok(Some(data));
                }
            }

            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => {
                    // Bytes are kept raw so multi-byte characters split
                    // across chunks decode correctly.
                    self.buf.extend(bytes.iter().filter(|b| **b != b'\r'));
                }
                None => return Ok(None),
            }
        }
    }

    fn take_block(&mut self) -> Option<Vec<u8>> {
        let end = self.buf.windows(2).position(|w| w == b"\n\n")?;
        let block = self.buf[..end].to_vec();
        self.buf.drain(..end + 2);
        Some(block)
    }
}

// event         = *( comment / field ) end-of-line
// comment       = colon *any-char end-of-line
// field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
fn parse_block(block: &[u8]) -> Result<Option<String>, Error> {
    let Ok(block) = str::from_utf8(block) else {
        return Err(Error::InvalidPayload);
    };

    let mut data: Option<String> = None;
    for line in block.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidPayload);
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match name {
            "data" => {
                let data = data.get_or_insert_with(String::new);
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            "event" | "id" | "retry" => {}
            _ => return Err(Error::InvalidPayload),
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_of(chunks: &[&'static [u8]]) -> Sse {
        Sse::new(Chunks::from_vec_deque(
            chunks.iter().copied().map(Bytes::from_static).collect(),
        ))
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_of(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_chunks() {
        let mut sse = sse_of(&[b"data:", b" caf\xc3", b"\xa9\r\n", b"\r\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "café");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_comments_and_fields() {
        let mut sse = sse_of(&[
            b": keep-alive\n\n",
            b"event: chunk\ndata: a\ndata: b\n\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "a\nb");
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let mut sse = sse_of(&[b"xxxxxx\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        // Incomplete events are dropped at the end of the stream.
        let mut sse = sse_of(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
