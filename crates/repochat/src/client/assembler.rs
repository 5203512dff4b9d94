use std::convert::Infallible;

use futures::{Stream, StreamExt};

use crate::framing::LineBuffer;
use crate::protocol::{decode_line, StreamDecodeError, StreamEvent};

pub type Decoded = Result<StreamEvent, StreamDecodeError>;

/// Rebuilds events from a reply body cut into arbitrary chunks.
///
/// A record is complete once its line ends; blank lines only separate
/// records. A record that fails to decode is reported in place and the
/// ones after it are unaffected.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    lines: LineBuffer,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and take every record it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        self.lines.extend(chunk);
        let mut decoded = Vec::new();
        while let Some(line) = self.lines.next_line() {
            decoded.extend(decode_record(&line));
        }
        decoded
    }

    /// The body has ended: decode a final record that had no line end, and
    /// drop anything else still buffered
    pub fn finish(&mut self) -> Vec<Decoded> {
        self.lines
            .take_remainder()
            .and_then(|line| decode_record(&line))
            .into_iter()
            .collect()
    }
}

fn decode_record(line: &[u8]) -> Option<Decoded> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let decoded = match std::str::from_utf8(line) {
        Ok(text) => decode_line(text),
        Err(e) => Err(StreamDecodeError::InvalidPayload(format!(
            "record is not UTF-8: {}",
            e
        ))),
    };
    if let Err(e) = &decoded {
        tracing::warn!(error = %e, "skipping undecodable record");
    }
    Some(decoded)
}

/// Lazily decode a stream of byte chunks. Ends when the chunks end.
pub fn assemble<S, B>(chunks: S) -> impl Stream<Item = Decoded>
where
    S: Stream<Item = B>,
    B: AsRef<[u8]>,
{
    try_assemble(chunks.map(Ok::<B, Infallible>)).map(|item| match item {
        Ok(decoded) => decoded,
        Err(never) => match never {},
    })
}

/// Like [`assemble`] over chunks that can fail to arrive. The first failed
/// chunk is passed through and ends the stream.
pub fn try_assemble<S, B, E>(chunks: S) -> impl Stream<Item = Result<Decoded, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut assembler = StreamAssembler::new();
        let mut chunks = Box::pin(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    for decoded in assembler.push(chunk.as_ref()) {
                        yield Ok(decoded);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        for decoded in assembler.finish() {
            yield Ok(decoded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const BODY: &str = "data: {\"type\":\"content\",\"content\":\"Hé\"}\n\n\
                        data: {\"type\":\"content\",\"content\":\"llo\"}\n\n\
                        data: {\"type\":\"done\",\"toolCalls\":[],\"toolResults\":[]}\n\n";

    fn contents(decoded: &[Decoded]) -> Vec<String> {
        decoded
            .iter()
            .filter_map(|d| match d {
                Ok(StreamEvent::Content { content }) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_records_split_anywhere() {
        let bytes = BODY.as_bytes();
        for cut in 0..bytes.len() {
            let mut assembler = StreamAssembler::new();
            let mut decoded = assembler.push(&bytes[..cut]);
            decoded.extend(assembler.push(&bytes[cut..]));
            decoded.extend(assembler.finish());
            assert_eq!(decoded.len(), 3, "cut at {}", cut);
            assert_eq!(contents(&decoded), vec!["Hé", "llo"]);
        }
    }

    #[test]
    fn test_bad_record_does_not_poison_the_rest() {
        let mut assembler = StreamAssembler::new();
        let decoded = assembler.push(
            b"data: {\"type\":\"content\",\"content\":\"a\"}\n\n\
              garbage line\n\
              data: {\"type\":\"content\",\n\n\
              data: {\"type\":\"content\",\"content\":\"b\"}\n\n",
        );
        assert_eq!(decoded.len(), 4);
        assert!(matches!(decoded[1], Err(StreamDecodeError::MissingMarker(_))));
        assert!(matches!(decoded[2], Err(StreamDecodeError::InvalidPayload(_))));
        assert_eq!(contents(&decoded), vec!["a", "b"]);
    }

    #[test]
    fn test_unterminated_final_record() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler
            .push(b"data: {\"type\":\"content\",\"content\":\"tail\"}")
            .is_empty());
        let decoded = assembler.finish();
        assert_eq!(contents(&decoded), vec!["tail"]);
        assert!(assembler.finish().is_empty());
    }

    #[tokio::test]
    async fn test_assemble_stream() {
        let chunks: Vec<&[u8]> = BODY.as_bytes().chunks(7).collect();
        let decoded: Vec<_> = assemble(stream::iter(chunks)).collect().await;
        assert_eq!(decoded.len(), 3);
        assert!(matches!(decoded[2], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_failed_chunk_ends_the_stream() {
        let chunks = stream::iter(vec![
            Ok(&b"data: {\"type\":\"content\",\"content\":\"a\"}\n\ndata: {\"type\":"[..]),
            Err("connection reset"),
            Ok(&b"\"content\",\"content\":\"b\"}\n\n"[..]),
        ]);
        let items: Vec<_> = try_assemble(chunks).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(Ok(StreamEvent::Content { content })) if content == "a"));
        assert_eq!(items[1], Err("connection reset"));
    }
}
