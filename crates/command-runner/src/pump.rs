//! Stream pumps: one reader task per captured pipe.

use cr_core::{OutputChunk, OutputDecoding};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::sink::SharedSinks;

/// Incremental decoder carried across read chunks, so multi-byte
/// sequences split by the pipe are reassembled instead of replaced.
pub(crate) enum StreamDecoder {
    Text(Box<encoding_rs::Decoder>),
    Raw,
}

impl StreamDecoder {
    pub(crate) fn new(decoding: OutputDecoding) -> Self {
        match decoding {
            OutputDecoding::Text(encoding) => Self::Text(Box::new(encoding.new_decoder())),
            OutputDecoding::Raw => Self::Raw,
        }
    }

    /// Decode one read chunk. Malformed input is replaced with U+FFFD and
    /// noted at debug level; decoding never aborts the stream.
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> OutputChunk {
        match self {
            Self::Raw => OutputChunk::Bytes(bytes.to_vec()),
            Self::Text(decoder) => {
                let capacity = decoder
                    .max_utf8_buffer_length(bytes.len())
                    .unwrap_or(bytes.len() * 3 + 4);
                let mut out = String::with_capacity(capacity);
                let (_, _, had_errors) = decoder.decode_to_string(bytes, &mut out, false);
                if had_errors {
                    debug!("replaced malformed byte sequence in child output");
                }
                OutputChunk::Text(out)
            }
        }
    }

    /// Flush any partial sequence held back at end-of-stream.
    pub(crate) fn finish(&mut self) -> Option<OutputChunk> {
        match self {
            Self::Raw => None,
            Self::Text(decoder) => {
                let capacity = decoder.max_utf8_buffer_length(0).unwrap_or(4);
                let mut out = String::with_capacity(capacity);
                let (_, _, had_errors) = decoder.decode_to_string(&[], &mut out, true);
                if had_errors {
                    debug!("replaced truncated byte sequence at end of stream");
                }
                (!out.is_empty()).then_some(OutputChunk::Text(out))
            }
        }
    }
}

/// Spawn a reader task: bounded reads, decode, dispatch, stop on EOF.
///
/// Chunks are not re-split on line boundaries; line semantics compose on
/// top in a callback or queue consumer.
pub(crate) fn spawn_pump<R>(
    mut reader: R,
    stream: &'static str,
    bufsize: usize,
    mut decoder: StreamDecoder,
    sinks: SharedSinks,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; bufsize];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    debug!(stream, bytes = n, "read chunk");
                    let chunk = decoder.decode(&buf[..n]);
                    if !chunk.is_empty() {
                        sinks.lock().await.dispatch(&chunk).await;
                    }
                }
                Err(e) => {
                    debug!(stream, error = %e, "pipe read failed");
                    break;
                }
            }
        }
        if let Some(tail) = decoder.finish() {
            sinks.lock().await.dispatch(&tail).await;
        }
    })
}
