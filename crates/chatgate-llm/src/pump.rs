//! Shared producer task: turns a provider's response body into a
//! [`ChunkStream`].

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use chatgate_core::{ChunkStream, GatewayError, StreamChunk};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the producer → consumer chunk channel.
pub const CHUNK_BUFFER: usize = 10;

/// Wire-format specific decoding of a response body.
pub trait FrameDecoder: Send + 'static {
    /// Decode newly arrived bytes into zero or more chunks.
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<StreamChunk>);

    /// Flush anything buffered once the body has ended.
    fn finish(&mut self, out: &mut Vec<StreamChunk>);
}

/// Spawn the producer and hand back its receiving end.
///
/// The task forwards non-empty fragments in order, stops after the first
/// terminal chunk, and exits quietly once `cancel` fires or the consumer
/// drops the stream. The whole generation is bounded by `timeout`; hitting
/// it yields one `Timeout` failure.
pub fn spawn_pump<S, E, D>(
    body: S,
    mut decoder: D,
    cancel: CancellationToken,
    timeout: Duration,
) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    D: FrameDecoder,
{
    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    tokio::spawn(async move {
        let mut body = Box::pin(body);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut out = Vec::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("producer cancelled");
                    return;
                }
                _ = &mut deadline => {
                    let _ = tx.send(StreamChunk::failed(GatewayError::Timeout(timeout))).await;
                    return;
                }
                next = body.next() => next,
            };

            let ended = match next {
                Some(Ok(bytes)) => {
                    decoder.feed(&bytes, &mut out);
                    false
                }
                Some(Err(e)) => {
                    out.push(StreamChunk::failed(GatewayError::StreamInterrupted(
                        e.to_string(),
                    )));
                    true
                }
                None => {
                    decoder.finish(&mut out);
                    true
                }
            };

            for chunk in out.drain(..) {
                let terminal = chunk.is_terminal();
                if !terminal && !chunk.has_text() {
                    continue;
                }
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(chunk) => sent,
                };
                if sent.is_err() || terminal {
                    return;
                }
            }

            if ended {
                return;
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}
