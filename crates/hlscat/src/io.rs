use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures::Stream;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::HlsError;

/// `AsyncRead` adapter over a stream of byte chunks.
///
/// A stream error is returned once as an `io::Error`; the end of the stream
/// is a regular EOF.
pub struct ChunkReader {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, HlsError>> + Send>>,
    current_chunk: Bytes,
}

impl ChunkReader {
    pub fn new(stream: impl Stream<Item = Result<Bytes, HlsError>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            current_chunk: Bytes::new(),
        }
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if self.current_chunk.has_remaining() {
                let n = buf.remaining().min(self.current_chunk.len());
                buf.put_slice(&self.current_chunk[..n]);
                self.current_chunk.advance(n);
                return Poll::Ready(Ok(()));
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    // empty chunks would read as EOF
                    self.current_chunk = chunk;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e.into())),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
