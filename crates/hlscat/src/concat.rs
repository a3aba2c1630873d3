//! Concatenates the bodies of a sequence of identifiers into one byte stream.
//!
//! A background task pulls the next identifier only after the previous body
//! has been fully forwarded and dropped, so exactly one load is in flight and
//! bytes leave in sequence order. The hand-off channel holds a single chunk,
//! which makes the task follow the consumer's read rate.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::HlsError;
use crate::fetch::Fetch;
use crate::io::ChunkReader;

pub struct ConcatStream {
    rx: ReceiverStream<Result<Bytes, HlsError>>,
    task: JoinHandle<()>,
}

impl ConcatStream {
    /// Starts concatenating. `ids` ending is the clean end of the output; an
    /// error from `ids` or from `loader` becomes the last item.
    pub fn new<S, F>(ids: S, loader: Arc<F>) -> Self
    where
        S: Stream<Item = Result<String, HlsError>> + Send + 'static,
        F: Fetch + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(pump(Box::pin(ids), loader, tx));
        Self {
            rx: ReceiverStream::new(rx),
            task,
        }
    }

    pub fn into_async_read(self) -> ChunkReader {
        ChunkReader::new(self)
    }
}

impl Stream for ConcatStream {
    type Item = Result<Bytes, HlsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for ConcatStream {
    fn drop(&mut self) {
        // The task may be parked on the id source, which could wait forever
        // on a live playlist.
        self.task.abort();
    }
}

async fn pump<F>(
    mut ids: Pin<Box<dyn Stream<Item = Result<String, HlsError>> + Send>>,
    loader: Arc<F>,
    tx: mpsc::Sender<Result<Bytes, HlsError>>,
) where
    F: Fetch + ?Sized,
{
    let mut segments = 0u64;
    loop {
        let id = match ids.next().await {
            Some(Ok(id)) => id,
            Some(Err(e)) => {
                warn!(error = %e, "identifier source failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => {
                debug!(segments, "end of sequence");
                return;
            }
        };

        let mut body = match loader.fetch(&id).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %id, error = %e, "failed to load segment");
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!("consumer went away");
                        return;
                    }
                }
                Err(e) => {
                    warn!(url = %id, error = %e, "segment body failed");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        drop(body);
        segments += 1;
    }
}
