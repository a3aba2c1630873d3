//! Where playlist fragments come from.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::HlsError;
use crate::fetch::Fetch;
use crate::io::ChunkReader;

/// Raw text of one playlist fragment.
pub type FragmentReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait PlaylistSource: Send {
    /// Returns the next fragment, or `None` when there is nothing more to poll.
    async fn next_fragment(&mut self) -> Result<Option<FragmentReader>, HlsError>;

    /// `true` once the source knows it will not produce another fragment.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// One-shot source over a reader such as stdin or a file.
pub struct ReaderSource {
    reader: Option<FragmentReader>,
}

impl ReaderSource {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
        }
    }
}

#[async_trait]
impl PlaylistSource for ReaderSource {
    async fn next_fragment(&mut self) -> Result<Option<FragmentReader>, HlsError> {
        Ok(self.reader.take())
    }

    fn is_exhausted(&self) -> bool {
        self.reader.is_none()
    }
}

/// Fetches the URL handed out by a caller supplied closure on every poll.
///
/// The closure returning `None` ends the session cleanly, which is how a
/// caller stops a live session from the outside.
pub struct UrlSource<N, F: ?Sized> {
    first_url: Option<String>,
    next_url: N,
    fetcher: Arc<F>,
}

impl<N, F> UrlSource<N, F>
where
    N: FnMut() -> Option<String> + Send,
    F: Fetch + ?Sized,
{
    /// `first_url` is polled first, then whatever `next_url` returns.
    pub fn new(first_url: impl Into<String>, next_url: N, fetcher: Arc<F>) -> Self {
        Self {
            first_url: Some(first_url.into()),
            next_url,
            fetcher,
        }
    }
}

#[async_trait]
impl<N, F> PlaylistSource for UrlSource<N, F>
where
    N: FnMut() -> Option<String> + Send,
    F: Fetch + ?Sized,
{
    async fn next_fragment(&mut self) -> Result<Option<FragmentReader>, HlsError> {
        let url = match self.first_url.take() {
            Some(url) => url,
            None => match (self.next_url)() {
                Some(url) if !url.is_empty() => url,
                _ => {
                    debug!("no next playlist URL");
                    return Ok(None);
                }
            },
        };

        debug!(url = %url, "fetching playlist");
        let body = self.fetcher.fetch(&url).await?;
        Ok(Some(Box::new(ChunkReader::new(body))))
    }
}
