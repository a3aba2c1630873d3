//! Live playlist poller.
//!
//! A session runs one background task that cycles through fetching a
//! fragment, parsing it line by line and waiting for the next refresh. New
//! entries go through a bounded queue; a full queue blocks the task, so a
//! slow consumer also slows down polling.
//!
//! The task ends on `#EXT-X-ENDLIST`, when the source has no next fragment,
//! on cancellation or on the first fetch/parse error. A fatal error is
//! delivered as the last queue item and kept in the session's error slot.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::concat::ConcatStream;
use crate::config::SessionConfig;
use crate::error::HlsError;
use crate::fetch::Fetch;
use crate::io::ChunkReader;
use crate::parser::{Formatter, LineEvent, PlaylistParser, SegmentEntry};
use crate::resolver::UrlResolver;
use crate::source::{PlaylistSource, ReaderSource, UrlSource};

/// Terminal error of a session, readable after the queue has closed.
pub type ErrorSlot = Arc<Mutex<Option<HlsError>>>;

type EntryResult = Result<SegmentEntry, HlsError>;

pub struct M3u8Session {
    rx: mpsc::Receiver<EntryResult>,
    error: ErrorSlot,
    token: CancellationToken,
}

impl M3u8Session {
    /// Starts polling `source` in a background task.
    pub fn new<S>(
        source: S,
        formatter: Option<Formatter>,
        config: SessionConfig,
        token: CancellationToken,
    ) -> Self
    where
        S: PlaylistSource + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let error = ErrorSlot::default();
        let parser = PlaylistParser::new(config.recency_capacity, formatter);

        tokio::spawn(run_poller(
            source,
            parser,
            config,
            tx,
            error.clone(),
            token.clone(),
        ));

        Self { rx, error, token }
    }

    /// Parses lines from `reader` until EOF or `#EXT-X-ENDLIST`.
    pub fn from_reader(
        reader: impl AsyncRead + Send + Unpin + 'static,
        formatter: Option<Formatter>,
        config: SessionConfig,
        token: CancellationToken,
    ) -> Self {
        Self::new(ReaderSource::new(reader), formatter, config, token)
    }

    pub async fn from_file(
        path: impl AsRef<Path>,
        formatter: Option<Formatter>,
        config: SessionConfig,
        token: CancellationToken,
    ) -> Result<Self, HlsError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        Ok(Self::from_reader(file, formatter, config, token))
    }

    /// Polls the URLs produced by `next_url`.
    ///
    /// The first URL is fetched first and also fixes the base used to
    /// resolve relative segment references. `None` from the closure ends the
    /// session cleanly.
    pub fn from_url<N, F>(
        mut next_url: N,
        fetcher: Arc<F>,
        config: SessionConfig,
        token: CancellationToken,
    ) -> Result<Self, HlsError>
    where
        N: FnMut() -> Option<String> + Send + 'static,
        F: Fetch + ?Sized + 'static,
    {
        let first = next_url()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| HlsError::invalid_url("", "no playlist URL"))?;
        let resolver = UrlResolver::new(&first)?;
        let source = UrlSource::new(first, next_url, fetcher);
        Ok(Self::new(source, Some(resolver.formatter()), config, token))
    }

    /// Polls a single playlist URL until it ends.
    pub fn from_playlist_url<F>(
        url: &str,
        fetcher: Arc<F>,
        config: SessionConfig,
        token: CancellationToken,
    ) -> Result<Self, HlsError>
    where
        F: Fetch + ?Sized + 'static,
    {
        let url = url.to_string();
        Self::from_url(move || Some(url.clone()), fetcher, config, token)
    }

    /// Waits for the next entry. `None` once the session is over; check
    /// [`M3u8Session::error`] to tell a clean end from a failure.
    pub async fn next(&mut self) -> Option<EntryResult> {
        self.rx.recv().await
    }

    pub fn error(&self) -> Option<HlsError> {
        self.error.lock().clone()
    }

    /// Shared handle on the error slot, still usable after the session has
    /// been turned into a stream.
    pub fn error_slot(&self) -> ErrorSlot {
        self.error.clone()
    }

    /// Stops polling before the next fetch.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn into_entries(self) -> impl Stream<Item = EntryResult> + Send + 'static {
        ReceiverStream::new(self.rx)
    }

    /// One resolved segment URL per line.
    pub fn url_list(self) -> ChunkReader {
        ChunkReader::new(
            self.into_entries()
                .map(|entry| entry.map(|entry| Bytes::from(format!("{}\n", entry.url)))),
        )
    }

    /// Concatenated segment payloads, loaded one after another with `loader`.
    pub fn stream<F>(self, loader: Arc<F>) -> ConcatStream
    where
        F: Fetch + ?Sized + 'static,
    {
        ConcatStream::new(
            self.into_entries().map(|entry| entry.map(|entry| entry.url)),
            loader,
        )
    }
}

async fn run_poller<S>(
    mut source: S,
    mut parser: PlaylistParser,
    config: SessionConfig,
    tx: mpsc::Sender<EntryResult>,
    error: ErrorSlot,
    token: CancellationToken,
) where
    S: PlaylistSource,
{
    info!("playlist session started");
    match poll_loop(&mut source, &mut parser, &config, &tx, &token).await {
        Ok(()) => info!("playlist session finished"),
        Err(e) => {
            error!(error = %e, "playlist session failed");
            *error.lock() = Some(e.clone());
            let _ = tx.send(Err(e)).await;
        }
    }
    // Dropping `tx` here closes the queue, after the slot has been filled.
}

async fn poll_loop<S>(
    source: &mut S,
    parser: &mut PlaylistParser,
    config: &SessionConfig,
    tx: &mpsc::Sender<EntryResult>,
    token: &CancellationToken,
) -> Result<(), HlsError>
where
    S: PlaylistSource,
{
    loop {
        if token.is_cancelled() {
            info!("playlist session cancelled");
            return Ok(());
        }
        if tx.is_closed() {
            debug!("entry consumer went away before the next fetch");
            return Ok(());
        }

        let cycle_start = Instant::now();
        let Some(fragment) = source.next_fragment().await? else {
            debug!("playlist source exhausted");
            return Ok(());
        };

        parser.start_fragment();
        let mut lines = BufReader::new(fragment).lines();
        let mut target_duration = None;
        let mut emitted = 0usize;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| HlsError::parse(format!("unreadable playlist: {e}")))?
        {
            match parser.parse_line(&line)? {
                LineEvent::Skip => {}
                LineEvent::TargetDuration(secs) => target_duration = Some(secs),
                LineEvent::Segment(entry) => {
                    debug!(url = %entry.url, duration = entry.duration, "new segment");
                    if tx.send(Ok(entry)).await.is_err() {
                        debug!("entry consumer went away");
                        return Ok(());
                    }
                    emitted += 1;
                }
                LineEvent::EndList => {
                    info!("playlist ended with #EXT-X-ENDLIST");
                    return Ok(());
                }
            }
        }

        if source.is_exhausted() {
            debug!(emitted, "last fragment consumed");
            return Ok(());
        }

        let delay = refresh_delay(config, target_duration, cycle_start.elapsed());
        debug!(emitted, delay_ms = delay.as_millis() as u64, "waiting for refresh");
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("playlist session cancelled while waiting");
                return Ok(());
            }
            _ = tx.closed() => {
                debug!("entry consumer went away while waiting");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Target duration (or the fallback interval) minus the time this cycle took.
///
/// A target duration too large for a `Duration` falls back to the interval.
fn refresh_delay(
    config: &SessionConfig,
    target_duration: Option<f64>,
    elapsed: Duration,
) -> Duration {
    let period = match target_duration {
        Some(secs) if config.honor_target_duration => Duration::try_from_secs_f64(secs)
            .unwrap_or(config.fallback_refresh_interval),
        _ => config.fallback_refresh_interval,
    };
    period.saturating_sub(elapsed)
}
