use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hlscat_engine::{
    ArchiveIndex, FetchConfig, HttpFetcher, M3u8Session, Packer, PackerConfig, SessionConfig,
    UrlResolver, parse_range, read_range,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::Args;
use crate::error::{AppError, Result};
use crate::headers::parse_headers;

pub struct CommandExecutor {
    fetch_config: FetchConfig,
    session_config: SessionConfig,
    token: CancellationToken,
}

fn is_http_url(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Copies `reader` to stdout. Read failures keep their cause; a closed
/// stdout becomes [`AppError::BrokenPipe`].
async fn copy_to_stdout(mut reader: impl AsyncRead + Unpin) -> Result<u64> {
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout
            .write_all(&buf[..n])
            .await
            .map_err(AppError::from_output)?;
        total += n as u64;
    }
    stdout.flush().await.map_err(AppError::from_output)?;
    Ok(total)
}

impl CommandExecutor {
    pub fn new(args: &Args, token: CancellationToken) -> Result<Self> {
        let mut fetch_config = FetchConfig {
            timeout: Duration::from_secs(args.timeout),
            accept_invalid_certs: args.insecure,
            ..FetchConfig::default()
        };
        fetch_config.headers.extend(parse_headers(&args.headers)?);
        fetch_config.retry.max_attempts = args.retries.max(1);

        Ok(Self {
            fetch_config,
            session_config: SessionConfig::default(),
            token,
        })
    }

    /// Segment downloads keep their own token: an interrupt only stops the
    /// playlist refreshes, queued segments are still fetched and written.
    fn fetcher(&self) -> Result<Arc<HttpFetcher>> {
        Ok(Arc::new(HttpFetcher::new(self.fetch_config.clone())?))
    }

    pub async fn list(&self, input: &str, base: Option<&str>) -> Result<()> {
        let session = if is_http_url(input) {
            M3u8Session::from_playlist_url(
                input,
                self.fetcher()?,
                self.session_config.clone(),
                self.token.clone(),
            )?
        } else {
            let formatter = base
                .map(UrlResolver::new)
                .transpose()?
                .map(UrlResolver::formatter);
            if input == "-" {
                M3u8Session::from_reader(
                    tokio::io::stdin(),
                    formatter,
                    self.session_config.clone(),
                    self.token.clone(),
                )
            } else {
                M3u8Session::from_file(
                    input,
                    formatter,
                    self.session_config.clone(),
                    self.token.clone(),
                )
                .await?
            }
        };

        copy_to_stdout(session.url_list()).await?;
        Ok(())
    }

    pub async fn play(&self, url: &str) -> Result<()> {
        let fetcher = self.fetcher()?;
        let session = M3u8Session::from_playlist_url(
            url,
            fetcher.clone(),
            self.session_config.clone(),
            self.token.clone(),
        )?;
        let total = copy_to_stdout(session.stream(fetcher).into_async_read()).await?;
        info!(bytes = total, "Stream finished");
        Ok(())
    }

    pub async fn pack(
        &self,
        url: &str,
        output: &Path,
        header_kib: usize,
        stop_free: usize,
    ) -> Result<()> {
        let fetcher = self.fetcher()?;
        let stop = Arc::new(AtomicBool::new(false));

        let next_url = {
            let stop = stop.clone();
            let url = url.to_string();
            move || (!stop.load(Ordering::Relaxed)).then(|| url.clone())
        };
        let mut session = M3u8Session::from_url(
            next_url,
            fetcher.clone(),
            self.session_config.clone(),
            self.token.clone(),
        )?;

        let config = PackerConfig::default().with_header_kib(header_kib);
        let mut packer = Packer::new(output, config);
        let total = packer
            .receive(&mut session, fetcher.as_ref(), |total, free| {
                info!(bytes = total, free_header = free, "Packed segment");
                if free < stop_free && !stop.swap(true, Ordering::Relaxed) {
                    info!(free_header = free, "Index header almost full, no more playlist refreshes");
                }
                Ok(())
            })
            .await?;

        info!(path = %output.display(), bytes = total, "Archive written");
        Ok(())
    }

    pub async fn playlist(
        &self,
        archive: &Path,
        uri: Option<&str>,
        live: bool,
        header_kib: usize,
    ) -> Result<()> {
        let budget = PackerConfig::default().with_header_kib(header_kib).header_budget;
        let index = ArchiveIndex::read_from(archive, budget).await?;
        let default_uri = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let uri = uri.unwrap_or(&default_uri);
        debug!(entries = index.len(), uri, live, "Rendering playlist");

        let text = index.render_playlist(uri, live);
        copy_to_stdout(text.as_bytes()).await?;
        Ok(())
    }

    pub async fn extract(&self, archive: &Path, range: &str) -> Result<()> {
        let range = parse_range(range)
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid range: {range}")))?;
        let bytes = read_range(archive, range).await?;
        copy_to_stdout(bytes.as_ref()).await?;
        Ok(())
    }
}
