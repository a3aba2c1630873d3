//! HTTP access used for playlists and segments.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::config::FetchConfig;
use crate::error::HlsError;
use crate::retry::{RetryAction, retry_with_backoff};

/// A body being received chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, HlsError>>;

/// Loads a resource identified by a URL.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Starts loading `url` and returns its body as a stream.
    async fn fetch(&self, url: &str) -> Result<ByteStream, HlsError>;

    /// Loads `url` completely into memory.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, HlsError> {
        let mut body = self.fetch(url).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<ByteStream, HlsError> {
        (**self).fetch(url).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, HlsError> {
        (**self).fetch_bytes(url).await
    }
}

/// Installs the process wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// `reqwest` based fetcher with bounded retry on every request.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: Arc<FetchConfig>,
    token: CancellationToken,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, HlsError> {
        Self::with_token(config, CancellationToken::new())
    }

    /// Creates a fetcher whose retries stop when `token` is cancelled.
    pub fn with_token(config: FetchConfig, token: CancellationToken) -> Result<Self, HlsError> {
        install_rustls_provider();
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(config.headers.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            token,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Token that stops this fetcher's retries.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    async fn send_once(&self, url: &str) -> Result<Response, HlsError> {
        trace!(url, "sending request");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HlsError::http_status(status, url));
        }
        Ok(response)
    }

    async fn read_once(&self, url: &str) -> Result<Bytes, HlsError> {
        let response = self.send_once(url).await?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, url: &str) -> Result<ByteStream, HlsError> {
        let response = retry_with_backoff(&self.config.retry, &self.token, |_| async move {
            RetryAction::from_result(self.send_once(url).await)
        })
        .await?;

        debug!(url, content_length = ?response.content_length(), "response received");
        Ok(response.bytes_stream().map_err(HlsError::from).boxed())
    }

    /// Retries cover the body read as well as the request itself.
    #[instrument(skip(self), level = "debug")]
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, HlsError> {
        let body = retry_with_backoff(&self.config.retry, &self.token, |_| async move {
            RetryAction::from_result(self.read_once(url).await)
        })
        .await?;

        debug!(url, size = body.len(), "body received");
        Ok(body)
    }
}
