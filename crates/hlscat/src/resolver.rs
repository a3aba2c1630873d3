//! Turns playlist-relative segment references into absolute URLs.

use std::sync::Arc;

use regex::Regex;
use url::Url;

use crate::error::HlsError;
use crate::parser::Formatter;

const ABSOLUTE_URL_PATTERN: &str = r"^(?i:https?)://[[:print:]]{4,}$";

/// Returns the directory part of an absolute http(s) URL, always ending in `/`.
///
/// Query and fragment are dropped first. The search for the last `/` starts
/// at byte 8 so the slashes of `https://` are never picked.
pub fn base_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let url = &url[..end];

    match url.rfind('/') {
        Some(idx) if idx >= 8 => url[..=idx].to_string(),
        _ => format!("{url}/"),
    }
}

/// Resolves references against the directory of a playlist URL.
///
/// Precedence is fixed: absolute references pass through, root-relative
/// references keep only scheme and host of the base, anything else is
/// appended to the base directory.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    base: String,
    origin: String,
    absolute: Regex,
}

impl UrlResolver {
    pub fn new(playlist_url: &str) -> Result<Self, HlsError> {
        let parsed =
            Url::parse(playlist_url).map_err(|e| HlsError::invalid_url(playlist_url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HlsError::invalid_url(
                playlist_url,
                format!("unsupported scheme `{}`", parsed.scheme()),
            ));
        }
        Self::from_base(base_url(playlist_url))
    }

    /// Builds a resolver from an already computed base directory.
    pub fn from_base(base: impl Into<String>) -> Result<Self, HlsError> {
        let base = base.into();
        // scheme + "//" + host + "/"
        let origin = match base.match_indices('/').nth(2) {
            Some((idx, _)) => base[..=idx].to_string(),
            None => return Err(HlsError::invalid_url(&base, "base URL has no host part")),
        };
        let absolute = Regex::new(ABSOLUTE_URL_PATTERN)
            .map_err(|e| HlsError::Internal {
                reason: format!("absolute URL pattern: {e}"),
            })?;
        Ok(Self {
            base,
            origin,
            absolute,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_absolute(&self, reference: &str) -> bool {
        self.absolute.is_match(reference)
    }

    /// Resolves a single reference. `None` means the reference is unusable.
    pub fn resolve(&self, reference: &str) -> Option<String> {
        if reference.is_empty() {
            return None;
        }
        if self.is_absolute(reference) {
            return Some(reference.to_string());
        }
        if reference.starts_with('/') {
            return Some(format!(
                "{}{}",
                self.origin,
                reference.trim_start_matches('/')
            ));
        }
        Some(format!("{}{}", self.base, reference))
    }

    /// Wraps the resolver as a parser formatter.
    pub fn formatter(self) -> Formatter {
        Arc::new(move |reference: &str| self.resolve(reference))
    }
}
