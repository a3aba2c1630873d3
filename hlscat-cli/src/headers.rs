use crate::error::AppError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Parses `"Name: value"` strings into a header map.
///
/// The split happens at the first ':'; surrounding whitespace is trimmed.
/// Later occurrences of a name are appended, not replaced.
pub fn parse_headers(headers: &[String]) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::new();
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid header format: {header}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header name in {header}: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header value in {header}: {e}")))?;
        debug!(header = %name, "Added request header");
        map.append(name, value);
    }
    Ok(map)
}
