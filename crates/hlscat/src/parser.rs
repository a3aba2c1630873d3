//! Line oriented media playlist parser.
//!
//! The parser keeps state across fragments of the same session: the recency
//! window, the last `#EXTINF` duration and the pending `#EXT-X-MAP` URI.
//! Feeding it successive snapshots of a live playlist yields only the
//! segments that have not been seen recently.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::HlsError;
use crate::recency::RecencySet;

const END_LIST: &str = "#EXT-X-ENDLIST";
const MAP: &str = "#EXT-X-MAP";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION";
const INF: &str = "#EXTINF";

/// Maps a raw playlist reference to the identifier that is emitted.
/// Returning `None` vetoes the reference.
pub type Formatter = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// One media segment announced by a playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub duration: f64,
    pub url: String,
    pub init_segment_url: Option<String>,
}

impl SegmentEntry {
    pub fn new(duration: f64, url: impl Into<String>) -> Self {
        Self {
            duration,
            url: url.into(),
            init_segment_url: None,
        }
    }

    pub fn with_init_segment(mut self, url: impl Into<String>) -> Self {
        self.init_segment_url = Some(url.into());
        self
    }
}

/// Result of feeding a single line to the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Skip,
    Segment(SegmentEntry),
    TargetDuration(f64),
    EndList,
}

/// Everything one fragment produced, for callers that parse whole texts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFragment {
    pub entries: Vec<SegmentEntry>,
    pub target_duration: Option<f64>,
    pub end_list: bool,
}

pub struct PlaylistParser {
    recent: RecencySet,
    formatter: Option<Formatter>,
    duration: f64,
    pending_map: Option<String>,
    emitted_any: bool,
}

impl fmt::Debug for PlaylistParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistParser")
            .field("recent", &self.recent.len())
            .field("formatter", &self.formatter.is_some())
            .field("duration", &self.duration)
            .field("pending_map", &self.pending_map)
            .field("emitted_any", &self.emitted_any)
            .finish()
    }
}

impl PlaylistParser {
    pub fn new(recency_capacity: usize, formatter: Option<Formatter>) -> Self {
        Self {
            recent: RecencySet::new(recency_capacity),
            formatter,
            duration: 0.0,
            pending_map: None,
            emitted_any: false,
        }
    }

    /// Marks the start of a new fragment. The last `#EXTINF` duration does
    /// not carry over to it.
    pub fn start_fragment(&mut self) {
        self.duration = 0.0;
    }

    fn format(&self, reference: &str) -> Option<String> {
        match &self.formatter {
            Some(formatter) => formatter(reference),
            None => Some(reference.to_string()),
        }
    }

    pub fn parse_line(&mut self, raw: &str) -> Result<LineEvent, HlsError> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(LineEvent::Skip);
        }

        if line == END_LIST {
            debug!("end of playlist reached");
            return Ok(LineEvent::EndList);
        }

        if line.starts_with(MAP) {
            // Only the very first emitted segment carries the init segment.
            if !self.emitted_any
                && let Some(uri) = line.split('"').nth(1).filter(|uri| !uri.is_empty())
            {
                self.pending_map = self.format(uri);
                trace!(map = ?self.pending_map, "init segment announced");
            }
            return Ok(LineEvent::Skip);
        }

        if let Some(rest) = line.strip_prefix(TARGET_DURATION) {
            let value = rest.trim_start_matches(':').trim();
            return Ok(match value.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => LineEvent::TargetDuration(secs),
                _ => {
                    debug!(line, "ignoring unparsable target duration");
                    LineEvent::Skip
                }
            });
        }

        if line.starts_with(INF) {
            self.duration = extinf_duration(line)?;
            return Ok(LineEvent::Skip);
        }

        if line.starts_with('#') {
            return Ok(LineEvent::Skip);
        }

        if self.recent.contains(line) {
            return Ok(LineEvent::Skip);
        }
        let Some(url) = self.format(line) else {
            debug!(reference = line, "reference vetoed by formatter");
            return Ok(LineEvent::Skip);
        };
        self.recent.add(line);
        self.emitted_any = true;

        Ok(LineEvent::Segment(SegmentEntry {
            duration: self.duration,
            url,
            init_segment_url: self.pending_map.take(),
        }))
    }

    /// Parses a complete fragment, stopping at `#EXT-X-ENDLIST`.
    pub fn parse_fragment(&mut self, text: &str) -> Result<ParsedFragment, HlsError> {
        self.start_fragment();
        let mut fragment = ParsedFragment::default();
        for line in text.lines() {
            match self.parse_line(line)? {
                LineEvent::Skip => {}
                LineEvent::Segment(entry) => fragment.entries.push(entry),
                LineEvent::TargetDuration(secs) => fragment.target_duration = Some(secs),
                LineEvent::EndList => {
                    fragment.end_list = true;
                    break;
                }
            }
        }
        Ok(fragment)
    }
}

/// Extracts the duration of an `#EXTINF:<duration>,<title>` line.
fn extinf_duration(line: &str) -> Result<f64, HlsError> {
    let value = match line.split_once(':') {
        Some((_, rest)) => rest.split(',').next().unwrap_or_default(),
        None => "",
    };
    let value = value.trim();
    let duration = value
        .parse::<f64>()
        .map_err(|e| HlsError::parse(format!("invalid #EXTINF duration `{value}`: {e}")))?;
    // NaN and infinities parse, but have no JSON form in the archive index
    if !duration.is_finite() || duration < 0.0 {
        return Err(HlsError::parse(format!(
            "#EXTINF duration `{value}` is not a finite non-negative number"
        )));
    }
    Ok(duration)
}
