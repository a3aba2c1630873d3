//! Reading packed archives back.
//!
//! The index header is parsed into [`ArchiveIndex`], which can render a
//! media playlist whose segment URIs address byte ranges of the archive.
//! Serving those ranges is left to whatever sits in front of the file;
//! [`read_range`] is the primitive it needs.

use std::fmt::Write as _;
use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::HlsError;

/// Number of media entries kept by a live playlist.
pub const LIVE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "(f64, (u64, u64))")]
pub struct IndexEntry {
    pub duration: f64,
    pub offset: u64,
    pub length: u64,
}

impl From<(f64, (u64, u64))> for IndexEntry {
    fn from((duration, (offset, length)): (f64, (u64, u64))) -> Self {
        Self {
            duration,
            offset,
            length,
        }
    }
}

impl IndexEntry {
    /// Inclusive byte range, as used in `?range=` URIs.
    pub fn range(&self) -> (u64, u64) {
        (
            self.offset,
            self.offset.saturating_add(self.length.saturating_sub(1)),
        )
    }

    fn is_init_segment(&self) -> bool {
        self.duration == 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveIndex {
    pub entries: Vec<IndexEntry>,
}

impl ArchiveIndex {
    /// Parses the index from the start of `header`. Only the first JSON value
    /// is read; padding and payload bytes after it are ignored.
    pub fn parse(header: &[u8]) -> Result<Self, HlsError> {
        let mut values =
            serde_json::Deserializer::from_slice(header).into_iter::<Vec<IndexEntry>>();
        match values.next() {
            Some(Ok(entries)) => Ok(Self { entries }),
            Some(Err(e)) => Err(HlsError::archive(format!("malformed index header: {e}"))),
            None => Err(HlsError::archive("empty index header")),
        }
    }

    pub async fn read_from(path: impl AsRef<Path>, header_budget: usize) -> Result<Self, HlsError> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let mut header = Vec::with_capacity(header_budget);
        file.take(header_budget as u64)
            .read_to_end(&mut header)
            .await?;
        let index = Self::parse(&header)?;
        debug!(path = %path.display(), entries = index.entries.len(), "archive index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the media durations, init segment excluded.
    pub fn total_duration(&self) -> f64 {
        self.media_entries().iter().map(|e| e.duration).sum()
    }

    fn init_entry(&self) -> Option<&IndexEntry> {
        self.entries.first().filter(|e| e.is_init_segment())
    }

    fn media_entries(&self) -> &[IndexEntry] {
        match self.init_entry() {
            Some(_) => &self.entries[1..],
            None => &self.entries,
        }
    }

    /// Renders a media playlist over the archive at `uri`.
    ///
    /// With `live` set only the last [`LIVE_WINDOW`] entries are listed and
    /// the end tag is left out, so players keep reloading while the archive
    /// is still being packed.
    pub fn render_playlist(&self, uri: &str, live: bool) -> String {
        let media = self.media_entries();
        let first = if live {
            media.len().saturating_sub(LIVE_WINDOW)
        } else {
            0
        };
        let window = &media[first..];
        let target = window
            .iter()
            .map(|e| e.duration)
            .fold(0.0_f64, f64::max)
            .ceil()
            .max(1.0) as u64;
        let init = self.init_entry();
        let separator = if uri.contains('?') { '&' } else { '?' };

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", if init.is_some() { 7 } else { 3 });
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{target}");
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{first}");
        if let Some(init) = init {
            let (start, end) = init.range();
            let _ = writeln!(out, "#EXT-X-MAP:URI=\"{uri}{separator}range={start}-{end}\"");
        }
        for entry in window {
            let (start, end) = entry.range();
            let _ = writeln!(out, "#EXTINF:{:.1},", entry.duration);
            let _ = writeln!(out, "{uri}{separator}range={start}-{end}");
        }
        if !live {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }
}

/// Parses an inclusive `start-end` range value.
pub fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.trim().split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    (start <= end).then_some((start, end))
}

/// Reads the inclusive byte range `start..=end` of the archive.
pub async fn read_range(path: impl AsRef<Path>, (start, end): (u64, u64)) -> Result<Bytes, HlsError> {
    let path = path.as_ref();
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();
    if start > end || end >= size {
        return Err(HlsError::archive(format!(
            "range {start}-{end} outside of {} ({size} bytes)",
            path.display()
        )));
    }
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; (end - start + 1) as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(duration: f64, offset: u64, length: u64) -> IndexEntry {
        IndexEntry {
            duration,
            offset,
            length,
        }
    }

    #[test]
    fn parses_first_value_and_ignores_padding() {
        let mut header = b"[[2.5,[64,10]],[3.0,[74,5]]]".to_vec();
        header.resize(64, b' ');
        header.extend_from_slice(b"payload bytes that are not json");

        let index = ArchiveIndex::parse(&header).expect("parses");
        assert_eq!(index.entries, vec![entry(2.5, 64, 10), entry(3.0, 74, 5)]);
    }

    #[test]
    fn rejects_malformed_or_empty_headers() {
        assert!(matches!(
            ArchiveIndex::parse(b"[[2.5,[64]]]   "),
            Err(HlsError::Archive { .. })
        ));
        assert!(matches!(
            ArchiveIndex::parse(b"        "),
            Err(HlsError::Archive { .. })
        ));
        // header padded before the first segment was recorded
        assert!(matches!(
            ArchiveIndex::parse(b"]       "),
            Err(HlsError::Archive { .. })
        ));
    }

    #[test]
    fn renders_vod_playlist() {
        let index = ArchiveIndex {
            entries: vec![entry(2.5, 100, 10), entry(3.2, 110, 20)],
        };
        let text = index.render_playlist("/a.pack", false);
        assert_eq!(
            text,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-TARGETDURATION:4\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXTINF:2.5,\n\
             /a.pack?range=100-109\n\
             #EXTINF:3.2,\n\
             /a.pack?range=110-129\n\
             #EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn init_segment_becomes_map_tag() {
        let index = ArchiveIndex {
            entries: vec![entry(0.0, 64, 4), entry(2.0, 68, 4)],
        };
        let text = index.render_playlist("http://h/a.pack?key=1", false);
        assert!(text.contains("#EXT-X-VERSION:7\n"));
        assert!(text.contains("#EXT-X-MAP:URI=\"http://h/a.pack?key=1&range=64-67\"\n"));
        assert!(text.contains("#EXTINF:2.0,\nhttp://h/a.pack?key=1&range=68-71\n"));
        assert_eq!(text.matches("#EXTINF").count(), 1);
        assert_eq!(index.total_duration(), 2.0);
    }

    #[test]
    fn live_playlist_keeps_last_window_without_endlist() {
        let entries = (0..15).map(|i| entry(2.0, 64 + i * 10, 10)).collect();
        let index = ArchiveIndex { entries };
        let text = index.render_playlist("a.pack", true);

        assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:5\n"));
        assert_eq!(text.matches("#EXTINF").count(), LIVE_WINDOW);
        assert!(text.contains("a.pack?range=114-123\n"));
        assert!(!text.contains("a.pack?range=104-113\n"));
        assert!(!text.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn range_of_crafted_entry_saturates() {
        assert_eq!(entry(1.0, u64::MAX - 1, 10).range(), (u64::MAX - 1, u64::MAX));
        assert_eq!(entry(1.0, 100, 0).range(), (100, 100));
    }

    #[test]
    fn range_values() {
        assert_eq!(parse_range("0-9"), Some((0, 9)));
        assert_eq!(parse_range(" 65536-66535 "), Some((65536, 66535)));
        assert_eq!(parse_range("5-5"), Some((5, 5)));
        assert_eq!(parse_range("9-0"), None);
        assert_eq!(parse_range("9"), None);
        assert_eq!(parse_range("a-b"), None);
    }

    #[tokio::test]
    async fn reads_index_and_ranges_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.pack");
        let mut content = b"[[1.0,[32,3]],[1.0,[35,2]]]".to_vec();
        content.resize(32, b' ');
        content.extend_from_slice(b"abcde");
        tokio::fs::write(&path, &content).await.expect("write");

        let index = ArchiveIndex::read_from(&path, 32).await.expect("index");
        assert_eq!(index.len(), 2);
        let second = index.entries[1];
        assert_eq!(
            read_range(&path, second.range()).await.expect("range"),
            Bytes::from_static(b"de")
        );
        assert!(matches!(
            read_range(&path, (30, 40)).await,
            Err(HlsError::Archive { .. })
        ));
    }
}
