//! Self-indexing archive writer.
//!
//! Layout: a header of exactly `header_budget` bytes holding a JSON array of
//! `[duration,[offset,length]]` records padded with spaces, followed by the
//! segment payloads back to back in arrival order.
//!
//! The whole header is rewritten at offset 0 after every segment so that its
//! closing bracket and padding always describe the current index. That makes
//! each segment cost O(index size); the fixed budget bounds it. The rewrite
//! is not atomic: a crash in the middle of it can leave a malformed header.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::PackerConfig;
use crate::error::HlsError;
use crate::fetch::Fetch;
use crate::session::M3u8Session;

pub struct Packer {
    path: PathBuf,
    config: PackerConfig,
    index: String,
    written: u64,
    file: Option<File>,
}

/// Pads the index text to a full header: `index` + `]` + spaces.
pub fn render_header(index: &str, header_budget: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(header_budget.max(index.len() + 1));
    header.extend_from_slice(index.as_bytes());
    header.push(b']');
    header.resize(header_budget.max(header.len()), b' ');
    header
}

fn index_record(duration: f64, offset: u64, length: usize) -> String {
    format!("[{duration:.1},[{offset},{length}]]")
}

fn write_error(context: &str, path: &Path, e: std::io::Error) -> HlsError {
    HlsError::write(format!("{context} {}: {e}", path.display()))
}

impl Packer {
    pub fn new(path: impl Into<PathBuf>, config: PackerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            index: String::new(),
            written: 0,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current archive size: header plus payloads, 0 before the first segment.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Header bytes still available for index records.
    pub fn free_header(&self) -> usize {
        self.config
            .header_budget
            .saturating_sub(self.index.len() + 1)
    }

    /// Packs every entry of `session` until it ends.
    ///
    /// After each segment `progress(total_bytes, free_header_bytes)` is
    /// called. An error from the callback aborts packing with that error;
    /// the usual reaction to a low free count is to make the session stop
    /// polling. Packing also stops on its own once the free header space
    /// drops below `min_free_header`.
    pub async fn receive<F, P>(
        &mut self,
        session: &mut M3u8Session,
        fetcher: &F,
        mut progress: P,
    ) -> Result<u64, HlsError>
    where
        F: Fetch + ?Sized,
        P: FnMut(u64, usize) -> Result<(), HlsError>,
    {
        let mut first = true;
        while let Some(entry) = session.next().await {
            let entry = entry?;

            if first {
                first = false;
                if let Some(init_url) = &entry.init_segment_url {
                    debug!(url = %init_url, "packing init segment");
                    let payload = fetcher.fetch_bytes(init_url).await?;
                    if !self.append(0.0, &payload).await? {
                        return Ok(self.written);
                    }
                }
            }

            let payload = fetcher.fetch_bytes(&entry.url).await?;
            if !self.append(entry.duration, &payload).await? {
                return Ok(self.written);
            }

            let free = self.free_header();
            debug!(
                url = %entry.url,
                size = payload.len(),
                total = self.written,
                free_header = free,
                "segment packed"
            );
            progress(self.written, free)?;
            if free < self.config.min_free_header {
                warn!(
                    free_header = free,
                    min = self.config.min_free_header,
                    "index header nearly full, stopping"
                );
                return Ok(self.written);
            }
        }

        if let Some(e) = session.error() {
            return Err(e);
        }
        info!(path = %self.path.display(), total = self.written, "packing finished");
        Ok(self.written)
    }

    /// Writes one payload and its index record. `false` when the record no
    /// longer fits the header; nothing is written in that case.
    async fn append(&mut self, duration: f64, payload: &Bytes) -> Result<bool, HlsError> {
        let budget = self.config.header_budget;
        let offset = if self.file.is_some() {
            self.written
        } else {
            budget as u64
        };
        let record = index_record(duration, offset, payload.len());
        let separator = if self.index.is_empty() { "[" } else { "," };
        if self.index.len() + separator.len() + record.len() + 1 > budget {
            warn!(
                path = %self.path.display(),
                record = %record,
                "index header full, segment not packed"
            );
            return Ok(false);
        }

        let path = self.path.clone();
        let file = self.open().await?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| write_error("failed to seek in", &path, e))?;
        file.write_all(payload)
            .await
            .map_err(|e| write_error("failed to write segment to", &path, e))?;

        self.index.push_str(separator);
        self.index.push_str(&record);
        let header = render_header(&self.index, budget);

        let file = self.open().await?;
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| write_error("failed to seek in", &path, e))?;
        file.write_all(&header)
            .await
            .map_err(|e| write_error("failed to write index header to", &path, e))?;
        file.flush()
            .await
            .map_err(|e| write_error("failed to flush", &path, e))?;

        self.written = offset + payload.len() as u64;
        Ok(true)
    }

    /// Creates the archive on first use, reserving the header region.
    async fn open(&mut self) -> Result<&mut File, HlsError> {
        if self.file.is_none() {
            let mut file = File::create(&self.path)
                .await
                .map_err(|e| write_error("failed to create", &self.path, e))?;
            let budget = self.config.header_budget as u64;
            file.seek(SeekFrom::Start(budget))
                .await
                .map_err(|e| write_error("failed to seek in", &self.path, e))?;
            info!(path = %self.path.display(), header_budget = budget, "archive created");
            self.written = budget;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| HlsError::Internal {
                reason: "archive file missing after creation".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveIndex, IndexEntry};
    use crate::config::SessionConfig;
    use crate::fetch::testing::MockFetcher;
    use crate::resolver::UrlResolver;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn session(playlist: &str) -> M3u8Session {
        M3u8Session::from_reader(
            Cursor::new(playlist.as_bytes().to_vec()),
            Some(
                UrlResolver::from_base("https://h/p/")
                    .expect("valid base")
                    .formatter(),
            ),
            SessionConfig::default(),
            CancellationToken::new(),
        )
    }

    fn small_config(header_budget: usize, min_free_header: usize) -> PackerConfig {
        PackerConfig {
            header_budget,
            min_free_header,
        }
    }

    #[tokio::test]
    async fn round_trip_offsets_and_payloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let a = vec![0xAAu8; 1000];
        let b = vec![0xBBu8; 777];
        let fetcher = MockFetcher::new()
            .with_body("https://h/p/a.ts", &a)
            .with_body("https://h/p/b.ts", &b);

        let mut packer = Packer::new(&path, PackerConfig::default());
        let mut s = session("#EXTM3U\n#EXTINF:2.5,\na.ts\n#EXTINF:3.0,\nb.ts\n#EXT-X-ENDLIST\n");
        let total = packer
            .receive(&mut s, &fetcher, |_, _| Ok(()))
            .await
            .expect("packs");

        let budget = 65536u64;
        assert_eq!(total, budget + 1000 + 777);

        let file = tokio::fs::read(&path).await.expect("archive exists");
        assert_eq!(file.len() as u64, total);

        let header = std::str::from_utf8(&file[..budget as usize]).expect("utf8 header");
        assert!(header.starts_with("[[2.5,[65536,1000]],[3.0,[66536,777]]]"));
        assert!(header[38..].bytes().all(|c| c == b' '));

        let index = ArchiveIndex::parse(&file).expect("header parses");
        assert_eq!(
            index.entries,
            vec![
                IndexEntry {
                    duration: 2.5,
                    offset: budget,
                    length: 1000
                },
                IndexEntry {
                    duration: 3.0,
                    offset: budget + 1000,
                    length: 777
                },
            ]
        );
        assert_eq!(&file[65536..66536], &a[..]);
        assert_eq!(&file[66536..], &b[..]);
    }

    #[tokio::test]
    async fn init_segment_is_written_first_with_zero_duration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new()
            .with_body("https://h/p/init.mp4", b"INIT")
            .with_body("https://h/p/a.m4s", b"AAAA")
            .with_body("https://h/p/b.m4s", b"BB");

        let mut packer = Packer::new(&path, small_config(4096, 50));
        let mut s = session(
            "#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:2.0,\na.m4s\n#EXTINF:2.0,\nb.m4s\n#EXT-X-ENDLIST\n",
        );
        packer
            .receive(&mut s, &fetcher, |_, _| Ok(()))
            .await
            .expect("packs");

        let file = tokio::fs::read(&path).await.expect("archive exists");
        let index = ArchiveIndex::parse(&file).expect("header parses");
        let durations: Vec<f64> = index.entries.iter().map(|e| e.duration).collect();
        assert_eq!(durations, [0.0, 2.0, 2.0]);
        assert_eq!(&file[4096..4100], b"INIT");
        assert_eq!(&file[4100..4104], b"AAAA");
        assert_eq!(&file[4104..], b"BB");
        assert_eq!(fetcher.call_count("https://h/p/init.mp4"), 1);
    }

    #[tokio::test]
    async fn header_never_grows_past_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let mut playlist = String::new();
        let mut fetcher = MockFetcher::new();
        for i in 0..10 {
            playlist.push_str(&format!("#EXTINF:2,\ns{i}.ts\n"));
            fetcher = fetcher.with_body(&format!("https://h/p/s{i}.ts"), b"xyz");
        }
        playlist.push_str("#EXT-X-ENDLIST\n");

        // each record is 12 bytes, so four of them fit into 64
        let mut packer = Packer::new(&path, small_config(64, 0));
        let mut s = session(&playlist);
        let total = packer
            .receive(&mut s, &fetcher, |_, _| Ok(()))
            .await
            .expect("stops cleanly");

        assert_eq!(total, 64 + 4 * 3);
        let file = tokio::fs::read(&path).await.expect("archive exists");
        assert_eq!(file.len(), 64 + 4 * 3);
        let index = ArchiveIndex::parse(&file).expect("header parses");
        assert_eq!(index.entries.len(), 4);
        assert_eq!(index.entries[3].offset, 73);
    }

    #[tokio::test]
    async fn stops_when_free_header_drops_below_floor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new()
            .with_body("https://h/p/a.ts", b"abc")
            .with_body("https://h/p/b.ts", b"abc")
            .with_body("https://h/p/c.ts", b"abc");

        let mut reports = Vec::new();
        let mut packer = Packer::new(&path, small_config(64, 50));
        let mut s = session("#EXTINF:2,\na.ts\n#EXTINF:2,\nb.ts\n#EXTINF:2,\nc.ts\n");
        let total = packer
            .receive(&mut s, &fetcher, |total, free| {
                reports.push((total, free));
                Ok(())
            })
            .await
            .expect("stops cleanly");

        assert_eq!(reports, [(67, 50), (70, 37)]);
        assert_eq!(total, 70);
        assert_eq!(fetcher.call_count("https://h/p/c.ts"), 0);
    }

    #[tokio::test]
    async fn progress_error_aborts_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new()
            .with_body("https://h/p/a.ts", b"abc")
            .with_body("https://h/p/b.ts", b"abc");

        let mut packer = Packer::new(&path, small_config(4096, 50));
        let mut s = session("#EXTINF:2,\na.ts\n#EXTINF:2,\nb.ts\n#EXT-X-ENDLIST\n");
        let result = packer
            .receive(&mut s, &fetcher, |_, _| Err(HlsError::Cancelled))
            .await;

        assert!(matches!(result, Err(HlsError::Cancelled)));
        assert_eq!(packer.written(), 4096 + 3);
        assert_eq!(fetcher.call_count("https://h/p/b.ts"), 0);
    }

    #[tokio::test]
    async fn session_error_is_returned_after_packed_segments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new().with_body("https://h/p/a.ts", b"abc");

        let mut packer = Packer::new(&path, small_config(4096, 50));
        let mut s = session("#EXTINF:2,\na.ts\n#EXTINF:bad,\nb.ts\n");
        let result = packer.receive(&mut s, &fetcher, |_, _| Ok(())).await;

        assert!(matches!(result, Err(HlsError::Parse { .. })));
        let file = tokio::fs::read(&path).await.expect("archive exists");
        assert_eq!(ArchiveIndex::parse(&file).expect("valid").entries.len(), 1);
    }

    #[tokio::test]
    async fn non_finite_duration_never_reaches_the_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new()
            .with_body("https://h/p/a.ts", b"abc")
            .with_body("https://h/p/b.ts", b"def");

        let mut packer = Packer::new(&path, small_config(4096, 50));
        let mut s = session("#EXTINF:2,\na.ts\n#EXTINF:NaN,\nb.ts\n");
        let result = packer.receive(&mut s, &fetcher, |_, _| Ok(())).await;

        assert!(matches!(result, Err(HlsError::Parse { .. })));
        let file = tokio::fs::read(&path).await.expect("archive exists");
        let index = ArchiveIndex::parse(&file).expect("header stays valid json");
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].duration, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_still_packs_queued_segments() {
        const LIVE: &str = "https://h/p/index.m3u8";
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_sequence(
                    LIVE,
                    &["#EXT-X-TARGETDURATION:1\n#EXTINF:1,\na.ts\n#EXTINF:1,\nb.ts\n"],
                )
                .with_body("https://h/p/a.ts", b"aa")
                .with_body("https://h/p/b.ts", b"bbb"),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let mut s = M3u8Session::from_playlist_url(
            LIVE,
            fetcher.clone(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .expect("valid url");

        tokio::time::sleep(Duration::from_millis(100)).await;
        s.cancel();

        let mut packer = Packer::new(&path, small_config(4096, 50));
        let total = packer
            .receive(&mut s, fetcher.as_ref(), |_, _| Ok(()))
            .await
            .expect("queued segments are packed");

        assert_eq!(total, 4096 + 5);
        assert_eq!(fetcher.call_count(LIVE), 1);
        let file = tokio::fs::read(&path).await.expect("archive exists");
        assert_eq!(ArchiveIndex::parse(&file).expect("valid").entries.len(), 2);
    }

    #[tokio::test]
    async fn segment_fetch_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new();

        let mut packer = Packer::new(&path, PackerConfig::default());
        let mut s = session("#EXTINF:2,\na.ts\n#EXT-X-ENDLIST\n");
        let result = packer.receive(&mut s, &fetcher, |_, _| Ok(())).await;

        assert!(matches!(result, Err(HlsError::HttpStatus { .. })));
        assert_eq!(packer.written(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn interrupted_header_rewrite_is_not_recoverable() {
        // The header is overwritten in place; a torn write leaves garbage
        // that the reader rejects. This is a known limitation.
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pack");
        let fetcher = MockFetcher::new().with_body("https://h/p/a.ts", b"abc");

        let mut packer = Packer::new(&path, small_config(4096, 50));
        let mut s = session("#EXTINF:2,\na.ts\n#EXT-X-ENDLIST\n");
        packer
            .receive(&mut s, &fetcher, |_, _| Ok(()))
            .await
            .expect("packs");

        let mut file = tokio::fs::read(&path).await.expect("archive exists");
        file[5..12].copy_from_slice(b"\0\0\0\0\0\0\0");
        assert!(matches!(
            ArchiveIndex::parse(&file),
            Err(HlsError::Archive { .. })
        ));
    }

    #[test]
    fn render_header_pads_to_budget() {
        let header = render_header("[[1.0,[16,2]]", 20);
        assert_eq!(header.len(), 20);
        assert_eq!(&header[..14], b"[[1.0,[16,2]]]");
        assert!(header[14..].iter().all(|&c| c == b' '));
    }

    #[test]
    fn record_rounds_duration_to_one_decimal() {
        assert_eq!(index_record(2.04, 10, 5), "[2.0,[10,5]]");
        assert_eq!(index_record(6.006, 0, 1), "[6.0,[0,1]]");
        assert_eq!(index_record(3.96, 7, 2), "[4.0,[7,2]]");
    }
}
