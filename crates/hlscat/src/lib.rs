//! Live HLS media playlist consumption.
//!
//! An [`M3u8Session`] polls a playlist, keeps track of recently seen
//! segments and hands out each new [`SegmentEntry`] once. Entries can be
//! listed, concatenated into one byte stream ([`ConcatStream`]) or packed into
//! a self-indexing archive ([`Packer`]) that [`ArchiveIndex`] reads back as a
//! playlist of byte ranges.

pub mod archive;
pub mod concat;
pub mod config;
pub mod error;
pub mod fetch;
pub mod io;
pub mod packer;
pub mod parser;
pub mod recency;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod source;

pub use archive::{ArchiveIndex, IndexEntry, parse_range, read_range};
pub use concat::ConcatStream;
pub use config::{FetchConfig, PackerConfig, SessionConfig};
pub use error::HlsError;
pub use fetch::{ByteStream, Fetch, HttpFetcher};
pub use io::ChunkReader;
pub use packer::Packer;
pub use parser::{Formatter, PlaylistParser, SegmentEntry};
pub use recency::RecencySet;
pub use resolver::{UrlResolver, base_url};
pub use retry::RetryPolicy;
pub use session::M3u8Session;
pub use source::{PlaylistSource, ReaderSource, UrlSource};
