use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hlscat")]
#[command(author, version, about = "Follow live HLS playlists", long_about = None)]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Extra request header, e.g. "Referer: https://example.com" (repeatable)
    #[arg(short = 'H', long = "header", global = true, value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Total attempts per request
    #[arg(long, global = true, default_value_t = 3)]
    pub retries: u32,

    /// Request timeout in seconds, 0 disables it
    #[arg(long, global = true, default_value_t = 60)]
    pub timeout: u64,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print one absolute segment URL per line
    List {
        /// Playlist URL, file path, or "-" for stdin
        input: String,

        /// Base URL used to resolve relative lines of a file or stdin playlist
        #[arg(long)]
        base: Option<String>,
    },

    /// Write the concatenated segment payloads to stdout
    Play {
        /// Playlist URL
        url: String,
    },

    /// Pack segments into a self-indexing archive
    Pack {
        /// Playlist URL
        url: String,

        /// Archive to create
        #[arg(short, long)]
        output: PathBuf,

        /// Index header size in KiB (4..=512)
        #[arg(long, default_value_t = 64)]
        header_kib: usize,

        /// Stop polling once fewer header bytes than this are left
        #[arg(long, default_value_t = 1024)]
        stop_free: usize,
    },

    /// Print a media playlist addressing byte ranges of an archive
    Playlist {
        /// Packed archive
        archive: PathBuf,

        /// URI the archive is served under
        #[arg(long)]
        uri: Option<String>,

        /// Only list the most recent segments and leave the playlist open
        #[arg(long)]
        live: bool,

        /// Index header size the archive was packed with, in KiB
        #[arg(long, default_value_t = 64)]
        header_kib: usize,
    },

    /// Copy one byte range of an archive to stdout
    Extract {
        /// Packed archive
        archive: PathBuf,

        /// Inclusive byte range, as found in playlist URIs: START-END
        #[arg(long)]
        range: String,
    },
}
