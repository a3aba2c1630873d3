use hlscat_engine::HlsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Hls(#[from] HlsError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Broken pipe: consumer closed the connection")]
    BrokenPipe,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Maps a write failure on stdout, where a closed pipe is a normal way
    /// for the consumer to stop.
    pub fn from_output(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::BrokenPipe {
            AppError::BrokenPipe
        } else {
            AppError::Io(err)
        }
    }

    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, AppError::BrokenPipe)
    }
}
