//! Error types for stitch-install.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error("index reports part {part} of target {target} as unverifiable")]
    UnverifiablePart { target: usize, part: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ranged response ended before its first part")]
    UnexpectedEndOfStream,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("source patch {source} failed after {attempts} attempts")]
    ExhaustedRetries {
        source: usize,
        attempts: u32,
        #[source]
        cause: Box<Error>,
    },

    #[error(transparent)]
    Fs(#[from] stitch_fs::Error),
}

impl Error {
    /// Whether an install task may locally retry after this error.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Io(_) | Error::UnexpectedEndOfStream
        )
    }
}
