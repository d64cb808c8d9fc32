use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format: .{0}")]
    UnsupportedFormat(String),

    #[error("invalid value in {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },
}

impl Error {
    #[must_use]
    pub fn parse(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_env(var: &'static str, message: impl std::fmt::Display) -> Self {
        Self::InvalidEnv {
            var,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
