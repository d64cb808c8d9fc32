use {crate::key::SessionKey, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error("session not found: {key}")]
    NotFound { key: SessionKey },
}

pub type Result<T> = std::result::Result<T, Error>;
