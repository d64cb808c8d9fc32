/// Completion failed; the caller owes the user an apology rather than a reply.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transient failures persisted through every attempt.
    #[error("AI backend unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// Failure that retrying would not fix (bad request, auth, decode).
    #[error("AI backend rejected the request: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, Error>;
