/// Crate-wide result type for normalization.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons an inbound payload cannot become a canonical request.
///
/// All variants are client input problems; callers surface them as a
/// malformed-request response without touching any session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A field the channel requires is absent or blank.
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    /// The message text is empty after trimming.
    #[error("message text is empty")]
    EmptyText,

    /// A field is present but not acceptable.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The command discriminator is not one this channel understands.
    #[error("unknown type")]
    UnknownType { kind: String },
}

impl Error {
    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    #[must_use]
    pub fn invalid(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}
