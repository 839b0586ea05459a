use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The provider refused the request itself, e.g. a bad credential or a
    /// malformed body. Sending it again gives the same answer.
    Rejected,
    /// Any other errors, typically network or server failures.
    Other,
}

impl ErrorKind {
    /// Returns `true` if a request failing with this kind may succeed when
    /// sent again later.
    #[inline]
    pub fn is_transient(self) -> bool {
        !matches!(self, ErrorKind::Moderated | ErrorKind::Rejected)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Moderated => write!(f, "content moderated"),
            ErrorKind::RateLimitExceeded => write!(f, "rate limit exceeded"),
            ErrorKind::Rejected => write!(f, "request rejected"),
            ErrorKind::Other => write!(f, "upstream model error"),
        }
    }
}
