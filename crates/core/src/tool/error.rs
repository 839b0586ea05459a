use std::borrow::Cow;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The model asked for a tool that is not registered.
    UnknownTool,
    /// The arguments did not match the tool's parameters.
    InvalidArgument,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// The client did not return a result in time.
    FrontendTimeout,
    /// The call was abandoned before a result arrived.
    Cancelled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnknownTool => write!(f, "Unknown tool"),
            ErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::FrontendTimeout => write!(f, "Frontend timeout"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Describes a tool call error.
///
/// Tool call errors are never fatal, their [`Display`] form is what the
/// model sees as the call's result so it can correct itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    #[inline]
    fn new(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    /// Creates a new error with the `UnknownTool` kind.
    #[inline]
    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorKind::UnknownTool)
            .with_reason(format!("no tool named `{name}` is available"))
    }

    /// Creates a new error with the `InvalidArgument` kind.
    #[inline]
    pub fn invalid_argument() -> Self {
        Self::new(ErrorKind::InvalidArgument)
    }

    /// Creates a new error with the `ExecutionError` kind.
    #[inline]
    pub fn execution_error() -> Self {
        Self::new(ErrorKind::ExecutionError)
    }

    /// Creates a new error with the `FrontendTimeout` kind.
    #[inline]
    pub fn frontend_timeout() -> Self {
        Self::new(ErrorKind::FrontendTimeout)
    }

    /// Creates a new error with the `Cancelled` kind.
    #[inline]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}
