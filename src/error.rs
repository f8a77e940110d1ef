use std::fmt;
use std::fmt::Display;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an attach failure.
///
/// Callers branch on this instead of matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An argument was rejected before anything was sent to the target.
    InvalidInput,
    /// The platform or the target process does not accept dynamic attach.
    NotSupported,
    /// Transport-level failure while attaching, talking or detaching.
    Io,
    /// The target refused to load the agent, or its init hook failed.
    AgentLoadFailed,
    /// A non-load command completed with a failure status in the target.
    OperationFailed,
}

/// Error type for this crate.
///
/// The message is only exposed via `Display`; use [`Error::kind`] or the
/// `is_*` helpers to branch.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    return_code: Option<i32>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub(crate) fn invalid_input(msg: impl Display) -> Self {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    pub(crate) fn not_supported(msg: impl Display) -> Self {
        Self::new(ErrorKind::NotSupported, msg)
    }

    pub(crate) fn io(msg: impl Display) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub(crate) fn process_not_found(pid: i32) -> Self {
        Self::new(ErrorKind::Io, format_args!("no such process: {pid}"))
    }

    pub(crate) fn permission_denied(msg: impl Display) -> Self {
        Self::new(ErrorKind::Io, format_args!("permission denied: {msg}"))
    }

    pub(crate) fn agent_load(msg: impl Display) -> Self {
        Self::new(ErrorKind::AgentLoadFailed, msg)
    }

    pub(crate) fn agent_init(msg: impl Display, code: i32) -> Self {
        Self {
            kind: ErrorKind::AgentLoadFailed,
            message: format!("{msg} (return code {code})"),
            return_code: Some(code),
            source: None,
        }
    }

    pub(crate) fn operation_failed(msg: impl Display) -> Self {
        Self::new(ErrorKind::OperationFailed, msg)
    }

    pub(crate) fn from_io(err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: err.to_string(),
            return_code: None,
            source: Some(Box::new(err)),
        }
    }

    /// Wrap an I/O error with a short description of what was being done.
    pub(crate) fn io_context(context: impl Display, err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: format!("{context}: {err}"),
            return_code: None,
            source: Some(Box::new(err)),
        }
    }

    fn new(kind: ErrorKind, msg: impl Display) -> Self {
        Self {
            kind,
            message: msg.to_string(),
            return_code: None,
            source: None,
        }
    }

    /// Return the failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Value returned by the agent's `Agent_OnAttach` when it reported failure.
    pub fn agent_return_code(&self) -> Option<i32> {
        self.return_code
    }

    /// Returns true if an argument was rejected locally.
    pub fn is_invalid_input(&self) -> bool {
        self.kind == ErrorKind::InvalidInput
    }

    /// Returns true if the platform or target does not support dynamic attach.
    pub fn is_not_supported(&self) -> bool {
        self.kind == ErrorKind::NotSupported
    }

    /// Returns true on a transport-level failure.
    pub fn is_io(&self) -> bool {
        self.kind == ErrorKind::Io
    }

    /// Returns true if the target failed to load or initialize the agent.
    pub fn is_agent_load_failed(&self) -> bool {
        self.kind == ErrorKind::AgentLoadFailed
    }

    /// Returns true if a command other than `load` failed in the target.
    pub fn is_operation_failed(&self) -> bool {
        self.kind == ErrorKind::OperationFailed
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            return_code: self.return_code,
            source: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::from_io(err)
    }
}
