use std::io;
use std::path::PathBuf;
use std::result;
use std::time::Duration;

use thiserror::Error;

/// Custom result type for driver operations
pub type Result<T> = result::Result<T, Error>;

/// OS-level object a bounded wait was blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncObject {
    /// Mutex guarding the shared session record
    SessionLock,
    /// Primitive serializing queries against the engine
    QueryLock,
    /// Named input or output channel
    Channel,
    /// Peer reply during a handle exchange
    Handshake,
    /// Engine startup banner
    Banner,
    /// Engine exit after the quit command
    EngineExit,
}

impl std::fmt::Display for SyncObject {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            SyncObject::SessionLock => "shared-session mutex",
            SyncObject::QueryLock => "query-serialization lock",
            SyncObject::Channel => "engine channel",
            SyncObject::Handshake => "handle-exchange reply",
            SyncObject::Banner => "engine startup banner",
            SyncObject::EngineExit => "engine exit",
        };
        f.write_str(name)
    }
}

/// Broad classes of failure, used by callers to decide what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A bounded wait expired; retriable after operator cleanup
    Timeout,
    /// Two clients disagree on the engine executable; never retriable
    IdentityMismatch,
    /// Spawn, duplicate-handle, exit or channel I/O failure
    Process,
    /// The engine reported an error for a query
    Protocol,
    /// The engine's response did not follow the expected grammar
    Parse,
    /// Invalid request from the caller
    Usage,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "timed out after {waited:?} waiting for {object} at {}; if no client is running, remove {} and retry",
        path.display(),
        path.display()
    )]
    Timeout {
        object: SyncObject,
        path: PathBuf,
        waited: Duration,
    },

    #[error(
        "a different executable is already running against {}: running {running}, requested {requested}",
        working_dir.display()
    )]
    IdentityMismatch {
        working_dir: PathBuf,
        running: String,
        requested: String,
    },

    #[error("failed to spawn engine {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Process {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on engine channel {}: {source}", path.display())]
    Channel {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("engine process {pid} is no longer running; remove the objects under {} and reconnect", segment.display())]
    EngineGone { pid: u32, segment: PathBuf },

    #[error("engine reported an error: {0}")]
    Engine(String),

    #[error("unexpected engine response at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("positioned operation rejected: {0}")]
    Positioned(String),

    #[error("handle exchange failed: {0}")]
    Handshake(String),

    #[error("no cell at row {row}, column {column:?}")]
    NoSuchCell { row: usize, column: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn process(context: &'static str, source: io::Error) -> Self {
        Error::Process { context, source }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::IdentityMismatch { .. } => ErrorCategory::IdentityMismatch,
            Error::Spawn { .. }
            | Error::Process { .. }
            | Error::Channel { .. }
            | Error::EngineGone { .. }
            | Error::Handshake(_)
            | Error::Io(_) => ErrorCategory::Process,
            Error::Engine(_) => ErrorCategory::Protocol,
            Error::Parse { .. } => ErrorCategory::Parse,
            Error::Positioned(_)
            | Error::NoSuchCell { .. }
            | Error::SessionClosed
            | Error::Unsupported(_)
            | Error::InvalidConfig(_) => ErrorCategory::Usage,
        }
    }

    /// Whether the session that produced this error can keep serving queries
    pub fn is_session_usable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol | ErrorCategory::Parse | ErrorCategory::Usage
        ) && !matches!(self, Error::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_object_and_remediation() {
        let err = Error::Timeout {
            object: SyncObject::SessionLock,
            path: PathBuf::from("/dev/shm/tapibridge_ab.lock"),
            waited: Duration::from_secs(10),
        };
        let text = err.to_string();
        assert!(text.contains("shared-session mutex"));
        assert!(text.contains("remove /dev/shm/tapibridge_ab.lock"));
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(!err.is_session_usable());
    }

    #[test]
    fn protocol_and_parse_errors_keep_session_usable() {
        assert!(Error::Engine("syntax".into()).is_session_usable());
        assert!(Error::parse(3, "bad").is_session_usable());
        assert!(!Error::SessionClosed.is_session_usable());
    }
}
