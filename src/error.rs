use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("No such file: {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("I/O error after {transferred} bytes: {source}")]
    Io {
        transferred: u64,
        #[source]
        source: io::Error,
    },
    #[error("Transfer cancelled after {transferred} bytes")]
    Cancelled { transferred: u64 },
    #[error("Transfer deadline exceeded after {transferred} bytes")]
    TimedOut { transferred: u64 },
}

impl SendError {
    pub(crate) fn io(transferred: u64, source: io::Error) -> Self {
        SendError::Io {
            transferred,
            source,
        }
    }

    /// Bytes that reached the sink before the transfer stopped.
    pub fn transferred(&self) -> u64 {
        match self {
            SendError::NotFound { .. } => 0,
            SendError::Io { transferred, .. }
            | SendError::Cancelled { transferred }
            | SendError::TimedOut { transferred } => *transferred,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SendError::NotFound { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Request headers too large (> {0} bytes)")]
    Partial(usize),
    #[error("Invalid HTTP request: {0}")]
    Parse(#[from] httparse::Error),
    #[error("Request has no method")]
    MissingMethod,
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("Path did not start with a slash")]
    PathDidNotStartWithSlash,
    #[error("Path contained '..': {0}")]
    PathContainedDotDot(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RequestError {
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            RequestError::Partial(_)
            | RequestError::Parse(_)
            | RequestError::MissingMethod
            | RequestError::PathDidNotStartWithSlash => (400, "Bad Request"),
            RequestError::MethodNotAllowed(_) => (405, "Method Not Allowed"),
            RequestError::PathContainedDotDot(_) => (403, "Forbidden"),
            RequestError::Io(_) => (500, "Internal Server Error"),
        }
    }
}
