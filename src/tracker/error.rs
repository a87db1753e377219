use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("uri has no host: {0}")]
    HostUnknown(String),

    #[error("host lookup failed: {0}")]
    HostLookupFailed(String),

    #[error("unrecognized scheme: {0}")]
    UnrecognizedScheme(String),

    #[error("timed out after {0} seconds")]
    TimeoutExpired(u64),

    #[error("expected {expected} response, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("tracker returned error: {0}")]
    QueryFailed(String),

    #[error("tracker manager closed")]
    ManagerClosed,

    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}
