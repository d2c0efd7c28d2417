use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Errors produced by the parley protocol layer.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("disconnected")]
    Disconnected,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ParleyError {
    /// Whether this error means the remote end went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ParleyError::Disconnected => true,
            ParleyError::Io(e) => is_closed_io_kind(e.kind()),
            _ => false,
        }
    }
}

impl From<ciborium::de::Error<io::Error>> for ParleyError {
    fn from(e: ciborium::de::Error<io::Error>) -> Self {
        ParleyError::MalformedPacket(e.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for ParleyError {
    fn from(e: ciborium::ser::Error<io::Error>) -> Self {
        ParleyError::MalformedPacket(e.to_string())
    }
}

pub type ParleyResult<T> = Result<T, ParleyError>;

/// Classify an error as "the connection is gone".
///
/// Walks the `source()` chain and matches end-of-file, broken pipe, reset,
/// aborted and not-connected I/O errors. Transport adapters call this after
/// checking their own library-specific closed variants.
pub fn is_connection_closed(err: &(dyn StdError + 'static)) -> bool {
    let mut cause: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cause {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_closed_io_kind(io_err.kind()) {
                return true;
            }
        }
        if let Some(ParleyError::Disconnected) = e.downcast_ref::<ParleyError>() {
            return true;
        }
        cause = e.source();
    }
    false
}

fn is_closed_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
