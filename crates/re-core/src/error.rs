//! The error kinds shared across every crate in this workspace, and their
//! mapping onto gRPC status codes at the RPC boundary.

use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, Error>;

/// A single error enum shared by the cache tiers, the bytestream service,
/// and the scheduler. Each variant names the gRPC status it maps to; the
/// mapping itself lives in `Error::into_status` rather than scattered
/// across call sites.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("io error performing {operation} on {path}: {source}")]
    Io {
        operation: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn io(operation: &'static str, path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the kind that self-heals: a cache miss caused
    /// by a vanished file or a corrupt record should be treated exactly
    /// like an ordinary miss by callers, never propagated as fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Status {
        let code = match &err {
            Error::NotFound(_) => Code::NotFound,
            Error::InvalidArgument(_) => Code::InvalidArgument,
            Error::OutOfRange(_) => Code::OutOfRange,
            Error::FailedPrecondition(_) => Code::FailedPrecondition,
            Error::ResourceExhausted(_) => Code::ResourceExhausted,
            Error::Unavailable(_) => Code::Unavailable,
            Error::DataLoss(_) => Code::DataLoss,
            Error::Unimplemented(_) => Code::Unimplemented,
            Error::Internal(_) | Error::Io { .. } => Code::Internal,
        };
        Status::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_grpc_not_found() {
        let status: Status = Error::not_found("missing blob").into();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[test]
    fn invalid_argument_maps_correctly() {
        let status: Status = Error::invalid_argument("bad offset").into();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn io_error_maps_to_internal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let status: Status = Error::io("write", "/tmp/x", io_err).into();
        assert_eq!(status.code(), Code::Internal);
    }
}
