//! Error types for catalog discovery

use std::fmt;
use std::time::Duration;

use discovery_core::CoreError;
use thiserror::Error;

/// Failures while establishing a connection.
///
/// These are fatal to the client instance; the caller must reconnect.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Endpoint or options rejected before any I/O
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] CoreError),

    /// Address could not be resolved or reached
    #[error("Endpoint unreachable: {0}")]
    Unreachable(#[source] tonic::transport::Error),

    /// Connect plus handshake exceeded the budget
    #[error("Connection timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Server answered the handshake with another protocol version
    #[error("Protocol version mismatch: requested {requested}, server answered {actual}")]
    VersionMismatch { requested: u64, actual: u64 },

    /// Server refused the handshake
    #[error("Handshake rejected: {0}")]
    Rejected(tonic::Status),

    /// TLS material could not be loaded or negotiation failed
    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<tonic::transport::Error> for ConnectionError {
    fn from(err: tonic::transport::Error) -> Self {
        // rustls failures surface as InvalidData somewhere in the source chain
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::InvalidData {
                    return ConnectionError::Tls(format!("negotiation failed: {}", io));
                }
            }
            source = cause.source();
        }
        ConnectionError::Unreachable(err)
    }
}

impl ConnectionError {
    /// Whether another connect attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Unreachable(_) | ConnectionError::Timeout(_)
        )
    }
}

/// Failures of a single catalog request.
///
/// The client stays usable after any of these.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Server ended the request with a gRPC status
    #[error("Server error: {0}")]
    Server(#[from] tonic::Status),

    /// Request did not complete before its deadline
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Catalog record could not be interpreted
    #[error("Malformed catalog record: {0}")]
    Decode(String),
}

/// Every error surfaced by the discovery client
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Request(#[from] RequestError),

    /// Client was closed
    #[error("Client is closed")]
    Closed,

    /// Another listing is still in flight on this client
    #[error("A catalog request is already in progress")]
    Busy,
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::Connection(_) => ErrorKind::Connection,
            DiscoveryError::Request(_) => ErrorKind::Request,
            DiscoveryError::Closed => ErrorKind::Closed,
            DiscoveryError::Busy => ErrorKind::Busy,
        }
    }

    /// Whether the same call may succeed if repeated later
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::Busy)
    }
}

impl From<tonic::Status> for DiscoveryError {
    fn from(status: tonic::Status) -> Self {
        DiscoveryError::Request(RequestError::Server(status))
    }
}

impl From<CoreError> for DiscoveryError {
    fn from(err: CoreError) -> Self {
        DiscoveryError::Connection(ConnectionError::InvalidConfig(err))
    }
}

/// Coarse classification of a [`DiscoveryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Request,
    Closed,
    Busy,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Request => "request",
            ErrorKind::Closed => "closed",
            ErrorKind::Busy => "busy",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_request_error() {
        let err: DiscoveryError = tonic::Status::unavailable("server going away").into();
        assert_eq!(err.kind(), ErrorKind::Request);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("server going away"));
    }

    #[test]
    fn test_config_error_is_connection_error() {
        let err: DiscoveryError = CoreError::UnsupportedScheme("grpc+unix".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Unsupported scheme: grpc+unix"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DiscoveryError::Busy.is_retryable());
        assert!(!DiscoveryError::Closed.is_retryable());
        assert!(ConnectionError::Timeout(Duration::from_millis(100)).is_retryable());
        assert!(!ConnectionError::VersionMismatch {
            requested: 1,
            actual: 0
        }
        .is_retryable());
    }

    #[test]
    fn test_tls_errors_are_not_retried() {
        let err = ConnectionError::Tls("negotiation failed: corrupt message".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "TLS error: negotiation failed: corrupt message");
    }

    #[test]
    fn test_timeout_messages() {
        let err = RequestError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timed out after 1500ms");
        assert_eq!(ErrorKind::Busy.to_string(), "busy");
    }
}
