//! Error taxonomy for the query and trace engines.
//!
//! One enum covers every failure the engines surface. Recoverable outcomes
//! (timeout, transient unreachability, malformed reply) are absorbed by the
//! probe loop and reflected in loss counters; everything else propagates to
//! the caller, which prints a single line and exits with
//! [`DiagError::exit_code`].

use std::io;

/// A specialized `Result` for all engine functions.
pub type Result<T> = std::result::Result<T, DiagError>;

/// All failure modes surfaced by the engine.
#[derive(Debug)]
pub enum DiagError {
    /// Malformed user input: hostname, record type/class, ECS spec, port.
    InvalidInput(String),

    /// A resolver hostname could not be resolved under the required family.
    ResolutionFailed(String),

    /// An IP literal disagrees with a forced `-4`/`-6` family or with the
    /// source address family.
    AddressFamilyConflict(String),

    /// The probe did not complete within the per-probe timeout. Recoverable.
    Timeout,

    /// EHOSTUNREACH / ENETUNREACH class of socket errors. Recoverable.
    TransientNetwork(String),

    /// A reply arrived but could not be taken seriously: wrong transaction
    /// id or undecodable wire format. Recoverable.
    InvalidResponse(String),

    /// Socket creation was refused, typically the raw ICMP socket used by
    /// the trace engine when running unprivileged.
    PermissionDenied(String),

    /// The selected transport was not compiled into this build.
    UnsupportedTransport(&'static str),

    /// TCP/TLS/QUIC/HTTP connection or handshake failure.
    ConnectionFailed(String),

    /// Any other I/O error.
    Io(io::Error),

    /// DNS wire encoding/decoding failure outside of a response parse.
    Proto(String),
}

impl DiagError {
    /// Process exit code mandated for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            DiagError::UnsupportedTransport(_) => 127,
            _ => 1,
        }
    }

    /// Whether the probe loop may absorb this error as a lost probe and
    /// keep iterating.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DiagError::Timeout | DiagError::TransientNetwork(_) | DiagError::InvalidResponse(_)
        )
    }
}

impl std::fmt::Display for DiagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagError::InvalidInput(msg) => write!(f, "{}", msg),
            DiagError::ResolutionFailed(msg) => write!(f, "cannot resolve hostname: {}", msg),
            DiagError::AddressFamilyConflict(msg) => write!(f, "{}", msg),
            DiagError::Timeout => write!(f, "request timeout"),
            DiagError::TransientNetwork(msg) => write!(f, "{}", msg),
            DiagError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            DiagError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            DiagError::UnsupportedTransport(proto) => write!(f, "{} transport not available", proto),
            DiagError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            DiagError::Io(err) => write!(f, "I/O error: {}", err),
            DiagError::Proto(msg) => write!(f, "DNS protocol error: {}", msg),
        }
    }
}

impl std::error::Error for DiagError {}

impl From<io::Error> for DiagError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DiagError::Timeout,
            io::ErrorKind::PermissionDenied => DiagError::PermissionDenied(err.to_string()),
            _ => match err.raw_os_error() {
                // EHOSTUNREACH / ENETUNREACH
                Some(113) | Some(101) | Some(65) | Some(51) => {
                    DiagError::TransientNetwork(err.to_string())
                }
                _ => DiagError::Io(err),
            },
        }
    }
}

impl From<hickory_proto::ProtoError> for DiagError {
    fn from(err: hickory_proto::ProtoError) -> Self {
        DiagError::Proto(err.to_string())
    }
}

impl From<reqwest::Error> for DiagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DiagError::Timeout
        } else {
            DiagError::ConnectionFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_transport_exits_127() {
        assert_eq!(DiagError::UnsupportedTransport("QUIC").exit_code(), 127);
        assert_eq!(DiagError::Timeout.exit_code(), 1);
        assert_eq!(DiagError::InvalidInput("bad".into()).exit_code(), 1);
    }

    #[test]
    fn recoverable_classification() {
        assert!(DiagError::Timeout.is_recoverable());
        assert!(DiagError::TransientNetwork("unreachable".into()).is_recoverable());
        assert!(DiagError::InvalidResponse("id mismatch".into()).is_recoverable());
        assert!(!DiagError::ConnectionFailed("refused".into()).is_recoverable());
        assert!(!DiagError::PermissionDenied("raw socket".into()).is_recoverable());
    }

    #[test]
    fn timeouts_from_io_errors() {
        let err: DiagError = io::Error::new(io::ErrorKind::TimedOut, "t").into();
        assert!(matches!(err, DiagError::Timeout));
        let err: DiagError = io::Error::new(io::ErrorKind::WouldBlock, "w").into();
        assert!(matches!(err, DiagError::Timeout));
    }
}
