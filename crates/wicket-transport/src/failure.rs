/// Typed transport-failure taxonomy. Fallback eligibility is decided on the
/// kind; the substring matcher below survives only as a compatibility shim for
/// errors that reach us as bare strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Dns,
    Tls,
    Timeout,
    ReadTimeout,
    Reset,
    Closed,
    Io,
    Protocol,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }

    /// Whether the high-level client is worth trying after this failure.
    /// TLS verification and protocol-parse failures are not: the client would
    /// hit the same wall, or the upstream already answered and we mangled it.
    pub fn is_fallback_eligible(&self) -> bool {
        match self.kind {
            TransportErrorKind::Connect
            | TransportErrorKind::Dns
            | TransportErrorKind::Timeout
            | TransportErrorKind::ReadTimeout
            | TransportErrorKind::Reset
            | TransportErrorKind::Closed
            | TransportErrorKind::Io => true,
            TransportErrorKind::Tls | TransportErrorKind::Protocol => false,
            TransportErrorKind::Other => message_suggests_network(&self.message),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::new(classify_io_error(&err), err.to_string())
    }
}

pub fn classify_io_error(err: &std::io::Error) -> TransportErrorKind {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::NotConnected => TransportErrorKind::Connect,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => TransportErrorKind::Reset,
        ErrorKind::TimedOut => TransportErrorKind::Timeout,
        ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => TransportErrorKind::Closed,
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => TransportErrorKind::Connect,
        _ => {
            let message = err.to_string().to_ascii_lowercase();
            if message.contains("lookup") || message.contains("dns") {
                TransportErrorKind::Dns
            } else {
                TransportErrorKind::Io
            }
        }
    }
}

const NETWORK_MARKERS: [&str; 15] = [
    "network",
    "connection",
    "connect",
    "socket",
    "tcp",
    "timeout",
    "timed out",
    "refused",
    "reset",
    "aborted",
    "closed",
    "lost",
    "unreachable",
    "epipe",
    "stream",
];

/// Last-resort classification by error text.
pub fn message_suggests_network(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    NETWORK_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_kinds_decide_eligibility() {
        let reset = TransportError::new(TransportErrorKind::Reset, "peer went away");
        assert!(reset.is_fallback_eligible());

        let tls = TransportError::new(TransportErrorKind::Tls, "invalid peer certificate");
        assert!(!tls.is_fallback_eligible());

        let parse = TransportError::protocol("malformed status line");
        assert!(!parse.is_fallback_eligible());
    }

    #[test]
    fn other_kind_falls_back_to_substring_shim() {
        let eligible = TransportError::new(TransportErrorKind::Other, "Connection reset by peer");
        assert!(eligible.is_fallback_eligible());

        let opaque = TransportError::new(TransportErrorKind::Other, "invalid utf-8 in body");
        assert!(!opaque.is_fallback_eligible());
    }

    #[test]
    fn substring_markers() {
        assert!(message_suggests_network("upstream TIMED OUT waiting"));
        assert!(message_suggests_network("error writing to stream"));
        assert!(!message_suggests_network("certificate verify failed"));
    }

    #[test]
    fn io_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_io_error(&refused), TransportErrorKind::Connect);

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(classify_io_error(&eof), TransportErrorKind::Closed);

        let dns = std::io::Error::other("failed to lookup address information");
        assert_eq!(classify_io_error(&dns), TransportErrorKind::Dns);
    }
}
