//! Error types for the module layer.

/// Errors returned by outbound operations and lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The envelope or payload could not be encoded as JSON. Nothing was sent.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The transport refused or failed to accept a frame.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A send was attempted before a transport was attached.
    #[error("Module not initialized: no transport attached")]
    NotInitialized,

    /// Configuration could not be read or written.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`Transport`](crate::transport::Transport)
/// implementation. Opaque to the module layer; never retried here.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has been stopped or its outbound queue is gone.
    #[error("Transport closed")]
    Closed,

    /// `start()` was called on a transport that is already running.
    #[error("Transport already started")]
    AlreadyStarted,

    /// The outbound queue is full; the frame was not accepted.
    #[error("Outbound queue full")]
    QueueFull,

    /// The frame needs more chunks than the chunk header can number.
    #[error("Frame of {0} bytes is too large to chunk")]
    FrameTooLarge(usize),

    /// Socket bind failed.
    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// Any other socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an inbound frame was dropped.
///
/// Every variant is recoverable: the dispatcher logs it and keeps receiving.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InboundError {
    /// The frame is not a JSON object.
    #[error("Malformed frame: {0}")]
    MalformedJson(String),

    /// A required envelope field is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A control message is missing a field the protocol requires.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let module_err: ModuleError = err.into();
        assert!(matches!(module_err, ModuleError::Encoding(_)));
        assert!(module_err.to_string().starts_with("Encoding error"));
    }

    #[test]
    fn test_transport_error_wraps() {
        let module_err: ModuleError = TransportError::Closed.into();
        assert_eq!(module_err.to_string(), "Transport error: Transport closed");
    }

    #[test]
    fn test_inbound_error_display() {
        assert_eq!(
            InboundError::MissingField("mt").to_string(),
            "Missing field: mt"
        );
    }
}
