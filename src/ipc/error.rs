//! Error types for the IPC layer.
//!
//! `IpcError` covers the process/pipe level, `CodecError` the request
//! encoders, and `ClientError` is what [`BackendClient`](super::BackendClient)
//! surfaces to callers.

use std::time::Duration;

use thiserror::Error;

/// Process and pipe level failures.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The backend executable could not be started.
    #[error("Failed to spawn backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A pipe requested at spawn time was not handed out.
    #[error("Failed to capture backend {0}")]
    MissingPipe(&'static str),

    /// Writing to the backend's stdin failed (usually a broken pipe).
    #[error("Write to backend failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading from the backend's stdout failed.
    #[error("Read from backend failed: {0}")]
    Read(#[source] std::io::Error),

    /// Waiting for or killing the backend process failed.
    #[error("Failed to reap backend process: {0}")]
    Wait(#[source] std::io::Error),

    /// A record grew past the framer's buffer limit.
    #[error("Frame size {size} exceeds maximum {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// The session's pipes have already been released.
    #[error("Session is closed")]
    Closed,
}

impl IpcError {
    /// True when the error means the backend is gone rather than misbehaving.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            IpcError::Write(e) | IpcError::Read(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            IpcError::Closed => true,
            _ => false,
        }
    }
}

/// Request encoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The protocol has no wire form for this request.
    #[error("{request} is not supported by the {protocol} protocol")]
    Unsupported {
        protocol: &'static str,
        request: &'static str,
    },

    #[error("Failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced by [`BackendClient`](super::BackendClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Spawning the backend failed. Never retried internally.
    #[error("Connection failed: {0}")]
    Connect(#[source] IpcError),

    /// An operation was attempted before `connect()`.
    #[error("Not connected to a backend")]
    NotConnected,

    /// An operation was attempted after `close()`.
    #[error("Client is disconnected")]
    Disconnected,

    /// The backend exited or its pipes broke; reconnect to recover.
    #[error("Backend died: {0}")]
    BackendDied(String),

    /// No response arrived before the caller's deadline. The session stays
    /// usable.
    #[error("Search timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The backend violated its wire protocol in a way that desynchronizes
    /// the stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend answered the request with an error response.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Cleanup finished, but the backend could not be reaped cleanly.
    #[error("Shutdown incomplete: {0}")]
    Shutdown(#[source] IpcError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        assert_eq!(
            ClientError::Timeout(Duration::from_millis(250)).to_string(),
            "Search timed out after 250ms"
        );
        assert_eq!(
            ClientError::BackendDied("stdout closed".into()).to_string(),
            "Backend died: stdout closed"
        );
        let unsupported = ClientError::from(CodecError::Unsupported {
            protocol: "delimited-text",
            request: "Activate",
        });
        assert_eq!(
            unsupported.to_string(),
            "Activate is not supported by the delimited-text protocol"
        );
    }

    #[test]
    fn test_spawn_error_mentions_program() {
        let err = IpcError::Spawn {
            program: "gf".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("`gf`"), "unexpected message: {}", msg);
    }

    #[test]
    fn test_broken_pipe_classification() {
        let broken = IpcError::Write(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken",
        ));
        assert!(broken.is_broken_pipe());

        let other = IpcError::Read(std::io::Error::new(std::io::ErrorKind::Other, "other"));
        assert!(!other.is_broken_pipe());
        assert!(IpcError::Closed.is_broken_pipe());
    }
}
