//! Error types of the client runtime.

use thiserror::Error;

pub type LspResult<T> = Result<T, LspError>;

/// JSON-RPC error code sent by a server that cancelled a request itself.
pub const REQUEST_CANCELLED: i64 = -32800;
/// JSON-RPC error code for a result invalidated by a concurrent document change.
pub const CONTENT_MODIFIED: i64 = -32801;

/// Everything that can go wrong between the client and a language server.
#[derive(Debug, Error)]
pub enum LspError {
    /// No connection can be made for this server id.
    #[error("No connection for server {0}")]
    UnknownServer(String),

    /// The stream to the server is gone.
    #[error("Server connection lost: {0}")]
    Disconnected(String),

    /// The server process could not be launched.
    #[error("Could not launch server: {0}")]
    Launch(String),

    /// A frame or payload that does not follow the protocol.
    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("Request failed: {0}")]
    Request(String),

    /// The server answered with a JSON-RPC error object.
    #[error("Server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A request outlived its timeout.
    #[error("Timed out waiting for the server")]
    Timeout,

    /// The `initialize` round trip failed.
    #[error("initialize failed: {0}")]
    Initialize(String),

    #[error("Not a file uri: {0}")]
    InvalidUri(String),

    /// A persisted server definition could not be parsed.
    #[error("Bad server definition: {0}")]
    BadDefinition(String),
}

impl LspError {
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected(reason.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }

    pub fn bad_definition(message: impl Into<String>) -> Self {
        Self::BadDefinition(message.into())
    }

    /// Whether the error is an expected server answer rather than a broken connection.
    ///
    /// Cancelled requests and stale results happen under concurrent edits.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::Rpc { code, .. } if *code == REQUEST_CANCELLED || *code == CONTENT_MODIFIED
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            LspError::UnknownServer("rust".to_string()).to_string(),
            "No connection for server rust"
        );
        assert_eq!(
            LspError::disconnected("eof").to_string(),
            "Server connection lost: eof"
        );
        assert_eq!(
            LspError::Rpc {
                code: -32601,
                message: "unknown".to_string(),
            }
            .to_string(),
            "Server error -32601: unknown"
        );
        assert_eq!(
            LspError::bad_definition("exe").to_string(),
            "Bad server definition: exe"
        );
    }

    #[test]
    fn test_benign_codes() {
        let rpc = |code| LspError::Rpc {
            code,
            message: String::new(),
        };
        assert!(rpc(REQUEST_CANCELLED).is_benign());
        assert!(rpc(CONTENT_MODIFIED).is_benign());
        assert!(!rpc(-32603).is_benign());
        assert!(!LspError::disconnected("closed").is_benign());
        assert!(!LspError::Timeout.is_benign());
    }

    #[test]
    fn test_from_io_and_json() {
        let io: LspError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(io, LspError::Io(_)));

        let json: LspError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(json.to_string().starts_with("Invalid JSON"));
    }
}
