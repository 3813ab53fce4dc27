use std::time::Duration;

use thiserror::Error;

/// Errors returned while running a workflow against a ComfyUI server.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Missing or invalid workflow file, unusable server address.
    #[error("{0}")]
    Config(String),

    /// Reading a workflow file or directory failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// A node or one of its inputs does not exist in the workflow.
    #[error("Input '{key}' not found on node '{node}'")]
    NotFound { node: String, key: String },

    /// The workflow has no usable image sink node.
    #[error("{0}")]
    NoOutputSink(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// WebSocket handshake, send or receive failure.
    #[error("{context}: {source}")]
    WebSocket {
        context: String,
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The server closed the event stream before the job finished.
    #[error("{0}")]
    StreamClosed(String),

    /// No frame arrived within the configured receive timeout.
    #[error("No message from ComfyUI within {0:?}")]
    Timeout(Duration),

    /// ComfyUI returned a non-success HTTP status.
    #[error("ComfyUI returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response from ComfyUI was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// The queued workflow had node-level errors.
    #[error("Workflow node errors: {0}")]
    NodeErrors(String),

    /// The job finished without bytes for the output node.
    #[error("{0}")]
    NoImageData(String),

    /// Bytes were received but are not a decodable image.
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure category of a [`RunnerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    NoOutputSink,
    Transport,
    Protocol,
    NoImageData,
    Decode,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Config => "Configuration error",
            ErrorKind::NoOutputSink => "No output node",
            ErrorKind::Transport => "Connection error",
            ErrorKind::Protocol => "Unexpected server response",
            ErrorKind::NoImageData => "No image data",
            ErrorKind::Decode => "Image decode error",
        };
        f.write_str(label)
    }
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::Config(_)
            | RunnerError::Io { .. }
            | RunnerError::NotFound { .. }
            | RunnerError::Json(_) => ErrorKind::Config,
            RunnerError::NoOutputSink(_) => ErrorKind::NoOutputSink,
            RunnerError::Network { .. }
            | RunnerError::WebSocket { .. }
            | RunnerError::StreamClosed(_)
            | RunnerError::Timeout(_) => ErrorKind::Transport,
            RunnerError::Http { .. }
            | RunnerError::InvalidResponse(_)
            | RunnerError::NodeErrors(_) => ErrorKind::Protocol,
            RunnerError::NoImageData(_) => ErrorKind::NoImageData,
            RunnerError::Decode(_) => ErrorKind::Decode,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(RunnerError::Config("x".into()).kind(), ErrorKind::Config);
        assert_eq!(
            RunnerError::StreamClosed("gone".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            RunnerError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            RunnerError::Http {
                status: 400,
                body: "bad".into()
            }
            .kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            RunnerError::NoImageData("none".into()).kind(),
            ErrorKind::NoImageData
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = RunnerError::NotFound {
            node: "3".into(),
            key: "seed".into(),
        };
        assert_eq!(err.to_string(), "Input 'seed' not found on node '3'");
    }
}
