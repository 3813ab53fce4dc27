use std::collections::HashMap;
use std::fmt;

/// Per-job token scoping the WebSocket to this client (`clientId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random (UUID v4) session id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned `prompt_id` of a queued workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Real-time progress update from ComfyUI's WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub current_step: u32,
    pub total_steps: u32,
}

/// Header-stripped image payloads received per node, in arrival order.
pub type ImageBufferMap = HashMap<String, Vec<Vec<u8>>>;
