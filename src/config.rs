use std::time::Duration;

use crate::inject::NodeProfile;

/// Default cap on one WebSocket message (256 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 << 20;

/// Configuration for a [`Runner`](crate::Runner).
///
/// Use [`RunnerConfig::builder()`] for ergonomic construction, or
/// [`RunnerConfig::default()`] for the stock node profile and timeouts.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Timeout for the `/prompt` submission request.
    pub request_timeout: Duration,

    /// Longest wait for a single WebSocket frame. `None` waits forever.
    pub receive_timeout: Option<Duration>,

    /// Largest WebSocket message accepted. `SaveImageWebsocket` sends the
    /// whole encoded image as one frame. `None` removes the limit.
    pub max_message_size: Option<usize>,

    /// Class types the runner injects into and collects from.
    pub profile: NodeProfile,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            receive_timeout: Some(Duration::from_secs(300)),
            max_message_size: Some(DEFAULT_MAX_MESSAGE_SIZE),
            profile: NodeProfile::default(),
        }
    }
}

impl RunnerConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }
}

/// Builder for [`RunnerConfig`].
#[derive(Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    /// Set the timeout for queuing a workflow.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Fail the job when no frame arrives for this long.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = Some(timeout);
        self
    }

    /// Block on the WebSocket without a deadline.
    pub fn without_receive_timeout(mut self) -> Self {
        self.config.receive_timeout = None;
        self
    }

    /// Cap the size of a single WebSocket message.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = Some(bytes);
        self
    }

    /// Accept WebSocket messages of any size.
    pub fn without_message_size_limit(mut self) -> Self {
        self.config.max_message_size = None;
        self
    }

    /// Replace the node profile (context, seed and sink class types).
    pub fn with_profile(mut self, profile: NodeProfile) -> Self {
        self.config.profile = profile;
        self
    }

    /// Build the final [`RunnerConfig`].
    pub fn build(self) -> RunnerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.receive_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.max_message_size, Some(256 * 1024 * 1024));
        assert_eq!(config.profile.image_sink, "SaveImageWebsocket");
    }

    #[test]
    fn test_builder() {
        let config = RunnerConfig::builder()
            .with_request_timeout(Duration::from_secs(5))
            .without_receive_timeout()
            .build();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.receive_timeout.is_none());

        let config = RunnerConfig::builder()
            .with_receive_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.receive_timeout, Some(Duration::from_millis(250)));

        let config = RunnerConfig::builder().without_message_size_limit().build();
        assert!(config.max_message_size.is_none());
        let config = RunnerConfig::builder().with_max_message_size(1024).build();
        assert_eq!(config.max_message_size, Some(1024));
    }
}
