//! WebSocket event stream for one queued job.
//!
//! ComfyUI pushes JSON control frames (`{"type": ..., "data": {...}}`) and
//! raw binary frames over the same socket, interleaved arbitrarily. The
//! [`Correlator`] follows the `executing` announcements for one job to
//! decide which node a binary frame belongs to, and keeps only the frames
//! of the output node. [`EventStream`] owns the socket and drives the
//! correlator until the job finishes or the connection fails.

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::address::Endpoints;
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Result, RunnerError};
use crate::extract::strip_header;
use crate::types::{ImageBufferMap, JobId, ProgressUpdate, SessionId};

/// Outer shape of every text frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Whether the frame loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
}

/// Frame-by-frame state for one job and one output node.
#[derive(Debug)]
pub struct Correlator {
    job_id: JobId,
    target_node: String,
    cursor: Option<String>,
    images: ImageBufferMap,
    execution_error: Option<String>,
}

impl Correlator {
    pub fn new(job_id: JobId, target_node: impl Into<String>) -> Self {
        Self {
            job_id,
            target_node: target_node.into(),
            cursor: None,
            images: ImageBufferMap::new(),
            execution_error: None,
        }
    }

    /// Node most recently announced as executing for this job.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn images(&self) -> &ImageBufferMap {
        &self.images
    }

    pub fn into_images(self) -> ImageBufferMap {
        self.images
    }

    /// `exception_message` of an `execution_error` reported for this job.
    pub fn execution_error(&self) -> Option<&str> {
        self.execution_error.as_deref()
    }

    fn has_target_image(&self) -> bool {
        self.images
            .get(&self.target_node)
            .map(|buffers| !buffers.is_empty())
            .unwrap_or(false)
    }

    fn is_other_job(&self, data: &Value) -> bool {
        match data.get("prompt_id").and_then(|v| v.as_str()) {
            Some(pid) => pid != self.job_id.as_str(),
            None => false,
        }
    }

    /// Apply one JSON control frame.
    pub fn on_text<F>(&mut self, text: &str, on_progress: &mut F) -> Step
    where
        F: FnMut(ProgressUpdate),
    {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
                return Step::Continue;
            }
        };
        let data = &envelope.data;

        match envelope.kind.as_str() {
            "executing" => {
                let pid = data.get("prompt_id").and_then(|v| v.as_str());
                if pid != Some(self.job_id.as_str()) {
                    return Step::Continue;
                }
                match data.get("node") {
                    Some(Value::Null) => {
                        tracing::info!(job_id = %self.job_id, "Execution finished");
                        if !self.has_target_image() {
                            tracing::warn!(
                                job_id = %self.job_id,
                                node = %self.target_node,
                                "No image received from output node before execution finished"
                            );
                        }
                        return Step::Finished;
                    }
                    Some(Value::String(node)) => {
                        tracing::debug!(job_id = %self.job_id, node = %node, "Node executing");
                        self.cursor = Some(node.clone());
                    }
                    _ => {
                        tracing::warn!(raw_message = %text, "Malformed executing message");
                    }
                }
            }
            "progress" if !self.is_other_job(data) => {
                let step = |key: &str, default: u64| {
                    let raw = data.get(key).and_then(|v| v.as_u64()).unwrap_or(default);
                    u32::try_from(raw).unwrap_or(u32::MAX)
                };
                let value = step("value", 0);
                let max = step("max", 1);
                tracing::debug!(job_id = %self.job_id, value, max, "Generation progress");
                on_progress(ProgressUpdate {
                    current_step: value,
                    total_steps: max,
                });
            }
            "execution_error" if data.get("prompt_id").is_some() && !self.is_other_job(data) => {
                let message = data
                    .get("exception_message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown error")
                    .trim()
                    .to_string();
                tracing::warn!(
                    job_id = %self.job_id,
                    node = ?data.get("node_id"),
                    error = %message,
                    "ComfyUI reported an execution error"
                );
                self.execution_error = Some(message);
            }
            _ => {}
        }
        Step::Continue
    }

    /// Apply one binary frame.
    ///
    /// Stored when the cursor is on the output node, or when nothing has
    /// been stored for it yet. The second rule tolerates servers that push
    /// an image before any `executing` announcement, and will misattribute
    /// a frame from another node if the server never announces the output
    /// node at all.
    pub fn on_binary(&mut self, frame: &[u8]) {
        let Some(payload) = strip_header(frame) else {
            tracing::warn!(len = frame.len(), "Binary frame shorter than its header, dropped");
            return;
        };

        let on_target = self.cursor.as_deref() == Some(self.target_node.as_str());
        if !on_target && self.has_target_image() {
            tracing::trace!(cursor = ?self.cursor, "Dropping binary frame from another node");
            return;
        }

        let buffers = self.images.entry(self.target_node.clone()).or_default();
        buffers.push(payload.to_vec());
        tracing::info!(
            node = %self.target_node,
            bytes = payload.len(),
            total = buffers.len(),
            "Image received for output node"
        );
    }
}

/// Pump frames into the correlator until the job finishes.
///
/// Ends with `Ok(())` only on the job's terminal `executing` frame. A
/// close, end of stream, receive error or timeout is a transport failure.
pub(crate) async fn drive<S, F>(
    frames: &mut S,
    correlator: &mut Correlator,
    receive_timeout: Option<Duration>,
    on_progress: &mut F,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    F: FnMut(ProgressUpdate),
{
    loop {
        let next = match receive_timeout {
            Some(limit) => tokio::time::timeout(limit, frames.next())
                .await
                .map_err(|_| RunnerError::Timeout(limit))?,
            None => frames.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if correlator.on_text(&text, on_progress) == Step::Finished {
                    return Ok(());
                }
            }
            Some(Ok(Message::Binary(bytes))) => correlator.on_binary(&bytes),
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                return Err(RunnerError::StreamClosed(format!(
                    "ComfyUI closed the WebSocket before job {} finished",
                    correlator.job_id
                )));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(error = %e, "WebSocket receive error");
                return Err(RunnerError::WebSocket {
                    context: "WebSocket receive failed".into(),
                    source: e,
                });
            }
            None => {
                return Err(RunnerError::StreamClosed(format!(
                    "WebSocket connection ended before job {} finished",
                    correlator.job_id
                )))
            }
        }
    }
}

/// An open, session-scoped WebSocket to ComfyUI.
///
/// Open it before queuing the job so no event is missed, then hand the
/// job id to [`collect`](Self::collect). Every way out of `collect`
/// closes the socket.
pub struct EventStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    receive_timeout: Option<Duration>,
}

impl EventStream {
    /// Handshake at `{stream_url_base}?clientId={session}`.
    pub async fn connect(endpoints: &Endpoints, session_id: &SessionId) -> Result<Self> {
        Self::connect_with_max_message_size(
            endpoints,
            session_id,
            Some(DEFAULT_MAX_MESSAGE_SIZE),
        )
        .await
    }

    /// Like [`connect`](Self::connect), with a custom cap on one message.
    /// `None` accepts messages of any size.
    pub async fn connect_with_max_message_size(
        endpoints: &Endpoints,
        session_id: &SessionId,
        max_message_size: Option<usize>,
    ) -> Result<Self> {
        let url = endpoints.stream_url(session_id.as_str());
        let mut config = WebSocketConfig::default();
        config.max_message_size = max_message_size;
        config.max_frame_size = max_message_size;
        let (ws, _response) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(config), false)
                .await
                .map_err(|e| RunnerError::WebSocket {
                    context: format!("Cannot connect WebSocket at {}", url),
                    source: e,
                })?;

        tracing::info!(session_id = %session_id, "Connected to ComfyUI at {}", url);
        Ok(Self {
            ws,
            receive_timeout: None,
        })
    }

    /// Fail the job when no frame arrives for this long.
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Read frames until `job_id` finishes; return what the output node sent.
    pub async fn collect<F>(
        mut self,
        job_id: &JobId,
        target_node: &str,
        mut on_progress: F,
    ) -> Result<ImageBufferMap>
    where
        F: FnMut(ProgressUpdate),
    {
        tracing::info!(job_id = %job_id, node = target_node, "Waiting for images");
        let mut correlator = Correlator::new(job_id.clone(), target_node);
        let outcome = drive(
            &mut self.ws,
            &mut correlator,
            self.receive_timeout,
            &mut on_progress,
        )
        .await;
        self.close().await;

        outcome?;
        if let Some(error) = correlator.execution_error() {
            if !correlator.has_target_image() {
                return Err(RunnerError::NoImageData(format!(
                    "Job {} failed on the server: {}",
                    job_id, error
                )));
            }
        }
        Ok(correlator.into_images())
    }

    /// Close the socket; errors from an already-closed peer are ignored.
    pub async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "WebSocket close");
        }
        tracing::debug!("WebSocket closed");
    }
}
