//! # comfyui-ws-runner
//!
//! Run a [ComfyUI](https://github.com/comfyanonymous/ComfyUI) workflow end
//! to end and get the output image back over the WebSocket.
//!
//! The runner loads an API-format workflow, writes the caller's text and a
//! fresh random seed into well-known nodes, queues it with `POST /prompt`,
//! and follows the job's events on `/ws` until the server reports it done.
//! The image comes from the binary frames of a `SaveImageWebsocket` node,
//! so nothing has to be fetched from the server's output folder.
//!
//! ## Quick Start
//!
//! ```no_run
//! use comfyui_ws_runner::{GenerateRequest, Runner, RunnerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let runner = Runner::new(
//!     RunnerConfig::builder()
//!         .with_receive_timeout(Duration::from_secs(120))
//!         .build(),
//! );
//!
//! let request = GenerateRequest::new("workflow_api.json", "https://gpu-box.lan/comfyui")
//!     .context("a lighthouse at dusk")
//!     .output_node("16");
//!
//! let outcome = runner.generate(&request).await;
//! match outcome.image {
//!     Some(image) => image.save("out.png").unwrap(),
//!     None => eprintln!("{}", outcome.status),
//! }
//! # }
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod extract;
pub mod inject;
pub mod runner;
pub mod stream;
pub mod submit;
pub mod types;
pub mod workflow;

pub use address::Endpoints;
pub use config::{RunnerConfig, DEFAULT_MAX_MESSAGE_SIZE};
pub use error::{ErrorKind, Result, RunnerError};
pub use extract::{decode, extract, strip_header};
pub use inject::{Injection, NodeProfile, NodeSlot};
pub use runner::{GenerateOutcome, GenerateRequest, GeneratedImage, Runner};
pub use stream::{Correlator, EventStream};
pub use submit::JobSubmitter;
pub use types::{ImageBufferMap, JobId, ProgressUpdate, SessionId};
pub use workflow::{discover_workflows, WorkflowDocument};
