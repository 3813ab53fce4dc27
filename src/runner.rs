use image::DynamicImage;
use reqwest::Client;
use std::path::PathBuf;

use crate::address::Endpoints;
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::extract::{decode, extract};
use crate::inject::SeedOutcome;
use crate::stream::EventStream;
use crate::submit::JobSubmitter;
use crate::types::{JobId, SessionId};
use crate::workflow::WorkflowDocument;

/// Everything a front end collects for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub workflow_path: PathBuf,
    pub server_address: String,
    pub context_text: String,
    /// Accepted for parity with the form; a seed node always gets a random seed.
    pub seed_hint: i64,
    /// Blank to auto-detect the first image-sink node.
    pub output_node_hint: String,
}

impl GenerateRequest {
    pub fn new(workflow_path: impl Into<PathBuf>, server_address: impl Into<String>) -> Self {
        Self {
            workflow_path: workflow_path.into(),
            server_address: server_address.into(),
            context_text: String::new(),
            seed_hint: 0,
            output_node_hint: String::new(),
        }
    }

    pub fn context(mut self, text: impl Into<String>) -> Self {
        self.context_text = text.into();
        self
    }

    pub fn seed_hint(mut self, seed: i64) -> Self {
        self.seed_hint = seed;
        self
    }

    pub fn output_node(mut self, node_id: impl Into<String>) -> Self {
        self.output_node_hint = node_id.into();
        self
    }
}

/// Result handed back to a front end: an image or nothing, plus a message.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub image: Option<DynamicImage>,
    pub status: String,
}

/// A successful run with the identifiers it produced.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: DynamicImage,
    pub job_id: JobId,
    pub output_node: String,
    /// Seed written into the seed node, if the workflow had one.
    pub seed: Option<u64>,
}

/// Runs workflows against a ComfyUI server, one job per call.
///
/// # Example
/// ```no_run
/// use comfyui_ws_runner::{GenerateRequest, Runner};
///
/// # async fn example() {
/// let runner = Runner::default();
/// let request = GenerateRequest::new("workflow_api.json", "127.0.0.1:8188").context("boy");
/// let outcome = runner.generate(&request).await;
/// println!("{}", outcome.status);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
    http: Client,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    /// Use a custom `reqwest::Client` for the submission request.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one job and report the outcome as `(image, status)`.
    ///
    /// Never fails: every error becomes a `None` image and a message.
    pub async fn generate(&self, request: &GenerateRequest) -> GenerateOutcome {
        match self.try_generate(request).await {
            Ok(generated) => GenerateOutcome {
                status: format!(
                    "Image generated (job {}, node {}).",
                    generated.job_id, generated.output_node
                ),
                image: Some(generated.image),
            },
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind(), "Generation failed");
                GenerateOutcome {
                    image: None,
                    status: format!("{}: {}", e.kind(), e),
                }
            }
        }
    }

    /// [`generate`](Self::generate) on a private current-thread runtime.
    ///
    /// For synchronous callers; must not be called from inside a Tokio runtime.
    pub fn generate_blocking(&self, request: &GenerateRequest) -> GenerateOutcome {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(self.generate(request)),
            Err(e) => GenerateOutcome {
                image: None,
                status: format!("Failed to start async runtime: {}", e),
            },
        }
    }

    /// Run one job: load, inject, connect, submit, stream, extract, decode.
    pub async fn try_generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let path = &request.workflow_path;
        if path.as_os_str().is_empty() {
            return Err(RunnerError::Config("No workflow file selected".into()));
        }
        if !path.is_file() {
            return Err(RunnerError::Config(format!(
                "Workflow file '{}' does not exist",
                path.display()
            )));
        }

        let mut doc = WorkflowDocument::from_path(path)?;
        tracing::info!(path = %path.display(), nodes = doc.len(), "Loaded workflow");

        let injection = self.config.profile.inject(
            &mut doc,
            &request.context_text,
            request.seed_hint,
            &request.output_node_hint,
        )?;
        let endpoints = Endpoints::resolve(&request.server_address)?;
        let session_id = SessionId::new();
        tracing::info!(
            submit_url = endpoints.submit_url(),
            stream_url = %endpoints.stream_url(session_id.as_str()),
            "Resolved ComfyUI endpoints"
        );

        let stream = EventStream::connect_with_max_message_size(
            &endpoints,
            &session_id,
            self.config.max_message_size,
        )
        .await?
        .with_receive_timeout(self.config.receive_timeout);

        let submitter = JobSubmitter::new(endpoints.submit_url())
            .with_http_client(self.http.clone())
            .with_timeout(self.config.request_timeout);
        let job_id = match submitter.submit(&doc, &session_id).await {
            Ok(id) => id,
            Err(e) => {
                stream.close().await;
                return Err(e);
            }
        };

        let output_node = injection.output_node;
        let images = stream
            .collect(&job_id, &output_node, |p| {
                tracing::info!(
                    step = p.current_step,
                    total = p.total_steps,
                    "Sampling progress"
                )
            })
            .await?;

        let bytes = extract(&images, &output_node)?;
        let image = decode(bytes)?;
        tracing::info!(
            job_id = %job_id,
            width = image.width(),
            height = image.height(),
            "Image decoded"
        );

        let seed = match injection.seed {
            SeedOutcome::Randomized { seed, .. } => Some(seed),
            _ => None,
        };
        Ok(GeneratedImage {
            image,
            job_id,
            output_node,
            seed,
        })
    }
}
