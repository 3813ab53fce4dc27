//! Run a workflow step by step with the lower-level API and live progress.
//!
//! Requires a running ComfyUI instance at http://127.0.0.1:8188 and an
//! API-format workflow containing a `SaveImageWebsocket` node.
//!
//! ```sh
//! cargo run --example generate_once -- workflow_api.json
//! ```

use comfyui_ws_runner::{
    decode, extract, Endpoints, EventStream, JobSubmitter, NodeProfile, SessionId,
    WorkflowDocument,
};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "workflow_api.json".to_string());

    let mut workflow = WorkflowDocument::from_path(&path)?;
    let injection = NodeProfile::default().inject(&mut workflow, "a red bicycle", 0, "")?;
    println!("Output node: {}", injection.output_node);

    let endpoints = Endpoints::resolve("127.0.0.1:8188")?;
    let session = SessionId::new();

    // Connect first so no event for the new job is missed
    let stream = EventStream::connect(&endpoints, &session).await?;
    let job_id = JobSubmitter::new(endpoints.submit_url())
        .submit(&workflow, &session)
        .await?;
    println!("Queued prompt: {}", job_id);

    let images = stream
        .collect(&job_id, &injection.output_node, |p| {
            println!("Step {}/{}", p.current_step, p.total_steps)
        })
        .await?;

    let image = decode(extract(&images, &injection.output_node)?)?;
    image.save("generated.png")?;
    println!("Saved: generated.png ({}x{})", image.width(), image.height());

    Ok(())
}
