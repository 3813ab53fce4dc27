use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfyui_ws_runner::{discover_workflows, GenerateRequest, Runner, RunnerConfig};

/// Run ComfyUI workflows and save the image streamed back over the WebSocket
#[derive(Parser)]
#[command(name = "comfyui-ws-runner")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a workflow and wait for its image
    Run {
        /// Path to the workflow file (ComfyUI API format JSON)
        #[arg(long)]
        workflow: PathBuf,

        /// ComfyUI address: host:port, host:port/path or a full URL
        #[arg(long, env = "COMFYUI_SERVER", default_value = "127.0.0.1:8188")]
        server: String,

        /// Text written into the context node
        #[arg(long, default_value = "")]
        context: String,

        /// Seed hint (a seed node always receives a random seed instead)
        #[arg(long, default_value_t = 12345)]
        seed: i64,

        /// Id of the SaveImageWebsocket node to read; auto-detected when omitted
        #[arg(long, default_value = "")]
        output_node: String,

        /// Where to write the decoded image
        #[arg(long, default_value = "output.png")]
        out: PathBuf,

        /// Seconds to wait for a single WebSocket message (0 waits forever)
        #[arg(long, default_value_t = 300)]
        receive_timeout: u64,

        /// Largest WebSocket message accepted, in MiB (0 removes the limit)
        #[arg(long, default_value_t = 256)]
        max_message_mib: usize,
    },

    /// List workflow files in a directory
    List {
        /// Directory to scan (default: current directory)
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyui_ws_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            server,
            context,
            seed,
            output_node,
            out,
            receive_timeout,
            max_message_mib,
        } => {
            let builder = match receive_timeout {
                0 => RunnerConfig::builder().without_receive_timeout(),
                secs => RunnerConfig::builder().with_receive_timeout(Duration::from_secs(secs)),
            };
            let config = match max_message_mib {
                0 => builder.without_message_size_limit(),
                mib => builder.with_max_message_size(mib.saturating_mul(1 << 20)),
            }
            .build();

            let request = GenerateRequest::new(workflow, server)
                .context(context)
                .seed_hint(seed)
                .output_node(output_node);

            let outcome = Runner::new(config).generate(&request).await;
            println!("{}", outcome.status);

            let Some(image) = outcome.image else {
                bail!("no image produced");
            };
            image
                .save(&out)
                .with_context(|| format!("Failed to write image to {}", out.display()))?;
            println!("Saved: {}", out.display());
        }
        Commands::List { dir } => {
            let files = discover_workflows(&dir)?;
            if files.is_empty() {
                println!(
                    "No .json workflows in {}. Export one from ComfyUI with 'Save (API Format)'.",
                    dir.display()
                );
            }
            for file in files {
                println!("{}", file.display());
            }
        }
    }

    Ok(())
}
