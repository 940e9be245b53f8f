use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tuneserve::training::TrainingRequest;
use tuneserve::{Config, ControlPlane};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tuneserve")]
#[command(about = "Fine-tuning and serving control plane with a chat feedback loop", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control plane
    Serve,

    /// Run one training job to completion
    Train {
        /// Training-data file (JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Base model identifier
        #[arg(short, long)]
        base_model: Option<String>,

        /// Output model name under the models directory
        #[arg(short, long)]
        output: String,

        /// Optimization step budget
        #[arg(long)]
        max_steps: Option<u32>,

        /// Peak learning rate
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Batch size
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Run the periodic feedback-to-retrain monitor
    Monitor {
        /// Model the retrained artifacts overwrite
        #[arg(short, long)]
        model_id: String,
    },

    /// Show system information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(config).await?,

        Commands::Train {
            data,
            base_model,
            output,
            max_steps,
            learning_rate,
            batch_size,
        } => {
            train(
                config,
                data,
                base_model,
                output,
                max_steps,
                learning_rate,
                batch_size,
            )
            .await?;
        }

        Commands::Monitor { model_id } => monitor(config, model_id).await?,

        Commands::Info => show_system_info(),
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).context("Failed to load configuration file"),
        None => Ok(Config::default()),
    }
}

async fn serve(config: Config) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    let plane = Arc::new(
        ControlPlane::new(config)
            .await
            .context("Failed to initialize control plane")?,
    );

    let app = tuneserve::server::router(plane);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    info!("tuneserve API listening on {}", address);
    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn train(
    config: Config,
    data: PathBuf,
    base_model: Option<String>,
    output: String,
    max_steps: Option<u32>,
    learning_rate: Option<f64>,
    batch_size: Option<usize>,
) -> Result<()> {
    let plane = ControlPlane::new(config.clone())
        .await
        .context("Failed to initialize control plane")?;

    let request = TrainingRequest {
        job_id: format!("train_{}", Uuid::new_v4()),
        data_path: data,
        base_model: base_model.unwrap_or_else(|| config.training.default_base_model.clone()),
        output_dir: config.paths.models_dir.join(&output),
        max_steps: max_steps.unwrap_or(config.training.max_steps),
        learning_rate: learning_rate.unwrap_or(config.training.learning_rate),
        batch_size: batch_size.unwrap_or(config.training.batch_size),
    };

    info!("Starting training job {}", request.job_id);
    plane.runner().run(&request).await?;

    let status = plane
        .registry()
        .get(&request.job_id)
        .context("Job record missing after run")?;
    println!(
        "Training complete: {} steps, final loss {:?}",
        status.current_step, status.loss
    );
    println!("Model saved to: {}", request.output_dir.display());
    Ok(())
}

async fn monitor(config: Config, model_id: String) -> Result<()> {
    let plane = ControlPlane::new(config)
        .await
        .context("Failed to initialize control plane")?;

    plane.retrain_loop(&model_id).run().await;
    Ok(())
}

fn show_system_info() {
    println!("tuneserve - fine-tuning and serving control plane");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Features:");
    println!("  - Training-data normalization (instruction / conversation / qa)");
    println!("  - Background fine-tuning jobs with live status polling");
    println!("  - Cached low-latency model serving");
    println!("  - Conversation capture and threshold-based auto-retraining");
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  - NVIDIA CUDA GPU acceleration");
    #[cfg(feature = "metal")]
    println!("  - Apple Metal GPU acceleration");
    #[cfg(feature = "accelerate")]
    println!("  - Apple Accelerate framework");
    println!("  - CPU training and inference");

    println!();
    println!("Usage:");
    println!("  tuneserve serve                       # run the HTTP API");
    println!("  tuneserve train -d data.json -o name  # one-shot training run");
    println!("  tuneserve monitor -m model_id         # auto-retrain monitor");
}
