use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowrun_core::traits::ToolInvoker;
use flowrun_core::FlowConfig;
use flowrun_engine::workflows::code_review;
use flowrun_engine::RunOptions;
use flowrun_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "flowrun", version, about = "Run workflow graphs over shared state")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowrun.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the code review workflow on a source file ("-" reads stdin)
    Review {
        file: PathBuf,
        /// Quality score (0-10) a review must reach to pass
        #[arg(long)]
        threshold: Option<f64>,
        /// Run id to record the run under (auto-generated if not provided)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// List registered tools
    Tools,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Review {
            file,
            threshold,
            run_id,
        } => {
            let code = read_source(&file).await?;
            let threshold = threshold.unwrap_or(config.review.quality_threshold);
            let mut options = RunOptions::from_config(&config);
            if let Some(id) = run_id {
                options = options.with_run_id(id);
            }

            info!(file = %file.display(), threshold, "Starting code review");
            let tools: Arc<dyn ToolInvoker> = Arc::new(ToolRegistry::with_builtins());
            let outcome = code_review::run_code_review_async(tools, &code, threshold, options)
                .await
                .context("code review failed")?;

            if let Some(error) = &outcome.error {
                warn!(error = %error, "Review completed with an error");
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Tools => {
            let registry = ToolRegistry::with_builtins();
            for (name, description) in registry.list() {
                println!("{:<22} {}", name, description);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Missing default config falls back to built-in defaults; an explicitly
/// named file must exist.
fn load_config(path: &Path) -> anyhow::Result<FlowConfig> {
    if path.exists() {
        return FlowConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }
    if path == Path::new("flowrun.toml") {
        return Ok(FlowConfig::default());
    }
    anyhow::bail!("config file not found: {}", path.display())
}

async fn read_source(file: &Path) -> anyhow::Result<String> {
    if file == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read stdin")?;
        return Ok(code);
    }
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))
}
