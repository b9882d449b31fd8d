use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod build;
mod cli;
mod component;
mod ecr;
mod error;
mod registry;
mod settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Stack whose configuration to load ({config_dir}/{stack}.toml)
    #[arg(long, short, global = true, env = "IMAGE_STACK", default_value = "dev")]
    stack: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what would be declared, without calling AWS or the container CLI
    Preview {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create/update the repository and its retention policy, then build and push the image
    Up {
        /// Print the outputs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the repository and all images in it
    Destroy {},
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Preview { json } => cli::handle_preview(&cli.stack, *json)?,
        Commands::Up { json } => cli::handle_up(&cli.stack, *json).await?,
        Commands::Destroy {} => cli::handle_destroy(&cli.stack).await?,
    }

    Ok(())
}
