//! sessync - session persistence and sync CLI
//!
#![doc = "sessync - session persistence and sync CLI"]
#![doc = "Main entry point for the sessync command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sessync::cli::{Cli, Commands};
use sessync::commands;
use sessync::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::List { assistant, json } => {
            tracing::info!("Listing sessions");
            commands::sessions::list_sessions(&config, assistant.as_deref(), json).await?;
            Ok(())
        }
        Commands::Load { id } => {
            tracing::debug!("Loading session: {}", id);
            commands::sessions::load_session(&config, &id).await?;
            Ok(())
        }
        Commands::Save {
            file,
            name,
            assistant,
        } => {
            tracing::info!("Saving session from {}", file.display());
            commands::save::save_session(&config, &file, name, assistant).await?;
            Ok(())
        }
        Commands::Signature { file } => {
            commands::signature::print_signature(&file).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "sessync=debug"
    } else {
        "sessync=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
