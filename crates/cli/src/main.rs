//! taskloop CLI, the main entry point.
//!
//! Commands:
//! - `run`     Run a single instruction to completion
//! - `chat`    Interactive mode; each line continues the same session
//! - `config`  Show, validate or initialize the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod console;

#[derive(Parser)]
#[command(
    name = "taskloop",
    about = "taskloop: a turn-based tool-calling agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "TASKLOOP_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single instruction and print the final answer
    Run {
        /// The instruction to carry out
        #[arg(short, long)]
        message: String,

        /// Attach a file (images are embedded, other files are listed)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Override agent.max_turns
        #[arg(long)]
        max_turns: Option<u32>,
    },

    /// Interactive session; Ctrl-C cancels the running task
    Chat {
        /// Override agent.max_turns
        #[arg(long)]
        max_turns: Option<u32>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the default configuration
    Default,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
    /// Write the default configuration if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            message,
            files,
            max_turns,
        } => commands::run::run(message, files, max_turns).await?,
        Commands::Chat { max_turns } => commands::chat::run(max_turns).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Default => commands::config_cmd::print_default(),
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Init => commands::config_cmd::init()?,
        },
    }

    Ok(())
}
