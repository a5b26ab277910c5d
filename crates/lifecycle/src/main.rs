use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod power;

#[derive(Parser)]
#[command(name = "lifecycle")]
#[command(about = "Service lifecycle engine - start, monitor and deploy local AI services")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "services.yaml")]
    config: PathBuf,

    /// Mode override file (defaults to the user config directory)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file and print the start order
    Validate,

    /// Start all services and monitor them until Ctrl-C
    Up,

    /// Show registered services and the mode each would start in
    Status {
        /// Output format (table or json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Persist a deployment mode for a service
    Mode {
        /// Service name
        service: String,
        /// containerized, native, manual or remote
        mode: String,
        /// Endpoint for manual/remote modes
        #[arg(long)]
        url: Option<String>,
    },

    /// Remote deployment commands
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,

        /// Read the SSH password from this environment variable instead of prompting
        #[arg(long, global = true)]
        password_env: Option<String>,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// Connect and report the remote hardware profile
    Test,
    /// Deploy the inference engine to the remote host
    Deploy,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn state_path(state: Option<PathBuf>) -> PathBuf {
    state.unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lifecycle")
            .join("overrides.json")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let state = state_path(cli.state);

    match cli.command {
        Commands::Validate => commands::validate::run(&cli.config),
        Commands::Up => commands::up::run(&cli.config, &state).await,
        Commands::Status { format } => commands::status::run(&cli.config, &state, &format).await,
        Commands::Mode { service, mode, url } => {
            commands::mode::run(&cli.config, &state, &service, &mode, url).await
        }
        Commands::Remote {
            command,
            password_env,
        } => match command {
            RemoteCommands::Test => {
                commands::remote::test(&cli.config, password_env.as_deref()).await
            }
            RemoteCommands::Deploy => {
                commands::remote::deploy(&cli.config, password_env.as_deref()).await
            }
        },
    }
}
