mod config;
mod get;

use clap::{Parser, Subcommand};
use config::Settings;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "oci-cas", version)]
#[command(about = "Open Container Initiative Content Addressable Storage")]
struct Cli {
    /// Log level directive (error, warn, info, debug or trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Effective root for file URIs. File URIs are disabled when unset; use
    /// the narrowest directory that works rather than '/'.
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Optional settings file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve blobs from the engines listed on stdin and write them to stdout
    Get {
        #[arg(value_name = "DIGEST", required = true)]
        digests: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref(), cli.log_level, cli.file) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("Failed to load settings: {}", error);
            std::process::exit(1);
        }
    };

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.log_level))
    {
        Ok(filter) => filter,
        Err(error) => {
            eprintln!("Invalid log level {:?}: {}", settings.log_level, error);
            std::process::exit(1);
        }
    };

    // Blob bytes go to stdout, so logs must not.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Get { digests } => get::run(&settings, &digests).await,
    };

    if let Err(error) = result {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}
