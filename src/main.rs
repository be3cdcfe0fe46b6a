use std::path::{Path, PathBuf};

use bond_growth::api::{parse_request, run_http_server};
use bond_growth::config::AppConfig;
use bond_growth::core::project;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bond-growth", version, about = "Multi-year bond portfolio growth projections")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the projection API over HTTP
    Serve {
        /// Interface to bind, overrides the config file
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on, overrides the config file
        #[arg(short, long)]
        port: Option<u16>,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a single projection request and print the result as JSON
    Project {
        /// JSON request file
        #[arg(short, long)]
        input: PathBuf,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,bond_growth=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Serve { host, port, config } => serve(host, port, config.as_deref()).await,
        Command::Project {
            input,
            config,
            pretty,
        } => project_file(&input, config.as_deref(), pretty),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config: Option<&Path>,
) -> Result<(), String> {
    let mut config = AppConfig::load_or_default(config).map_err(|e| e.to_string())?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    tracing::info!("bond-growth v{}", env!("CARGO_PKG_VERSION"));
    run_http_server(&config)
        .await
        .map_err(|e| format!("Server error: {e}"))
}

fn project_file(input: &Path, config: Option<&Path>, pretty: bool) -> Result<(), String> {
    let config = AppConfig::load_or_default(config).map_err(|e| e.to_string())?;
    let json = std::fs::read_to_string(input)
        .map_err(|e| format!("failed to read {}: {e}", input.display()))?;
    let request = parse_request(&json)?;
    let projection = project(&request, &config.fx_provider(), &config.report_currency)
        .map_err(|e| e.to_string())?;
    let output = if pretty {
        serde_json::to_string_pretty(&projection)
    } else {
        serde_json::to_string(&projection)
    }
    .map_err(|e| format!("failed to serialize projection: {e}"))?;
    println!("{output}");
    Ok(())
}
