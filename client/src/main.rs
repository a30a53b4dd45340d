use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;

mod auth;
mod dispatcher;
mod forward;
mod session;
mod writer;

const DEFAULT_RELAY_URL: &str = "wss://tunlink.dev/server";
const DEFAULT_API_URL: &str = "https://tunlink.dev";

const BANNER: &str = "\n\
╔══════════════════════════════════════╗\n\
║  Tunlink - local tunnel client       ║\n\
╚══════════════════════════════════════╝\n";

#[derive(Parser)]
#[command(name = "tunlink")]
#[command(version = "0.1.0")]
#[command(about = "Expose a local HTTP service through a tunlink relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay control endpoint
    #[arg(short, long, default_value = DEFAULT_RELAY_URL)]
    relay: String,

    /// API endpoint used for authentication
    #[arg(long, default_value = DEFAULT_API_URL)]
    api: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Expose a local HTTP service
    Http {
        /// Local port to forward requests to
        port: u16,
    },
    /// Validate and store an authentication token
    Auth {
        /// Token issued by the relay service
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Auth { token } => auth::authorize(&cli.api, &token).await?,
        Commands::Http { port } => run_tunnel(&cli.relay, port).await?,
    }

    Ok(())
}

async fn run_tunnel(relay_url: &str, port: u16) -> Result<()> {
    println!("{}", BANNER);
    let token = auth::load_token()?;

    let (interrupt_tx, interrupt_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt_tx.send(());
        }
    });

    let config = session::SessionConfig::new(relay_url, token, port);
    session::run(config, interrupt_rx).await
}
