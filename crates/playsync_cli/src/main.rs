//! PlaySync CLI
//!
//! Command-line front end for PlaySync.
//!
//! # Commands
//!
//! - `relay` - Run a broadcast relay
//! - `watch` - Run a headless endpoint driven from stdin
//! - `version` - Show version information

mod commands;
mod simulated;

use clap::{Parser, Subcommand};
use playsync_engine::{DialMode, PlaybackRole};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Shared media playback sync.
#[derive(Parser)]
#[command(name = "playsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a broadcast relay
    Relay {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Maximum simultaneous connections
        #[arg(short, long, default_value = "1000")]
        max_connections: usize,

        /// Text sent to every new connection
        #[arg(long)]
        handshake: Option<String>,
    },

    /// Run a headless endpoint with a simulated player
    Watch {
        /// Relay URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
        url: String,

        /// Playback role (leader, follower)
        #[arg(short, long, default_value = "follower")]
        role: PlaybackRole,

        /// Connection mode (dial-out, inbound)
        #[arg(short, long, default_value = "dial-out")]
        dial_mode: DialMode,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Relay {
            bind,
            max_connections,
            handshake,
        } => {
            commands::relay::run(bind, max_connections, handshake).await?;
        }
        Commands::Watch {
            url,
            role,
            dial_mode,
        } => {
            commands::watch::run(&url, role, dial_mode).await?;
        }
        Commands::Version => {
            println!("PlaySync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Protocol v{}", playsync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
