//! Watch command implementation.

use crate::simulated::SimulatedBackend;
use playsync_engine::{
    DialMode, Endpoint, EndpointCommand, EndpointHandle, EndpointStatus, EngineConfig,
    PlaybackRole, ReconciliationEngine, WsTransport,
};
use playsync_protocol::{Clock, SystemClock};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// A line typed at the watch prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// `load <item-id>`
    Load(String),
    /// `play`
    Play,
    /// `pause`
    Pause,
    /// `seek <seconds>`
    Seek(f64),
    /// `role <leader|follower>`
    Role(PlaybackRole),
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `status`
    Status,
    /// `quit`
    Quit,
}

/// Error parsing a line of input.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    /// Blank line.
    #[error("empty input")]
    Empty,

    /// Unknown command word.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Missing or invalid argument.
    #[error("{command}: {reason}")]
    BadArgument {
        /// Command being parsed.
        command: &'static str,
        /// What was wrong.
        reason: String,
    },
}

impl FromStr for Input {
    type Err = InputError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(InputError::Empty)?;
        let argument = words.next();

        match command.to_ascii_lowercase().as_str() {
            "load" => argument
                .map(|id| Input::Load(id.to_owned()))
                .ok_or(InputError::BadArgument {
                    command: "load",
                    reason: "missing item id".into(),
                }),
            "play" => Ok(Input::Play),
            "pause" => Ok(Input::Pause),
            "seek" => {
                let raw = argument.ok_or(InputError::BadArgument {
                    command: "seek",
                    reason: "missing position".into(),
                })?;
                match raw.parse::<f64>() {
                    Ok(position) if position.is_finite() && position >= 0.0 => {
                        Ok(Input::Seek(position))
                    }
                    _ => Err(InputError::BadArgument {
                        command: "seek",
                        reason: format!("invalid position: {}", raw),
                    }),
                }
            }
            "role" => {
                let raw = argument.ok_or(InputError::BadArgument {
                    command: "role",
                    reason: "missing role".into(),
                })?;
                raw.parse()
                    .map(Input::Role)
                    .map_err(|reason| InputError::BadArgument {
                        command: "role",
                        reason,
                    })
            }
            "connect" => Ok(Input::Connect),
            "disconnect" => Ok(Input::Disconnect),
            "status" => Ok(Input::Status),
            "quit" | "exit" => Ok(Input::Quit),
            other => Err(InputError::UnknownCommand(other.to_owned())),
        }
    }
}

/// Runs a headless endpoint until `quit`, end of input or Ctrl-C.
pub async fn run(
    url: &str,
    role: PlaybackRole,
    dial_mode: DialMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::new(url)
        .with_role(role)
        .with_dial_mode(dial_mode);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let (backend, mut notifications) = SimulatedBackend::new(Arc::clone(&clock));
    let (transport, events) = WsTransport::channel();
    let engine = ReconciliationEngine::with_backend(config, transport, backend, clock);
    let (handle, task) = Endpoint::spawn(engine, events);

    let forward = handle.clone();
    tokio::spawn(async move {
        while let Some(state) = notifications.recv().await {
            if forward.send(EndpointCommand::BackendState(state)).is_err() {
                break;
            }
        }
    });

    info!(%url, %role, "starting endpoint");
    handle.send(EndpointCommand::Connect)?;
    println!("Commands: load <id>, play, pause, seek <secs>, role <r>, connect, disconnect, status, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.parse::<Input>() {
                    Ok(Input::Quit) => break,
                    Ok(input) => dispatch(&handle, input).await?,
                    Err(InputError::Empty) => {}
                    Err(e) => println!("error: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupt received");
                break;
            }
        }
    }

    handle.shutdown()?;
    task.await?;
    Ok(())
}

async fn dispatch(
    handle: &EndpointHandle,
    input: Input,
) -> Result<(), Box<dyn std::error::Error>> {
    let command = match input {
        Input::Load(item_id) => EndpointCommand::Load(item_id),
        Input::Play => EndpointCommand::Play,
        Input::Pause => EndpointCommand::Pause,
        Input::Seek(position) => EndpointCommand::Seek(position),
        Input::Role(role) => EndpointCommand::SetRole(role),
        Input::Connect => EndpointCommand::Connect,
        Input::Disconnect => EndpointCommand::Disconnect,
        Input::Status => {
            print_status(&handle.status().await?);
            return Ok(());
        }
        Input::Quit => EndpointCommand::Shutdown,
    };
    handle.send(command)?;
    Ok(())
}

fn print_status(status: &EndpointStatus) {
    println!("Status:    {:?}", status.status);
    println!("Role:      {}", status.role);
    println!("Item:      {}", status.item_id.as_deref().unwrap_or("-"));
    println!("Playing:   {}", status.playing);
    if let Some(position) = status.position {
        println!("Position:  {:.2}s", position);
    }
    if let Some(handshake) = &status.handshake {
        println!("Relay:     {}", handshake);
    }
    println!(
        "Traffic:   {} sent, {} suppressed, {} applied, {} seeks",
        status.stats.events_sent,
        status.stats.sends_suppressed,
        status.stats.actions_applied + status.stats.loads_applied,
        status.stats.seeks_issued
    );
    if let Some(error) = &status.stats.last_error {
        println!("Error:     {}", error);
    }
}
