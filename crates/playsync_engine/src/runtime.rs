//! Tokio runtime glue: a WebSocket transport and an endpoint task that drives
//! the engine.

use crate::backend::{PlaybackBackend, PlayerState};
use crate::config::PlaybackRole;
use crate::engine::{Delivery, EngineStats, ReconciliationEngine};
use crate::error::{SyncError, SyncResult};
use crate::state::ConnectionStatus;
use crate::transport::{Transport, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// WebSocket transport backed by a background task.
///
/// Every `open` spawns a task that dials the relay and pumps frames in both
/// directions, reporting progress on the events channel. A dial failure is
/// reported as `Failed` followed by `Closed`.
pub struct WsTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Creates a transport reporting to `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            outbound: None,
            task: None,
        }
    }

    /// Creates a transport and the receiver for its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str) -> SyncResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::transport_fatal(format!("no tokio runtime: {}", e)))?;

        self.abort_task();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(handle.spawn(run_socket(url.to_owned(), rx, self.events.clone())));
        Ok(())
    }

    fn send(&mut self, frame: String) -> SyncResult<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| SyncError::transport_retryable("transport not open"))?;
        outbound
            .send(frame)
            .map_err(|_| SyncError::transport_retryable("connection closed"))
    }

    fn close(&mut self) {
        // The socket task sends a close frame once its queue is dropped.
        self.outbound = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.abort_task();
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let _ = events.send(TransportEvent::Failed(e.to_string()));
            let _ = events.send(TransportEvent::Closed);
            return;
        }
    };
    let _ = events.send(TransportEvent::Opened);
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write.send(Message::text(frame)).await {
                        let _ = events.send(TransportEvent::Failed(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Frame(text));
                    }
                    Err(_) => warn!("dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Failed(e.to_string()));
                    break;
                }
            },
        }
    }

    let _ = events.send(TransportEvent::Closed);
}

/// A request to a running endpoint.
#[derive(Debug)]
pub enum EndpointCommand {
    /// Connect to the relay.
    Connect,
    /// Disconnect without reconnecting.
    Disconnect,
    /// Load an item and broadcast it.
    Load(String),
    /// Play and broadcast.
    Play,
    /// Pause and broadcast.
    Pause,
    /// Seek and broadcast.
    Seek(f64),
    /// Change the playback role.
    SetRole(PlaybackRole),
    /// The backend reported a state change.
    BackendState(PlayerState),
    /// Report a status snapshot.
    Status(oneshot::Sender<EndpointStatus>),
    /// Stop the endpoint.
    Shutdown,
}

/// Snapshot of a running endpoint.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    /// Connection status.
    pub status: ConnectionStatus,
    /// Playback role.
    pub role: PlaybackRole,
    /// Loaded item.
    pub item_id: Option<String>,
    /// Local playing flag.
    pub playing: bool,
    /// Backend position, if a backend is attached.
    pub position: Option<f64>,
    /// Last relay handshake.
    pub handshake: Option<String>,
    /// Engine counters.
    pub stats: EngineStats,
}

/// Cloneable handle to a running endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    commands: mpsc::UnboundedSender<EndpointCommand>,
}

impl EndpointHandle {
    /// Sends a command.
    pub fn send(&self, command: EndpointCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::EndpointStopped)
    }

    /// Returns a status snapshot.
    pub async fn status(&self) -> SyncResult<EndpointStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(EndpointCommand::Status(tx))?;
        rx.await.map_err(|_| SyncError::EndpointStopped)
    }

    /// Asks the endpoint to stop.
    pub fn shutdown(&self) -> SyncResult<()> {
        self.send(EndpointCommand::Shutdown)
    }
}

/// Runs a [`ReconciliationEngine`] on a tokio task.
pub struct Endpoint;

impl Endpoint {
    /// Spawns the endpoint task.
    ///
    /// `events` must be the receiver for the engine's transport. The task
    /// returns the engine once it shuts down.
    pub fn spawn<T, B>(
        engine: ReconciliationEngine<T, B>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (EndpointHandle, JoinHandle<ReconciliationEngine<T, B>>)
    where
        T: Transport + Send + 'static,
        B: PlaybackBackend + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_endpoint(engine, events, rx));
        (EndpointHandle { commands: tx }, task)
    }
}

async fn run_endpoint<T, B>(
    mut engine: ReconciliationEngine<T, B>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<EndpointCommand>,
) -> ReconciliationEngine<T, B>
where
    T: Transport,
    B: PlaybackBackend,
{
    loop {
        let wait = engine
            .next_deadline()
            .map(|deadline| deadline.saturating_sub(engine.now()));
        let timer = async {
            match wait {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            Some(event) = events.recv() => engine.handle_transport_event(event),
            command = commands.recv() => {
                let Some(command) = command else { break };
                if !apply_command(&mut engine, command) {
                    break;
                }
            }
            _ = timer => {
                engine.fire_due_timers();
            }
        }
    }

    engine.shutdown();
    info!("endpoint stopped");
    engine
}

/// Returns false once the endpoint should stop.
fn apply_command<T: Transport, B: PlaybackBackend>(
    engine: &mut ReconciliationEngine<T, B>,
    command: EndpointCommand,
) -> bool {
    match command {
        EndpointCommand::Connect => {
            if let Err(e) = engine.connect() {
                warn!(error = %e, "connect failed");
            }
        }
        EndpointCommand::Disconnect => engine.disconnect(),
        EndpointCommand::Load(item_id) => report("load", engine.load(&item_id)),
        EndpointCommand::Play => report("play", engine.play()),
        EndpointCommand::Pause => report("pause", engine.pause()),
        EndpointCommand::Seek(position) => report("seek", engine.seek(position)),
        EndpointCommand::SetRole(role) => engine.set_role(role),
        EndpointCommand::BackendState(state) => engine.on_backend_state_change(state),
        EndpointCommand::Status(reply) => {
            let _ = reply.send(EndpointStatus {
                status: engine.status(),
                role: engine.role(),
                item_id: engine.session().item_id().map(str::to_owned),
                playing: engine.is_local_playing(),
                position: engine.backend().map(|b| b.current_position()),
                handshake: engine.last_handshake().map(str::to_owned),
                stats: engine.stats(),
            });
        }
        EndpointCommand::Shutdown => return false,
    }
    true
}

fn report(operation: &str, result: SyncResult<Delivery>) {
    match result {
        Ok(delivery) => debug!(operation, ?delivery, "request handled"),
        Err(e) => warn!(operation, error = %e, "request failed"),
    }
}
