//! WebSocket front end for the relay.
//!
//! Every connection gets its own task that reads frames and forwards them as
//! [`RelayEvent`]s to a single relay task. Only the relay task touches the
//! [`RelayServer`], so broadcasts happen one message at a time in arrival
//! order without any locking.

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::registry::ConnectionId;
use crate::server::RelayServer;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Events delivered to the relay task.
#[derive(Debug)]
pub enum RelayEvent {
    /// A WebSocket handshake completed.
    Connected {
        /// Outbound queue for the new connection.
        sink: mpsc::UnboundedSender<String>,
        /// Receives the assigned id, or the rejection.
        reply: oneshot::Sender<RelayResult<ConnectionId>>,
    },
    /// A text frame arrived.
    Frame {
        /// Sending connection.
        id: ConnectionId,
        /// Frame payload.
        text: String,
    },
    /// The peer sent a close frame.
    Closing {
        /// Closing connection.
        id: ConnectionId,
    },
    /// The connection ended, cleanly or not.
    Closed {
        /// Closed connection.
        id: ConnectionId,
    },
}

/// A relay bound to a TCP listener.
pub struct RelayService {
    listener: TcpListener,
    server: RelayServer,
}

impl RelayService {
    /// Binds the configured address.
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self::from_parts(listener, RelayServer::new(config)))
    }

    /// Wraps an existing listener and relay core.
    pub fn from_parts(listener: TcpListener, server: RelayServer) -> Self {
        Self { listener, server }
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the process exits.
    pub async fn run(self) -> RelayResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self { listener, server } = self;
        info!(addr = %listener.local_addr()?, "relay listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(relay_loop(server, events_rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let events = events_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer, events).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Owns the relay core and processes events strictly in arrival order.
async fn relay_loop(mut server: RelayServer, mut events: mpsc::UnboundedReceiver<RelayEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Connected { sink, reply } => {
                let result = server.accept(Box::new(sink));
                if reply.send(result).is_err() {
                    debug!("connection task went away before registration completed");
                }
            }
            RelayEvent::Frame { id, text } => {
                server.handle_message(id, &text);
            }
            RelayEvent::Closing { id } => server.mark_closing(id),
            RelayEvent::Closed { id } => {
                if let Err(e) = server.disconnect(id) {
                    debug!(connection = %id, error = %e, "disconnect");
                }
            }
        }
    }
    debug!(stats = ?server.stats(), "relay loop finished");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<RelayEvent>,
) -> RelayResult<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let (sink, mut outbound) = mpsc::unbounded_channel::<String>();
    let (reply, registered) = oneshot::channel();
    events
        .send(RelayEvent::Connected { sink, reply })
        .map_err(|_| RelayError::WebSocket("relay task stopped".into()))?;

    let id = match registered.await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            let _ = write.send(Message::Close(None)).await;
            return Err(e);
        }
        Err(_) => return Err(RelayError::WebSocket("relay task stopped".into())),
    };
    debug!(connection = %id, %peer, "websocket open");

    // Ends once the relay drops the sink on disconnect.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = write.send(Message::text(frame)).await {
                debug!(connection = %id, error = %e, "write failed");
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let _ = events.send(RelayEvent::Frame {
                    id,
                    text: text.as_str().to_owned(),
                });
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => {
                    let _ = events.send(RelayEvent::Frame { id, text });
                }
                Err(_) => warn!(connection = %id, "dropping non-utf8 binary frame"),
            },
            Ok(Message::Close(_)) => {
                let _ = events.send(RelayEvent::Closing { id });
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(connection = %id, error = %e, "transport error");
                break;
            }
        }
    }

    let _ = events.send(RelayEvent::Closed { id });
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use playsync_protocol::{ClientMessage, PlaybackAction, RelayMessage};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn next_relay_message<S>(read: &mut S) -> RelayMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), read.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .expect("ws error");
            if let Message::Text(text) = msg {
                return RelayMessage::decode(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn websocket_broadcast_end_to_end() {
        let config = RelayConfig::new("127.0.0.1:0".parse().unwrap());
        let service = RelayService::bind(config).await.unwrap();
        let addr = service.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(service.run_until(async {
            let _ = stop_rx.await;
        }));

        let url = format!("ws://{}", addr);
        let (a, _) = connect_async(url.as_str()).await.unwrap();
        let (b, _) = connect_async(url.as_str()).await.unwrap();
        let (mut a_write, mut a_read) = a.split();
        let (_b_write, mut b_read) = b.split();

        assert!(matches!(
            next_relay_message(&mut a_read).await,
            RelayMessage::Handshake { .. }
        ));
        assert!(matches!(
            next_relay_message(&mut b_read).await,
            RelayMessage::Handshake { .. }
        ));

        a_write.send(Message::text("garbage".to_string())).await.unwrap();
        let frame = ClientMessage::playback(PlaybackAction::Seek, 12.5, 1)
            .encode()
            .unwrap();
        a_write.send(Message::text(frame)).await.unwrap();

        match next_relay_message(&mut b_read).await {
            RelayMessage::PlaybackAction {
                action,
                position,
                relay_timestamp,
            } => {
                assert_eq!(action, PlaybackAction::Seek);
                assert_eq!(position, 12.5);
                assert!(relay_timestamp > 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        // The sender never hears its own message back.
        let echoed = tokio::time::timeout(Duration::from_millis(200), a_read.next()).await;
        assert!(echoed.is_err());

        let _ = stop_tx.send(());
    }
}
