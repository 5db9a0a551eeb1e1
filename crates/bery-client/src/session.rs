//! WebSocket session driver.
//!
//! The driver runs in its own tokio task. The application talks to it
//! through a [`SessionHandle`] (commands in) and a stream of
//! [`SessionEvent`]s (notifications out).

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use bery_shared::protocol::ChatMessage;
use bery_shared::{Envelope, MessageId};

use crate::error::ClientError;
use crate::events::{ConnectionState, SessionEvent};
use crate::reconnect::ReconnectPolicy;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Error text attached to messages that could not leave the device.
pub const NOT_CONNECTED: &str = "Not connected";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay WebSocket URL, e.g. `ws://localhost:8080/ws`.
    pub url: String,
    /// Stable logical identity sent in `register`.
    pub user_id: String,
    pub user_name: String,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(
        url: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Commands sent *into* the session task.
#[derive(Debug)]
enum SessionCommand {
    Send(Envelope),
    Shutdown,
}

/// Why a connected period ended.
enum Exit {
    Disconnected,
    Shutdown,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Queue an envelope for the relay.
    ///
    /// While reconnecting, chat messages are not buffered: they come back
    /// as a `failed` status event instead.
    pub async fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        if let ConnectionState::Unreachable { attempts } = self.state() {
            return Err(ClientError::Unreachable { attempts });
        }
        self.cmd_tx
            .send(SessionCommand::Send(envelope))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Send a text message and return the envelope that went out, so the
    /// caller can add it to its local conversation state.
    pub async fn send_text(
        &self,
        contact: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<ChatMessage, ClientError> {
        let message = ChatMessage::text(contact, MessageId::generate(), text);
        self.send(Envelope::Message(message.clone())).await?;
        Ok(message)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
    }
}

pub struct ChatSession;

impl ChatSession {
    /// Spawn the session task.
    ///
    /// Returns the command handle and the event receiver.
    pub fn spawn(config: SessionConfig) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(run(config, cmd_rx, event_tx, state_tx));

        (SessionHandle { cmd_tx, state_rx }, event_rx)
    }
}

async fn run(
    config: SessionConfig,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut attempt: u32 = 0;

    loop {
        match connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %config.url, user = %config.user_id, "Connected to relay");
                attempt = 0;
                let _ = state_tx.send(ConnectionState::Connected);

                match drive(socket, &config, &mut cmd_rx, &event_tx).await {
                    Exit::Shutdown => break,
                    Exit::Disconnected => {
                        info!(url = %config.url, "Disconnected from relay");
                        let _ = event_tx.send(SessionEvent::Disconnected).await;
                    }
                }
            }
            Err(e) => {
                warn!(url = %config.url, attempt, error = %e, "Connection attempt failed");
            }
        }

        let Some(delay) = config.reconnect.next_delay(attempt) else {
            warn!(attempts = attempt, "Giving up on relay");
            let _ = state_tx.send(ConnectionState::Unreachable { attempts: attempt });
            let _ = event_tx
                .send(SessionEvent::Unreachable { attempts: attempt })
                .await;
            return;
        };
        attempt += 1;

        debug!(attempt, ?delay, "Reconnecting");
        let _ = state_tx.send(ConnectionState::Reconnecting { attempt });
        let _ = event_tx
            .send(SessionEvent::Reconnecting { attempt, delay })
            .await;

        if !wait_offline(delay, &mut cmd_rx, &event_tx).await {
            break;
        }
    }

    let _ = state_tx.send(ConnectionState::Closed);
}

/// One connected period: register, then pump frames both ways.
async fn drive(
    mut socket: Socket,
    config: &SessionConfig,
    cmd_rx: &mut mpsc::Receiver<SessionCommand>,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> Exit {
    let register = Envelope::register(config.user_id.as_str(), config.user_name.as_str());
    if let Err(e) = send_envelope(&mut socket, &register).await {
        warn!(error = %e, "Failed to register");
        return Exit::Disconnected;
    }
    let _ = event_tx.send(SessionEvent::Connected).await;

    loop {
        tokio::select! {
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match Envelope::decode(&text) {
                    Ok(envelope) => {
                        if let Some(event) = SessionEvent::from_envelope(envelope) {
                            if event_tx.send(event).await.is_err() {
                                // nobody is listening any more
                                let _ = socket.close(None).await;
                                return Exit::Shutdown;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed envelope from relay"),
                },
                Some(Ok(Message::Close(_))) | None => return Exit::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket receive error");
                    return Exit::Disconnected;
                }
            },
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::Send(envelope)) => {
                    if let Err(e) = send_envelope(&mut socket, &envelope).await {
                        warn!(error = %e, "WebSocket send failed");
                        reject(&envelope, event_tx).await;
                        return Exit::Disconnected;
                    }
                }
                Some(SessionCommand::Shutdown) | None => {
                    let _ = socket.close(None).await;
                    return Exit::Shutdown;
                }
            },
        }
    }
}

/// Sleep out a backoff delay, failing any messages sent meanwhile.
/// Returns `false` if the session was shut down.
async fn wait_offline(
    delay: Duration,
    cmd_rx: &mut mpsc::Receiver<SessionCommand>,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::Send(envelope)) => reject(&envelope, event_tx).await,
                Some(SessionCommand::Shutdown) | None => return false,
            },
        }
    }
}

async fn send_envelope(socket: &mut Socket, envelope: &Envelope) -> Result<(), ClientError> {
    let text = envelope.encode()?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}

/// Report an unsent chat message back to the application as failed.
async fn reject(envelope: &Envelope, event_tx: &mpsc::Sender<SessionEvent>) {
    let (contact, message_id) = match envelope {
        Envelope::Message(m) => (m.contact_id.clone(), m.message_id.clone()),
        Envelope::Media(m) => match &m.message_id {
            Some(id) => (m.contact_id.clone(), id.clone()),
            None => return,
        },
        other => {
            debug!(kind = other.kind(), "Dropping envelope while offline");
            return;
        }
    };

    if let Envelope::Status(status) = Envelope::failed(contact, message_id, NOT_CONNECTED) {
        let _ = event_tx.send(SessionEvent::Status(status)).await;
    }
}
