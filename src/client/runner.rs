//! Client Runtime
//!
//! Drives a `ConnectionManager` over real sockets and timers. The manager is
//! owned by a single task; sockets and timers report back over channels, so
//! no state is shared between tasks.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::manager::{Command, ConnectionManager, ConnectionSnapshot};
use super::scheduler::{TimerDriver, TimerToken};
use crate::config::ClientSettings;
use crate::shared::clock::now_millis;
use crate::shared::error::ClientError;
use crate::shared::protocol::{decode, Decoded, WireMessage};

/// Requests from a `ClientHandle` to its runtime task
#[derive(Debug)]
enum Control {
    Reconnect,
    Disconnect,
    SendChat(String),
    Shutdown,
}

/// Reports from socket tasks, tagged with the attempt epoch
#[derive(Debug)]
enum SocketEvent {
    Opened {
        epoch: u64,
        writer: mpsc::UnboundedSender<Message>,
    },
    Text {
        epoch: u64,
        text: String,
    },
    Closed {
        epoch: u64,
        reason: String,
    },
}

/// Caller-side handle to a running heartbeat client
pub struct ClientHandle {
    control: mpsc::UnboundedSender<Control>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Current state, quality and heartbeat counters, uptime measured now
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone().at(now_millis())
    }

    /// Observe every published snapshot.
    ///
    /// Uptime in these is as of publication; call `ConnectionSnapshot::at` to advance it.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// Close the socket and stop reconnecting
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Control::Disconnect)
    }

    /// Drop the current socket and start over with fresh counters
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.send(Control::Reconnect)
    }

    pub fn send_chat(&self, message: impl Into<String>) -> Result<(), ClientError> {
        self.send(Control::SendChat(message.into()))
    }

    /// Disconnect and wait for the runtime task to finish
    pub async fn shutdown(self) {
        let _ = self.control.send(Control::Shutdown);
        let _ = self.task.await;
    }

    fn send(&self, control: Control) -> Result<(), ClientError> {
        self.control.send(control).map_err(|_| ClientError::Closed)
    }
}

/// Build the presence endpoint URL carrying the client identity
pub fn endpoint_url(settings: &ClientSettings) -> Result<Url, ClientError> {
    let mut url = Url::parse(&settings.url)?;
    url.query_pairs_mut()
        .append_pair("userId", &settings.user_id)
        .append_pair("username", &settings.username);
    Ok(url)
}

/// Start a heartbeat client and connect immediately.
///
/// Returns the control handle and a receiver for application messages
/// (`status_update`, `chat_message`).
pub fn spawn(
    settings: ClientSettings,
) -> Result<(ClientHandle, mpsc::UnboundedReceiver<WireMessage>), ClientError> {
    let url = endpoint_url(&settings)?;
    if settings.user_id.is_empty() || settings.username.is_empty() {
        // the server closes such sockets without a reason
        tracing::warn!("Client identity incomplete, server will reject the connection");
    }

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (messages_tx, messages_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (socket_tx, socket_rx) = mpsc::unbounded_channel();

    let runtime = ClientRuntime {
        manager: ConnectionManager::new(settings),
        url,
        timers: TimerDriver::new(timer_tx),
        socket_tx,
        writer: None,
        messages: messages_tx,
        snapshot: snapshot_tx,
    };

    let task = tokio::spawn(runtime.run(control_rx, timer_rx, socket_rx));

    Ok((
        ClientHandle {
            control: control_tx,
            snapshot: snapshot_rx,
            task,
        },
        messages_rx,
    ))
}

struct ClientRuntime {
    manager: ConnectionManager,
    url: Url,
    timers: TimerDriver,
    socket_tx: mpsc::UnboundedSender<SocketEvent>,
    /// Writer of the socket accepted for the current epoch
    writer: Option<mpsc::UnboundedSender<Message>>,
    messages: mpsc::UnboundedSender<WireMessage>,
    snapshot: watch::Sender<ConnectionSnapshot>,
}

impl ClientRuntime {
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut timer_rx: mpsc::UnboundedReceiver<TimerToken>,
        mut socket_rx: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        let commands = self.manager.connect(now_millis());
        self.apply(commands);
        self.publish();

        loop {
            let commands = tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Reconnect) => self.manager.connect(now_millis()),
                    Some(Control::Disconnect) => self.manager.disconnect(),
                    Some(Control::SendChat(message)) => self.manager.send_chat(message, now_millis()),
                    Some(Control::Shutdown) | None => {
                        let commands = self.manager.disconnect();
                        self.apply(commands);
                        self.publish();
                        break;
                    }
                },
                Some(token) = timer_rx.recv() => self.manager.on_timer(token, now_millis()),
                Some(event) = socket_rx.recv() => self.on_socket_event(event),
            };

            self.apply(commands);
            self.publish();
        }

        self.timers.cancel_all();
        tracing::debug!("Heartbeat client stopped");
    }

    fn on_socket_event(&mut self, event: SocketEvent) -> Vec<Command> {
        match event {
            SocketEvent::Opened { epoch, writer } => {
                if self.manager.on_socket_opened(epoch) {
                    self.writer = Some(writer);
                } else {
                    let _ = writer.send(Message::Close(None));
                }
                Vec::new()
            }
            SocketEvent::Text { epoch, text } => match decode(&text) {
                Ok(Decoded::Known(message)) => {
                    self.manager.on_message(epoch, message, now_millis())
                }
                Ok(Decoded::Unknown(kind)) => {
                    tracing::debug!(kind = %kind, "Ignoring unknown message type");
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed frame");
                    Vec::new()
                }
            },
            SocketEvent::Closed { epoch, reason } => {
                if epoch == self.manager.epoch() {
                    self.writer = None;
                }
                self.manager.on_socket_closed(epoch, &reason, now_millis())
            }
        }
    }

    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Open { epoch } => self.open(epoch),
                Command::Send(message) => self.send(&message),
                Command::CloseSocket => {
                    if let Some(writer) = self.writer.take() {
                        let _ = writer.send(Message::Close(None));
                    }
                }
                Command::Schedule { token, after } => self.timers.schedule(token, after),
                Command::Cancel(kind) => self.timers.cancel(kind),
                Command::CancelAll => self.timers.cancel_all(),
                Command::Deliver(message) => {
                    let _ = self.messages.send(message);
                }
            }
        }
    }

    fn send(&self, message: &WireMessage) {
        let Some(writer) = &self.writer else {
            tracing::debug!(kind = message.kind(), "No open socket, frame dropped");
            return;
        };

        match message.to_text() {
            Ok(text) => {
                let _ = writer.send(Message::Text(text.into()));
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode frame"),
        }
    }

    fn open(&self, epoch: u64) {
        tokio::spawn(run_socket(epoch, self.url.clone(), self.socket_tx.clone()));
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.manager.snapshot(now_millis()));
    }
}

/// Own one socket for its whole life, reporting everything back as events
async fn run_socket(epoch: u64, url: Url, events: mpsc::UnboundedSender<SocketEvent>) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events.send(SocketEvent::Closed {
                epoch,
                reason: e.to_string(),
            });
            return;
        }
    };

    let (mut sink, mut stream) = stream.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
    if events
        .send(SocketEvent::Opened {
            epoch,
            writer: writer_tx,
        })
        .is_err()
    {
        return;
    }

    let writer = async {
        while let Some(message) = writer_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
        "closed locally".to_string()
    };

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let _ = events.send(SocketEvent::Text {
                        epoch,
                        text: text.as_str().to_string(),
                    });
                }
                Ok(Message::Close(frame)) => {
                    return frame
                        .map(|f| format!("closed by server ({})", u16::from(f.code)))
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Ok(_) => {}
                Err(e) => return e.to_string(),
            }
        }
        "stream ended".to_string()
    };

    let reason = tokio::select! {
        reason = writer => reason,
        reason = reader => reason,
    };

    tracing::debug!(epoch, reason = %reason, "Socket closed");
    let _ = events.send(SocketEvent::Closed { epoch, reason });
}
