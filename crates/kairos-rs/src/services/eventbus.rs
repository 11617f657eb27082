//! Long-lived duplex event-bus client, per spec.md §4.4.
//!
//! All mutable bookkeeping (`active`, `pending`, the socket, the reconnect
//! counter) lives inside a single actor task, matching the "single
//! serializing context" requirement in spec.md §4.4/§5 without a mutex:
//! [`EventBusClient`] is a cheap-to-clone handle that talks to the actor over
//! an unbounded command channel, and reads connectivity state from a shared
//! `AtomicBool` so `connected()` never round-trips through the actor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// Window within which a pending subscription survives a reconnect, per
/// spec.md §4.4.
const PENDING_EXPIRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EventBusSettings {
    pub url: String,
    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl EventBusSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is not connected")]
    NotConnected,
    #[error("event bus actor has shut down")]
    ActorGone,
}

enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Ack(String),
    /// Drops local bookkeeping for a topic without sending a wire frame, used
    /// when a result has already been delivered so a reconnect racing the
    /// overflowed-result fetch doesn't spuriously resubscribe it, per spec.md
    /// §4.5 step 3.
    MarkDelivered(String),
}

/// Cheap-to-clone handle to the background event-bus actor.
#[derive(Clone)]
pub struct EventBusClient {
    command_tx: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl EventBusClient {
    /// Spawns the actor task and returns a handle plus a stream of decoded
    /// JSON object frames for the correlator to consume.
    pub fn connect(settings: EventBusSettings) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_actor(settings, command_rx, message_tx, connected.clone()));

        (
            EventBusClient {
                command_tx,
                connected,
            },
            message_rx,
        )
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Subscribes the bare correlation id as a topic. Fails immediately if
    /// the socket is not currently open, per spec.md §4.4 send contract.
    pub fn subscribe(&self, topic: &str) -> Result<(), EventBusError> {
        self.send_command(Command::Subscribe(topic.to_string()))
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), EventBusError> {
        self.send_command(Command::Unsubscribe(topic.to_string()))
    }

    /// Best-effort acknowledgement. Callers treat failure as non-fatal.
    pub fn ack(&self, topic: &str) -> Result<(), EventBusError> {
        self.send_command(Command::Ack(topic.to_string()))
    }

    /// Marks a topic as delivered in the local `active`/`pending` bookkeeping
    /// without sending a wire frame. Best-effort — failures are harmless,
    /// since the trailing `unsubscribe` call cleans up the same state.
    pub fn mark_delivered(&self, topic: &str) -> Result<(), EventBusError> {
        self.send_command(Command::MarkDelivered(topic.to_string()))
    }

    fn send_command(&self, command: Command) -> Result<(), EventBusError> {
        if !self.connected() {
            return Err(EventBusError::NotConnected);
        }
        self.command_tx
            .send(command)
            .map_err(|_| EventBusError::ActorGone)
    }
}

async fn run_actor(
    settings: EventBusSettings,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    message_tx: mpsc::UnboundedSender<Value>,
    connected: Arc<AtomicBool>,
) {
    let mut active: HashMap<String, ()> = HashMap::new();
    let mut pending: HashMap<String, Instant> = HashMap::new();
    let mut reconnect_attempts: u32 = 0;

    loop {
        debug!("event bus connecting to {}", settings.url);
        let stream = match tokio_tungstenite::connect_async(&settings.url).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                error!("event bus connection attempt failed: {err}");
                reconnect_attempts += 1;
                if reconnect_attempts >= settings.max_reconnect_attempts {
                    error!(
                        "event bus exceeded {} reconnect attempts, giving up",
                        settings.max_reconnect_attempts
                    );
                    connected.store(false, Ordering::Relaxed);
                    return;
                }
                sleep(settings.reconnect_interval).await;
                continue;
            }
        };

        info!("event bus connected");
        reconnect_attempts = 0;
        connected.store(true, Ordering::Relaxed);

        let (mut write, mut read) = stream.split();

        resubscribe_pending(&mut write, &mut active, &mut pending).await;

        let mut keepalive = interval(settings.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick fires immediately; consume it

        let closed_deliberately = 'connection: loop {
            tokio::select! {
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            if let Err(err) = handle_command(&mut write, command, &mut active, &mut pending).await {
                                warn!("event bus write failed, reconnecting: {err}");
                                break 'connection false;
                            }
                        }
                        None => {
                            debug!("event bus command channel closed, shutting down");
                            break 'connection true;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if write.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        warn!("event bus keepalive ping failed, reconnecting");
                        break 'connection false;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => handle_frame(&text, &message_tx),
                        Some(Ok(WsMessage::Pong(_))) => debug!("event bus pong received"),
                        Some(Ok(WsMessage::Close(reason))) => {
                            info!("event bus closed by peer: {reason:?}");
                            break 'connection false;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("event bus read error, reconnecting: {err}");
                            break 'connection false;
                        }
                        None => {
                            warn!("event bus stream ended, reconnecting");
                            break 'connection false;
                        }
                    }
                }
            }
        };

        connected.store(false, Ordering::Relaxed);

        if closed_deliberately {
            return;
        }

        reconnect_attempts += 1;
        if reconnect_attempts >= settings.max_reconnect_attempts {
            error!(
                "event bus exceeded {} reconnect attempts, giving up",
                settings.max_reconnect_attempts
            );
            return;
        }

        sleep(settings.reconnect_interval).await;
    }
}

type WsWriter = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

async fn handle_command(
    write: &mut WsWriter,
    command: Command,
    active: &mut HashMap<String, ()>,
    pending: &mut HashMap<String, Instant>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match command {
        Command::Subscribe(topic) => {
            write.send(WsMessage::Text(format!("subscribe: {topic}"))).await?;
            active.insert(topic.clone(), ());
            pending.insert(topic, Instant::now());
        }
        Command::Unsubscribe(topic) => {
            write.send(WsMessage::Text(format!("unsubscribe: {topic}"))).await?;
            active.remove(&topic);
            pending.remove(&topic);
        }
        Command::Ack(topic) => {
            write.send(WsMessage::Text(format!("ack: {topic}"))).await?;
        }
        Command::MarkDelivered(topic) => {
            active.remove(&topic);
            pending.remove(&topic);
        }
    }
    Ok(())
}

/// Reissues every pending-and-unexpired subscription on reconnect, per
/// spec.md §4.4. Entries are re-stamped so a later reconnect measures
/// staleness from the most recent (re)subscribe.
async fn resubscribe_pending(
    write: &mut WsWriter,
    active: &mut HashMap<String, ()>,
    pending: &mut HashMap<String, Instant>,
) {
    let now = Instant::now();
    let topics: Vec<String> = pending.keys().cloned().collect();

    for topic in topics {
        let Some(&subscribed_at) = pending.get(&topic) else {
            continue;
        };

        if now.duration_since(subscribed_at) >= PENDING_EXPIRY {
            debug!("expiring stale pending subscription for {topic}");
            pending.remove(&topic);
            active.remove(&topic);
            continue;
        }

        if write
            .send(WsMessage::Text(format!("subscribe: {topic}")))
            .await
            .is_err()
        {
            warn!("failed to resubscribe {topic} on reconnect");
            continue;
        }
        active.insert(topic.clone(), ());
        pending.insert(topic, now);
    }
}

/// Decodes one inbound text frame per the framing rules in spec.md §4.4.
fn handle_frame(text: &str, message_tx: &mpsc::UnboundedSender<Value>) {
    let trimmed = text.trim();

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() => {
            let _ = message_tx.send(value);
        }
        Ok(_) => {
            // Valid JSON but not an object frame (e.g. a bare number/string) —
            // nothing downstream expects this shape, treat like other chatter.
        }
        Err(_) => {
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                error!("failed to decode JSON-looking event bus frame: {trimmed}");
            }
            // otherwise: non-JSON chatter, silently ignored.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_frame_emits_valid_json_objects() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_frame(r#"{"guid":"abc","code":0}"#, &tx);
        let value = rx.try_recv().unwrap();
        assert_eq!(value["guid"], "abc");
    }

    #[test]
    fn handle_frame_drops_malformed_json_looking_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_frame("{not valid", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handle_frame_ignores_non_json_chatter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_frame("pong", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unconnected_client_fails_sends_immediately() {
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let client = EventBusClient {
            command_tx,
            connected: Arc::new(AtomicBool::new(false)),
        };
        assert!(matches!(client.subscribe("g1"), Err(EventBusError::NotConnected)));
    }
}
