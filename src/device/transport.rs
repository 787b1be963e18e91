use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};

use crate::device::protocol::{DeviceCommand, DeviceEvent, DeviceResponse, Envelope};
use crate::entity::DeviceError;

/// Request/response channel to a hardware device.
///
/// Disconnects are delivered out of band through [`DeviceTransport::subscribe`].
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send(&self, command: DeviceCommand) -> Result<DeviceResponse, DeviceError>;

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<DeviceResponse>>>>;

/// Removes a request's waiter when its `send` future finishes or is dropped
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&self.id);
        }
    }
}

struct Connection {
    writer: OwnedWriteHalf,
    alive: Arc<AtomicBool>,
}

/// Device bridge speaking JSON lines over TCP.
///
/// Several commands may be in flight at once (an abort has to reach the
/// device while a confirmation is pending), so responses are matched to
/// requests by id.
pub struct TcpDeviceTransport {
    addr: String,
    connection: tokio::sync::Mutex<Option<Connection>>,
    pending: PendingMap,
    events: broadcast::Sender<DeviceEvent>,
    next_id: AtomicU64,
}

impl TcpDeviceTransport {
    pub fn new(addr: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            addr: addr.to_string(),
            connection: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_id: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<Connection, DeviceError> {
        info!("Connecting to device bridge at {}", self.addr);
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            error!("Failed to connect to device bridge: {}", e);
            DeviceError::Transport(e.to_string())
        })?;

        let (reader, writer) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::read_loop(
            reader,
            self.pending.clone(),
            self.events.clone(),
            alive.clone(),
        ));

        let _ = self.events.send(DeviceEvent::Connected);
        Ok(Connection { writer, alive })
    }

    async fn read_loop(
        reader: OwnedReadHalf,
        pending: PendingMap,
        events: broadcast::Sender<DeviceEvent>,
        alive: Arc<AtomicBool>,
    ) {
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let envelope: Envelope = match serde_json::from_str(&line) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!("Ignoring malformed device line: {}", e);
                            continue;
                        }
                    };

                    if let Some(event) = envelope.event {
                        debug!("Device event: {:?}", event);
                        let _ = events.send(event);
                    }

                    if let (Some(id), Some(response)) = (envelope.id, envelope.response) {
                        let waiter = pending.lock().ok().and_then(|mut map| map.remove(&id));
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!("Dropping response for unknown request {}", id),
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Device bridge read failed: {}", e);
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Dropping the waiters fails every in-flight request as disconnected
        if let Ok(mut map) = pending.lock() {
            map.clear();
        }
        info!("Device bridge connection closed");
        let _ = events.send(DeviceEvent::Disconnected);
    }
}

#[async_trait]
impl DeviceTransport for TcpDeviceTransport {
    async fn send(&self, command: DeviceCommand) -> Result<DeviceResponse, DeviceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&Envelope {
            id: Some(id),
            command: Some(command),
            response: None,
            event: None,
        })
        .map_err(|e| DeviceError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };
        {
            let mut connection = self.connection.lock().await;
            let reconnect = match connection.as_ref() {
                Some(conn) => !conn.alive.load(Ordering::SeqCst),
                None => true,
            };
            if reconnect {
                *connection = Some(self.connect().await?);
            }

            self.pending
                .lock()
                .map_err(|_| DeviceError::Transport("Pending request map poisoned".to_string()))?
                .insert(id, tx);

            let Some(conn) = connection.as_mut() else {
                return Err(DeviceError::Disconnected);
            };
            // The reader marks the connection dead before clearing waiters
            if !conn.alive.load(Ordering::SeqCst) {
                *connection = None;
                return Err(DeviceError::Disconnected);
            }
            let written = async {
                conn.writer.write_all(line.as_bytes()).await?;
                conn.writer.write_all(b"\n").await?;
                conn.writer.flush().await
            }
            .await;

            if let Err(e) = written {
                warn!("Failed to write to device bridge: {}", e);
                *connection = None;
                return Err(DeviceError::Disconnected);
            }
        }

        rx.await.map_err(|_| DeviceError::Disconnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Bridge answering every command with `ack`, then hanging up
    async fn spawn_bridge(answers: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            for _ in 0..answers {
                let Some(line) = lines.next_line().await.unwrap() else {
                    return;
                };
                let envelope: Envelope = serde_json::from_str(&line).unwrap();
                let reply = Envelope {
                    id: envelope.id,
                    command: None,
                    response: Some(DeviceResponse::Ack),
                    event: None,
                };
                let mut out = serde_json::to_string(&reply).unwrap();
                out.push('\n');
                writer.write_all(out.as_bytes()).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_request_response_over_tcp() {
        let addr = spawn_bridge(2).await;
        let transport = TcpDeviceTransport::new(&addr);

        assert_eq!(
            transport.send(DeviceCommand::GetDeviceInfo).await,
            Ok(DeviceResponse::Ack)
        );
        assert_eq!(
            transport.send(DeviceCommand::Abort).await,
            Ok(DeviceResponse::Ack)
        );
    }

    #[tokio::test]
    async fn test_hangup_fails_pending_request_and_emits_disconnect() {
        let addr = spawn_bridge(0).await;
        let transport = TcpDeviceTransport::new(&addr);
        let mut events = transport.subscribe();

        let result = transport.send(DeviceCommand::GetDeviceInfo).await;
        assert_eq!(result, Err(DeviceError::Disconnected));

        let mut saw_disconnect = false;
        while let Ok(event) = events.recv().await {
            if event == DeviceEvent::Disconnected {
                saw_disconnect = true;
                break;
            }
        }
        assert!(saw_disconnect);
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpDeviceTransport::new(&addr);
        assert!(matches!(
            transport.send(DeviceCommand::GetDeviceInfo).await,
            Err(DeviceError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_send_leaves_no_waiter() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // reads commands and never answers
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let transport = TcpDeviceTransport::new(&addr);
        let send = transport.send(DeviceCommand::AwaitConfirmation {
            swap_id: "swap-1".to_string(),
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(100), send).await;
        assert!(timed_out.is_err());

        assert!(transport.pending.lock().unwrap().is_empty());
    }
}
