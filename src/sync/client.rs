// Networked simulator client
//
// Implements DataSource against a remote sync server. A dedicated worker
// thread runs a current-thread tokio runtime that owns the socket
// exclusively; the synchronous caller talks to it through channels:
//
//   caller -> worker   unbounded command channel (messages to send)
//   worker -> caller   bounded reply queues with recv_timeout semantics
//
// Measurement replies are correlated by request_id; a mismatched reply is
// retried once before surfacing as a protocol error. State broadcasts feed
// a shared cache; ground_truth() answers from the cache or with a real
// get_state round trip depending on configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc as tokio_mpsc;

use crate::config::{GroundTruthMode, SyncConfig};
use crate::error::{log_source_error, SourceError};
use crate::measurement::ImpedanceSample;
use crate::source::DataSource;
use crate::sync::protocol::{encode_line, ClientMessage, ServerMessage};

/// Timeout for the single mismatched-id retry read [ms]
const RETRY_TIMEOUT_MS: u64 = 1_000;

/// Reply queue depth; latest-wins, overflow is dropped with a warning
const REPLY_QUEUE_DEPTH: usize = 32;

enum Command {
    Send(ClientMessage),
    Shutdown,
}

struct ImpedanceReply {
    request_id: String,
    samples: Vec<ImpedanceSample>,
    ground_truth: (f64, f64),
}

#[derive(Default)]
struct SharedCache {
    touch: Option<(f64, f64)>,
}

/// Channels owned by the caller side while a connection is up
struct Link {
    command_tx: tokio_mpsc::UnboundedSender<Command>,
    impedance_rx: Receiver<ImpedanceReply>,
    state_rx: Receiver<(f64, f64)>,
    worker: JoinHandle<()>,
}

/// DataSource backed by a remote synchronized simulator
pub struct RemoteSimulatorSource {
    config: SyncConfig,
    client_id: String,
    connected: Arc<AtomicBool>,
    cache: Arc<Mutex<SharedCache>>,
    link: Option<Link>,
    request_counter: u64,
}

impl RemoteSimulatorSource {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            client_id: format!("client-{:08x}", rand::random::<u32>()),
            connected: Arc::new(AtomicBool::new(false)),
            cache: Arc::new(Mutex::new(SharedCache::default())),
            link: None,
            request_counter: 0,
        }
    }

    fn next_request_id(&mut self) -> String {
        self.request_counter += 1;
        format!("{}-{}", self.client_id, self.request_counter)
    }

    fn send_command(&self, message: ClientMessage) -> Result<(), SourceError> {
        let link = self.link.as_ref().ok_or(SourceError::NotConnected)?;
        link.command_tx
            .send(Command::Send(message))
            .map_err(|_| SourceError::LinkClosed {
                reason: "worker thread gone".to_string(),
            })
    }

    fn cached_touch(&self) -> Option<(f64, f64)> {
        self.cache.lock().ok().and_then(|cache| cache.touch)
    }
}

impl DataSource for RemoteSimulatorSource {
    fn connect(&mut self) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return true;
        }

        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (impedance_tx, impedance_rx) = mpsc::sync_channel(REPLY_QUEUE_DEPTH);
        let (state_tx, state_rx) = mpsc::sync_channel(REPLY_QUEUE_DEPTH);
        let (handshake_tx, handshake_rx) = mpsc::sync_channel(1);

        let worker = spawn_worker(WorkerContext {
            addr: self.config.addr(),
            client_id: self.client_id.clone(),
            connect_timeout: Duration::from_millis(self.config.connect_timeout_ms),
            command_rx,
            impedance_tx,
            state_tx,
            handshake_tx,
            connected: self.connected.clone(),
            cache: self.cache.clone(),
        });

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match handshake_rx.recv_timeout(timeout) {
            Ok(true) => {
                log::info!("[SyncClient] Connected to {}", self.config.addr());
                self.link = Some(Link {
                    command_tx,
                    impedance_rx,
                    state_rx,
                    worker,
                });
                true
            }
            Ok(false) | Err(_) => {
                log::error!(
                    "[SyncClient] Connection to {} failed or timed out",
                    self.config.addr()
                );
                // Dropping the command sender ends the worker loop; join so
                // no thread outlives the failed connect
                drop(command_tx);
                let _ = worker.join();
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.command_tx.send(Command::Shutdown);
            let _ = link.worker.join();
            log::info!("[SyncClient] Disconnected from {}", self.config.addr());
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_ground_truth(&mut self, x_mm: f64, y_mm: f64) {
        match self.send_command(ClientMessage::SetTouch { x: x_mm, y: y_mm }) {
            Ok(()) => log::debug!(
                "[SyncClient] Sent touch position ({:.2}, {:.2}) mm",
                x_mm,
                y_mm
            ),
            Err(err) => log_source_error(&err, "set_ground_truth"),
        }
    }

    fn ground_truth(&mut self) -> Option<(f64, f64)> {
        if !self.is_connected() {
            return None;
        }
        match self.config.ground_truth_mode {
            GroundTruthMode::Cached => self.cached_touch(),
            GroundTruthMode::RoundTrip => {
                let request_id = self.next_request_id();
                let link = self.link.as_ref()?;
                // Drain stale broadcasts so the wait below sees a state that
                // is at least as new as the request
                while link.state_rx.try_recv().is_ok() {}
                if self
                    .send_command(ClientMessage::GetState { request_id })
                    .is_err()
                {
                    return self.cached_touch();
                }
                let timeout = Duration::from_millis(self.config.state_timeout_ms);
                match self.link.as_ref()?.state_rx.recv_timeout(timeout) {
                    Ok(position) => Some(position),
                    Err(_) => {
                        log::warn!(
                            "[SyncClient] get_state timed out after {} ms; using cached position",
                            self.config.state_timeout_ms
                        );
                        self.cached_touch()
                    }
                }
            }
        }
    }

    fn measure_impedance_vector(&mut self) -> Result<Vec<ImpedanceSample>, SourceError> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }
        let request_id = self.next_request_id();

        {
            let link = self.link.as_ref().ok_or(SourceError::NotConnected)?;
            // Stale replies from an earlier timed-out request must not be
            // mistaken for ours
            while link.impedance_rx.try_recv().is_ok() {}
        }
        self.send_command(ClientMessage::MeasureImpedance {
            request_id: request_id.clone(),
        })?;

        let link = self.link.as_ref().ok_or(SourceError::NotConnected)?;
        let timeout = Duration::from_millis(self.config.measure_timeout_ms);
        let reply = match link.impedance_rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                return Err(SourceError::RequestTimeout {
                    operation: "measure_impedance".to_string(),
                    timeout_ms: self.config.measure_timeout_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SourceError::LinkClosed {
                    reason: "reply queue closed".to_string(),
                })
            }
        };

        let reply = if reply.request_id == request_id {
            reply
        } else {
            // A stale reply can arrive first; allow exactly one retry read
            log::warn!(
                "[SyncClient] Reply id mismatch (expected {}, received {}), retrying once",
                request_id,
                reply.request_id
            );
            let retry = link
                .impedance_rx
                .recv_timeout(Duration::from_millis(RETRY_TIMEOUT_MS))
                .map_err(|_| SourceError::ProtocolMismatch {
                    expected: request_id.clone(),
                    received: reply.request_id.clone(),
                })?;
            if retry.request_id != request_id {
                return Err(SourceError::ProtocolMismatch {
                    expected: request_id,
                    received: retry.request_id,
                });
            }
            retry
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.touch = Some(reply.ground_truth);
        }
        Ok(reply.samples)
    }

    fn device_info(&self) -> String {
        format!("HILS Client (server: {})", self.config.addr())
    }
}

impl Drop for RemoteSimulatorSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct WorkerContext {
    addr: String,
    client_id: String,
    connect_timeout: Duration,
    command_rx: tokio_mpsc::UnboundedReceiver<Command>,
    impedance_tx: SyncSender<ImpedanceReply>,
    state_tx: SyncSender<(f64, f64)>,
    handshake_tx: SyncSender<bool>,
    connected: Arc<AtomicBool>,
    cache: Arc<Mutex<SharedCache>>,
}

/// Spawn the socket-owning worker thread
fn spawn_worker(ctx: WorkerContext) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("sync-client".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("[SyncClient] Failed to build runtime: {}", err);
                    let _ = ctx.handshake_tx.send(false);
                    return;
                }
            };
            runtime.block_on(worker_loop(ctx));
        })
        .expect("spawning sync-client thread")
}

async fn worker_loop(ctx: WorkerContext) {
    let WorkerContext {
        addr,
        client_id,
        connect_timeout,
        mut command_rx,
        impedance_tx,
        state_tx,
        handshake_tx,
        connected,
        cache,
    } = ctx;
    let mut handshake = Some(handshake_tx);

    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            log::error!("[SyncClient] Connect to {} failed: {}", addr, err);
            if let Some(tx) = handshake.take() {
                let _ = tx.send(false);
            }
            return;
        }
        Err(_) => {
            log::error!("[SyncClient] Connect to {} timed out", addr);
            if let Some(tx) = handshake.take() {
                let _ = tx.send(false);
            }
            return;
        }
    };

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let hello = ClientMessage::Connect { client_id };
    if let Ok(line) = encode_line(&hello) {
        if write_half.write_all(line.as_bytes()).await.is_err() {
            if let Some(tx) = handshake.take() {
                let _ = tx.send(false);
            }
            return;
        }
    }

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(Command::Send(message)) => {
                    let line = match encode_line(&message) {
                        Ok(line) => line,
                        Err(err) => {
                            log::error!("[SyncClient] Failed to encode message: {}", err);
                            continue;
                        }
                    };
                    if let Err(err) = write_half.write_all(line.as_bytes()).await {
                        log::error!("[SyncClient] Write failed: {}", err);
                        break;
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_server_line(
                    &line,
                    &mut handshake,
                    &impedance_tx,
                    &state_tx,
                    &connected,
                    &cache,
                ),
                Ok(None) => {
                    log::warn!("[SyncClient] Server closed the connection");
                    break;
                }
                Err(err) => {
                    log::warn!("[SyncClient] Read failed: {}", err);
                    break;
                }
            },
        }
    }

    connected.store(false, Ordering::SeqCst);
    if let Some(tx) = handshake.take() {
        let _ = tx.send(false);
    }
}

fn handle_server_line(
    line: &str,
    handshake: &mut Option<SyncSender<bool>>,
    impedance_tx: &SyncSender<ImpedanceReply>,
    state_tx: &SyncSender<(f64, f64)>,
    connected: &AtomicBool,
    cache: &Mutex<SharedCache>,
) {
    let message: ServerMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            log::warn!("[SyncClient] Unparseable server message: {}", err);
            return;
        }
    };

    match message {
        ServerMessage::Connected { server_info } => {
            log::info!("[SyncClient] Server info: {}", server_info);
            connected.store(true, Ordering::SeqCst);
            if let Some(tx) = handshake.take() {
                let _ = tx.send(true);
            }
        }
        ServerMessage::StateUpdate { touch_position, .. } => {
            let touch = (touch_position[0], touch_position[1]);
            if let Ok(mut cache) = cache.lock() {
                cache.touch = Some(touch);
            }
            // Queue full just means nobody is waiting on a round trip
            if let Err(TrySendError::Full(_)) = state_tx.try_send(touch) {
                log::debug!("[SyncClient] Dropped state notification (queue full)");
            }
        }
        ServerMessage::ImpedanceResponse {
            request_id,
            impedance_vector,
            ground_truth,
        } => {
            let reply = ImpedanceReply {
                request_id,
                samples: impedance_vector
                    .iter()
                    .map(|entry| ImpedanceSample::new(entry[0], entry[1]))
                    .collect(),
                ground_truth: (ground_truth[0], ground_truth[1]),
            };
            if let Err(TrySendError::Full(_)) = impedance_tx.try_send(reply) {
                log::warn!("[SyncClient] Dropped impedance reply (queue full)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeometryConfig, MeasurementConfig, SimulationConfig};
    use crate::sync::server::HilsServer;
    use tokio::net::TcpListener;

    fn start_server() -> std::net::SocketAddr {
        let (addr_tx, addr_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                let server = HilsServer::new(
                    &GeometryConfig::default(),
                    &MeasurementConfig::default(),
                    SimulationConfig {
                        seed: Some(7),
                        ..SimulationConfig::default()
                    },
                )
                .unwrap();
                let _ = server.serve(listener).await;
            });
        });
        addr_rx.recv().unwrap()
    }

    fn client_config(addr: std::net::SocketAddr) -> SyncConfig {
        SyncConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_connect_and_measure() {
        let addr = start_server();
        let mut client = RemoteSimulatorSource::new(client_config(addr));

        assert!(client.connect());
        assert!(client.is_connected());

        let samples = client.measure_impedance_vector().unwrap();
        assert_eq!(samples.len(), 6);
        for sample in &samples {
            assert!(sample.magnitude_ohm >= 100.0);
        }

        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_to_dead_server_fails_cleanly() {
        // A port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = client_config(addr);
        config.connect_timeout_ms = 500;
        let mut client = RemoteSimulatorSource::new(config);

        assert!(!client.connect());
        assert!(!client.is_connected());
        assert_eq!(
            client.measure_impedance_vector(),
            Err(SourceError::NotConnected)
        );
    }

    #[test]
    fn test_ground_truth_follows_measurement() {
        let addr = start_server();
        let mut client = RemoteSimulatorSource::new(client_config(addr));
        assert!(client.connect());

        client.set_ground_truth(20.0, 30.0);
        // The measure round trip carries the ground truth back
        client.measure_impedance_vector().unwrap();
        assert_eq!(client.ground_truth(), Some((20.0, 30.0)));

        client.disconnect();
    }

    #[test]
    fn test_round_trip_ground_truth_mode() {
        let addr = start_server();
        let mut config = client_config(addr);
        config.ground_truth_mode = GroundTruthMode::RoundTrip;
        let mut client = RemoteSimulatorSource::new(config);
        assert!(client.connect());

        client.set_ground_truth(66.0, 33.0);
        // No measurement needed: get_state round trip fetches the position
        let position = client.ground_truth().unwrap();
        assert_eq!(position, (66.0, 33.0));

        client.disconnect();
    }

    #[test]
    fn test_disconnect_twice_is_safe() {
        let addr = start_server();
        let mut client = RemoteSimulatorSource::new(client_config(addr));
        assert!(client.connect());
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
    }
}
