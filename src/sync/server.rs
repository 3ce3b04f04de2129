// Shared-touch-state synchronization server
//
// One actor task owns the authoritative touch position and the client
// roster; every mutation and read goes through its event queue, so
// concurrent writers are serialized without locks. Each connection gets a
// reader task (socket -> parsed messages -> actor) and a writer task
// (per-client outbox -> socket). set_touch updates the state and then
// broadcasts the new state to every connected client, the sender included;
// latest-wins, no intermediate states are guaranteed.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::{GeometryConfig, MeasurementConfig, SimulationConfig};
use crate::error::SourceError;
use crate::physics;
use crate::source::{resolve_pairs, ResolvedPair};
use crate::sync::protocol::{encode_line, ClientMessage, ServerMessage};

/// Initial shared touch position: pad center [mm]
const DEFAULT_TOUCH_MM: (f64, f64) = (50.0, 50.0);

/// Events flowing into the state actor
enum ActorEvent {
    Register {
        conn_id: u64,
        outbox: mpsc::UnboundedSender<String>,
    },
    Deregister {
        conn_id: u64,
    },
    Incoming {
        conn_id: u64,
        message: ClientMessage,
    },
}

/// Authoritative simulator server
pub struct HilsServer {
    pairs: Vec<ResolvedPair>,
    simulation: SimulationConfig,
}

impl HilsServer {
    pub fn new(
        geometry: &GeometryConfig,
        measurement: &MeasurementConfig,
        simulation: SimulationConfig,
    ) -> Result<Self, SourceError> {
        let pairs = resolve_pairs(geometry, &measurement.pairs)?;
        Ok(Self { pairs, simulation })
    }

    /// Accept connections until the listener fails or the task is dropped
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        log::info!("[SyncServer] Listening on {}", local);

        let (actor_tx, actor_rx) = mpsc::unbounded_channel();
        tokio::spawn(state_actor(actor_rx, self.pairs, self.simulation));

        let mut next_conn_id = 0u64;
        loop {
            let (stream, peer) = listener.accept().await?;
            next_conn_id += 1;
            let conn_id = next_conn_id;
            log::info!("[SyncServer] Client connected: {} (conn {})", peer, conn_id);
            tokio::spawn(handle_connection(conn_id, stream, actor_tx.clone()));
        }
    }
}

/// Per-connection reader: parse JSON lines and forward them to the actor
async fn handle_connection(
    conn_id: u64,
    stream: TcpStream,
    actor_tx: mpsc::UnboundedSender<ActorEvent>,
) {
    let (read_half, write_half) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    if actor_tx
        .send(ActorEvent::Register {
            conn_id,
            outbox: outbox_tx,
        })
        .is_err()
    {
        return;
    }
    tokio::spawn(drain_outbox(conn_id, outbox_rx, write_half));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ClientMessage>(&line) {
                    Ok(message) => {
                        if actor_tx
                            .send(ActorEvent::Incoming { conn_id, message })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        // Malformed or unknown message: drop the line, keep
                        // the connection
                        log::warn!("[SyncServer] Unparseable message from conn {}: {}", conn_id, err);
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("[SyncServer] Read error on conn {}: {}", conn_id, err);
                break;
            }
        }
    }

    let _ = actor_tx.send(ActorEvent::Deregister { conn_id });
    log::info!("[SyncServer] Client disconnected (conn {})", conn_id);
}

/// Per-connection writer: forward outbox lines onto the socket
///
/// Ends when the actor drops the outbox sender (deregistration) or the
/// socket dies.
async fn drain_outbox(
    conn_id: u64,
    mut outbox_rx: mpsc::UnboundedReceiver<String>,
    mut write_half: OwnedWriteHalf,
) {
    while let Some(line) = outbox_rx.recv().await {
        if let Err(err) = write_half.write_all(line.as_bytes()).await {
            log::warn!("[SyncServer] Write error on conn {}: {}", conn_id, err);
            break;
        }
    }
}

/// The single owner of the shared touch state
async fn state_actor(
    mut rx: mpsc::UnboundedReceiver<ActorEvent>,
    pairs: Vec<ResolvedPair>,
    simulation: SimulationConfig,
) {
    let mut touch = DEFAULT_TOUCH_MM;
    let mut clients: HashMap<u64, mpsc::UnboundedSender<String>> = HashMap::new();
    let mut rng = match simulation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    while let Some(event) = rx.recv().await {
        match event {
            ActorEvent::Register { conn_id, outbox } => {
                clients.insert(conn_id, outbox);
                // New clients start from the current state
                let update = state_update(touch, clients.len());
                send_to(&clients, conn_id, &update);
            }
            ActorEvent::Deregister { conn_id } => {
                clients.remove(&conn_id);
                log::info!("[SyncServer] {} client(s) connected", clients.len());
            }
            ActorEvent::Incoming { conn_id, message } => match message {
                ClientMessage::Connect { client_id } => {
                    log::info!("[SyncServer] Conn {} identified as '{}'", conn_id, client_id);
                    let reply = ServerMessage::Connected {
                        server_info: format!(
                            "geltouch sync server v{}",
                            env!("CARGO_PKG_VERSION")
                        ),
                    };
                    send_to(&clients, conn_id, &reply);
                }
                ClientMessage::SetTouch { x, y } => {
                    touch = (x, y);
                    log::debug!("[SyncServer] Touch position set to ({:.2}, {:.2}) mm", x, y);
                    let update = state_update(touch, clients.len());
                    for id in clients.keys().copied().collect::<Vec<_>>() {
                        send_to(&clients, id, &update);
                    }
                }
                ClientMessage::GetState { request_id } => {
                    // State replies are not correlated: the requester just
                    // gets the latest state envelope
                    log::debug!("[SyncServer] get_state {} from conn {}", request_id, conn_id);
                    let update = state_update(touch, clients.len());
                    send_to(&clients, conn_id, &update);
                }
                ClientMessage::MeasureImpedance { request_id } => {
                    let impedance_vector = pairs
                        .iter()
                        .map(|pair| {
                            let sample = physics::pair_sample(
                                touch,
                                pair.source_pos,
                                pair.sink_pos,
                                &simulation,
                                &mut rng,
                            );
                            [sample.magnitude_ohm, sample.phase_rad]
                        })
                        .collect();
                    let reply = ServerMessage::ImpedanceResponse {
                        request_id,
                        impedance_vector,
                        ground_truth: [touch.0, touch.1],
                    };
                    send_to(&clients, conn_id, &reply);
                }
            },
        }
    }
}

fn state_update(touch: (f64, f64), client_count: usize) -> ServerMessage {
    ServerMessage::StateUpdate {
        touch_position: [touch.0, touch.1],
        client_count,
    }
}

fn send_to(clients: &HashMap<u64, mpsc::UnboundedSender<String>>, conn_id: u64, message: &ServerMessage) {
    let Some(outbox) = clients.get(&conn_id) else {
        return;
    };
    match encode_line(message) {
        Ok(line) => {
            // A closed outbox means the writer died; deregistration follows
            // from the reader side
            let _ = outbox.send(line);
        }
        Err(err) => log::error!("[SyncServer] Failed to encode message: {}", err),
    }
}
