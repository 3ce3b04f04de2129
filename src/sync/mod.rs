// State synchronization over JSON lines on TCP
//
// One server process owns the authoritative simulated touch position; any
// number of clients read and mutate it. The server broadcasts every
// accepted change to all connected clients, so observers never have to
// poll. Clients implement the regular DataSource contract on top of the
// protocol, bridging the async socket into synchronous callers through
// bounded channels.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteSimulatorSource;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::HilsServer;
