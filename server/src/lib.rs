//! # Presence Relay Server Library
//!
//! This library provides the authoritative server for the live presence map.
//! It keeps the canonical record of who is connected, where they are, what
//! they are called and which avatar they picked, and relays changes and
//! direct chat messages to the connections that need them.
//!
//! ## Core Responsibilities
//!
//! ### Presence Registry
//! One participant entry per live connection, created empty on connect,
//! filled in by that connection's own updates and deleted on disconnect.
//! A connection can only ever change its own entry.
//!
//! ### Fan-out
//! Every committed change is announced to all live connections: join/leave
//! counts, full location records, name and avatar changes, departures.
//! A newcomer additionally receives a snapshot of everyone already present.
//!
//! ### Direct Messages
//! Chat messages go to exactly one addressed connection. Messages for
//! unknown or departed ids are dropped without telling the sender.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All registry reads and writes happen on one event loop, so updates,
//! removals and snapshots never interleave. Network I/O runs on separate
//! tasks connected to the loop by channels.
//!
//! ### UDP-Based Communication
//! Each datagram carries one bincode-encoded [`presence_shared::Packet`].
//! A connection is a peer address that completed the `Connect` handshake.
//! Peers keep their connection alive with heartbeats; silent peers are
//! closed through the same path as an explicit disconnect.
//!
//! ## Module Organization
//!
//! - `registry`: participant records and retired ids
//! - `broadcast`: builds fan-out notifications from registry state
//! - `router`: addresses direct messages
//! - `lifecycle`: per-connection state machine and event dispatch table
//! - `connections`: address/id table, capacity and liveness tracking
//! - `network`: socket tasks, outbound queue and the event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use presence_server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:3000".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod connections;
pub mod lifecycle;
pub mod network;
pub mod registry;
pub mod router;
