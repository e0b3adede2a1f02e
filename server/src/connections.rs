//! Transport-level connection table for the relay server
//!
//! This module tracks which peer address owns which connection id:
//! - Id allocation on connect, bounded by the configured capacity
//! - Address lookup for attributing incoming datagrams
//! - Last-activity tracking for silent-peer detection
//!
//! Participant state lives in the registry; this table only knows about
//! sockets. The event loop keeps both in step when a connection opens or closes.

use log::info;
use presence_shared::ClientId;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A peer that completed the handshake
#[derive(Debug)]
pub struct Connection {
    /// Id assigned by the server, also the participant id
    pub id: ClientId,
    /// Where replies and broadcasts are sent
    pub addr: SocketAddr,
    /// Last time any datagram arrived from this peer
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from the peer.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True if the peer has been silent for longer than `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Why a handshake could not be admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    ServerFull,
    /// Every id has been handed out once
    IdsExhausted,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::ServerFull => write!(f, "Server full"),
            Refusal::IdsExhausted => write!(f, "Server out of client ids"),
        }
    }
}

/// All open connections, indexed by id and by address
///
/// Ids start at 1 and are never handed out twice, so a late datagram for a
/// closed connection can never be mistaken for a newer one.
pub struct ConnectionManager {
    connections: HashMap<ClientId, Connection>,
    by_addr: HashMap<SocketAddr, ClientId>,
    /// None once `ClientId::MAX` has been issued
    next_client_id: Option<ClientId>,
    max_clients: usize,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            connections: HashMap::new(),
            by_addr: HashMap::new(),
            next_client_id: Some(1),
            max_clients,
        }
    }

    /// Opens a connection for `addr`.
    pub fn add_connection(&mut self, addr: SocketAddr) -> Result<ClientId, Refusal> {
        if self.connections.len() >= self.max_clients {
            return Err(Refusal::ServerFull);
        }

        let client_id = self.next_client_id.ok_or(Refusal::IdsExhausted)?;
        self.next_client_id = client_id.checked_add(1);

        info!("Connection {} opened from {}", client_id, addr);
        self.connections
            .insert(client_id, Connection::new(client_id, addr));
        self.by_addr.insert(addr, client_id);

        Ok(client_id)
    }

    /// Closes a connection. Returns false if it was already gone.
    pub fn remove_connection(&mut self, client_id: ClientId) -> bool {
        match self.connections.remove(&client_id) {
            Some(connection) => {
                if self.by_addr.get(&connection.addr) == Some(&client_id) {
                    self.by_addr.remove(&connection.addr);
                }
                info!("Connection {} closed", client_id);
                true
            }
            None => false,
        }
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn addr_of(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.connections.get(&client_id).map(|c| c.addr)
    }

    /// Marks the connection as active. Returns false for unknown ids.
    pub fn touch(&mut self, client_id: ClientId) -> bool {
        match self.connections.get_mut(&client_id) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    /// Ids of connections silent for longer than `timeout`.
    ///
    /// The connections are left in place; closing them is the event loop's job.
    pub fn timed_out(&self, timeout: Duration) -> Vec<ClientId> {
        self.connections
            .values()
            .filter(|connection| connection.is_timed_out(timeout))
            .map(|connection| connection.id)
            .collect()
    }

    /// Every open connection's id and address, for fan-out.
    pub fn addrs(&self) -> Vec<(ClientId, SocketAddr)> {
        self.connections
            .iter()
            .map(|(id, connection)| (*id, connection.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_next_client_id(&mut self, client_id: ClientId) {
        self.next_client_id = Some(client_id);
    }
}
