//! Server network layer handling UDP communications and the relay event loop

use crate::broadcast::{Deliver, Notification};
use crate::connections::ConnectionManager;
use crate::lifecycle::{ConnectionState, Event, Lifecycle};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use presence_shared::{
    ClientId, Packet, DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_PORT, MAX_PACKET_SIZE,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Runtime settings for [`Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    /// Silence after which a connection is considered lost
    pub client_timeout: Duration,
    pub timeout_check_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            max_clients: 256,
            client_timeout: Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS),
            timeout_check_interval: Duration::from_secs(1),
        }
    }
}

/// Messages sent from network tasks to the event loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ClientId },
    Shutdown,
}

/// Messages sent from the event loop to the network sender
#[derive(Debug, PartialEq)]
pub enum OutboundMessage {
    /// Reply to a peer that may not own a connection yet
    SendPacket { packet: Packet, addr: SocketAddr },
    /// Presence or chat traffic, resolved against open connections at send time
    Notify(Notification),
}

/// Cloneable handle for stopping a running server
#[derive(Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Serializes a packet for a single datagram. Packets too large to fit are
/// logged and dropped.
fn encode_datagram(packet: &Packet) -> Option<Vec<u8>> {
    let data = match serialize(packet) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize {}: {}", packet.event_name(), e);
            return None;
        }
    };

    if data.len() > MAX_PACKET_SIZE {
        warn!(
            "Dropping {} of {} bytes, larger than a datagram",
            packet.event_name(),
            data.len()
        );
        return None;
    }

    Some(data)
}

/// Relay server coordinating the transport and the presence lifecycle
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionManager>>,
    lifecycle: Lifecycle,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionManager::new(config.max_clients))),
            lifecycle: Lifecycle::new(),
            config,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.lifecycle.active_count()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to event loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that drains the outbound queue in order
    fn spawn_network_sender(&mut self) -> Option<JoinHandle<()>> {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut outbound_rx = self.outbound_rx.take()?;

        Some(tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::Notify(notification) => {
                        Self::deliver(&socket, &connections, notification).await;
                    }
                }
            }
        }))
    }

    /// Spawns task that reports silent connections to the event loop
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;
        let check_interval = self.config.timeout_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);

            loop {
                interval.tick().await;

                let timed_out = {
                    let connections = connections.read().await;
                    connections.timed_out(timeout)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        })
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Resolves a notification's audience and sends it. Recipients that have
    /// closed since the notification was queued are skipped.
    async fn deliver(
        socket: &UdpSocket,
        connections: &RwLock<ConnectionManager>,
        notification: Notification,
    ) {
        let targets = {
            let connections = connections.read().await;
            match notification.deliver {
                Deliver::To(client_id) => connections
                    .addr_of(client_id)
                    .map(|addr| vec![(client_id, addr)])
                    .unwrap_or_default(),
                Deliver::All => connections.addrs(),
            }
        };

        if targets.is_empty() {
            return;
        }

        let Some(data) = encode_datagram(&notification.packet) else {
            return;
        };

        for (client_id, addr) in targets {
            if let Err(e) = socket.send_to(&data, addr).await {
                error!("Failed to send to client {}: {}", client_id, e);
            }
        }
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn queue(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            if let Err(e) = self.outbound_tx.send(OutboundMessage::Notify(notification)) {
                error!("Failed to queue notification: {}", e);
                return;
            }
        }
    }

    /// Attributes an incoming packet to its connection and applies it
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let client_id = {
            let mut connections = self.connections.write().await;
            let client_id = connections.find_by_addr(addr);
            if let Some(client_id) = client_id {
                connections.touch(client_id);
            }
            client_id
        };

        match packet {
            Packet::Connect { client_version } => {
                self.handle_connect(client_version, addr, client_id).await;
            }

            Packet::Heartbeat => {
                if client_id.is_none() {
                    debug!("Heartbeat from unconnected peer {}", addr);
                }
            }

            Packet::Disconnect => match client_id {
                Some(client_id) => {
                    info!("Client {} disconnected", client_id);
                    self.close_connection(client_id).await;
                }
                None => debug!("Disconnect from unconnected peer {}", addr),
            },

            packet if packet.is_client_bound() => {
                warn!(
                    "Unexpected {} packet from client at {}",
                    packet.event_name(),
                    addr
                );
            }

            packet => {
                let Some(client_id) = client_id else {
                    warn!(
                        "Ignoring {} from unconnected peer {}",
                        packet.event_name(),
                        addr
                    );
                    return;
                };

                if let Some(event) = Event::from_packet(packet) {
                    let notifications = self.lifecycle.dispatch(client_id, event);
                    self.queue(notifications);
                }
            }
        }
    }

    async fn handle_connect(
        &mut self,
        client_version: u32,
        addr: SocketAddr,
        existing: Option<ClientId>,
    ) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            let reason = format!("Unsupported protocol version {}", client_version);
            self.send_packet(Packet::Rejected { reason }, addr);
            return;
        }

        // A fresh handshake from a known address replaces the old connection
        if let Some(existing_id) = existing {
            info!("Replacing existing client {} from {}", existing_id, addr);
            self.close_connection(existing_id).await;
        }

        let client_id = {
            let mut connections = self.connections.write().await;
            connections.add_connection(addr)
        };

        match client_id {
            Ok(client_id) => {
                self.send_packet(Packet::Connected { client_id }, addr);
                let notifications = self.lifecycle.accept(client_id);
                self.queue(notifications);
            }
            Err(refusal) => {
                warn!("Rejecting {}: {}", addr, refusal);
                self.send_packet(
                    Packet::Rejected {
                        reason: refusal.to_string(),
                    },
                    addr,
                );
            }
        }
    }

    /// Tears a connection down. Safe to call any number of times per id; only
    /// the first call removes anything or announces the departure.
    async fn close_connection(&mut self, client_id: ClientId) {
        {
            let mut connections = self.connections.write().await;
            connections.remove_connection(client_id);
        }

        let notifications = self.lifecycle.close(client_id);
        self.queue(notifications);
    }

    /// Main server loop; returns after [`ServerHandle::shutdown`]
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut tasks = vec![
            self.spawn_network_receiver(),
            self.spawn_timeout_checker(),
        ];
        tasks.extend(self.spawn_network_sender());

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::ClientTimeout { client_id }) => {
                    if self.lifecycle.state(client_id) == ConnectionState::Live {
                        info!("Client {} timed out", client_id);
                    }
                    self.close_connection(client_id).await;
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        for task in tasks {
            task.abort();
        }

        Ok(())
    }
}
