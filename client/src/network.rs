use crate::display::{format_history, format_notice, format_roster};
use crate::input::{parse_command, Command, HELP};
use crate::roster::Roster;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use presence_shared::{
    Packet, Position, DEFAULT_HEARTBEAT_INTERVAL_MS, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub user_name: Option<String>,
    pub selected_avatar: Option<String>,
    pub heartbeat_interval: Duration,
    /// Artificial one-way delay added to every send and receive
    pub fake_ping_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", presence_shared::DEFAULT_PORT),
            user_name: None,
            selected_avatar: None,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            fake_ping_ms: 0,
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,

    roster: Roster,
    user_name: Option<String>,
    selected_avatar: Option<String>,
    last_position: Option<Position>,

    heartbeat_interval: Duration,
    fake_ping_ms: u64,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server.parse()?;

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            roster: Roster::new(),
            user_name: config.user_name,
            selected_avatar: config.selected_avatar,
            last_position: None,
            heartbeat_interval: config.heartbeat_interval,
            fake_ping_ms: config.fake_ping_ms,
        })
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_addr);

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Announces the locally configured identity after a (re)connect
    async fn announce_identity(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(user_name) = &self.user_name {
            self.send_packet(&Packet::UpdateName {
                user_name: Some(user_name.clone()),
            })
            .await?;
        }
        if let Some(selected_avatar) = &self.selected_avatar {
            self.send_packet(&Packet::UpdateAvatar {
                selected_avatar: Some(selected_avatar.clone()),
            })
            .await?;
        }
        if let Some(position) = self.last_position {
            self.send_location(position).await?;
        }
        Ok(())
    }

    /// Shares a position together with the current name and avatar
    async fn send_location(&self, position: Position) -> Result<(), Box<dyn std::error::Error>> {
        let packet = Packet::SendLocation {
            latitude: position.latitude,
            longitude: position.longitude,
            user_name: self.user_name.clone(),
            selected_avatar: self.selected_avatar.clone(),
        };
        self.send_packet(&packet).await
    }

    async fn handle_packet(&mut self, packet: Packet) {
        debug!("Received {}", packet.event_name());

        if !packet.is_client_bound() {
            warn!("Unexpected {} packet from server", packet.event_name());
            return;
        }

        let accepted = matches!(packet, Packet::Connected { .. });
        if matches!(packet, Packet::Rejected { .. }) {
            self.connected = false;
        }

        for notice in self.roster.apply(packet) {
            println!("{}", format_notice(&notice));
        }

        if accepted {
            self.connected = true;
            if let Err(e) = self.announce_identity().await {
                error!("Failed to announce identity: {}", e);
            }
        }
    }

    /// Executes a user command. Returns false when the client should exit.
    async fn handle_command(
        &mut self,
        command: Command,
    ) -> Result<bool, Box<dyn std::error::Error>> {
        match command {
            Command::Location {
                latitude,
                longitude,
            } => {
                let position = Position::new(latitude, longitude);
                self.last_position = Some(position);
                if self.connected {
                    self.send_location(position).await?;
                }
            }
            Command::Name(user_name) => {
                self.user_name = Some(user_name.clone());
                if self.connected {
                    self.send_packet(&Packet::UpdateName {
                        user_name: Some(user_name),
                    })
                    .await?;
                }
            }
            Command::Avatar(selected_avatar) => {
                self.selected_avatar = Some(selected_avatar.clone());
                if self.connected {
                    self.send_packet(&Packet::UpdateAvatar {
                        selected_avatar: Some(selected_avatar),
                    })
                    .await?;
                }
            }
            Command::Message { to, text } => {
                if !self.connected {
                    println!("Not connected");
                } else if !self.roster.contains(to) {
                    println!("No participant with id {}", to);
                } else {
                    self.send_packet(&Packet::SendMessage {
                        to,
                        message: text.clone(),
                    })
                    .await?;
                    self.roster.record_sent(to, text);
                }
            }
            Command::Who => println!("{}", format_roster(&self.roster)),
            Command::History(id) => println!("{}", format_history(&self.roster, id)),
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(false),
        }

        Ok(true)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat_interval = interval(self.heartbeat_interval);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.server_addr => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[..len]) {
                                Ok(packet) => self.handle_packet(packet).await,
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Ok((_, addr)) => debug!("Ignoring datagram from {}", addr),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => match parse_command(&line) {
                            Ok(command) => {
                                if !self.handle_command(command).await? {
                                    break;
                                }
                            }
                            Err(message) => println!("{}", message),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            error!("Error reading input: {}", e);
                            break;
                        }
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
            self.connected = false;
        }

        Ok(())
    }
}
