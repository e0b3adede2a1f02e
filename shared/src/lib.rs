use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 3000;
/// Largest payload a single IPv4 UDP datagram can carry.
///
/// Every packet travels in exactly one datagram, so every outbound message
/// must serialize to at most this many bytes. Identity fields are capped by
/// [`MAX_USER_NAME_LEN`] and [`MAX_AVATAR_REF_LEN`] so a full participant
/// record always fits, and `ExistingUsers` is split across several packets
/// when the whole map would not.
pub const MAX_PACKET_SIZE: usize = 65_507;
/// Longest display name kept by the server, in bytes.
pub const MAX_USER_NAME_LEN: usize = 256;
/// Longest avatar reference kept by the server, in bytes.
pub const MAX_AVATAR_REF_LEN: usize = 2048;
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Identifier the server hands out on connect; never reused while the server runs.
pub type ClientId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Public state of one connected participant. Every field stays `None` until
/// the owning connection reports it.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Participant {
    pub position: Option<Position>,
    pub user_name: Option<String>,
    pub selected_avatar: Option<String>,
}

impl Participant {
    /// Merges the fields present in `update`, leaving the others untouched.
    /// Returns true if at least one field was written.
    pub fn apply(&mut self, update: ParticipantUpdate) -> bool {
        let mut changed = false;

        if let Some(position) = update.position {
            self.position = Some(position);
            changed = true;
        }
        if let Some(user_name) = update.user_name {
            self.user_name = Some(user_name);
            changed = true;
        }
        if let Some(selected_avatar) = update.selected_avatar {
            self.selected_avatar = Some(selected_avatar);
            changed = true;
        }

        changed
    }
}

/// Partial participant state carried by an update event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantUpdate {
    pub position: Option<Position>,
    pub user_name: Option<String>,
    pub selected_avatar: Option<String>,
}

impl ParticipantUpdate {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.user_name.is_none() && self.selected_avatar.is_none()
    }
}

/// Cuts `value` down to at most `max_len` bytes on a character boundary.
pub fn truncate_utf8(mut value: String, max_len: usize) -> String {
    if value.len() > max_len {
        let mut end = max_len;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Heartbeat,
    SendLocation {
        latitude: f64,
        longitude: f64,
        user_name: Option<String>,
        selected_avatar: Option<String>,
    },
    UpdateAvatar {
        selected_avatar: Option<String>,
    },
    UpdateName {
        user_name: Option<String>,
    },
    SendMessage {
        to: ClientId,
        message: String,
    },
    Disconnect,

    Connected {
        client_id: ClientId,
    },
    Rejected {
        reason: String,
    },
    ActiveUsersCount {
        count: u32,
    },
    ExistingUsers {
        users: HashMap<ClientId, Participant>,
    },
    ReceiveLocation {
        id: ClientId,
        participant: Participant,
    },
    AvatarUpdated {
        id: ClientId,
        selected_avatar: String,
    },
    NameUpdated {
        id: ClientId,
        user_name: String,
    },
    ReceiveMessage {
        from: ClientId,
        message: String,
    },
    UserDisconnected {
        id: ClientId,
    },
}

impl Packet {
    /// Event name as it appears in the relay protocol table.
    pub fn event_name(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Heartbeat => "heartbeat",
            Packet::SendLocation { .. } => "send-location",
            Packet::UpdateAvatar { .. } => "update-avatar",
            Packet::UpdateName { .. } => "update-name",
            Packet::SendMessage { .. } => "send-message",
            Packet::Disconnect => "disconnect",
            Packet::Connected { .. } => "connected",
            Packet::Rejected { .. } => "rejected",
            Packet::ActiveUsersCount { .. } => "active-users-count",
            Packet::ExistingUsers { .. } => "existing-users",
            Packet::ReceiveLocation { .. } => "receive-location",
            Packet::AvatarUpdated { .. } => "update-avatar",
            Packet::NameUpdated { .. } => "update-name",
            Packet::ReceiveMessage { .. } => "receive-message",
            Packet::UserDisconnected { .. } => "user-disconnected",
        }
    }

    /// True for packets travelling from the server to a client.
    pub fn is_client_bound(&self) -> bool {
        !matches!(
            self,
            Packet::Connect { .. }
                | Packet::Heartbeat
                | Packet::SendLocation { .. }
                | Packet::UpdateAvatar { .. }
                | Packet::UpdateName { .. }
                | Packet::SendMessage { .. }
                | Packet::Disconnect
        )
    }
}
