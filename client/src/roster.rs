//! Client-side mirror of the server's presence registry
//!
//! The roster is rebuilt from server packets only: the `existing-users`
//! snapshot seeds it, location/name/avatar broadcasts patch it, departures
//! prune it. It also keeps a per-peer chat history, which the server never
//! stores.

use presence_shared::{ClientId, Packet, Participant};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub direction: Direction,
    pub text: String,
}

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Connected { id: ClientId },
    Rejected { reason: String },
    ActiveUsers { count: u32 },
    Entered { id: ClientId, name: String },
    Left { id: ClientId, name: String },
    Message { from: ClientId, name: String, text: String },
}

#[derive(Debug, Default)]
pub struct Roster {
    me: Option<ClientId>,
    participants: HashMap<ClientId, Participant>,
    active_users: u32,
    histories: HashMap<ClientId, Vec<ChatLine>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Our own id, once the server has accepted us
    pub fn me(&self) -> Option<ClientId> {
        self.me
    }

    pub fn active_users(&self) -> u32 {
        self.active_users
    }

    pub fn get(&self, id: ClientId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Known participants ordered by id
    pub fn participants(&self) -> Vec<(ClientId, &Participant)> {
        let mut participants: Vec<_> = self
            .participants
            .iter()
            .map(|(id, participant)| (*id, participant))
            .collect();
        participants.sort_by_key(|(id, _)| *id);
        participants
    }

    pub fn history(&self, id: ClientId) -> &[ChatLine] {
        self.histories.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Name to show for `id`, falling back to the bare id.
    pub fn display_name(&self, id: ClientId) -> String {
        self.participants
            .get(&id)
            .and_then(|participant| participant.user_name.clone())
            .unwrap_or_else(|| format!("user {}", id))
    }

    pub fn record_sent(&mut self, to: ClientId, text: String) {
        self.histories.entry(to).or_default().push(ChatLine {
            direction: Direction::Sent,
            text,
        });
    }

    /// Applies a server packet and returns the notices it produced.
    pub fn apply(&mut self, packet: Packet) -> Vec<Notice> {
        match packet {
            Packet::Connected { client_id } => {
                self.me = Some(client_id);
                self.participants.clear();
                vec![Notice::Connected { id: client_id }]
            }

            Packet::Rejected { reason } => {
                self.me = None;
                vec![Notice::Rejected { reason }]
            }

            Packet::ActiveUsersCount { count } => {
                self.active_users = count;
                vec![Notice::ActiveUsers { count }]
            }

            Packet::ExistingUsers { users } => {
                self.participants.extend(users);
                Vec::new()
            }

            Packet::ReceiveLocation { id, participant } => {
                let was_on_map = self
                    .participants
                    .get(&id)
                    .map_or(false, |known| known.position.is_some());
                let arrived = !was_on_map && participant.position.is_some();

                self.participants.insert(id, participant);

                if arrived && Some(id) != self.me {
                    vec![Notice::Entered {
                        id,
                        name: self.display_name(id),
                    }]
                } else {
                    Vec::new()
                }
            }

            Packet::AvatarUpdated {
                id,
                selected_avatar,
            } => {
                self.participants.entry(id).or_default().selected_avatar = Some(selected_avatar);
                Vec::new()
            }

            Packet::NameUpdated { id, user_name } => {
                self.participants.entry(id).or_default().user_name = Some(user_name);
                Vec::new()
            }

            Packet::ReceiveMessage { from, message } => {
                self.histories.entry(from).or_default().push(ChatLine {
                    direction: Direction::Received,
                    text: message.clone(),
                });
                vec![Notice::Message {
                    from,
                    name: self.display_name(from),
                    text: message,
                }]
            }

            Packet::UserDisconnected { id } => {
                let name = self.display_name(id);
                match self.participants.remove(&id) {
                    Some(_) => vec![Notice::Left { id, name }],
                    None => Vec::new(),
                }
            }

            _ => Vec::new(),
        }
    }
}
