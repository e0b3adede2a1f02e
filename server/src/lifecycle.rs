//! Connection lifecycle and event dispatch
//!
//! Each connection moves through `Connecting -> Live -> Closed`. The
//! [`Lifecycle`] owns the [`Registry`] and is the only code path that mutates
//! it: accepting a connection, applying its events, and tearing it down.
//!
//! Every entry point returns the notifications the transition produced, in the
//! order they must be delivered. Nothing here touches the network, so the full
//! join/update/leave protocol can be exercised without a socket.

use crate::broadcast::{self, Notification};
use crate::registry::Registry;
use crate::router;
use log::{debug, info};
use presence_shared::{
    truncate_utf8, ClientId, Packet, ParticipantUpdate, Position, MAX_AVATAR_REF_LEN,
    MAX_USER_NAME_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Live,
    Closed,
}

/// Discriminant used to pick a handler from the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SendLocation,
    UpdateAvatar,
    UpdateName,
    SendMessage,
}

/// A client-originated event for a live connection
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SendLocation {
        position: Position,
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
}

impl Event {
    /// Extracts the event carried by an inbound packet, if it carries one.
    /// Handshake, heartbeat and disconnect packets are transport concerns.
    ///
    /// Names and avatar references are cut to [`MAX_USER_NAME_LEN`] and
    /// [`MAX_AVATAR_REF_LEN`] bytes so any stored record fits in a datagram.
    pub fn from_packet(packet: Packet) -> Option<Self> {
        match packet {
            Packet::SendLocation {
                latitude,
                longitude,
                user_name,
                selected_avatar,
            } => Some(Event::SendLocation {
                position: Position::new(latitude, longitude),
                user_name: cap_name(user_name),
                selected_avatar: cap_avatar(selected_avatar),
            }),
            Packet::UpdateAvatar { selected_avatar } => Some(Event::UpdateAvatar {
                selected_avatar: cap_avatar(selected_avatar),
            }),
            Packet::UpdateName { user_name } => Some(Event::UpdateName {
                user_name: cap_name(user_name),
            }),
            Packet::SendMessage { to, message } => Some(Event::SendMessage { to, message }),
            _ => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::SendLocation { .. } => EventKind::SendLocation,
            Event::UpdateAvatar { .. } => EventKind::UpdateAvatar,
            Event::UpdateName { .. } => EventKind::UpdateName,
            Event::SendMessage { .. } => EventKind::SendMessage,
        }
    }
}

fn cap_name(user_name: Option<String>) -> Option<String> {
    user_name.map(|name| truncate_utf8(name, MAX_USER_NAME_LEN))
}

fn cap_avatar(selected_avatar: Option<String>) -> Option<String> {
    selected_avatar.map(|avatar| truncate_utf8(avatar, MAX_AVATAR_REF_LEN))
}

type Handler = fn(&mut Registry, ClientId, Event) -> Vec<Notification>;

/// Dispatch table keyed by event kind.
fn handler_for(kind: EventKind) -> Handler {
    match kind {
        EventKind::SendLocation => handle_send_location,
        EventKind::UpdateAvatar => handle_update_avatar,
        EventKind::UpdateName => handle_update_name,
        EventKind::SendMessage => handle_send_message,
    }
}

fn handle_send_location(registry: &mut Registry, id: ClientId, event: Event) -> Vec<Notification> {
    let Event::SendLocation {
        position,
        user_name,
        selected_avatar,
    } = event
    else {
        return Vec::new();
    };

    let update = ParticipantUpdate {
        position: Some(position),
        user_name,
        selected_avatar,
    };
    if registry.upsert(id, update).is_none() {
        return Vec::new();
    }

    broadcast::announce_location(registry, id)
        .into_iter()
        .collect()
}

fn handle_update_avatar(registry: &mut Registry, id: ClientId, event: Event) -> Vec<Notification> {
    let Event::UpdateAvatar {
        selected_avatar: Some(selected_avatar),
    } = event
    else {
        debug!("Avatar update from {} carried no avatar", id);
        return Vec::new();
    };

    let update = ParticipantUpdate {
        selected_avatar: Some(selected_avatar),
        ..Default::default()
    };
    if registry.upsert(id, update).is_none() {
        return Vec::new();
    }

    broadcast::announce_avatar_change(registry, id)
        .into_iter()
        .collect()
}

fn handle_update_name(registry: &mut Registry, id: ClientId, event: Event) -> Vec<Notification> {
    let Event::UpdateName {
        user_name: Some(user_name),
    } = event
    else {
        debug!("Name update from {} carried no name", id);
        return Vec::new();
    };

    let update = ParticipantUpdate {
        user_name: Some(user_name),
        ..Default::default()
    };
    if registry.upsert(id, update).is_none() {
        return Vec::new();
    }

    broadcast::announce_name_change(registry, id)
        .into_iter()
        .collect()
}

fn handle_send_message(registry: &mut Registry, id: ClientId, event: Event) -> Vec<Notification> {
    let Event::SendMessage { to, message } = event else {
        return Vec::new();
    };

    router::route(registry, id, to, message).into_iter().collect()
}

/// Owns the registry and drives every connection's state machine
#[derive(Debug, Default)]
pub struct Lifecycle {
    registry: Registry,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn state(&self, id: ClientId) -> ConnectionState {
        if self.registry.contains(id) {
            ConnectionState::Live
        } else if self.registry.is_retired(id) {
            ConnectionState::Closed
        } else {
            ConnectionState::Connecting
        }
    }

    /// `Connecting -> Live`: registers an empty participant, announces the new
    /// count to everyone, then hands the newcomer a snapshot of everyone else,
    /// split over as many packets as it takes.
    pub fn accept(&mut self, id: ClientId) -> Vec<Notification> {
        if self.state(id) != ConnectionState::Connecting {
            debug!("Ignoring accept for {} in state {:?}", id, self.state(id));
            return Vec::new();
        }

        self.registry.register(id);
        info!(
            "Participant {} joined ({} active)",
            id,
            self.registry.active_count()
        );

        let mut notifications = vec![broadcast::announce_count_change(&self.registry)];
        notifications.extend(broadcast::sync_snapshot(&self.registry, id));
        notifications
    }

    /// Applies an event from a live connection. Events from connections that
    /// are not live are dropped.
    pub fn dispatch(&mut self, id: ClientId, event: Event) -> Vec<Notification> {
        let state = self.state(id);
        if state != ConnectionState::Live {
            debug!("Dropping {:?} from {} in state {:?}", event.kind(), id, state);
            return Vec::new();
        }

        debug!("Dispatching {:?} from {}", event.kind(), id);
        let handler = handler_for(event.kind());
        handler(&mut self.registry, id, event)
    }

    /// `Live -> Closed`: removes the participant, then announces the new count
    /// followed by the departure. Repeated calls for the same id are no-ops.
    pub fn close(&mut self, id: ClientId) -> Vec<Notification> {
        if self.state(id) != ConnectionState::Live {
            debug!("Connection {} already closed or never accepted", id);
            return Vec::new();
        }

        self.registry.remove(id);
        info!(
            "Participant {} left ({} active)",
            id,
            self.registry.active_count()
        );

        vec![
            broadcast::announce_count_change(&self.registry),
            broadcast::announce_departure(&self.registry, id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Deliver;
    use rand::Rng;
    use std::collections::HashSet;

    fn location(latitude: f64, longitude: f64) -> Event {
        Event::SendLocation {
            position: Position::new(latitude, longitude),
            user_name: None,
            selected_avatar: None,
        }
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut lifecycle = Lifecycle::new();

        assert_eq!(lifecycle.state(1), ConnectionState::Connecting);
        lifecycle.accept(1);
        assert_eq!(lifecycle.state(1), ConnectionState::Live);
        lifecycle.close(1);
        assert_eq!(lifecycle.state(1), ConnectionState::Closed);
    }

    #[test]
    fn test_first_join_gets_empty_snapshot() {
        let mut lifecycle = Lifecycle::new();

        let notifications = lifecycle.accept(1);

        assert_eq!(
            notifications,
            vec![
                Notification::all(Packet::ActiveUsersCount { count: 1 }),
                Notification::to(
                    1,
                    Packet::ExistingUsers {
                        users: Default::default()
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_second_join_sees_first() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.dispatch(1, location(10.0, 20.0));

        let notifications = lifecycle.accept(2);

        assert_eq!(
            notifications[0],
            Notification::all(Packet::ActiveUsersCount { count: 2 })
        );
        match &notifications[1].packet {
            Packet::ExistingUsers { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[&1].position, Some(Position::new(10.0, 20.0)));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
        assert_eq!(notifications[1].deliver, Deliver::To(2));
    }

    #[test]
    fn test_location_broadcast_includes_originator() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.accept(2);

        let notifications = lifecycle.dispatch(2, location(10.0, 20.0));

        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].deliver, Deliver::All);
        match &notifications[0].packet {
            Packet::ReceiveLocation { id, participant } => {
                assert_eq!(*id, 2);
                assert_eq!(participant.position, Some(Position::new(10.0, 20.0)));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_location_with_identity_fields() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);

        lifecycle.dispatch(
            1,
            Event::SendLocation {
                position: Position::new(1.0, 1.0),
                user_name: Some("ada".to_string()),
                selected_avatar: Some("/img/owl.png".to_string()),
            },
        );
        let notifications = lifecycle.dispatch(1, location(2.0, 2.0));

        match &notifications[0].packet {
            Packet::ReceiveLocation { participant, .. } => {
                assert_eq!(participant.user_name.as_deref(), Some("ada"));
                assert_eq!(participant.selected_avatar.as_deref(), Some("/img/owl.png"));
                assert_eq!(participant.position, Some(Position::new(2.0, 2.0)));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_name_and_avatar_updates() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);

        let name = lifecycle.dispatch(
            1,
            Event::UpdateName {
                user_name: Some("grace".to_string()),
            },
        );
        let avatar = lifecycle.dispatch(
            1,
            Event::UpdateAvatar {
                selected_avatar: Some("/img/cat.png".to_string()),
            },
        );

        assert_eq!(
            name,
            vec![Notification::all(Packet::NameUpdated {
                id: 1,
                user_name: "grace".to_string()
            })]
        );
        assert_eq!(
            avatar,
            vec![Notification::all(Packet::AvatarUpdated {
                id: 1,
                selected_avatar: "/img/cat.png".to_string()
            })]
        );
        let participant = lifecycle.registry().get(1).unwrap();
        assert_eq!(participant.user_name.as_deref(), Some("grace"));
        assert_eq!(participant.selected_avatar.as_deref(), Some("/img/cat.png"));
    }

    #[test]
    fn test_update_missing_field_leaves_state_untouched() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.dispatch(
            1,
            Event::UpdateName {
                user_name: Some("ada".to_string()),
            },
        );

        let notifications = lifecycle.dispatch(1, Event::UpdateName { user_name: None });

        assert!(notifications.is_empty());
        assert_eq!(
            lifecycle.registry().get(1).unwrap().user_name.as_deref(),
            Some("ada")
        );
    }

    #[test]
    fn test_message_reaches_only_target() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.accept(2);
        lifecycle.accept(3);

        let notifications = lifecycle.dispatch(
            1,
            Event::SendMessage {
                to: 2,
                message: "hi".to_string(),
            },
        );

        assert_eq!(
            notifications,
            vec![Notification::to(
                2,
                Packet::ReceiveMessage {
                    from: 1,
                    message: "hi".to_string()
                }
            )]
        );
    }

    #[test]
    fn test_disconnect_announces_count_then_departure() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.accept(2);

        let notifications = lifecycle.close(2);

        assert_eq!(
            notifications,
            vec![
                Notification::all(Packet::ActiveUsersCount { count: 1 }),
                Notification::all(Packet::UserDisconnected { id: 2 }),
            ]
        );
        assert!(lifecycle.registry().get(2).is_none());
    }

    #[test]
    fn test_duplicate_disconnect_is_absorbed() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.accept(2);

        assert_eq!(lifecycle.close(2).len(), 2);
        assert!(lifecycle.close(2).is_empty());
        assert_eq!(lifecycle.active_count(), 1);
    }

    #[test]
    fn test_update_after_close_is_noop() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.close(1);

        let notifications = lifecycle.dispatch(1, location(5.0, 5.0));

        assert!(notifications.is_empty());
        assert!(lifecycle.registry().get(1).is_none());
        assert_eq!(lifecycle.state(1), ConnectionState::Closed);
    }

    #[test]
    fn test_accept_after_close_is_rejected() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        lifecycle.close(1);

        assert!(lifecycle.accept(1).is_empty());
        assert_eq!(lifecycle.active_count(), 0);
    }

    #[test]
    fn test_event_before_accept_is_dropped() {
        let mut lifecycle = Lifecycle::new();

        assert!(lifecycle.dispatch(9, location(1.0, 1.0)).is_empty());
        assert_eq!(lifecycle.state(9), ConnectionState::Connecting);
    }

    #[test]
    fn test_oversized_identity_is_capped() {
        let event = Event::from_packet(Packet::UpdateName {
            user_name: Some("n".repeat(40_000)),
        });
        assert_eq!(
            event,
            Some(Event::UpdateName {
                user_name: Some("n".repeat(MAX_USER_NAME_LEN))
            })
        );

        let event = Event::from_packet(Packet::SendLocation {
            latitude: 1.0,
            longitude: 2.0,
            user_name: None,
            selected_avatar: Some("a".repeat(40_000)),
        });
        match event {
            Some(Event::SendLocation {
                selected_avatar: Some(avatar),
                ..
            }) => assert_eq!(avatar.len(), MAX_AVATAR_REF_LEN),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_location_after_oversized_identity_fits_datagram() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.accept(1);
        for packet in [
            Packet::UpdateName {
                user_name: Some("n".repeat(40_000)),
            },
            Packet::UpdateAvatar {
                selected_avatar: Some("a".repeat(40_000)),
            },
        ] {
            let event = Event::from_packet(packet).unwrap();
            assert_eq!(lifecycle.dispatch(1, event).len(), 1);
        }

        let notifications = lifecycle.dispatch(1, location(10.0, 20.0));

        assert_eq!(notifications.len(), 1);
        let encoded = bincode::serialize(&notifications[0].packet).unwrap();
        assert!(encoded.len() <= presence_shared::MAX_PACKET_SIZE);
    }

    #[test]
    fn test_event_from_packet() {
        let event = Event::from_packet(Packet::SendMessage {
            to: 3,
            message: "yo".to_string(),
        });
        assert_eq!(
            event,
            Some(Event::SendMessage {
                to: 3,
                message: "yo".to_string()
            })
        );
        assert!(Event::from_packet(Packet::Heartbeat).is_none());
        assert!(Event::from_packet(Packet::Disconnect).is_none());
    }

    #[test]
    fn test_active_count_tracks_random_churn() {
        let mut rng = rand::thread_rng();
        let mut lifecycle = Lifecycle::new();
        let mut next_id: ClientId = 1;
        let mut live: Vec<ClientId> = Vec::new();
        let mut closed: HashSet<ClientId> = HashSet::new();
        let mut accepts = 0usize;
        let mut disconnects = 0usize;

        for _ in 0..2_000 {
            match rng.gen_range(0..4) {
                0 | 1 => {
                    lifecycle.accept(next_id);
                    live.push(next_id);
                    next_id += 1;
                    accepts += 1;
                }
                2 if !live.is_empty() => {
                    let id = live.swap_remove(rng.gen_range(0..live.len()));
                    assert!(!lifecycle.close(id).is_empty());
                    closed.insert(id);
                    disconnects += 1;
                }
                _ => {
                    // Duplicate disconnect for something already gone.
                    if let Some(id) = closed.iter().next().copied() {
                        assert!(lifecycle.close(id).is_empty());
                    }
                }
            }

            assert_eq!(lifecycle.active_count(), accepts - disconnects);
            assert_eq!(lifecycle.active_count(), live.len());
        }
    }
}
