//! Presence fan-out
//!
//! Turns committed registry mutations into outbound [`Notification`]s. Every
//! function here reads the registry after the mutation has been applied; none
//! of them mutate it. Delivery itself happens later on the network sender task.

use crate::registry::Registry;
use presence_shared::{ClientId, Packet, MAX_PACKET_SIZE};
use serde::Serialize;
use std::collections::HashMap;

/// Who a notification is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deliver {
    /// A single connection
    To(ClientId),
    /// Every live connection
    All,
}

/// An outbound packet paired with its audience
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub deliver: Deliver,
    pub packet: Packet,
}

impl Notification {
    pub fn to(id: ClientId, packet: Packet) -> Self {
        Self {
            deliver: Deliver::To(id),
            packet,
        }
    }

    pub fn all(packet: Packet) -> Self {
        Self {
            deliver: Deliver::All,
            packet,
        }
    }
}

/// Current number of live participants, for everyone.
pub fn announce_count_change(registry: &Registry) -> Notification {
    let count = u32::try_from(registry.active_count()).unwrap_or(u32::MAX);
    Notification::all(Packet::ActiveUsersCount { count })
}

/// Full current record of `id`, for everyone including `id` itself.
pub fn announce_location(registry: &Registry, id: ClientId) -> Option<Notification> {
    let participant = registry.get(id)?.clone();
    Some(Notification::all(Packet::ReceiveLocation { id, participant }))
}

pub fn announce_avatar_change(registry: &Registry, id: ClientId) -> Option<Notification> {
    let selected_avatar = registry.get(id)?.selected_avatar.clone()?;
    Some(Notification::all(Packet::AvatarUpdated {
        id,
        selected_avatar,
    }))
}

pub fn announce_name_change(registry: &Registry, id: ClientId) -> Option<Notification> {
    let user_name = registry.get(id)?.user_name.clone()?;
    Some(Notification::all(Packet::NameUpdated { id, user_name }))
}

/// Departure of `id`. Must only be issued once the entry is gone, so a
/// recipient never finds the departed id in a later snapshot.
pub fn announce_departure(registry: &Registry, id: ClientId) -> Notification {
    debug_assert!(!registry.contains(id), "departure announced for live id {}", id);
    Notification::all(Packet::UserDisconnected { id })
}

/// Initial sync for a newcomer: every other participant's state.
///
/// The map is split into as many `ExistingUsers` packets as needed for each
/// to fit in one datagram; the recipient merges them. An empty map still
/// yields a single empty packet.
pub fn sync_snapshot(registry: &Registry, id: ClientId) -> Vec<Notification> {
    let mut others: Vec<_> = registry.snapshot_excluding(id).into_iter().collect();
    others.sort_by_key(|(other, _)| *other);

    let empty_size = encoded_size(&Packet::ExistingUsers {
        users: HashMap::new(),
    });
    let mut chunks = Vec::new();
    let mut users = HashMap::new();
    let mut size = empty_size;

    for (other, participant) in others {
        let entry_size = encoded_size(&other).saturating_add(encoded_size(&participant));
        if !users.is_empty() && size.saturating_add(entry_size) > MAX_PACKET_SIZE {
            chunks.push(std::mem::take(&mut users));
            size = empty_size;
        }
        size = size.saturating_add(entry_size);
        users.insert(other, participant);
    }
    if !users.is_empty() || chunks.is_empty() {
        chunks.push(users);
    }

    chunks
        .into_iter()
        .map(|users| Notification::to(id, Packet::ExistingUsers { users }))
        .collect()
}

fn encoded_size<T: Serialize>(value: &T) -> usize {
    bincode::serialized_size(value)
        .ok()
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_shared::{
        Participant, ParticipantUpdate, Position, MAX_AVATAR_REF_LEN, MAX_USER_NAME_LEN,
    };

    fn registry_with(ids: &[ClientId]) -> Registry {
        let mut registry = Registry::new();
        for id in ids {
            registry.register(*id);
        }
        registry
    }

    #[test]
    fn test_count_change_goes_to_everyone() {
        let registry = registry_with(&[1, 2, 3]);

        let notification = announce_count_change(&registry);

        assert_eq!(notification.deliver, Deliver::All);
        assert_eq!(notification.packet, Packet::ActiveUsersCount { count: 3 });
    }

    #[test]
    fn test_location_carries_full_record() {
        let mut registry = registry_with(&[1]);
        registry.upsert(
            1,
            ParticipantUpdate {
                user_name: Some("ada".to_string()),
                ..Default::default()
            },
        );
        registry.upsert(
            1,
            ParticipantUpdate {
                position: Some(Position::new(10.0, 20.0)),
                ..Default::default()
            },
        );

        let notification = announce_location(&registry, 1).unwrap();

        assert_eq!(notification.deliver, Deliver::All);
        match notification.packet {
            Packet::ReceiveLocation { id, participant } => {
                assert_eq!(id, 1);
                assert_eq!(participant.user_name.as_deref(), Some("ada"));
                assert_eq!(participant.position, Some(Position::new(10.0, 20.0)));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_location_for_unknown_id_is_none() {
        let registry = registry_with(&[1]);
        assert!(announce_location(&registry, 5).is_none());
    }

    #[test]
    fn test_avatar_change_scoped_to_avatar() {
        let mut registry = registry_with(&[2]);
        registry.upsert(
            2,
            ParticipantUpdate {
                selected_avatar: Some("/img/cat.png".to_string()),
                user_name: Some("bob".to_string()),
                ..Default::default()
            },
        );

        let notification = announce_avatar_change(&registry, 2).unwrap();

        assert_eq!(
            notification.packet,
            Packet::AvatarUpdated {
                id: 2,
                selected_avatar: "/img/cat.png".to_string()
            }
        );
    }

    #[test]
    fn test_name_change_without_name_is_none() {
        let registry = registry_with(&[2]);
        assert!(announce_name_change(&registry, 2).is_none());
    }

    #[test]
    fn test_departure_after_removal() {
        let mut registry = registry_with(&[1, 2]);
        registry.remove(2);

        let notification = announce_departure(&registry, 2);

        assert_eq!(notification.deliver, Deliver::All);
        assert_eq!(notification.packet, Packet::UserDisconnected { id: 2 });
    }

    #[test]
    fn test_sync_snapshot_excludes_newcomer() {
        let registry = registry_with(&[1, 2]);

        let notifications = sync_snapshot(&registry, 2);

        assert_eq!(notifications.len(), 1);
        let notification = notifications.into_iter().next().unwrap();
        assert_eq!(notification.deliver, Deliver::To(2));
        match notification.packet {
            Packet::ExistingUsers { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users.get(&1), Some(&Participant::default()));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_sync_snapshot_for_lone_participant_is_one_empty_packet() {
        let registry = registry_with(&[1]);

        assert_eq!(
            sync_snapshot(&registry, 1),
            vec![Notification::to(
                1,
                Packet::ExistingUsers {
                    users: HashMap::new()
                }
            )]
        );
    }

    #[test]
    fn test_large_snapshot_is_split_into_datagrams() {
        let mut registry = Registry::new();
        for id in 1..=256 {
            registry.register(id);
            registry.upsert(
                id,
                ParticipantUpdate {
                    position: Some(Position::new(48.85, 2.35)),
                    user_name: Some("n".repeat(MAX_USER_NAME_LEN)),
                    selected_avatar: Some("a".repeat(MAX_AVATAR_REF_LEN)),
                },
            );
        }

        let notifications = sync_snapshot(&registry, 7);

        assert!(notifications.len() > 1);
        let mut merged = HashMap::new();
        for notification in notifications {
            assert_eq!(notification.deliver, Deliver::To(7));
            let encoded = bincode::serialize(&notification.packet).unwrap();
            assert!(encoded.len() <= MAX_PACKET_SIZE);
            match notification.packet {
                Packet::ExistingUsers { users } => {
                    assert!(!users.is_empty());
                    merged.extend(users);
                }
                other => panic!("Unexpected packet {:?}", other),
            }
        }
        assert_eq!(merged, registry.snapshot_excluding(7));
    }
}
