//! Point-to-point chat delivery

use crate::broadcast::Notification;
use crate::registry::Registry;
use log::debug;
use presence_shared::{ClientId, Packet};

/// Addresses `message` from `sender` to `target` only.
///
/// Fire-and-forget: an unknown or departed target yields no notification and
/// nothing is reported back to the sender.
pub fn route(
    registry: &Registry,
    sender: ClientId,
    target: ClientId,
    message: String,
) -> Option<Notification> {
    if !registry.contains(target) {
        debug!(
            "Dropping message from {} to unknown participant {}",
            sender, target
        );
        return None;
    }

    Some(Notification::to(
        target,
        Packet::ReceiveMessage {
            from: sender,
            message,
        },
    ))
}
