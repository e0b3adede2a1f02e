//! Text rendering of roster state and notices for the terminal

use crate::roster::{Direction, Notice, Roster};
use presence_shared::ClientId;
use std::fmt::Write;

pub fn format_notice(notice: &Notice) -> String {
    match notice {
        Notice::Connected { id } => format!("Connected as user {}", id),
        Notice::Rejected { reason } => format!("Server refused connection: {}", reason),
        Notice::ActiveUsers { count } => format!("Active Users: {}", count),
        Notice::Entered { name, .. } => format!("{} has entered the map.", name),
        Notice::Left { name, .. } => format!("{} has left the map.", name),
        Notice::Message { from, name, text } => {
            format!("[{}] {} sent you a message: {}", from, name, text)
        }
    }
}

pub fn format_roster(roster: &Roster) -> String {
    let mut out = format!("Active Users: {}\n", roster.active_users());

    for (id, participant) in roster.participants() {
        let marker = if Some(id) == roster.me() { " (you)" } else { "" };
        let position = participant
            .position
            .map(|p| format!("{:.5}, {:.5}", p.latitude, p.longitude))
            .unwrap_or_else(|| "no position".to_string());
        let avatar = participant.selected_avatar.as_deref().unwrap_or("-");

        let _ = writeln!(
            out,
            "  {:>4}  {}{}  [{}]  avatar: {}",
            id,
            roster.display_name(id),
            marker,
            position,
            avatar
        );
    }

    out.trim_end().to_string()
}

pub fn format_history(roster: &Roster, id: ClientId) -> String {
    let history = roster.history(id);
    if history.is_empty() {
        return format!("No messages with {}", roster.display_name(id));
    }

    let name = roster.display_name(id);
    history
        .iter()
        .map(|line| match line.direction {
            Direction::Sent => format!("You: {}", line.text),
            Direction::Received => format!("{}: {}", name, line.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
