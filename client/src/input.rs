//! Command-line input parsing for the terminal client

use presence_shared::{ClientId, MAX_AVATAR_REF_LEN, MAX_USER_NAME_LEN};

pub const HELP: &str = "\
Commands:
  /loc <latitude> <longitude>   share your position
  /name <name>                  change your display name
  /avatar <ref>                 change your avatar (image path or URL)
  /msg <id> <text>              send a direct message
  /who                          list participants
  /history <id>                 show your chat with a participant
  /help                         show this help
  /quit                         disconnect and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Location { latitude: f64, longitude: f64 },
    Name(String),
    Avatar(String),
    Message { to: ClientId, text: String },
    Who,
    History(ClientId),
    Help,
    Quit,
}

/// Parses one line of user input.
///
/// The error is a message meant to be shown to the user as-is.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb {
        "/loc" => parse_location(rest),
        "/name" => {
            if rest.is_empty() {
                Err("Name cannot be empty".to_string())
            } else if rest.len() > MAX_USER_NAME_LEN {
                Err(format!("Name is limited to {} bytes", MAX_USER_NAME_LEN))
            } else {
                Ok(Command::Name(rest.to_string()))
            }
        }
        "/avatar" => {
            if rest.is_empty() {
                Err("Usage: /avatar <ref>".to_string())
            } else if rest.len() > MAX_AVATAR_REF_LEN {
                Err(format!(
                    "Avatar reference is limited to {} bytes",
                    MAX_AVATAR_REF_LEN
                ))
            } else {
                Ok(Command::Avatar(rest.to_string()))
            }
        }
        "/msg" => {
            let (to, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "Usage: /msg <id> <text>".to_string())?;
            let to = parse_id(to)?;
            let text = text.trim();
            if text.is_empty() {
                return Err("Message cannot be empty".to_string());
            }
            Ok(Command::Message {
                to,
                text: text.to_string(),
            })
        }
        "/who" => Ok(Command::Who),
        "/history" => Ok(Command::History(parse_id(rest)?)),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        "" => Err("Type /help for a list of commands".to_string()),
        other => Err(format!("Unknown command '{}'; type /help", other)),
    }
}

fn parse_id(text: &str) -> Result<ClientId, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("'{}' is not a participant id", text.trim()))
}

fn parse_location(rest: &str) -> Result<Command, String> {
    let mut parts = rest.split_whitespace();
    let (Some(latitude), Some(longitude), None) = (parts.next(), parts.next(), parts.next())
    else {
        return Err("Usage: /loc <latitude> <longitude>".to_string());
    };

    let latitude: f64 = latitude
        .parse()
        .map_err(|_| format!("'{}' is not a latitude", latitude))?;
    let longitude: f64 = longitude
        .parse()
        .map_err(|_| format!("'{}' is not a longitude", longitude))?;

    if !(-90.0..=90.0).contains(&latitude) {
        return Err("Latitude must be between -90 and 90".to_string());
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err("Longitude must be between -180 and 180".to_string());
    }

    Ok(Command::Location {
        latitude,
        longitude,
    })
}
