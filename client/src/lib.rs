//! # Presence Terminal Client
//!
//! A line-oriented client for the presence relay server. It joins the shared
//! map, shares a position, name and avatar, follows everyone else's updates
//! and exchanges direct messages, all from a terminal.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Socket handling and the client event loop: handshake, heartbeats, decoding
//! server packets and turning user commands into protocol packets.
//!
//! ### Roster Module (`roster`)
//! Local mirror of the server's participant registry plus per-peer chat
//! history. Updated only from server packets.
//!
//! ### Input Module (`input`)
//! Parses `/command` lines typed by the user.
//!
//! ### Display Module (`display`)
//! Formats notices, the participant list and chat histories as text.

pub mod display;
pub mod input;
pub mod network;
pub mod roster;
