use std::fmt;

use protocol::ChatMessage;

// server type definitions

// frames the server itself originates carry this sender id
pub const SERVER_SENDER_ID: &str = "server";
pub const SERVER_DISPLAY_NAME: &str = "Server";
pub const SHUTDOWN_TEXT: &str = "server shutting down";

// last frame every registered client gets before the server closes it
pub fn shutdown_notice() -> ChatMessage {
    ChatMessage::new(SERVER_SENDER_ID, SERVER_DISPLAY_NAME, SHUTDOWN_TEXT, None)
}

/// Server assigned connection identifier, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of one client session.
///
/// Only ever moves forward: Connecting -> Active -> Closing -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Connecting,
            1 => ConnState::Active,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}
