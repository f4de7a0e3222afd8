use std::io;

use thiserror::Error;
use protocol::ProtocolError;

use crate::server_types::ConnectionId;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    // the only error that takes the process down
    #[error("unable to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("write to connection {0} timed out")]
    WriteTimeout(ConnectionId),
    #[error("server at capacity, {0} connections")]
    AtCapacity(usize),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
