use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt; // provides send on top of FramedWrite and the Sink trait
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info};

use protocol::{ChatCodec, ChatMessage};

use crate::error::{Result, ServerError};
use crate::server_types::{ConnState, ConnectionId};

type FrameWriter = FramedWrite<OwnedWriteHalf, ChatCodec>;

/// One live client session, shared between its worker and the broadcaster.
///
/// The handle owns the write half of the socket; the read half stays with
/// the connection's worker. Writes are serialized through an async mutex so
/// concurrent broadcasts never interleave partial frames, and no write ever
/// runs under the registry lock.
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: SocketAddr,
    state: AtomicU8,
    closed: AtomicBool,
    writer: Mutex<Option<FrameWriter>>,
    failed: Notify,
    write_timeout: Duration,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, addr: SocketAddr, tcp_write: OwnedWriteHalf,
               codec: ChatCodec, write_timeout: Duration) -> Self {
        Self {
            id,
            addr,
            state: AtomicU8::new(ConnState::Connecting as u8),
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(FramedWrite::new(tcp_write, codec))),
            failed: Notify::new(),
            write_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnState::Active
    }

    // states only move forward, a late caller can't resurrect a closing handle
    fn advance(&self, to: ConnState) -> bool {
        let prev = self.state.fetch_max(to as u8, Ordering::AcqRel);
        prev < to as u8
    }

    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(ConnState::Connecting as u8, ConnState::Active as u8,
                              Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.advance(ConnState::Closed);
    }

    /// Write one pre-encoded frame, bounded by the write timeout.
    ///
    /// The timeout covers waiting for the per-handle write lock too, so a
    /// stalled peer only ever costs its own deliveries.
    pub async fn write_frame(&self, frame: Bytes) -> Result<()> {
        match timeout(self.write_timeout, self.locked_write(frame)).await {
            Ok(res) => res,
            Err(_) => Err(ServerError::WriteTimeout(self.id)),
        }
    }

    async fn locked_write(&self, frame: Bytes) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let fw = guard.as_mut().ok_or(ServerError::ConnectionClosed(self.id))?;
        fw.send(frame).await?;
        Ok(())
    }

    pub async fn write_message(&self, msg: &ChatMessage) -> Result<()> {
        let frame = protocol::encode(msg)?;
        self.write_frame(frame).await
    }

    /// Called by whoever saw this connection fail a write. Moves the handle
    /// out of the recipient set and wakes the owning worker, which does the
    /// actual teardown and deregistration.
    pub fn mark_failed(&self) {
        if self.advance(ConnState::Closing) {
            debug!("connection {} marked failed", self.id);
        }
        self.failed.notify_one();
    }

    /// Resolves once `mark_failed` has been called.
    pub async fn failed(&self) {
        self.failed.notified().await
    }

    /// Release the write half with an orderly shutdown. Only the first call
    /// does anything; it is safe from any exit path.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return
        }
        self.advance(ConnState::Closing);

        let writer = self.writer.lock().await.take();
        if let Some(fw) = writer {
            let mut tcp_write = fw.into_inner();
            if let Err(e) = tcp_write.shutdown().await {
                debug!("connection {} shutdown error: {:?}", self.id, e);
            }
        }
        info!("connection {} ({}) closed", self.id, self.addr);
    }

    /// Best effort final frame, then close. Used on process shutdown.
    pub async fn notify_and_close(&self, msg: &ChatMessage) {
        if let Err(e) = self.write_message(msg).await {
            debug!("connection {} missed final notification: {}", self.id, e);
        }
        self.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}
