use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::select;
use tokio::sync::broadcast::Receiver;
use tokio_util::codec::FramedRead;
use tokio_stream::StreamExt;

use tracing::{info, debug, warn};

use protocol::ChatCodec;

use crate::connection::ConnectionHandle;
use crate::delivery::Delivery;
use crate::error::{Result, ServerError};
use crate::registry::Registry;
use crate::server_types::shutdown_notice;

// why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    EndOfStream,
    TransportError,
    Malformed,
    WriteFailed,
    Shutdown,
}

// Handles server communication from client
// Essentially this models a client actor on the server side
pub struct ClientHandler {
    handle: Arc<ConnectionHandle>,
    tcp_read: Option<FramedRead<OwnedReadHalf, ChatCodec>>,
    clients: Registry,
    outgoing: Delivery,
    shutdown_rx: Receiver<()>,
    echo: bool,
}

impl ClientHandler {

    pub fn new(handle: Arc<ConnectionHandle>, tcp_read: OwnedReadHalf, codec: ChatCodec,
               clients: Registry, outgoing: Delivery, shutdown_rx: Receiver<()>, echo: bool) -> Self {
        Self {
            handle,
            tcp_read: Some(FramedRead::new(tcp_read, codec)),
            clients,
            outgoing,
            shutdown_rx,
            echo,
        }
    }

    // Drives one client from registration to teardown, meant to be spawned
    pub async fn run(mut self) {
        // if registration is successful then only handle client reads
        match self.register().await {
            Ok(()) => {
                let exit = self.handle_read().await;
                debug!("connection {} read loop ended: {:?}", self.handle.id(), exit);

                if exit == Exit::Shutdown {
                    self.handle.notify_and_close(&shutdown_notice()).await;
                }
            },
            Err(ServerError::AtCapacity(max)) => {
                warn!("rejecting {}, already serving {} connections", self.handle.addr(), max);
            },
            Err(e) => debug!("connection {} not registered: {}", self.handle.id(), e),
        }

        self.process_disconnect().await;
    }

    async fn register(&mut self) -> Result<()> {
        self.clients.add(Arc::clone(&self.handle)).await?;
        info!("connection {} from {} is active", self.handle.id(), self.handle.addr());
        Ok(())
    }

    // Loop to handle ongoing client msgs to server. Each frame is fanned out
    // completely before the next one is read, which keeps one sender's
    // messages in order for every recipient.
    async fn handle_read(&mut self) -> Exit {
        let Some(mut fr) = self.tcp_read.take() else {
            return Exit::EndOfStream
        };
        let handle = Arc::clone(&self.handle);
        let except = if self.echo { None } else { Some(handle.id()) };

        loop {
            select! {
                value = fr.next() => {
                    match value {
                        Some(Ok(msg)) => {
                            debug!("server received from {}: {:?}", handle.id(), msg);

                            let report = self.outgoing.deliver(&msg, except).await;
                            if report.failed > 0 {
                                debug!("message from {} reached {}, {} failed",
                                       handle.id(), report.delivered, report.failed);
                            }
                        },
                        Some(Err(e)) if e.is_malformed() => {
                            warn!("connection {} sent a malformed frame: {}", handle.id(), e);
                            return Exit::Malformed
                        },
                        Some(Err(e)) => {
                            debug!("connection {} closing on error: {:?}", handle.id(), e);
                            return Exit::TransportError
                        },
                        None => {
                            info!("remote {} has closed connection", handle.addr());
                            return Exit::EndOfStream
                        },
                    }
                }
                _ = handle.failed() => return Exit::WriteFailed,
                _ = self.shutdown_rx.recv() => return Exit::Shutdown,
            }
        }
    }

    // process client disconnection event: release the socket first, then
    // leave the registry, only then is the handle Closed
    async fn process_disconnect(&mut self) {
        self.handle.close().await;
        self.tcp_read.take();

        if self.clients.remove(self.handle.id()).await.is_some() {
            debug!("connection {} deregistered", self.handle.id());
        }
        self.handle.mark_closed();
    }
}
