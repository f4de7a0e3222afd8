use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use protocol::ChatMessage;

use crate::connection::ConnectionHandle;
use crate::registry::Registry;
use crate::server_types::ConnectionId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

// handles msg delivery back to clients
#[derive(Clone)]
pub struct Delivery {
    registry: Registry,
}

impl Delivery {
    pub fn new(clients: &Registry) -> Self {
        Delivery {
            registry: clients.clone(),
        }
    }

    /// Fan `msg` out to every current recipient except `except`.
    ///
    /// Each recipient is written concurrently and independently; a recipient
    /// whose write fails or times out is marked failed and left for its own
    /// worker to tear down. Nothing here surfaces to the sender.
    pub async fn deliver(&self, msg: &ChatMessage, except: Option<ConnectionId>) -> DeliveryReport {
        // encode once, every recipient shares the same buffer
        match protocol::encode(msg) {
            Ok(frame) => self.deliver_frame(frame, except).await,
            Err(e) => {
                warn!("dropping message that can't be encoded: {}", e);
                DeliveryReport::default()
            },
        }
    }

    async fn deliver_frame(&self, frame: Bytes, except: Option<ConnectionId>) -> DeliveryReport {
        let recipients: Vec<Arc<ConnectionHandle>> = self.registry.snapshot().await
            .into_iter()
            .filter(|h| Some(h.id()) != except) // skip the send to except client id
            .collect();

        let writes = recipients.iter().map(|h| {
            let frame = frame.clone();
            async move { h.write_frame(frame).await }
        });
        let results = join_all(writes).await;

        let mut report = DeliveryReport::default();
        for (h, res) in recipients.iter().zip(results) {
            match res {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("delivery to connection {} failed: {}", h.id(), e);
                    h.mark_failed();
                    report.failed += 1;
                },
            }
        }
        report
    }
}
