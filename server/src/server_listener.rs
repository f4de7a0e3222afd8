use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::broadcast::{self, Sender};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use tracing::{info, debug, warn, error};

use protocol::ChatCodec;

use crate::client_handler::ClientHandler;
use crate::config::Config;
use crate::connection::ConnectionHandle;
use crate::delivery::Delivery;
use crate::error::{Result, ServerError};
use crate::registry::Registry;
use crate::server_types::ConnectionId;

const COUNTER_SEED: u64 = 1;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the listen socket and the accept loop; spawns one worker per client.
pub struct ServerListener {
    listener: TcpListener,
    config: Config,
    codec: ChatCodec,
    clients: Registry,
    outgoing: Delivery,
    shutdown_tx: Sender<()>,
    counter: u64,
}

impl ServerListener {

    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.addr();
        info!("Server starting.. {:?}", &addr);

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => return Err(ServerError::Bind { addr, source }),
        };

        let clients = Registry::new(config.max_connections);
        let outgoing = Delivery::new(&clients);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(ServerListener {
            listener,
            codec: ChatCodec::new(config.max_field_len),
            config,
            clients,
            outgoing,
            shutdown_tx,
            counter: COUNTER_SEED,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Registry {
        self.clients.clone()
    }

    /// Accept clients until `shutdown` resolves, then shut every connection
    /// down in order.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut workers = JoinSet::new();

        loop {
            select! {
                res = self.listener.accept() => {
                    match res {
                        Ok((tcp_socket, addr)) => self.accept(tcp_socket, addr, &mut workers),
                        Err(e) => {
                            // typically fd exhaustion, not worth dying over
                            warn!("accept failed: {}", e);
                            sleep(ACCEPT_BACKOFF).await;
                        },
                    }
                }
                Some(res) = workers.join_next() => {
                    if let Err(e) = res {
                        error!("connection worker panicked: {}", e);
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        self.shutdown(workers).await;
        Ok(())
    }

    fn accept(&mut self, tcp_socket: TcpStream, addr: SocketAddr, workers: &mut JoinSet<()>) {
        if let Err(e) = tcp_socket.set_nodelay(true) {
            debug!("unable to set nodelay for {}: {}", addr, e);
        }

        let id = ConnectionId::new(self.counter); // establish unique id for client
        self.counter += 1;

        info!("Server received new client connection {} from {:?}", id, &addr);

        let (tcp_read, tcp_write) = tcp_socket.into_split();
        let handle = Arc::new(ConnectionHandle::new(id, addr, tcp_write, self.codec,
                                                    self.config.write_timeout()));

        let worker = ClientHandler::new(handle, tcp_read, self.codec, self.clients.clone(),
                                        self.outgoing.clone(), self.shutdown_tx.subscribe(),
                                        self.config.echo);
        workers.spawn(worker.run());
    }

    // Stop accepting and signal every worker. Each registered worker sends
    // the final notice and closes its own connection, including one that
    // registers after the signal went out, since its receiver already holds it.
    async fn shutdown(self, mut workers: JoinSet<()>) {
        drop(self.listener);
        info!("Server shutting down, {} connections open", self.clients.len().await);

        // no receivers just means no workers are left
        let _ = self.shutdown_tx.send(());

        let drain = async {
            while let Some(res) = workers.join_next().await {
                if let Err(e) = res {
                    error!("connection worker panicked: {}", e);
                }
            }
        };
        if timeout(self.config.shutdown_grace(), drain).await.is_err() {
            warn!("workers still running after shutdown grace period, aborting");
            workers.abort_all();
        }
        info!("Server stopped");
    }
}
