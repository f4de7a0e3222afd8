use clap::Parser;
use tokio::signal;

use tracing_subscriber::{fmt, EnvFilter};
use tracing::{info, error};

use server::{Config, ServerListener};

#[tokio::main]
async fn main() -> Result<(), server::ServerError> {
    fmt()
        .compact() // use abbreviated log format
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_ids(true) // display thread id where event happens
        .init(); // set as default subscriber

    let config = Config::parse();

    // a listen socket we can't open is the one fatal error
    let listener = ServerListener::bind(config).await
        .map_err(|e| { error!("{}", e); e })?;

    info!("Listening on {}", listener.local_addr()?);

    listener.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("unable to listen for ctrl-c: {}", e);
        // without a signal handler run until killed
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}
