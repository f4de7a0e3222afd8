use clap::Parser;

use tracing_subscriber::{fmt, EnvFilter};
use tracing::error;

use client::client::{Client, ClientError};
use client::config::ClientConfig;
use client::input_reader::InputReader;

const GREETINGS: &str = "$ Welcome to chat! \n$ Commands: \\quit, \\photo reference";

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    fmt()
        .compact() // use abbreviated log format
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn")))
        .init(); // set as default subscriber

    let config = ClientConfig::parse();

    let client = Client::setup(&config).await
        .map_err(|e| { error!("Unable to connect to server"); e })?;

    println!("{}", GREETINGS);
    client.run(InputReader::new()).await
}
