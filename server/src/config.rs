use std::time::Duration;

use clap::Parser;
use protocol::DEFAULT_MAX_FIELD_LEN;

/// Message fan-out chat server
#[derive(Parser, Debug, Clone)]
#[command(name = "fanout-server", version, about = "Message fan-out chat server")]
pub struct Config {
    /// Bind address
    #[arg(long, env = "FANOUT_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, env = "FANOUT_PORT", default_value_t = 4412)]
    pub port: u16,

    /// Connections beyond this are accepted and closed straight away
    #[arg(long, env = "FANOUT_MAX_CONNECTIONS", default_value_t = 1024)]
    pub max_connections: usize,

    /// Largest length a single frame field may declare, in bytes
    #[arg(long, env = "FANOUT_MAX_FIELD_LEN", default_value_t = DEFAULT_MAX_FIELD_LEN)]
    pub max_field_len: usize,

    /// Upper bound on one frame write to one recipient
    #[arg(long, env = "FANOUT_WRITE_TIMEOUT_MS", default_value_t = 2000)]
    pub write_timeout_ms: u64,

    /// How long shutdown waits for connection workers to finish
    #[arg(long, env = "FANOUT_SHUTDOWN_GRACE_MS", default_value_t = 5000)]
    pub shutdown_grace_ms: u64,

    /// Also deliver each message back to its sender
    #[arg(long, env = "FANOUT_ECHO")]
    pub echo: bool,
}

impl Config {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_owned(),
            port: 4412,
            max_connections: 1024,
            max_field_len: DEFAULT_MAX_FIELD_LEN,
            write_timeout_ms: 2000,
            shutdown_grace_ms: 5000,
            echo: false,
        }
    }
}
