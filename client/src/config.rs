use clap::Parser;

/// Terminal client for the message fan-out chat server
#[derive(Parser, Debug, Clone)]
#[command(name = "fanout-client", version, about = "Terminal chat client")]
pub struct ClientConfig {
    /// Server address
    #[arg(long, env = "FANOUT_SERVER", default_value = "127.0.0.1:4412")]
    pub server: String,

    /// Name shown to everyone else
    #[arg(long)]
    pub name: String,

    /// Photo reference obtained from the upload service, sent with every message
    #[arg(long)]
    pub photo: Option<String>,
}
