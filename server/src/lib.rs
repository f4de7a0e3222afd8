pub mod config;
pub mod error;
pub mod server_types;

pub mod connection;
pub mod registry;
pub mod delivery;

pub mod client_handler;
pub mod server_listener;

pub use config::Config;
pub use error::ServerError;
pub use server_listener::ServerListener;
