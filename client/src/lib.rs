pub mod config;
pub mod input_reader;
pub mod client;
