pub mod config;
pub mod connection;
pub mod daemon;

pub use config::Config;
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
