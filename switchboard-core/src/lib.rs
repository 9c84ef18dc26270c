pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod store;

pub use config::SwitchboardConfig;
pub use error::{ErrorKind, SwitchboardError};
pub use store::Store;
