pub mod config;
pub mod error;

pub use config::{Config, IdSourceKind, LoggingConfig, WorkerConfig};
pub use error::*;
