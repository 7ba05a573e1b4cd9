//! Configuration management: connection options and per-source definitions.

mod connection;
mod source;

pub use connection::ConnectionConfig;
pub use source::{CloudWatchSourceConfig, CollectionConfig, S3SourceConfig, SourceConfig};
