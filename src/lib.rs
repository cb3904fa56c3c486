//! Loading, caching, streaming, transforming, splitting and generating
//! tabular text datasets.

pub mod client;
pub mod config;
pub mod core;
pub mod examples;
pub mod generators;
pub mod splitters;
pub mod transformers;

pub use client::Client;
pub use config::{Settings, StreamingSettings};
pub use crate::core::{
    CacheConfig, DataFormat, DataLoader, DataSource, Dataset, Example, StreamingDataset,
};

/// Crate version as published in the manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A runnable demo program exposed through the CLI `example` subcommand.
pub trait Demo: Send + Sync {
    fn description(&self) -> String;

    fn main(&self) -> anyhow::Result<()>;
}
