//! Core components: datasets, loaders, streaming and file formats

pub mod dataloader;
pub mod dataset;
pub mod io;
pub mod streaming;

pub use dataloader::{CacheConfig, DataLoader, DataSource};
pub use dataset::{DataFormat, Dataset, Example};
pub use streaming::StreamingDataset;
