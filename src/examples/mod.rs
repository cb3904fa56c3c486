//! Examples
//!
//! Runnable walkthroughs of the library. Each one writes its input and output
//! files under `data/sample_data`.

pub mod basic_usage;
pub mod streaming;
pub mod synthetic_data;

use anyhow::Context;
use std::path::PathBuf;

pub const SAMPLE_DIR: &str = "data/sample_data";

pub(crate) fn sample_dir() -> anyhow::Result<PathBuf> {
    let dir = PathBuf::from(SAMPLE_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

pub(crate) const CATEGORIES: [&str; 4] = ["business", "tech", "health", "entertainment"];
