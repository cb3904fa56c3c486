//! High-level entry point bundling settings and the default text pipeline

use crate::{
    config::Settings,
    core::{DataLoader, Dataset, Example},
    transformers::{
        ChainTransformer, ColumnMapping, StopWordsRemoverTransformer, TextCleanerTransformer,
        TokenizerTransformer, Transformer,
    },
};
use serde_json::Value;
use std::path::Path;

pub struct Client {
    settings: Settings,
    pipeline: ChainTransformer,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let pipeline = ChainTransformer::new()
            .add(TextCleanerTransformer::new(ColumnMapping::single(
                "text",
                Some("cleaned_text"),
            )))
            .add(TokenizerTransformer::new(ColumnMapping::single(
                "cleaned_text",
                Some("tokens"),
            )))
            .add(StopWordsRemoverTransformer::new(
                "tokens",
                Some("filtered_tokens"),
            ));
        Self { settings, pipeline }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs `input` through cleaning, tokenisation and stop-word removal.
    ///
    /// The returned example holds `text`, `cleaned_text`, `tokens` and
    /// `filtered_tokens`.
    pub fn process(&self, input: &str) -> anyhow::Result<Example> {
        let mut example = Example::new();
        example.insert("text".to_string(), Value::String(input.to_string()));
        self.pipeline.transform(example)
    }

    /// Loads a file, inferring its format from the extension, through the
    /// configured cache.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<Dataset> {
        DataLoader::from_path(path)?
            .with_cache(self.settings.cache.clone())
            .with_chunk_size(self.settings.streaming.chunk_size)
            .load()
    }
}
