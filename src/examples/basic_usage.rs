//! Loading, caching, transforming and splitting a small dataset

use super::{sample_dir, CATEGORIES};
use crate::{
    core::{CacheConfig, DataFormat, DataLoader, Dataset, Example},
    splitters::{RandomSplitter, SplitRatios, Splitter},
    transformers::{
        ColumnMapping, StopWordsRemoverTransformer, TextCleanerTransformer, TokenizerTransformer,
        Transformer,
    },
    Demo,
};
use anyhow::Result;
use chrono::Local;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde_json::{json, Value};
use std::{path::Path, time::Duration};

/// Writes 100 rows of flat sample data as CSV.
pub fn create_sample_csv(path: &Path, rng: &mut StdRng) -> Result<()> {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let examples = (1..=100)
        .map(|i| {
            serde_json::from_value::<Example>(json!({
                "id": i,
                "text": format!("This is sample text {i} with some variation and punctuation!!!"),
                "category": CATEGORIES.choose(rng).copied().unwrap_or("tech"),
                "timestamp": now,
                "score": (rng.gen_range(0.0..10.0_f64) * 100.0).round() / 100.0,
            }))
        })
        .collect::<serde_json::Result<Vec<_>>>()?;
    Dataset::new(examples).save(path, DataFormat::Csv)?;
    println!("Created sample CSV file at {}", path.display());
    Ok(())
}

/// Writes 100 records with nested metadata as a JSON array.
pub fn create_sample_json(path: &Path, rng: &mut StdRng) -> Result<()> {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let examples = (1..=100)
        .map(|i| {
            serde_json::from_value::<Example>(json!({
                "id": i,
                "text": format!("This is sample JSON text {i} with more information and details."),
                "category": CATEGORIES.choose(rng).copied().unwrap_or("tech"),
                "timestamp": now,
                "score": (rng.gen_range(0.0..10.0_f64) * 100.0).round() / 100.0,
                "metadata": {
                    "source": "example",
                    "version": "1.0",
                    "tags": ["sample", "demo", "test"],
                },
            }))
        })
        .collect::<serde_json::Result<Vec<_>>>()?;
    Dataset::new(examples).save(path, DataFormat::Json)?;
    println!("Created sample JSON file at {}", path.display());
    Ok(())
}

/// # Basic usage: load, cache, clean, tokenise, filter, split and save
///
/// #### Id
/// basic_usage
///
/// #### CLI command
/// ```sh
/// cargo run example basic_usage
/// ```
pub struct EG01;

impl Demo for EG01 {
    fn description(&self) -> String {
        String::from("Load CSV/JSON files, cache them, run text transformers and split.")
    }

    fn main(&self) -> Result<()> {
        let dir = sample_dir()?;
        let mut rng = StdRng::seed_from_u64(42);
        let csv_file = dir.join("sample.csv");
        let json_file = dir.join("sample.json");
        create_sample_csv(&csv_file, &mut rng)?;
        create_sample_json(&json_file, &mut rng)?;

        // basic csv loading
        let dataset = DataLoader::from_csv(&csv_file).load()?;
        println!("Loaded CSV dataset with {} examples", dataset.len());
        println!("First example: {}", Value::Object(dataset[0].clone()));

        // loading through the cache; a second load is served from disk
        let cache_config = CacheConfig::new(dir.join("cache"), Some(Duration::from_secs(3600)));
        let loader = DataLoader::from_json(&json_file).with_cache(cache_config);
        let dataset = loader.load()?;
        let dataset_again = loader.load()?;
        println!(
            "Loaded JSON dataset with {} examples (cached copy has {})",
            dataset.len(),
            dataset_again.len()
        );

        // transformations
        let cleaner = TextCleanerTransformer::new(ColumnMapping::single("text", Some("cleaned_text")))
            .lower(true)
            .remove_punctuation(true);
        let dataset = cleaner.apply(&dataset)?;
        println!("Cleaned text: {}", dataset[0]["cleaned_text"]);

        let tokenizer = TokenizerTransformer::new(ColumnMapping::single("cleaned_text", Some("tokens")));
        let dataset = tokenizer.apply(&dataset)?;
        println!("Tokens: {}", dataset[0]["tokens"]);

        let remover = StopWordsRemoverTransformer::new("tokens", Some("filtered_tokens"));
        let dataset = remover.apply(&dataset)?;
        println!("Filtered tokens: {}", dataset[0]["filtered_tokens"]);

        // filtering and mapping
        let tech = dataset.filter(|ex| ex.get("category").and_then(Value::as_str) == Some("tech"));
        println!("Tech examples: {}", tech.len());

        let with_counts = dataset.map(|mut ex| {
            let count = ex
                .get("filtered_tokens")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            ex.insert("token_count".to_string(), json!(count));
            ex
        });
        println!("Token count of first example: {}", with_counts[0]["token_count"]);

        // splitting
        let splitter = RandomSplitter::new(SplitRatios::new(0.7, 0.15, 0.15)?, Some(42))?;
        let splits = splitter.split(&with_counts)?;
        for (name, split) in splits.iter() {
            println!("  - {name}: {} examples", split.len());
        }

        // saving
        let output_file = dir.join("processed_data.json");
        splits.train.save(&output_file, DataFormat::Json)?;
        println!("Saved processed training data to {}", output_file.display());
        Ok(())
    }
}
