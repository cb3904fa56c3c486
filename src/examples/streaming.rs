//! Streaming a large CSV file in chunks

use super::{sample_dir, CATEGORIES};
use crate::{
    core::{DataFormat, DataLoader, Example},
    transformers::{FunctionTransformer, Transformer},
    Demo,
};
use anyhow::{Context, Result};
use chrono::Local;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde_json::{json, Value};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::Instant,
};

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Roughly normal sample via the sum of twelve uniforms.
fn normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let z: f64 = (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0;
    mean + std * z
}

/// Writes `num_rows` rows to `path` without holding them in memory.
pub fn create_large_csv(path: &Path, num_rows: usize) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "id,text,category,timestamp,value1,value2,value3")?;
    for i in 1..=num_rows {
        writeln!(
            writer,
            "{i},This is sample text {i} for streaming example with some random content {:.6},{},{now},{},{},{}",
            rng.gen::<f64>(),
            CATEGORIES.choose(&mut rng).copied().unwrap_or("tech"),
            round2(normal(&mut rng, 100.0, 15.0)),
            round2(normal(&mut rng, 50.0, 10.0)),
            round2(normal(&mut rng, 25.0, 5.0)),
        )?;
    }
    writer.flush()?;
    println!("Created large CSV file with {num_rows} rows at {}", path.display());
    Ok(())
}

fn add_avg_value(mut example: Example) -> Example {
    let sum: f64 = ["value1", "value2", "value3"]
        .iter()
        .filter_map(|k| example.get(*k).and_then(Value::as_f64))
        .sum();
    example.insert("avg_value".to_string(), json!(sum / 3.0));
    example
}

/// # Streaming: iterate, batch and sample a large CSV file
///
/// #### Id
/// streaming
///
/// #### CLI command
/// ```sh
/// cargo run example streaming
/// ```
pub struct EG03;

impl Demo for EG03 {
    fn description(&self) -> String {
        String::from("Compare full loading with chunked streaming over a 50k row CSV file.")
    }

    fn main(&self) -> Result<()> {
        let dir = sample_dir()?;
        let csv_file = dir.join("large_sample.csv");
        create_large_csv(&csv_file, 50_000)?;

        // full load
        let start = Instant::now();
        let dataset = DataLoader::from_csv(&csv_file).load()?;
        println!(
            "Loaded {} examples in {:.2} seconds",
            dataset.len(),
            start.elapsed().as_secs_f64()
        );

        // streaming
        let start = Instant::now();
        let stream = DataLoader::from_csv(&csv_file).with_chunk_size(1000).stream()?;
        let count = stream.count()?;
        println!(
            "Streamed {count} examples in {:.2} seconds",
            start.elapsed().as_secs_f64()
        );

        // batches through a transformer
        let transformer = FunctionTransformer::new(add_avg_value).with_name("avg_value");
        let start = Instant::now();
        let mut example_count = 0_usize;
        let mut sum_avg_value = 0_f64;
        for (i, batch) in stream.iter_batches(1000)?.enumerate() {
            let transformed = transformer.batch_transform(batch?)?;
            for ex in transformed.iter() {
                example_count += 1;
                sum_avg_value += ex["avg_value"].as_f64().unwrap_or(0.0);
            }
            if (i + 1) % 10 == 0 {
                println!("  Processed {example_count} examples so far...");
            }
        }
        let avg_of_avgs = if example_count > 0 {
            sum_avg_value / example_count as f64
        } else {
            0.0
        };
        println!(
            "Processed {example_count} examples in {:.2} seconds, mean avg_value {avg_of_avgs:.2}",
            start.elapsed().as_secs_f64()
        );

        // inspection
        for (i, ex) in stream.head(5)?.iter().enumerate() {
            println!("  Example {}: id={}, category={}", i + 1, ex["id"], ex["category"]);
        }

        // materialise a subset
        let small = stream.to_dataset(Some(1000))?;
        let output_file = dir.join("sample_subset.json");
        small.save(&output_file, DataFormat::Json)?;
        println!("Saved {} examples to {}", small.len(), output_file.display());
        Ok(())
    }
}
