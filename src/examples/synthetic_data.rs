//! Generating, transforming and splitting synthetic text

use super::sample_dir;
use crate::{
    core::{DataFormat, Dataset},
    generators::{FieldSpec, RandomTextGenerator, TemplateTextGenerator, TextGenerator},
    splitters::{SplitRatios, Splitter, StratifiedSplitter},
    transformers::{ColumnMapping, TextCleanerTransformer, TokenizerTransformer, Transformer},
    Demo,
};
use anyhow::Result;
use chrono::Local;
use itertools::Itertools;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;

fn support_templates() -> Vec<String> {
    [
        "I need help with my {product}. It {issue} and I've tried {solution} but it didn't work.",
        "My {product} {issue}. I've had it for {timeperiod} and this is the first time it happened.",
        "How do I {action} on my {product}? I've looked at the manual but it doesn't cover this.",
        "When I try to {action}, my {product} {issue}. Is this covered by the warranty?",
        "I purchased a {product} {timeperiod} ago and it already {issue}. Can I get a refund?",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

fn support_variables() -> HashMap<String, Vec<String>> {
    let vars: [(&str, &[&str]); 5] = [
        (
            "product",
            &[
                "smartphone", "laptop", "tablet", "smartwatch", "headphones", "TV",
                "game console", "wireless earbuds", "router", "smart speaker",
            ],
        ),
        (
            "issue",
            &[
                "won't turn on", "keeps crashing", "overheats", "has a cracked screen",
                "won't charge", "makes strange noises", "has poor battery life",
                "is extremely slow", "doesn't connect to WiFi", "has display issues",
            ],
        ),
        (
            "solution",
            &[
                "resetting it", "updating the firmware", "replacing the battery",
                "clearing the cache", "reinstalling the operating system",
                "contacting customer support", "checking online forums",
                "following the troubleshooting guide", "asking a friend for help",
            ],
        ),
        (
            "action",
            &[
                "reset the password", "update the software", "connect to Bluetooth",
                "set up cloud backup", "transfer files", "sync with my other devices",
                "activate voice control", "configure parental controls",
                "extend the warranty", "claim the insurance",
            ],
        ),
        (
            "timeperiod",
            &[
                "one week", "a month", "three months", "six months", "a year", "two years",
                "just a few days", "less than a month", "nearly a year",
            ],
        ),
    ];
    vars.iter()
        .map(|(name, values)| {
            (
                name.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}

/// # Synthetic data: random and template generators
///
/// #### Id
/// synthetic_data
///
/// #### CLI command
/// ```sh
/// cargo run example synthetic_data
/// ```
pub struct EG02;

impl Demo for EG02 {
    fn description(&self) -> String {
        String::from("Generate random and template-based text datasets, then split by label.")
    }

    fn main(&self) -> Result<()> {
        let dir = sample_dir()?;

        // random product reviews
        let mut random_generator = RandomTextGenerator::new(10, 100, Some(42))?
            .word_length_range(3, 12)?
            .include_punctuation(true)
            .categories(&["Electronics", "Clothing", "Home", "Beauty", "Sports"])
            .include_metadata(true);
        let mut random_dataset = random_generator.generate(50)?;
        println!("Generated {} random examples", random_dataset.len());
        for ex in random_dataset.iter().take(3) {
            let text = ex["text"].as_str().unwrap_or_default();
            println!("  ({}) {}...", ex["category"], text.chars().take(100).collect::<String>());
        }
        random_dataset.save(dir.join("random_reviews.json"), DataFormat::Json)?;

        // customer support queries from templates
        let today = Local::now().format("%Y-%m-%d").to_string();
        let mut template_generator =
            TemplateTextGenerator::new(support_templates(), support_variables(), Some(123))?
                .field(
                    "priority",
                    FieldSpec::Choices(vec![
                        json!("low"),
                        json!("medium"),
                        json!("high"),
                        json!("urgent"),
                    ]),
                )
                .field(
                    "customer_id",
                    FieldSpec::generator(|rng| json!(format!("CUST-{}", rng.gen_range(10000..=99999)))),
                )
                .field("date_submitted", FieldSpec::Constant(json!(today)))
                .field(
                    "response_time_hours",
                    FieldSpec::generator(|rng| {
                        json!((rng.gen_range(0.0..72.0_f64) * 10.0).round() / 10.0)
                    }),
                );
        let template_dataset = template_generator.generate(100)?;
        println!("Generated {} template-based examples", template_dataset.len());
        for ex in template_dataset.iter().take(3) {
            println!("  (Priority: {}) {}", ex["priority"], ex["text"]);
            println!(
                "    Customer ID: {}, Response Time: {} hours",
                ex["customer_id"], ex["response_time_hours"]
            );
        }

        let cleaner = TextCleanerTransformer::new(ColumnMapping::single("text", Some("cleaned_text")));
        let tokenizer = TokenizerTransformer::new(ColumnMapping::single("cleaned_text", Some("tokens")));
        let mut template_dataset = tokenizer.apply(&cleaner.apply(&template_dataset)?)?;
        let first = &template_dataset[0];
        println!("Original: {}", first["text"]);
        println!("Cleaned: {}", first["cleaned_text"]);

        // stratified split on priority
        let splitter = StratifiedSplitter::new("priority", SplitRatios::new(0.7, 0.15, 0.15)?, Some(42))?;
        let splits = splitter.split(&template_dataset)?;
        for (name, split) in splits.iter() {
            let counts = split
                .iter()
                .filter_map(|ex| ex.get("priority").and_then(Value::as_str))
                .counts();
            let counts = counts
                .iter()
                .sorted()
                .map(|(k, v)| format!("{k}: {v}"))
                .join(", ");
            println!("  {name} split ({} examples): {{{counts}}}", split.len());
        }
        template_dataset.save(dir.join("support_queries.json"), DataFormat::Json)?;

        // combined dataset tagged by source
        for ex in random_dataset.iter_mut() {
            ex.insert("source".to_string(), json!("random"));
        }
        for ex in template_dataset.iter_mut() {
            ex.insert("source".to_string(), json!("template"));
        }
        let combined = Dataset::new(
            random_dataset
                .to_dict_list()
                .into_iter()
                .chain(template_dataset.to_dict_list())
                .collect(),
        );
        let output_file = dir.join("combined_dataset.json");
        combined.save(&output_file, DataFormat::Json)?;
        println!(
            "Saved combined dataset with {} examples to {}",
            combined.len(),
            output_file.display()
        );
        Ok(())
    }
}
