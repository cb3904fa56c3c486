use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use llamadatasets::{
    examples,
    generators::{RandomTextGenerator, TemplateSpec, TemplateTextGenerator, TextGenerator},
    splitters::{RandomSplitter, SplitRatios, Splitter, StratifiedSplitter},
    Client, DataFormat, Dataset, Demo, Settings, VERSION,
};
use log::info;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static EXAMPLE_REGISTRY: LazyLock<HashMap<&'static str, Box<dyn Demo>>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Box<dyn Demo + 'static>> = HashMap::new();
    m.insert("basic_usage", Box::new(examples::basic_usage::EG01));
    m.insert("synthetic_data", Box::new(examples::synthetic_data::EG02));
    m.insert("streaming", Box::new(examples::streaming::EG03));
    m
});

/// CLI
#[derive(Debug, Parser)]
#[command(name = "llamadatasets", version = VERSION)]
#[command(about = "Load, convert, split and generate text datasets.", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show size, columns and the first rows of a dataset
    Info {
        path: PathBuf,
        /// Number of rows to preview
        #[arg(long, default_value_t = 5)]
        head: usize,
    },
    /// Convert a dataset to another file format
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// Output format; inferred from the output extension when omitted
        #[arg(long)]
        to: Option<DataFormat>,
    },
    /// Split a dataset into train, validation and test files
    Split(SplitArgs),
    /// Generate a synthetic dataset
    Generate {
        #[command(subcommand)]
        kind: GenerateKind,
    },
    /// Run a bundled example program
    Example {
        /// The example to run
        id: String,
    },
    /// List bundled example programs
    List,
}

#[derive(Debug, Args)]
struct SplitArgs {
    input: PathBuf,
    out_dir: PathBuf,
    #[arg(long, default_value_t = 0.8)]
    train: f64,
    #[arg(long, default_value_t = 0.1)]
    val: f64,
    #[arg(long, default_value_t = 0.1)]
    test: f64,
    #[arg(long)]
    seed: Option<u64>,
    /// Keep label proportions of this column in every split
    #[arg(long)]
    stratify: Option<String>,
    #[arg(long, default_value_t = DataFormat::Jsonl)]
    format: DataFormat,
}

#[derive(Debug, Subcommand)]
enum GenerateKind {
    /// Texts of random pseudo-words
    Random {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = 100)]
        num: usize,
        #[arg(long, default_value_t = 10)]
        min_words: usize,
        #[arg(long, default_value_t = 50)]
        max_words: usize,
        /// Comma separated category labels
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long)]
        metadata: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Texts filled in from templates described in a JSON file
    Template {
        /// JSON file with `templates`, `variables` and optional `fields`/`seed`
        #[arg(long)]
        spec: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = 100)]
        num: usize,
    },
}

fn preview(dataset: &Dataset, n: usize) -> Table {
    let columns = dataset.column_names();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(columns.clone());
    for ex in dataset.iter().take(n) {
        table.add_row(columns.iter().map(|c| match ex.get(c) {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        }));
    }
    table
}

fn save_inferred(dataset: &Dataset, path: &Path, format: Option<DataFormat>) -> anyhow::Result<()> {
    let format = match format {
        Some(format) => format,
        None => DataFormat::from_path(path)?,
    };
    dataset.save(path, format)?;
    info!("Wrote {} examples to {}", dataset.len(), path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let example_registry = &*EXAMPLE_REGISTRY;
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_ref())?;
    let client = Client::with_settings(settings);

    match cli.command {
        Commands::Info { path, head } => {
            let dataset = client.load(&path)?;
            println!("{}", dataset);
            println!("{}", preview(&dataset, head));
        }
        Commands::Convert { input, output, to } => {
            let dataset = client.load(&input)?;
            save_inferred(&dataset, &output, to)?;
        }
        Commands::Split(args) => {
            let dataset = client.load(&args.input)?;
            let ratios = SplitRatios::new(args.train, args.val, args.test)?;
            let splits = match args.stratify.as_deref() {
                Some(column) => StratifiedSplitter::new(column, ratios, args.seed)?.split(&dataset)?,
                None => RandomSplitter::new(ratios, args.seed)?.split(&dataset)?,
            };
            for (name, split) in splits.iter() {
                let path = args
                    .out_dir
                    .join(format!("{name}.{}", args.format.extension()));
                split.save(&path, args.format)?;
                println!("{name}: {} examples -> {}", split.len(), path.display());
            }
        }
        Commands::Generate { kind } => match kind {
            GenerateKind::Random {
                output,
                num,
                min_words,
                max_words,
                categories,
                metadata,
                seed,
            } => {
                let categories = categories.iter().map(String::as_str).collect::<Vec<_>>();
                let mut generator = RandomTextGenerator::new(min_words, max_words, seed)?
                    .categories(&categories)
                    .include_metadata(metadata);
                save_inferred(&generator.generate(num)?, &output, None)?;
            }
            GenerateKind::Template { spec, output, num } => {
                let contents = std::fs::read_to_string(&spec)
                    .with_context(|| format!("Failed to read {}", spec.display()))?;
                let spec: TemplateSpec = serde_json::from_str(&contents)
                    .with_context(|| format!("Invalid template file {}", spec.display()))?;
                let mut generator = TemplateTextGenerator::from_spec(spec)?;
                save_inferred(&generator.generate(num)?, &output, None)?;
            }
        },
        Commands::Example { id } => {
            let eg = example_registry
                .get(&id[..])
                .ok_or_else(|| anyhow!("Unknown example `{id}`; run `list` to see them"))?;
            eg.main()?
        }
        Commands::List => {
            let mut ids = example_registry.keys().collect::<Vec<_>>();
            ids.sort();
            for id in ids {
                println!("{id:<16} {}", example_registry[id].description());
            }
        }
    }
    Ok(())
}
