//! Train / validation / test splitting strategies

use crate::core::{Dataset, Example};
use anyhow::{anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::Value;
use std::{cmp::Ordering, collections::BTreeMap};

const RATIO_TOLERANCE: f64 = 1e-6;

/// Fractions of a dataset assigned to each split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, val: f64, test: f64) -> anyhow::Result<Self> {
        let ratios = Self { train, val, test };
        ratios.validate()?;
        Ok(ratios)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, r) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&r) {
                bail!("{name} fraction must be within [0, 1], got {r}");
            }
        }
        let total = self.train + self.val + self.test;
        if (total - 1.0).abs() > RATIO_TOLERANCE {
            bail!("Split fractions must sum to 1, got {total}");
        }
        Ok(())
    }

    /// Sizes of (train, val, test) for `n` items.
    pub fn sizes(&self, n: usize) -> (usize, usize, usize) {
        let n_train = ((n as f64 * self.train).floor() as usize).min(n);
        let n_val = ((n as f64 * self.val).floor() as usize).min(n - n_train);
        (n_train, n_val, n - n_train - n_val)
    }

    /// Cuts an ordered list of indices into three contiguous parts.
    fn partition<T: Clone>(&self, items: &[T]) -> (Vec<T>, Vec<T>, Vec<T>) {
        let (n_train, n_val, _) = self.sizes(items.len());
        let (train, rest) = items.split_at(n_train);
        let (val, test) = rest.split_at(n_val);
        (train.to_vec(), val.to_vec(), test.to_vec())
    }
}

/// The split an example is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

/// The result of splitting a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Splits {
    pub train: Dataset,
    pub val: Dataset,
    pub test: Dataset,
}

impl Splits {
    pub fn get(&self, name: &str) -> Option<&Dataset> {
        match name {
            "train" => Some(&self.train),
            "val" | "validation" => Some(&self.val),
            "test" => Some(&self.test),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Dataset)> {
        [
            (Split::Train.as_str(), &self.train),
            (Split::Val.as_str(), &self.val),
            (Split::Test.as_str(), &self.test),
        ]
        .into_iter()
    }

    pub fn total_len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    fn from_indices(
        dataset: &Dataset,
        (train, val, test): (Vec<usize>, Vec<usize>, Vec<usize>),
    ) -> anyhow::Result<Self> {
        debug!(
            "Split {} examples into train={}, val={}, test={}",
            dataset.len(),
            train.len(),
            val.len(),
            test.len()
        );
        Ok(Self {
            train: dataset.select(&train)?,
            val: dataset.select(&val)?,
            test: dataset.select(&test)?,
        })
    }
}

/// Partitions a dataset into train, validation and test sets.
pub trait Splitter {
    fn split(&self, dataset: &Dataset) -> anyhow::Result<Splits>;
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Canonical text for grouping by a column value.
fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required<'a>(example: &'a Example, column: &str, idx: usize) -> anyhow::Result<&'a Value> {
    example
        .get(column)
        .ok_or_else(|| anyhow!("Example {idx} is missing column `{column}`"))
}

/// Shuffles (optionally) and cuts the dataset by the ratios.
#[derive(Debug, Clone)]
pub struct RandomSplitter {
    ratios: SplitRatios,
    seed: Option<u64>,
    shuffle: bool,
}

impl RandomSplitter {
    pub fn new(ratios: SplitRatios, seed: Option<u64>) -> anyhow::Result<Self> {
        ratios.validate()?;
        Ok(Self {
            ratios,
            seed,
            shuffle: true,
        })
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

impl Splitter for RandomSplitter {
    fn split(&self, dataset: &Dataset) -> anyhow::Result<Splits> {
        let mut indices = (0..dataset.len()).collect::<Vec<_>>();
        if self.shuffle {
            indices.shuffle(&mut rng_from(self.seed));
        }
        Splits::from_indices(dataset, self.ratios.partition(&indices))
    }
}

/// Keeps the label distribution of each split close to the whole dataset.
#[derive(Debug, Clone)]
pub struct StratifiedSplitter {
    label_column: String,
    ratios: SplitRatios,
    seed: Option<u64>,
}

impl StratifiedSplitter {
    pub fn new(label_column: &str, ratios: SplitRatios, seed: Option<u64>) -> anyhow::Result<Self> {
        ratios.validate()?;
        Ok(Self {
            label_column: label_column.to_string(),
            ratios,
            seed,
        })
    }
}

impl Splitter for StratifiedSplitter {
    fn split(&self, dataset: &Dataset) -> anyhow::Result<Splits> {
        let mut by_label: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, example) in dataset.iter().enumerate() {
            let label = required(example, &self.label_column, idx)?;
            by_label.entry(value_key(label)).or_default().push(idx);
        }

        let mut rng = rng_from(self.seed);
        let (mut train, mut val, mut test) = (vec![], vec![], vec![]);
        for (label, mut indices) in by_label {
            indices.shuffle(&mut rng);
            let (tr, va, te) = self.ratios.partition(&indices);
            debug!(
                "Label `{label}`: train={}, val={}, test={}",
                tr.len(),
                va.len(),
                te.len()
            );
            train.extend(tr);
            val.extend(va);
            test.extend(te);
        }
        // mix labels within each split
        train.shuffle(&mut rng);
        val.shuffle(&mut rng);
        test.shuffle(&mut rng);
        Splits::from_indices(dataset, (train, val, test))
    }
}

/// A sortable view of a time column value.
#[derive(Debug, Clone, PartialEq)]
enum TimeKey {
    Number(f64),
    Text(String),
}

impl TimeKey {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => TimeKey::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => match parse_timestamp(s) {
                Some(ts) => TimeKey::Number(ts),
                None => TimeKey::Text(s.clone()),
            },
            other => TimeKey::Text(other.to_string()),
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (TimeKey::Number(a), TimeKey::Number(b)) => a.total_cmp(b),
            (TimeKey::Number(_), TimeKey::Text(_)) => Ordering::Less,
            (TimeKey::Text(_), TimeKey::Number(_)) => Ordering::Greater,
            (TimeKey::Text(a), TimeKey::Text(b)) => a.cmp(b),
        }
    }
}

/// Seconds since the epoch (with fractions) for common timestamp layouts.
fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_micros() as f64 / 1e6);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_micros() as f64 / 1e6);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp() as f64)
}

/// Orders examples by a time column and cuts contiguous ranges, so that
/// training data precedes validation and test data.
#[derive(Debug, Clone)]
pub struct TimeSplitter {
    time_column: String,
    ratios: SplitRatios,
    ascending: bool,
}

impl TimeSplitter {
    pub fn new(time_column: &str, ratios: SplitRatios) -> anyhow::Result<Self> {
        ratios.validate()?;
        Ok(Self {
            time_column: time_column.to_string(),
            ratios,
            ascending: true,
        })
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }
}

impl Splitter for TimeSplitter {
    fn split(&self, dataset: &Dataset) -> anyhow::Result<Splits> {
        let mut keyed = dataset
            .iter()
            .enumerate()
            .map(|(idx, ex)| {
                required(ex, &self.time_column, idx).map(|v| (idx, TimeKey::from_value(v)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        keyed.sort_by(|(_, a), (_, b)| {
            if self.ascending {
                a.cmp(b)
            } else {
                b.cmp(a)
            }
        });
        let indices = keyed.into_iter().map(|(idx, _)| idx).collect::<Vec<_>>();
        Splits::from_indices(dataset, self.ratios.partition(&indices))
    }
}

/// Assigns whole groups to splits, so no group value appears in two splits.
#[derive(Debug, Clone)]
pub struct GroupSplitter {
    group_column: String,
    ratios: SplitRatios,
    seed: Option<u64>,
}

impl GroupSplitter {
    pub fn new(group_column: &str, ratios: SplitRatios, seed: Option<u64>) -> anyhow::Result<Self> {
        ratios.validate()?;
        Ok(Self {
            group_column: group_column.to_string(),
            ratios,
            seed,
        })
    }
}

impl Splitter for GroupSplitter {
    fn split(&self, dataset: &Dataset) -> anyhow::Result<Splits> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, example) in dataset.iter().enumerate() {
            let group = required(example, &self.group_column, idx)?;
            groups.entry(value_key(group)).or_default().push(idx);
        }

        let mut keys = groups.keys().cloned().collect::<Vec<_>>();
        keys.shuffle(&mut rng_from(self.seed));
        let (train_keys, val_keys, test_keys) = self.ratios.partition(&keys);

        let collect = |keys: Vec<String>| {
            let mut indices = keys
                .iter()
                .flat_map(|k| groups.get(k).cloned().unwrap_or_default())
                .collect::<Vec<_>>();
            indices.sort_unstable();
            indices
        };
        Splits::from_indices(
            dataset,
            (collect(train_keys), collect(val_keys), collect(test_keys)),
        )
    }
}

type AssignFn = Box<dyn Fn(&Example, usize) -> anyhow::Result<Split> + Send + Sync>;

/// Delegates the split assignment of every example to a closure.
pub struct CustomSplitter {
    assign: AssignFn,
}

impl CustomSplitter {
    pub fn new<F>(assign: F) -> Self
    where
        F: Fn(&Example, usize) -> anyhow::Result<Split> + Send + Sync + 'static,
    {
        Self {
            assign: Box::new(assign),
        }
    }
}

impl Splitter for CustomSplitter {
    fn split(&self, dataset: &Dataset) -> anyhow::Result<Splits> {
        let (mut train, mut val, mut test) = (vec![], vec![], vec![]);
        for (idx, example) in dataset.iter().enumerate() {
            match (self.assign)(example, idx)? {
                Split::Train => train.push(idx),
                Split::Val => val.push(idx),
                Split::Test => test.push(idx),
            }
        }
        Splits::from_indices(dataset, (train, val, test))
    }
}
