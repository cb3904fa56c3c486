//! In-memory datasets of JSON-object examples

use super::io;
use anyhow::{anyhow, bail};
use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::{Map, Value};
use std::{fmt::Display, path::Path, str::FromStr};

/// A single example: an ordered map of column name to value.
pub type Example = Map<String, Value>;

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
    Jsonl,
    Parquet,
}

impl DataFormat {
    /// Infer the format from a path's extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| anyhow!("No file extension on {}", path.as_ref().display()))?;
        ext.parse()
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Jsonl => "jsonl",
            DataFormat::Parquet => "parquet",
        }
    }
}

impl FromStr for DataFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "json" => Ok(DataFormat::Json),
            "jsonl" | "ndjson" => Ok(DataFormat::Jsonl),
            "parquet" | "pq" => Ok(DataFormat::Parquet),
            other => Err(anyhow!("Unsupported data format: {other}")),
        }
    }
}

impl Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// An ordered collection of examples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    examples: Vec<Example>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    /// Gets the number of examples in the dataset.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Checks whether the dataset has no examples.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Example> {
        self.examples.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Example> {
        self.examples.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Example> {
        self.examples.iter_mut()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Union of the column names of all examples, in first-seen order.
    pub fn column_names(&self) -> Vec<String> {
        self.examples
            .iter()
            .flat_map(|ex| ex.keys())
            .unique()
            .cloned()
            .collect()
    }

    /// Values of a single column; examples without it contribute `Null`.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.examples
            .iter()
            .map(|ex| ex.get(name).unwrap_or(&Value::Null))
            .collect()
    }

    pub fn map<F>(&self, mut f: F) -> Self
    where
        F: FnMut(Example) -> Example,
    {
        self.examples.iter().cloned().map(&mut f).collect()
    }

    pub fn try_map<F>(&self, f: F) -> anyhow::Result<Self>
    where
        F: FnMut(Example) -> anyhow::Result<Example>,
    {
        let examples = self
            .examples
            .iter()
            .cloned()
            .map(f)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(examples))
    }

    pub fn filter<F>(&self, mut pred: F) -> Self
    where
        F: FnMut(&Example) -> bool,
    {
        self.examples.iter().filter(|ex| pred(ex)).cloned().collect()
    }

    /// Creates a dataset from the examples at the given indices.
    pub fn select(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let examples = indices
            .iter()
            .map(|&idx| {
                self.examples.get(idx).cloned().ok_or_else(|| {
                    anyhow!("Index {idx} out of range for dataset of length {}", self.len())
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(examples))
    }

    /// Returns a shuffled copy. A fixed seed gives a reproducible order.
    pub fn shuffle(&self, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut examples = self.examples.clone();
        examples.shuffle(&mut rng);
        Self::new(examples)
    }

    pub fn head(&self, n: usize) -> Self {
        self.slice(0, n)
    }

    /// Up to `len` examples starting at `start`, clamped to the dataset bounds.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.len());
        let end = start.saturating_add(len).min(self.len());
        Self::new(self.examples[start..end].to_vec())
    }

    pub fn concat(&self, other: &Dataset) -> Self {
        self.examples
            .iter()
            .chain(other.examples.iter())
            .cloned()
            .collect()
    }

    pub fn add_column(&mut self, name: &str, values: Vec<Value>) -> anyhow::Result<()> {
        if values.len() != self.len() {
            bail!(
                "Column `{name}` has {} values but the dataset has {} examples",
                values.len(),
                self.len()
            );
        }
        for (ex, value) in self.examples.iter_mut().zip(values) {
            ex.insert(name.to_string(), value);
        }
        Ok(())
    }

    pub fn remove_columns(&mut self, names: &[&str]) {
        for ex in self.examples.iter_mut() {
            for name in names {
                ex.shift_remove(*name);
            }
        }
    }

    /// Renames a column in every example that has it, keeping its position.
    /// An existing `to` column in such an example is replaced.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        for ex in self.examples.iter_mut() {
            if !ex.contains_key(from) {
                continue;
            }
            let renamed: Example = std::mem::take(ex)
                .into_iter()
                .filter(|(k, _)| k != to)
                .map(|(k, v)| if k == from { (to.to_string(), v) } else { (k, v) })
                .collect();
            *ex = renamed;
        }
    }

    /// Iterates over consecutive batches; the last batch may be shorter.
    pub fn batches(&self, batch_size: usize) -> anyhow::Result<std::slice::Chunks<'_, Example>> {
        if batch_size == 0 {
            bail!("Batch size must be greater than zero");
        }
        Ok(self.examples.chunks(batch_size))
    }

    pub fn to_dict_list(&self) -> Vec<Example> {
        self.examples.clone()
    }

    pub fn into_examples(self) -> Vec<Example> {
        self.examples
    }

    /// Writes the dataset to `path` in the given format.
    pub fn save<P: AsRef<Path>>(&self, path: P, format: DataFormat) -> anyhow::Result<()> {
        io::write_examples(path, &self.examples, format)
    }
}

impl FromIterator<Example> for Dataset {
    fn from_iter<T: IntoIterator<Item = Example>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl From<Vec<Example>> for Dataset {
    fn from(examples: Vec<Example>) -> Self {
        Self::new(examples)
    }
}

impl IntoIterator for Dataset {
    type Item = Example;
    type IntoIter = std::vec::IntoIter<Example>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.into_iter()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Example;
    type IntoIter = std::slice::Iter<'a, Example>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.iter()
    }
}

impl<'a> IntoIterator for &'a mut Dataset {
    type Item = &'a mut Example;
    type IntoIter = std::slice::IterMut<'a, Example>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.iter_mut()
    }
}

impl std::ops::Index<usize> for Dataset {
    type Output = Example;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.examples[idx]
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dataset(num_examples={}, columns=[{}])",
            self.len(),
            self.column_names().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rstest::*;
    use serde_json::json;

    fn example(value: Value) -> Example {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[fixture]
    pub fn dataset() -> Dataset {
        Dataset::new(vec![
            example(json!({"id": 1, "text": "alpha", "category": "tech"})),
            example(json!({"id": 2, "text": "beta", "category": "health"})),
            example(json!({"id": 3, "text": "gamma", "category": "tech", "score": 1.5})),
            example(json!({"id": 4, "text": "delta", "category": "business"})),
            example(json!({"id": 5, "text": "epsilon", "category": "tech"})),
        ])
    }

    #[rstest]
    fn test_column_names_first_seen_order(dataset: Dataset) {
        assert_eq!(
            dataset.column_names(),
            vec!["id", "text", "category", "score"]
        );
    }

    #[rstest]
    fn test_column_missing_values_are_null(dataset: Dataset) {
        let scores = dataset.column("score");
        assert_eq!(scores.len(), 5);
        assert_eq!(scores[0], &Value::Null);
        assert_eq!(scores[2], &json!(1.5));
    }

    #[rstest]
    fn test_filter_and_map(dataset: Dataset) {
        let tech = dataset.filter(|ex| ex["category"] == "tech");
        assert_eq!(tech.len(), 3);

        let upper = tech.map(|mut ex| {
            let text = ex["text"].as_str().unwrap_or_default().to_uppercase();
            ex.insert("text".to_string(), Value::String(text));
            ex
        });
        assert_eq!(upper[0]["text"], "ALPHA");
        // source untouched
        assert_eq!(dataset[0]["text"], "alpha");
    }

    #[rstest]
    fn test_try_map_propagates_error(dataset: Dataset) {
        let result = dataset.try_map(|ex| {
            if ex["id"] == 3 {
                bail!("bad example")
            }
            Ok(ex)
        });
        assert!(result.is_err());
    }

    #[rstest]
    fn test_select(dataset: Dataset) -> Result<()> {
        let selected = dataset.select(&[4, 0])?;
        assert_eq!(selected[0]["id"], 5);
        assert_eq!(selected[1]["id"], 1);
        assert!(dataset.select(&[5]).is_err());
        Ok(())
    }

    #[rstest]
    fn test_shuffle_is_reproducible(dataset: Dataset) {
        let a = dataset.shuffle(Some(42_u64));
        let b = dataset.shuffle(Some(42_u64));
        assert_eq!(a, b);
        assert_eq!(a.len(), dataset.len());
        let mut ids = a.column("id").into_iter().filter_map(|v| v.as_i64()).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[rstest]
    fn test_slice_is_clamped(dataset: Dataset) {
        assert_eq!(dataset.head(2).len(), 2);
        assert_eq!(dataset.slice(3, 10).len(), 2);
        assert!(dataset.slice(10, 2).is_empty());
    }

    #[rstest]
    fn test_add_column_checks_length(mut dataset: Dataset) -> Result<()> {
        assert!(dataset.add_column("flag", vec![json!(true)]).is_err());
        dataset.add_column("flag", vec![json!(true); 5])?;
        assert_eq!(dataset[4]["flag"], true);
        Ok(())
    }

    #[rstest]
    fn test_rename_and_remove_columns(mut dataset: Dataset) {
        dataset.rename_column("text", "content");
        assert_eq!(
            dataset[0].keys().cloned().collect::<Vec<_>>(),
            vec!["id", "content", "category"]
        );
        dataset.remove_columns(&["category", "score"]);
        assert_eq!(dataset.column_names(), vec!["id", "content"]);
    }

    #[rstest]
    fn test_rename_onto_existing_column_replaces_it() {
        let mut dataset = Dataset::new(vec![
            example(json!({"a": 1, "b": 2, "c": 3})),
            example(json!({"b": 4})),
        ]);
        dataset.rename_column("a", "b");
        assert_eq!(Value::Object(dataset[0].clone()), json!({"b": 1, "c": 3}));
        assert_eq!(dataset[0].keys().cloned().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(Value::Object(dataset[1].clone()), json!({"b": 4}));

        dataset.rename_column("c", "c");
        assert_eq!(dataset[0]["c"], 3);
    }

    #[rstest]
    fn test_batches(dataset: Dataset) -> Result<()> {
        let sizes = dataset.batches(2)?.map(|b| b.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(dataset.batches(0).is_err());
        Ok(())
    }

    #[rstest]
    fn test_concat_and_display(dataset: Dataset) {
        let combined = dataset.concat(&dataset.head(1));
        assert_eq!(combined.len(), 6);
        assert_eq!(
            format!("{}", dataset.head(1)),
            "Dataset(num_examples=1, columns=[id, text, category])"
        );
    }

    #[rstest]
    #[case("data.csv", DataFormat::Csv)]
    #[case("data.JSON", DataFormat::Json)]
    #[case("dir/data.ndjson", DataFormat::Jsonl)]
    #[case("data.pq", DataFormat::Parquet)]
    fn test_format_from_path(#[case] path: &str, #[case] expected: DataFormat) -> Result<()> {
        assert_eq!(DataFormat::from_path(path)?, expected);
        Ok(())
    }

    #[rstest]
    fn test_format_from_path_unknown() {
        assert!(DataFormat::from_path("data.xlsx").is_err());
        assert!(DataFormat::from_path("data").is_err());
    }
}
