//! Transformer trait and general-purpose transformers

use crate::core::{Dataset, Example};
use anyhow::bail;
use log::debug;
use serde_json::Value;

/// Rewrites examples one at a time.
///
/// Implementors only provide `transform`; batches and datasets are handled
/// by the default methods.
pub trait Transformer: Send + Sync {
    fn name(&self) -> String;

    fn transform(&self, example: Example) -> anyhow::Result<Example>;

    fn batch_transform(&self, batch: Vec<Example>) -> anyhow::Result<Vec<Example>> {
        batch.into_iter().map(|ex| self.transform(ex)).collect()
    }

    /// Transforms every example of `dataset` into a new dataset.
    fn apply(&self, dataset: &Dataset) -> anyhow::Result<Dataset> {
        debug!("Applying {} to {} examples", self.name(), dataset.len());
        dataset.try_map(|ex| self.transform(ex))
    }
}

type ExampleFn = Box<dyn Fn(Example) -> anyhow::Result<Example> + Send + Sync>;

/// Wraps an arbitrary function over examples.
pub struct FunctionTransformer {
    name: String,
    func: ExampleFn,
}

impl FunctionTransformer {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Example) -> Example + Send + Sync + 'static,
    {
        Self::try_new(move |ex| Ok(func(ex)))
    }

    pub fn try_new<F>(func: F) -> Self
    where
        F: Fn(Example) -> anyhow::Result<Example> + Send + Sync + 'static,
    {
        Self {
            name: String::from("FunctionTransformer"),
            func: Box::new(func),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl Transformer for FunctionTransformer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        (self.func)(example)
    }
}

/// Pairs source columns with the columns their results are written to.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    columns: Vec<String>,
    target_columns: Vec<String>,
}

impl ColumnMapping {
    /// Maps each column onto itself.
    pub fn in_place(columns: &[&str]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Self {
            target_columns: columns.clone(),
            columns,
        }
    }

    pub fn new(columns: &[&str], target_columns: &[&str]) -> anyhow::Result<Self> {
        if columns.len() != target_columns.len() {
            bail!(
                "Got {} source columns but {} target columns",
                columns.len(),
                target_columns.len()
            );
        }
        Ok(Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            target_columns: target_columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn single(column: &str, target_column: Option<&str>) -> Self {
        Self {
            columns: vec![column.to_string()],
            target_columns: vec![target_column.unwrap_or(column).to_string()],
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn target_columns(&self) -> &[String] {
        &self.target_columns
    }

    /// Applies `f` to each source value present in `example`.
    ///
    /// Missing source columns are skipped.
    pub fn apply<F>(&self, mut example: Example, f: F) -> anyhow::Result<Example>
    where
        F: Fn(&Value) -> anyhow::Result<Value>,
    {
        for (source, target) in self.columns.iter().zip(self.target_columns.iter()) {
            let Some(value) = example.get(source) else {
                continue;
            };
            let new_value = f(value)?;
            example.insert(target.clone(), new_value);
        }
        Ok(example)
    }
}

type ValueFn = Box<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// Applies a value-level function to selected columns.
pub struct ColumnTransformer {
    mapping: ColumnMapping,
    func: ValueFn,
}

impl ColumnTransformer {
    pub fn new<F>(mapping: ColumnMapping, func: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            mapping,
            func: Box::new(func),
        }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }
}

impl Transformer for ColumnTransformer {
    fn name(&self) -> String {
        format!("ColumnTransformer({})", self.mapping.columns().join(", "))
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.mapping.apply(example, &self.func)
    }
}

/// Runs transformers one after another.
#[derive(Default)]
pub struct ChainTransformer {
    transformers: Vec<Box<dyn Transformer>>,
}

impl ChainTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transformer after all the current ones.
    #[allow(clippy::should_implement_trait)]
    pub fn add<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl Transformer for ChainTransformer {
    fn name(&self) -> String {
        let names = self
            .transformers
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>();
        format!("ChainTransformer[{}]", names.join(" -> "))
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.transformers
            .iter()
            .try_fold(example, |ex, t| t.transform(ex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rstest::*;
    use serde_json::json;

    #[fixture]
    pub fn example() -> Example {
        match json!({"a": 2, "b": "text", "c": [1, 2]}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[fixture]
    pub fn dataset(example: Example) -> Dataset {
        Dataset::new(vec![example.clone(), example])
    }

    #[rstest]
    fn test_function_transformer(dataset: Dataset) -> Result<()> {
        let t = FunctionTransformer::new(|mut ex| {
            let doubled = ex["a"].as_i64().unwrap_or_default() * 2;
            ex.insert("doubled".to_string(), json!(doubled));
            ex
        });
        let out = t.apply(&dataset)?;
        assert_eq!(out[0]["doubled"], 4);
        assert_eq!(out.len(), 2);
        Ok(())
    }

    #[rstest]
    fn test_function_transformer_error(example: Example) {
        let t = FunctionTransformer::try_new(|_| bail!("nope")).with_name("failing");
        assert_eq!(t.name(), "failing");
        assert!(t.transform(example).is_err());
    }

    #[rstest]
    fn test_column_mapping_length_mismatch() {
        assert!(ColumnMapping::new(&["a", "b"], &["x"]).is_err());
    }

    #[rstest]
    fn test_column_transformer_targets_and_missing(example: Example) -> Result<()> {
        let mapping = ColumnMapping::new(&["a", "missing"], &["a_str", "never"])?;
        let t = ColumnTransformer::new(mapping, |v| Ok(Value::String(v.to_string())));
        let out = t.transform(example)?;
        assert_eq!(out["a"], 2);
        assert_eq!(out["a_str"], "2");
        assert!(!out.contains_key("never"));
        Ok(())
    }

    #[rstest]
    fn test_chain_transformer_order(example: Example) -> Result<()> {
        let chain = ChainTransformer::new()
            .add(FunctionTransformer::new(|mut ex| {
                ex.insert("step".to_string(), json!("first"));
                ex
            }))
            .add(FunctionTransformer::new(|mut ex| {
                let prev = ex["step"].as_str().unwrap_or_default().to_string();
                ex.insert("step".to_string(), json!(format!("{prev}-second")));
                ex
            }));
        assert_eq!(chain.len(), 2);
        let out = chain.transform(example.clone())?;
        assert_eq!(out["step"], "first-second");

        let empty = ChainTransformer::new();
        assert_eq!(empty.transform(example.clone())?, example);
        Ok(())
    }

    #[rstest]
    fn test_batch_transform(example: Example) -> Result<()> {
        let t = FunctionTransformer::new(|ex| ex);
        let out = t.batch_transform(vec![example.clone(); 3])?;
        assert_eq!(out.len(), 3);
        Ok(())
    }
}
