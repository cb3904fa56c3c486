//! Reading and writing examples in the supported formats
//!
//! CSV and Parquet go through polars; JSON and JSON Lines through serde_json.

use super::dataset::{DataFormat, Example};
use anyhow::{anyhow, bail, Context};
use log::info;
use polars::prelude::*;
use serde_json::{Number, Value};
use std::{
    collections::BTreeMap,
    fs::{create_dir_all, read_to_string, File},
    io::{BufWriter, Cursor, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Read all examples from `path`.
pub fn read_examples<P: AsRef<Path>>(path: P, format: DataFormat) -> anyhow::Result<Vec<Example>> {
    let path = path.as_ref();
    let examples = match format {
        DataFormat::Csv => frame_to_examples(&read_csv(path)?)?,
        DataFormat::Parquet => frame_to_examples(&read_parquet(path)?)?,
        DataFormat::Json => {
            let json_str = read_to_string(path)
                .with_context(|| format!("Unable to read {}", path.display()))?;
            parse_json_array(&json_str)?
        }
        DataFormat::Jsonl => {
            let json_str = read_to_string(path)
                .with_context(|| format!("Unable to read {}", path.display()))?;
            parse_json_lines(&json_str)?
        }
    };
    info!(
        "Read {} examples from {} ({format})",
        examples.len(),
        path.display()
    );
    Ok(examples)
}

pub fn read_csv(path: &Path) -> anyhow::Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Unable to open {}", path.display()))?
        .finish()?;
    Ok(df)
}

pub fn read_parquet(path: &Path) -> anyhow::Result<DataFrame> {
    let mut file =
        File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    let df = ParquetReader::new(&mut file).finish()?;
    Ok(df)
}

/// Parse a top-level JSON array of objects.
pub fn parse_json_array(json_str: &str) -> anyhow::Result<Vec<Example>> {
    let value: Value = serde_json::from_str(json_str)?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| into_example(item, &format!("element {idx}")))
            .collect(),
        _ => Err(anyhow!("Expected a JSON array of objects")),
    }
}

/// Parse JSON Lines, skipping blank lines.
pub fn parse_json_lines(json_str: &str) -> anyhow::Result<Vec<Example>> {
    json_str
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_json_line(line, idx))
        .collect()
}

pub fn parse_json_line(line: &str, idx: usize) -> anyhow::Result<Example> {
    let value: Value = serde_json::from_str(line)
        .with_context(|| format!("Invalid JSON on line {}", idx + 1))?;
    into_example(value, &format!("line {}", idx + 1))
}

fn into_example(value: Value, location: &str) -> anyhow::Result<Example> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("Expected an object on {location}, found `{other}`")),
    }
}

/// Convert every row of a DataFrame into an example.
pub fn frame_to_examples(df: &DataFrame) -> anyhow::Result<Vec<Example>> {
    let names = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect::<Vec<_>>();
    let mut examples = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let row = df.get_row(idx)?;
        let example: Example = names
            .iter()
            .cloned()
            .zip(row.0.iter().map(any_value_to_json))
            .collect();
        examples.push(example);
    }
    Ok(examples)
}

fn float_to_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

pub fn any_value_to_json(value: &AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::UInt8(v) => Value::from(*v),
        AnyValue::UInt16(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        AnyValue::Int8(v) => Value::from(*v),
        AnyValue::Int16(v) => Value::from(*v),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::Float32(v) => float_to_json(*v as f64),
        AnyValue::Float64(v) => float_to_json(*v),
        AnyValue::List(series) => Value::Array(
            (0..series.len())
                .filter_map(|i| series.get(i).ok())
                .map(|v| any_value_to_json(&v))
                .collect(),
        ),
        AnyValue::Struct(_, _, fields) => fields
            .iter()
            .zip(value._iter_struct_av())
            .map(|(field, v)| (field.name().to_string(), any_value_to_json(&v)))
            .collect::<Example>()
            .into(),
        AnyValue::StructOwned(payload) => {
            let (values, fields) = &**payload;
            fields
                .iter()
                .zip(values.iter())
                .map(|(field, v)| (field.name().to_string(), any_value_to_json(v)))
                .collect::<Example>()
                .into()
        }
        other => Value::String(other.to_string()),
    }
}

/// JSON type of a column merged over all rows; `Mixed` marks a conflict
/// polars would silently resolve to null.
#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Null,
    Bool,
    Number,
    String,
    List(Box<Shape>),
    Object(BTreeMap<String, Shape>),
    Mixed,
}

impl Shape {
    fn of(value: &Value) -> Shape {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(_) => Shape::Number,
            Value::String(_) => Shape::String,
            Value::Array(items) => Shape::List(Box::new(
                items
                    .iter()
                    .fold(Shape::Null, |acc, item| acc.merge(Shape::of(item))),
            )),
            Value::Object(map) => {
                Shape::Object(map.iter().map(|(k, v)| (k.clone(), Shape::of(v))).collect())
            }
        }
    }

    fn merge(self, other: Shape) -> Shape {
        match (self, other) {
            (Shape::Null, s) | (s, Shape::Null) => s,
            (Shape::List(a), Shape::List(b)) => Shape::List(Box::new(a.merge(*b))),
            (Shape::Object(mut a), Shape::Object(b)) => {
                for (key, shape) in b {
                    let merged = match a.remove(&key) {
                        Some(existing) => existing.merge(shape),
                        None => shape,
                    };
                    a.insert(key, merged);
                }
                Shape::Object(a)
            }
            (a, b) if a == b => a,
            _ => Shape::Mixed,
        }
    }

    fn is_mixed(&self) -> bool {
        match self {
            Shape::Mixed => true,
            Shape::List(inner) => inner.is_mixed(),
            Shape::Object(fields) => fields.values().any(Shape::is_mixed),
            _ => false,
        }
    }
}

/// Columns whose values do not share one JSON type, in first-seen order.
fn mixed_columns(examples: &[Example]) -> Vec<String> {
    let mut order: Vec<String> = vec![];
    let mut shapes: BTreeMap<String, Shape> = BTreeMap::new();
    for example in examples {
        for (key, value) in example {
            let shape = match shapes.remove(key) {
                Some(existing) => existing.merge(Shape::of(value)),
                None => {
                    order.push(key.clone());
                    Shape::of(value)
                }
            };
            shapes.insert(key.clone(), shape);
        }
    }
    order
        .into_iter()
        .filter(|key| shapes.get(key).is_some_and(Shape::is_mixed))
        .collect()
}

fn flatten_value(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        _ => value.clone(),
    }
}

fn value_as_text(value: &Value) -> Value {
    match value {
        Value::Null | Value::String(_) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

/// Build a DataFrame from examples by round-tripping through JSON Lines.
///
/// With `flatten_nested` arrays and objects are stored as their JSON text,
/// which CSV requires, and columns mixing value types are stored as text.
/// Without it a column mixing value types is an error.
pub fn examples_to_frame(examples: &[Example], flatten_nested: bool) -> anyhow::Result<DataFrame> {
    if examples.is_empty() {
        return Ok(DataFrame::empty());
    }
    let flat;
    let examples = if flatten_nested {
        flat = examples
            .iter()
            .map(|example| {
                example
                    .iter()
                    .map(|(k, v)| (k.clone(), flatten_value(v)))
                    .collect::<Example>()
            })
            .collect::<Vec<_>>();
        &flat[..]
    } else {
        examples
    };

    let mixed = mixed_columns(examples);
    if !mixed.is_empty() && !flatten_nested {
        bail!(
            "Columns with more than one value type cannot be stored: {}",
            mixed.join(", ")
        );
    }

    let mut buf = Vec::new();
    for example in examples {
        if mixed.is_empty() {
            serde_json::to_writer(&mut buf, example)?;
        } else {
            let row: Example = example
                .iter()
                .map(|(k, v)| {
                    let v = if mixed.contains(k) { value_as_text(v) } else { v.clone() };
                    (k.clone(), v)
                })
                .collect();
            serde_json::to_writer(&mut buf, &row)?;
        }
        buf.push(b'\n');
    }
    let df = JsonReader::new(Cursor::new(buf))
        .with_json_format(JsonFormat::JsonLines)
        .infer_schema_len(None)
        .finish()?;
    Ok(df)
}

/// Write examples to `path`, creating parent directories as needed.
///
/// Output goes to a temporary file in the same directory which replaces
/// `path` only once fully written, so a failed write leaves any existing
/// file untouched.
pub fn write_examples<P: AsRef<Path>>(
    path: P,
    examples: &[Example],
    format: DataFormat,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if format == DataFormat::Parquet && examples.is_empty() {
        bail!("Cannot write an empty dataset to parquet");
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    create_dir_all(&dir).with_context(|| format!("Unable to create {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Unable to create a temporary file in {}", dir.display()))?;

    match format {
        DataFormat::Json => {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, examples)?;
            writer.flush()?;
        }
        DataFormat::Jsonl => {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for example in examples {
                serde_json::to_writer(&mut writer, example)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        DataFormat::Csv => {
            let mut df = examples_to_frame(examples, true)?;
            CsvWriter::new(tmp.as_file_mut()).finish(&mut df)?;
        }
        DataFormat::Parquet => {
            let mut df = examples_to_frame(examples, false)?;
            ParquetWriter::new(tmp.as_file_mut()).finish(&mut df)?;
        }
    }
    tmp.persist(path)
        .with_context(|| format!("Unable to create {}", path.display()))?;
    info!(
        "Wrote {} examples to {} ({format})",
        examples.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rstest::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[fixture]
    pub fn examples() -> Vec<Example> {
        parse_json_array(
            r#"[
                {"id": 1, "text": "hello world", "score": 0.5, "tags": ["a", "b"]},
                {"id": 2, "text": "goodbye", "score": 1.25, "tags": ["c"]}
            ]"#,
        )
        .unwrap()
    }

    #[rstest]
    fn test_parse_json_array_rejects_non_objects() {
        assert!(parse_json_array("[1, 2]").is_err());
        assert!(parse_json_array(r#"{"a": 1}"#).is_err());
    }

    #[rstest]
    fn test_parse_json_lines_skips_blank_lines() -> Result<()> {
        let examples = parse_json_lines("{\"a\": 1}\n\n  \n{\"a\": 2}\n")?;
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1]["a"], 2);
        Ok(())
    }

    #[rstest]
    fn test_parse_json_lines_reports_line() {
        let err = parse_json_lines("{\"a\": 1}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[rstest]
    fn test_json_file_roundtrip(examples: Vec<Example>) -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("data.json");
        write_examples(&path, &examples, DataFormat::Json)?;
        let loaded = read_examples(&path, DataFormat::Json)?;
        assert_eq!(loaded, examples);
        Ok(())
    }

    #[rstest]
    fn test_csv_flattens_nested_values(examples: Vec<Example>) -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        write_examples(&path, &examples, DataFormat::Csv)?;
        let loaded = read_examples(&path, DataFormat::Csv)?;

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0]["id"], 1);
        assert_eq!(loaded[0]["text"], "hello world");
        assert_eq!(loaded[1]["score"], 1.25);
        assert_eq!(loaded[0]["tags"], json!(r#"["a","b"]"#));
        Ok(())
    }

    #[rstest]
    fn test_parquet_keeps_lists(examples: Vec<Example>) -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.parquet");
        write_examples(&path, &examples, DataFormat::Parquet)?;
        let loaded = read_examples(&path, DataFormat::Parquet)?;

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1]["text"], "goodbye");
        assert_eq!(loaded[0]["tags"], json!(["a", "b"]));
        Ok(())
    }

    #[rstest]
    fn test_parse_json_lines_reports_non_object_line() {
        let err = parse_json_lines("{\"a\": 1}\n[1, 2]\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
        let err = parse_json_array(r#"[{"a": 1}, 3]"#).unwrap_err();
        assert!(err.to_string().contains("element 1"), "{err}");
    }

    #[fixture]
    pub fn mixed_examples() -> Vec<Example> {
        parse_json_array(r#"[{"id": 1, "v": 7}, {"id": "x2", "v": "seven"}]"#).unwrap()
    }

    #[rstest]
    fn test_csv_stores_mixed_columns_as_text(mixed_examples: Vec<Example>) -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("mixed.csv");
        write_examples(&path, &mixed_examples, DataFormat::Csv)?;
        let loaded = read_examples(&path, DataFormat::Csv)?;

        assert_eq!(loaded[0]["id"], "1");
        assert_eq!(loaded[0]["v"], "7");
        assert_eq!(loaded[1]["id"], "x2");
        assert_eq!(loaded[1]["v"], "seven");
        Ok(())
    }

    #[rstest]
    fn test_parquet_rejects_mixed_columns(mixed_examples: Vec<Example>) {
        let err = examples_to_frame(&mixed_examples, false).unwrap_err();
        assert!(err.to_string().contains("id, v"), "{err}");
    }

    #[rstest]
    #[case(vec![])]
    #[case(mixed_examples())]
    fn test_failed_parquet_write_keeps_existing_file(
        examples: Vec<Example>,
        #[case] replacement: Vec<Example>,
    ) -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.parquet");
        write_examples(&path, &examples, DataFormat::Parquet)?;
        let before = std::fs::read(&path)?;

        assert!(write_examples(&path, &replacement, DataFormat::Parquet).is_err());
        assert_eq!(std::fs::read(&path)?, before);
        assert_eq!(read_examples(&path, DataFormat::Parquet)?.len(), 2);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[rstest]
    fn test_csv_type_change_after_many_rows() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("scores.csv");
        let mut contents = String::from("id,score\n");
        for i in 0..150 {
            contents.push_str(&format!("{i},{i}\n"));
        }
        contents.push_str("150,1.5\n");
        std::fs::write(&path, contents)?;

        let loaded = read_examples(&path, DataFormat::Csv)?;
        assert_eq!(loaded.len(), 151);
        assert_eq!(loaded[3]["score"].as_f64(), Some(3.0));
        assert_eq!(loaded[150]["score"], 1.5);
        Ok(())
    }

    #[rstest]
    fn test_parquet_keeps_nested_objects() -> Result<()> {
        let examples = parse_json_array(
            r#"[
                {"id": 1, "metadata": {"source": "example", "version": "1.0", "tags": ["a"]}},
                {"id": 2, "metadata": {"source": "demo", "version": "2.0", "tags": ["b", "c"]}}
            ]"#,
        )?;
        let dir = tempdir()?;
        let path = dir.path().join("nested.parquet");
        write_examples(&path, &examples, DataFormat::Parquet)?;
        let loaded = read_examples(&path, DataFormat::Parquet)?;

        assert_eq!(loaded[0]["metadata"]["source"], "example");
        assert_eq!(loaded[0]["metadata"]["version"], "1.0");
        assert_eq!(loaded[1]["metadata"]["tags"], json!(["b", "c"]));
        Ok(())
    }

    #[rstest]
    fn test_any_value_conversion() {
        assert_eq!(any_value_to_json(&AnyValue::Null), Value::Null);
        assert_eq!(any_value_to_json(&AnyValue::Int64(7)), json!(7));
        assert_eq!(any_value_to_json(&AnyValue::Float64(f64::NAN)), Value::Null);
        assert_eq!(any_value_to_json(&AnyValue::String("x")), json!("x"));
    }
}
