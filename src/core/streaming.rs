//! Chunked, restartable iteration over datasets too large to hold in memory

use super::{
    dataset::{DataFormat, Dataset, Example},
    io,
};
use anyhow::{bail, Context};
use log::debug;
use polars::{io::mmap::MmapBytesReader, prelude::*};
use std::{
    collections::VecDeque,
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
    sync::Arc,
};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

type MapFn = Arc<dyn Fn(Example) -> anyhow::Result<Example> + Send + Sync>;
type FilterFn = Arc<dyn Fn(&Example) -> bool + Send + Sync>;

#[derive(Clone)]
enum Stage {
    Map(MapFn),
    Filter(FilterFn),
}

/// Where a streaming dataset pulls its examples from.
#[derive(Debug, Clone)]
pub enum StreamSource {
    File { path: PathBuf, format: DataFormat },
    Records(Arc<Vec<Example>>),
}

/// A lazily read dataset.
///
/// Nothing is read until iteration starts, and every call to `iter`
/// starts again from the beginning of the source.
#[derive(Clone)]
pub struct StreamingDataset {
    source: StreamSource,
    chunk_size: usize,
    stages: Vec<Stage>,
}

impl StreamingDataset {
    pub fn from_file<P: AsRef<Path>>(path: P, format: DataFormat, chunk_size: usize) -> Self {
        Self {
            source: StreamSource::File {
                path: path.as_ref().to_path_buf(),
                format,
            },
            chunk_size: chunk_size.max(1),
            stages: vec![],
        }
    }

    pub fn from_records(examples: Vec<Example>, chunk_size: usize) -> Self {
        Self {
            source: StreamSource::Records(Arc::new(examples)),
            chunk_size: chunk_size.max(1),
            stages: vec![],
        }
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Registers a transformation applied to each example during iteration.
    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(Example) -> anyhow::Result<Example> + Send + Sync + 'static,
    {
        self.stages.push(Stage::Map(Arc::new(f)));
        self
    }

    /// Registers a predicate; examples for which it is false are skipped.
    pub fn filter<F>(mut self, pred: F) -> Self
    where
        F: Fn(&Example) -> bool + Send + Sync + 'static,
    {
        self.stages.push(Stage::Filter(Arc::new(pred)));
        self
    }

    pub fn iter(&self) -> StreamIter {
        StreamIter {
            source: self.source.clone(),
            chunk_size: self.chunk_size,
            stages: self.stages.clone(),
            reader: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn iter_batches(&self, batch_size: usize) -> anyhow::Result<BatchIter> {
        if batch_size == 0 {
            bail!("Batch size must be greater than zero");
        }
        Ok(BatchIter {
            inner: self.iter(),
            batch_size,
        })
    }

    /// Collects the first `n` examples into a `Dataset`.
    pub fn head(&self, n: usize) -> anyhow::Result<Dataset> {
        self.to_dataset(Some(n))
    }

    pub fn to_dataset(&self, max_examples: Option<usize>) -> anyhow::Result<Dataset> {
        let limit = max_examples.unwrap_or(usize::MAX);
        let examples = self
            .iter()
            .take(limit)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Dataset::new(examples))
    }

    /// Number of examples that survive all registered filters.
    pub fn count(&self) -> anyhow::Result<usize> {
        let mut count = 0_usize;
        for example in self.iter() {
            example?;
            count += 1;
        }
        Ok(count)
    }
}

impl<'a> IntoIterator for &'a StreamingDataset {
    type Item = anyhow::Result<Example>;
    type IntoIter = StreamIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Reads successive chunks from a source; an empty chunk means the end.
trait ChunkReader {
    fn next_chunk(&mut self, n: usize) -> anyhow::Result<Vec<Example>>;
}

/// CSV is parsed once, front to back, by polars' batched reader. Batch
/// boundaries follow byte ranges, so a chunk may hold more or fewer than `n`
/// rows.
struct CsvBatches {
    path: PathBuf,
    reader: OwnedBatchedCsvReader,
}

impl CsvBatches {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
        let handle: Box<dyn MmapBytesReader> = Box::new(file);
        let reader = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .into_reader_with_file_handle(handle)
            .batched(None)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }
}

impl ChunkReader for CsvBatches {
    fn next_chunk(&mut self, _n: usize) -> anyhow::Result<Vec<Example>> {
        loop {
            let Some(frames) = self
                .reader
                .next_batches(1)
                .with_context(|| format!("Unable to read batch from {}", self.path.display()))?
            else {
                return Ok(vec![]);
            };
            let mut chunk = vec![];
            for df in frames.iter() {
                chunk.extend(io::frame_to_examples(df)?);
            }
            debug!("Read batch of {} rows from {}", chunk.len(), self.path.display());
            if !chunk.is_empty() {
                return Ok(chunk);
            }
        }
    }
}

/// Parquet is scanned lazily and sliced; row groups outside the slice are
/// skipped.
struct ParquetChunks {
    path: PathBuf,
    offset: usize,
}

impl ChunkReader for ParquetChunks {
    fn next_chunk(&mut self, n: usize) -> anyhow::Result<Vec<Example>> {
        let df = LazyFrame::scan_parquet(&self.path, ScanArgsParquet::default())?
            .slice(self.offset as i64, n as IdxSize)
            .collect()
            .with_context(|| format!("Unable to read chunk from {}", self.path.display()))?;
        debug!(
            "Read chunk of {} rows at offset {} from {}",
            df.height(),
            self.offset,
            self.path.display()
        );
        self.offset += df.height();
        io::frame_to_examples(&df)
    }
}

struct JsonLinesChunks {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ChunkReader for JsonLinesChunks {
    fn next_chunk(&mut self, n: usize) -> anyhow::Result<Vec<Example>> {
        let mut chunk = Vec::with_capacity(n);
        while chunk.len() < n {
            let Some(line) = self.lines.next() else {
                break;
            };
            let line = line?;
            let idx = self.line_no;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            chunk.push(io::parse_json_line(&line, idx)?);
        }
        Ok(chunk)
    }
}

/// In-memory examples, either given directly or from a JSON array which
/// cannot be read incrementally.
struct RecordChunks {
    examples: Arc<Vec<Example>>,
    offset: usize,
}

impl ChunkReader for RecordChunks {
    fn next_chunk(&mut self, n: usize) -> anyhow::Result<Vec<Example>> {
        let end = (self.offset + n).min(self.examples.len());
        let chunk = self.examples[self.offset..end].to_vec();
        self.offset = end;
        Ok(chunk)
    }
}

fn open_reader(source: &StreamSource) -> anyhow::Result<Box<dyn ChunkReader>> {
    let reader: Box<dyn ChunkReader> = match source {
        StreamSource::Records(examples) => Box::new(RecordChunks {
            examples: examples.clone(),
            offset: 0,
        }),
        StreamSource::File { path, format } => match format {
            DataFormat::Csv => Box::new(CsvBatches::open(path)?),
            DataFormat::Parquet => {
                if !path.exists() {
                    bail!("No such file: {}", path.display());
                }
                Box::new(ParquetChunks {
                    path: path.clone(),
                    offset: 0,
                })
            }
            DataFormat::Jsonl => {
                let file = File::open(path)
                    .with_context(|| format!("Unable to open {}", path.display()))?;
                Box::new(JsonLinesChunks {
                    lines: BufReader::new(file).lines(),
                    line_no: 0,
                })
            }
            DataFormat::Json => Box::new(RecordChunks {
                examples: Arc::new(io::read_examples(path, DataFormat::Json)?),
                offset: 0,
            }),
        },
    };
    Ok(reader)
}

/// Example iterator over a `StreamingDataset`.
///
/// After an error is yielded the iterator is exhausted.
pub struct StreamIter {
    source: StreamSource,
    chunk_size: usize,
    stages: Vec<Stage>,
    reader: Option<Box<dyn ChunkReader>>,
    buffer: VecDeque<Example>,
    exhausted: bool,
}

impl StreamIter {
    fn fill_buffer(&mut self) -> anyhow::Result<()> {
        if self.reader.is_none() {
            self.reader = Some(open_reader(&self.source)?);
        }
        if let Some(reader) = self.reader.as_mut() {
            let chunk = reader.next_chunk(self.chunk_size)?;
            if chunk.is_empty() {
                self.exhausted = true;
            }
            self.buffer.extend(chunk);
        }
        Ok(())
    }

    /// Runs the registered stages; `Ok(None)` means the example was filtered out.
    fn apply_stages(&self, mut example: Example) -> anyhow::Result<Option<Example>> {
        for stage in self.stages.iter() {
            match stage {
                Stage::Map(f) => example = f(example)?,
                Stage::Filter(pred) => {
                    if !pred(&example) {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(Some(example))
    }
}

impl Iterator for StreamIter {
    type Item = anyhow::Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(example) = self.buffer.pop_front() {
                match self.apply_stages(example) {
                    Ok(Some(example)) => return Some(Ok(example)),
                    Ok(None) => continue,
                    Err(err) => {
                        self.exhausted = true;
                        self.buffer.clear();
                        return Some(Err(err));
                    }
                }
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fill_buffer() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}

/// Groups a `StreamIter` into vectors of `batch_size` examples.
pub struct BatchIter {
    inner: StreamIter,
    batch_size: usize,
}

impl Iterator for BatchIter {
    type Item = anyhow::Result<Vec<Example>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);
        for example in self.inner.by_ref() {
            match example {
                Ok(example) => batch.push(example),
                Err(err) => return Some(Err(err)),
            }
            if batch.len() == self.batch_size {
                break;
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rstest::*;
    use serde_json::{json, Value};
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn records(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| match json!({"id": i, "value": i * 10}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[fixture]
    pub fn jsonl_file() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        let mut file = File::create(&path).unwrap();
        for example in records(25) {
            writeln!(file, "{}", Value::Object(example)).unwrap();
        }
        (dir, path)
    }

    #[rstest]
    fn test_records_batches() -> Result<()> {
        let stream = StreamingDataset::from_records(records(10), 3);
        let sizes = stream
            .iter_batches(4)?
            .map(|b| b.map(|b| b.len()))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(stream.iter_batches(0).is_err());
        Ok(())
    }

    #[rstest]
    fn test_jsonl_stream_is_restartable(
        #[from(jsonl_file)] (_dir, path): (TempDir, PathBuf),
    ) -> Result<()> {
        let stream = StreamingDataset::from_file(&path, DataFormat::Jsonl, 7);
        assert_eq!(stream.count()?, 25);
        assert_eq!(stream.count()?, 25);

        let mut seen = 0_usize;
        for example in &stream {
            let example = example?;
            assert_eq!(example["id"], seen);
            seen += 1;
        }
        assert_eq!(seen, 25);
        Ok(())
    }

    #[rstest]
    fn test_head_and_to_dataset(#[from(jsonl_file)] (_dir, path): (TempDir, PathBuf)) -> Result<()> {
        let stream = StreamingDataset::from_file(&path, DataFormat::Jsonl, 4);
        let head = stream.head(5)?;
        assert_eq!(head.len(), 5);
        assert_eq!(head[4]["id"], 4);
        assert_eq!(stream.to_dataset(None)?.len(), 25);
        assert_eq!(stream.to_dataset(Some(100))?.len(), 25);
        Ok(())
    }

    #[rstest]
    fn test_map_and_filter_stages() -> Result<()> {
        let stream = StreamingDataset::from_records(records(10), 4)
            .filter(|ex| ex["id"].as_u64().is_some_and(|id| id % 2 == 0))
            .map(|mut ex| {
                ex.insert("even".to_string(), json!(true));
                Ok(ex)
            });
        let dataset = stream.to_dataset(None)?;
        assert_eq!(dataset.len(), 5);
        assert!(dataset.iter().all(|ex| ex["even"] == true));
        assert_eq!(stream.count()?, 5);
        Ok(())
    }

    #[rstest]
    fn test_map_error_stops_iteration() {
        let stream = StreamingDataset::from_records(records(5), 2).map(|ex| {
            if ex["id"] == 2 {
                anyhow::bail!("boom")
            }
            Ok(ex)
        });
        let results = stream.iter().collect::<Vec<_>>();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }

    #[rstest]
    fn test_csv_stream_in_chunks() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        io::write_examples(&path, &records(12), DataFormat::Csv)?;

        let stream = StreamingDataset::from_file(&path, DataFormat::Csv, 5);
        let dataset = stream.to_dataset(None)?;
        assert_eq!(dataset.len(), 12);
        assert_eq!(dataset[11]["value"], 110);
        Ok(())
    }

    #[rstest]
    fn test_csv_stream_reads_whole_file_once_per_pass() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("scores.csv");
        let mut file = File::create(&path)?;
        writeln!(file, "id,score")?;
        for i in 0..5000 {
            writeln!(file, "{i},{i}")?;
        }
        writeln!(file, "5000,2.5")?;
        drop(file);

        let stream = StreamingDataset::from_file(&path, DataFormat::Csv, 100);
        let mut expected_id = 0_i64;
        for example in &stream {
            let example = example?;
            assert_eq!(example["id"], expected_id);
            expected_id += 1;
        }
        assert_eq!(expected_id, 5001);

        let last = stream.to_dataset(None)?;
        assert_eq!(last[5000]["score"], 2.5);
        assert_eq!(stream.head(3)?.len(), 3);
        Ok(())
    }

    #[rstest]
    fn test_missing_file_yields_error() {
        let stream = StreamingDataset::from_file("does/not/exist.csv", DataFormat::Csv, 5);
        let mut iter = stream.iter();
        assert!(matches!(iter.next(), Some(Err(_))));
        assert!(iter.next().is_none());
    }
}
