//! Loading datasets from files, URLs or records, with an optional disk cache

use super::{
    dataset::{DataFormat, Dataset, Example},
    io,
    streaming::{StreamingDataset, DEFAULT_CHUNK_SIZE},
};
use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::{
    fs::{self, create_dir_all, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CACHE_DIR: &str = ".llamadatasets_cache";

/// Controls the on-disk cache used by `DataLoader::load`.
///
/// `expiration` is given in seconds when deserialised; `None` means cache
/// entries never expire on their own.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub location: PathBuf,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub expiration: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            location: PathBuf::from(DEFAULT_CACHE_DIR),
            expiration: None,
        }
    }
}

impl CacheConfig {
    pub fn new<P: AsRef<Path>>(location: P, expiration: Option<Duration>) -> Self {
        Self {
            enabled: true,
            location: location.as_ref().to_path_buf(),
            expiration,
        }
    }
}

/// Where a `DataLoader` reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Csv(PathBuf),
    Json(PathBuf),
    Jsonl(PathBuf),
    Parquet(PathBuf),
    Url { url: String, format: DataFormat },
    Records(Vec<Example>),
}

impl DataSource {
    pub fn from_path<P: AsRef<Path>>(path: P, format: DataFormat) -> Self {
        let path = path.as_ref().to_path_buf();
        match format {
            DataFormat::Csv => DataSource::Csv(path),
            DataFormat::Json => DataSource::Json(path),
            DataFormat::Jsonl => DataSource::Jsonl(path),
            DataFormat::Parquet => DataSource::Parquet(path),
        }
    }

    fn file(&self) -> Option<(&Path, DataFormat)> {
        match self {
            DataSource::Csv(p) => Some((p.as_path(), DataFormat::Csv)),
            DataSource::Json(p) => Some((p.as_path(), DataFormat::Json)),
            DataSource::Jsonl(p) => Some((p.as_path(), DataFormat::Jsonl)),
            DataSource::Parquet(p) => Some((p.as_path(), DataFormat::Parquet)),
            _ => None,
        }
    }

    /// Stable description used to derive the cache key.
    fn descriptor(&self) -> Option<String> {
        match self {
            DataSource::Url { url, format } => Some(format!("url:{format}:{url}")),
            DataSource::Records(_) => None,
            _ => {
                let (path, format) = self.file()?;
                let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                Some(format!("file:{format}:{}", path.display()))
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    created_at: DateTime<Utc>,
    examples: Vec<Example>,
}

/// Loads a `Dataset` (or a `StreamingDataset`) from a `DataSource`.
#[derive(Debug, Clone)]
pub struct DataLoader {
    source: DataSource,
    cache_config: CacheConfig,
    chunk_size: usize,
}

impl DataLoader {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            cache_config: CacheConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Self {
        Self::new(DataSource::Csv(path.as_ref().to_path_buf()))
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Self {
        Self::new(DataSource::Json(path.as_ref().to_path_buf()))
    }

    pub fn from_jsonl<P: AsRef<Path>>(path: P) -> Self {
        Self::new(DataSource::Jsonl(path.as_ref().to_path_buf()))
    }

    pub fn from_parquet<P: AsRef<Path>>(path: P) -> Self {
        Self::new(DataSource::Parquet(path.as_ref().to_path_buf()))
    }

    /// Creates a loader whose format is inferred from the file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let format = DataFormat::from_path(&path)?;
        Ok(Self::new(DataSource::from_path(path, format)))
    }

    pub fn from_url(url: &str, format: DataFormat) -> Self {
        Self::new(DataSource::Url {
            url: url.to_string(),
            format,
        })
    }

    pub fn from_records(examples: Vec<Example>) -> Self {
        Self::new(DataSource::Records(examples))
    }

    pub fn with_cache(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Number of examples read per chunk when streaming.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }

    /// Reads the whole source into memory, going through the cache when enabled.
    pub fn load(&self) -> anyhow::Result<Dataset> {
        let cache_path = self.cache_path();
        if let Some(path) = cache_path.as_ref() {
            if let Some(examples) = self.read_cache(path) {
                info!("Loaded {} examples from cache {}", examples.len(), path.display());
                return Ok(Dataset::new(examples));
            }
        }

        let examples = self.read_source()?;

        if let Some(path) = cache_path.as_ref() {
            self.write_cache(path, &examples)?;
        }
        Ok(Dataset::new(examples))
    }

    /// Opens the source for chunked iteration. Caching does not apply.
    pub fn stream(&self) -> anyhow::Result<StreamingDataset> {
        let stream = match &self.source {
            DataSource::Records(examples) => {
                StreamingDataset::from_records(examples.clone(), self.chunk_size)
            }
            DataSource::Url { .. } => {
                StreamingDataset::from_records(self.read_source()?, self.chunk_size)
            }
            _ => {
                let (path, format) = self
                    .source
                    .file()
                    .context("Data source is not backed by a file")?;
                StreamingDataset::from_file(path, format, self.chunk_size)
            }
        };
        Ok(stream)
    }

    fn read_source(&self) -> anyhow::Result<Vec<Example>> {
        match &self.source {
            DataSource::Records(examples) => Ok(examples.clone()),
            DataSource::Url { url, format } => download_and_read(url, *format),
            _ => {
                let (path, format) = self
                    .source
                    .file()
                    .context("Data source is not backed by a file")?;
                io::read_examples(path, format)
            }
        }
    }

    fn cache_path(&self) -> Option<PathBuf> {
        if !self.cache_config.enabled {
            return None;
        }
        let descriptor = self.source.descriptor()?;
        let key = format!("{:x}", md5::compute(descriptor.as_bytes()));
        Some(self.cache_config.location.join(format!("{key}.json")))
    }

    /// Returns cached examples if an entry exists and is still fresh.
    fn read_cache(&self, path: &Path) -> Option<Vec<Example>> {
        if !path.exists() {
            debug!("Cache miss: {}", path.display());
            return None;
        }
        let entry: CacheEntry = match File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|f| Ok(serde_json::from_reader(BufReader::new(f))?))
        {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Ignoring unreadable cache entry {}: {err}", path.display());
                return None;
            }
        };

        if let Some(expiration) = self.cache_config.expiration {
            let age = Utc::now().signed_duration_since(entry.created_at);
            if age.to_std().map(|age| age > expiration).unwrap_or(false) {
                debug!("Cache entry {} expired", path.display());
                return None;
            }
        }

        if let Some((source_path, _)) = self.source.file() {
            let modified = fs::metadata(source_path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from);
            if let Ok(modified) = modified {
                if modified > entry.created_at {
                    debug!("Source {} changed since caching", source_path.display());
                    return None;
                }
            }
        }

        debug!("Cache hit: {}", path.display());
        Some(entry.examples)
    }

    fn write_cache(&self, path: &Path, examples: &[Example]) -> anyhow::Result<()> {
        create_dir_all(&self.cache_config.location).with_context(|| {
            format!(
                "Unable to create cache directory {}",
                self.cache_config.location.display()
            )
        })?;
        let entry = CacheEntry {
            created_at: Utc::now(),
            examples: examples.to_vec(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.flush()?;
        debug!("Wrote cache entry {}", path.display());
        Ok(())
    }
}

/// Downloads `url` into a temporary file and parses it as `format`.
pub fn download_and_read(url: &str, format: DataFormat) -> anyhow::Result<Vec<Example>> {
    info!("Downloading {url}");
    let resp = reqwest::blocking::get(url)?.error_for_status()?;
    let content: Bytes = resp.bytes()?;
    let mut tmp = tempfile::Builder::new()
        .suffix(&format!(".{}", format.extension()))
        .tempfile()?;
    tmp.write_all(content.as_ref())?;
    tmp.flush()?;
    io::read_examples(tmp.path(), format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rstest::*;
    use serde_json::json;
    use std::{
        io::Read,
        net::TcpListener,
        thread::{self, JoinHandle},
    };
    use tempfile::{tempdir, TempDir};

    #[fixture]
    pub fn json_file() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let examples = io::parse_json_array(
            r#"[{"id": 1, "text": "first"}, {"id": 2, "text": "second"}]"#,
        )
        .unwrap();
        io::write_examples(&path, &examples, DataFormat::Json).unwrap();
        (dir, path)
    }

    #[rstest]
    fn test_load_without_cache(#[from(json_file)] (_dir, path): (TempDir, PathBuf)) -> Result<()> {
        let dataset = DataLoader::from_json(&path).load()?;
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset[1]["text"], "second");
        Ok(())
    }

    #[rstest]
    fn test_from_path_infers_format(#[from(json_file)] (_dir, path): (TempDir, PathBuf)) -> Result<()> {
        let loader = DataLoader::from_path(&path)?;
        assert!(matches!(loader.source(), DataSource::Json(_)));
        assert!(DataLoader::from_path("data.unknown").is_err());
        Ok(())
    }

    #[rstest]
    fn test_cache_entry_is_written_and_reused(
        #[from(json_file)] (dir, path): (TempDir, PathBuf),
    ) -> Result<()> {
        let cache_dir = dir.path().join("cache");
        let loader = DataLoader::from_json(&path).with_cache(CacheConfig::new(&cache_dir, None));

        let first = loader.load()?;
        let cache_path = loader.cache_path().unwrap();
        assert!(cache_path.exists());
        assert!(loader.read_cache(&cache_path).is_some());

        let second = loader.load()?;
        assert_eq!(first, second);
        Ok(())
    }

    #[rstest]
    fn test_expired_cache_entry_is_ignored(
        #[from(json_file)] (dir, path): (TempDir, PathBuf),
    ) -> Result<()> {
        let cache_dir = dir.path().join("cache");
        let loader = DataLoader::from_json(&path)
            .with_cache(CacheConfig::new(&cache_dir, Some(Duration::from_secs(60))));
        let cache_path = loader.cache_path().unwrap();

        let stale = CacheEntry {
            created_at: Utc::now() - chrono::Duration::seconds(3600),
            examples: vec![],
        };
        create_dir_all(&cache_dir)?;
        serde_json::to_writer(File::create(&cache_path)?, &stale)?;
        assert!(loader.read_cache(&cache_path).is_none());

        // reload replaces the stale entry
        assert_eq!(loader.load()?.len(), 2);
        assert!(loader.read_cache(&cache_path).is_some());
        Ok(())
    }

    fn write_entry(path: &Path, created_at: DateTime<Utc>) -> Result<()> {
        create_dir_all(path.parent().unwrap())?;
        let entry = CacheEntry {
            created_at,
            examples: io::parse_json_array(r#"[{"id": 99, "text": "cached"}]"#)?,
        };
        serde_json::to_writer(File::create(path)?, &entry)?;
        Ok(())
    }

    #[rstest]
    fn test_cache_entry_older_than_source_is_ignored(
        #[from(json_file)] (dir, path): (TempDir, PathBuf),
    ) -> Result<()> {
        let loader = DataLoader::from_json(&path)
            .with_cache(CacheConfig::new(dir.path().join("cache"), None));
        let cache_path = loader.cache_path().unwrap();

        // the source file was written after this entry
        write_entry(&cache_path, Utc::now() - chrono::Duration::seconds(3600))?;
        assert!(loader.read_cache(&cache_path).is_none());
        let dataset = loader.load()?;
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset[0]["text"], "first");

        // rewriting the source invalidates the fresh entry too
        let newer = io::parse_json_array(r#"[{"id": 3, "text": "third"}]"#)?;
        io::write_examples(&path, &newer, DataFormat::Json)?;
        let entry_time = Utc::now() - chrono::Duration::seconds(60);
        write_entry(&cache_path, entry_time)?;
        File::options()
            .write(true)
            .open(&path)?
            .set_modified(std::time::SystemTime::now())?;
        assert_eq!(loader.load()?[0]["text"], "third");
        Ok(())
    }

    #[rstest]
    fn test_cache_entry_newer_than_source_is_used(
        #[from(json_file)] (dir, path): (TempDir, PathBuf),
    ) -> Result<()> {
        let loader = DataLoader::from_json(&path)
            .with_cache(CacheConfig::new(dir.path().join("cache"), None));
        let cache_path = loader.cache_path().unwrap();
        write_entry(&cache_path, Utc::now() + chrono::Duration::seconds(3600))?;

        let dataset = loader.load()?;
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset[0]["text"], "cached");
        Ok(())
    }

    /// Serves `body` with `status` to `connections` requests on a local port.
    fn serve(
        status: &'static str,
        body: &'static str,
        connections: usize,
    ) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/data.jsonl", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut buf = [0_u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                write!(
                    stream,
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });
        (url, handle)
    }

    const URL_BODY: &str = "{\"id\": 1, \"text\": \"remote\"}\n{\"id\": 2, \"text\": \"data\"}\n";

    #[rstest]
    fn test_load_and_stream_from_url() -> Result<()> {
        let (url, handle) = serve("200 OK", URL_BODY, 2);
        let loader = DataLoader::from_url(&url, DataFormat::Jsonl);
        let dataset = loader.load()?;
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset[0]["text"], "remote");
        assert_eq!(loader.stream()?.count()?, 2);
        handle.join().unwrap();
        Ok(())
    }

    #[rstest]
    fn test_url_load_is_served_from_cache() -> Result<()> {
        let dir = tempdir()?;
        let (url, handle) = serve("200 OK", URL_BODY, 1);
        let loader = DataLoader::from_url(&url, DataFormat::Jsonl)
            .with_cache(CacheConfig::new(dir.path(), None));
        assert_eq!(loader.load()?.len(), 2);
        handle.join().unwrap();

        // the server is gone; only the cache can answer
        assert_eq!(loader.load()?[1]["text"], "data");
        Ok(())
    }

    #[rstest]
    fn test_url_error_status_fails() {
        let (url, handle) = serve("404 Not Found", "", 1);
        assert!(download_and_read(&url, DataFormat::Jsonl).is_err());
        handle.join().unwrap();
    }

    #[rstest]
    fn test_corrupt_cache_entry_is_ignored(
        #[from(json_file)] (dir, path): (TempDir, PathBuf),
    ) -> Result<()> {
        let cache_dir = dir.path().join("cache");
        let loader = DataLoader::from_json(&path).with_cache(CacheConfig::new(&cache_dir, None));
        let cache_path = loader.cache_path().unwrap();
        create_dir_all(&cache_dir)?;
        fs::write(&cache_path, "not json")?;

        assert_eq!(loader.load()?.len(), 2);
        Ok(())
    }

    #[rstest]
    fn test_records_are_never_cached() -> Result<()> {
        let dir = tempdir()?;
        let example = match json!({"a": 1}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let loader = DataLoader::from_records(vec![example])
            .with_cache(CacheConfig::new(dir.path(), None));
        assert!(loader.cache_path().is_none());
        assert_eq!(loader.load()?.len(), 1);
        Ok(())
    }

    #[rstest]
    fn test_stream_from_file(#[from(json_file)] (_dir, path): (TempDir, PathBuf)) -> Result<()> {
        let stream = DataLoader::from_json(&path).with_chunk_size(1).stream()?;
        assert_eq!(stream.chunk_size(), 1);
        assert_eq!(stream.count()?, 2);
        Ok(())
    }

    #[rstest]
    fn test_cache_config_from_toml() -> Result<()> {
        let config: CacheConfig = toml::from_str(
            r#"
            enabled = true
            location = "/tmp/cache"
            expiration = 3600
            "#,
        )?;
        assert!(config.enabled);
        assert_eq!(config.expiration, Some(Duration::from_secs(3600)));

        let defaults: CacheConfig = toml::from_str("")?;
        assert_eq!(defaults, CacheConfig::default());
        Ok(())
    }
}
