use anchor_model::{AnchorConfig, AnchorSpec, FillRequest, ModelError};
use directories::ProjectDirs;
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "anchors.json";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve user config directory")]
    NoConfigDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid anchor configuration: {0}")]
    Config(#[from] ModelError),
    #[error("anchor `{anchor}`: {source}")]
    Anchor { anchor: String, #[source] source: serde_json::Error },
    #[error("invalid batch records: {0}")]
    Records(String),
}

/// Location of the per-user configuration, `anchors.json` under the platform config directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "AnchorFill", "anchorfill").ok_or(StorageError::NoConfigDirectory)?;

        Ok(Self { root: dirs.config_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Loads the default configuration. A missing file is an empty configuration: every fill key
    /// then becomes an ad-hoc anchor.
    pub fn load_config(&self) -> Result<AnchorConfig, StorageError> {
        let path = self.config_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no anchor configuration, starting empty");
            return Ok(AnchorConfig::default());
        }

        load_config(&path)
    }
}

pub fn load_config(path: &Path) -> Result<AnchorConfig, StorageError> {
    let bytes = fs::read(path)?;
    let config = parse_config(&bytes)?;
    tracing::info!(path = %path.display(), anchors = config.len(), "anchor configuration loaded");
    Ok(config)
}

/// Parses a JSON object mapping anchor keys to their settings. Keys starting with `_` are
/// comments and skipped; `a|b` keys declare aliases.
pub fn parse_config(bytes: &[u8]) -> Result<AnchorConfig, StorageError> {
    let root: serde_json::Map<String, Value> = serde_json::from_slice(strip_bom(bytes))?;

    let mut entries = Vec::with_capacity(root.len());
    for (key, value) in root {
        if key.starts_with('_') {
            continue;
        }
        let spec: AnchorSpec =
            serde_json::from_value(value).map_err(|source| StorageError::Anchor { anchor: key.clone(), source })?;
        entries.push((key, spec));
    }

    Ok(AnchorConfig::from_entries(entries)?)
}

/// Reads batch records; `.csv` files are CSV, anything else JSON.
pub fn load_records(path: &Path) -> Result<Vec<FillRequest>, StorageError> {
    let is_csv = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let records = if is_csv {
        parse_csv_records(fs::File::open(path)?)?
    } else {
        parse_json_records(&fs::read(path)?)?
    };

    tracing::info!(path = %path.display(), records = records.len(), "batch records loaded");
    Ok(records)
}

/// Values for a single fill: a JSON object mapping anchor keys to text.
pub fn load_values(path: &Path) -> Result<FillRequest, StorageError> {
    parse_json_values(&fs::read(path)?)
}

pub fn parse_json_values(bytes: &[u8]) -> Result<FillRequest, StorageError> {
    match serde_json::from_slice::<Value>(strip_bom(bytes))? {
        Value::Object(fields) => Ok(request_from_fields(fields)),
        _ => Err(StorageError::Records("expected an object of anchor values".to_owned())),
    }
}

/// A JSON array of objects, or an object whose `records` field is one.
pub fn parse_json_records(bytes: &[u8]) -> Result<Vec<FillRequest>, StorageError> {
    let value: Value = serde_json::from_slice(strip_bom(bytes))?;
    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut object) => match object.remove("records") {
            Some(Value::Array(records)) => records,
            _ => return Err(StorageError::Records("expected a `records` array".to_owned())),
        },
        _ => return Err(StorageError::Records("expected an array of records".to_owned())),
    };

    records
        .into_iter()
        .enumerate()
        .map(|(position, record)| match record {
            Value::Object(fields) => Ok(request_from_fields(fields)),
            _ => Err(StorageError::Records(format!("record {} is not an object", position + 1))),
        })
        .collect()
}

/// Header row names the anchor keys; each following row is one record.
pub fn parse_csv_records(mut reader: impl Read) -> Result<Vec<FillRequest>, StorageError> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;

    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(strip_bom(&raw));
    let headers: Vec<String> = csv.headers()?.iter().map(|header| header.trim().to_owned()).collect();

    let mut records = Vec::new();
    for row in csv.records() {
        let row = row?;
        records.push(FillRequest::from_pairs(headers.iter().cloned().zip(row.iter().map(str::to_owned))));
    }
    Ok(records)
}

/// Writes to a temporary sibling first, so `path` never holds a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.{}.partial", std::process::id()));

    let result = fs::write(&temp, bytes).and_then(|()| fs::rename(&temp, path));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    Ok(result?)
}

/// `{stem}_filled.pdf` beside the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}_filled.pdf", file_stem(input)))
}

/// `{stem}_{index:03}_filled.pdf` inside `output_dir`.
pub fn indexed_output_path(input: &Path, output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("{}_{index:03}_filled.pdf", file_stem(input)))
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_else(|| "output".to_owned())
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

fn request_from_fields(fields: serde_json::Map<String, Value>) -> FillRequest {
    FillRequest::from_pairs(fields.into_iter().filter_map(|(key, value)| scalar_text(value).map(|text| (key, text))))
}

/// Record values may be numbers or booleans in JSON; null and nested values carry no text.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
