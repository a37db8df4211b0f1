use std::path::Path;

use serde::Deserialize;

use crate::error::{IndexError, IndexResult};
use crate::hasher::ChecksumAlgorithm;

const DEFAULTS: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub recursive: bool,
    pub include_hidden: bool,
    pub excludes: Vec<String>,
    pub batch_size: usize,
}

/// A byte count given either as a plain integer or as a string like "100MB".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

impl SizeValue {
    pub fn to_bytes(&self) -> anyhow::Result<u64> {
        match self {
            SizeValue::Bytes(n) => Ok(*n),
            SizeValue::Text(s) => parse_size(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChecksumConfig {
    pub algorithm: String,
    pub size_threshold: SizeValue,
    pub skip_empty: bool,
    pub workers: Option<usize>,
    pub sequential: bool,
    pub batch_size: usize,
    pub max_commit_attempts: u32,
    pub commit_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuplicatesConfig {
    pub min_group_size: usize,
    pub page_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub dry_run: bool,
}

/// Raw configuration as layered from files and the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub checksum: ChecksumConfig,
    pub duplicates: DuplicatesConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub recursive: bool,
    pub include_hidden: bool,
    pub excludes: Vec<String>,
    pub batch_size: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self { recursive: true, include_hidden: false, excludes: Vec::new(), batch_size: 1000 }
    }
}

/// Normalised checksum pass settings. `size_threshold` is in bytes, 0 = unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSettings {
    pub algorithm: ChecksumAlgorithm,
    pub size_threshold: u64,
    pub skip_empty: bool,
    pub workers: usize,
    pub batch_size: usize,
    pub sequential: bool,
    pub max_commit_attempts: u32,
    pub commit_backoff_ms: u64,
}

impl Default for ChecksumSettings {
    fn default() -> Self {
        Self {
            algorithm: ChecksumAlgorithm::default(),
            size_threshold: 0,
            skip_empty: true,
            workers: num_cpus::get().clamp(1, 256),
            batch_size: 500,
            sequential: false,
            max_commit_attempts: 4,
            commit_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSettings {
    pub min_group_size: usize,
    pub page_limit: Option<usize>,
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self { min_group_size: 2, page_limit: Some(50) }
    }
}

/// Validated configuration handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub database_url: String,
    pub scan: ScanSettings,
    pub checksum: ChecksumSettings,
    pub duplicates: DuplicateSettings,
    pub dry_run: bool,
}

impl EngineConfig {
    /// Defaults around an explicit database URL.
    pub fn with_database(url: impl Into<String>) -> Self {
        Self {
            database_url: url.into(),
            scan: ScanSettings::default(),
            checksum: ChecksumSettings::default(),
            duplicates: DuplicateSettings::default(),
            dry_run: false,
        }
    }
}

impl TryFrom<AppConfig> for EngineConfig {
    type Error = IndexError;

    fn try_from(cfg: AppConfig) -> IndexResult<Self> {
        validate(&cfg).map_err(|e| IndexError::Config(e.to_string()))?;
        let algorithm: ChecksumAlgorithm = cfg.checksum.algorithm.parse().map_err(IndexError::Config)?;
        let size_threshold = cfg
            .checksum
            .size_threshold
            .to_bytes()
            .map_err(|e| IndexError::Config(format!("checksum.size_threshold: {}", e)))?;
        Ok(Self {
            database_url: cfg.database.url,
            scan: ScanSettings {
                recursive: cfg.scan.recursive,
                include_hidden: cfg.scan.include_hidden,
                excludes: cfg.scan.excludes,
                batch_size: cfg.scan.batch_size,
            },
            checksum: ChecksumSettings {
                algorithm,
                size_threshold,
                skip_empty: cfg.checksum.skip_empty,
                workers: cfg.checksum.workers.unwrap_or_else(|| num_cpus::get().clamp(1, 256)),
                batch_size: cfg.checksum.batch_size,
                sequential: cfg.checksum.sequential,
                max_commit_attempts: cfg.checksum.max_commit_attempts,
                commit_backoff_ms: cfg.checksum.commit_backoff_ms,
            },
            duplicates: DuplicateSettings {
                min_group_size: cfg.duplicates.min_group_size,
                page_limit: cfg.duplicates.page_limit.filter(|&l| l > 0),
            },
            dry_run: cfg.reconcile.dry_run,
        })
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: dupindex.toml (in CWD)
        .add_source(::config::File::with_name("dupindex").required(false));

    if let Ok(custom_path) = std::env::var("DUPINDEX_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("DUPINDEX")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("scan.excludes")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

/// Embedded defaults overlaid with a TOML document; no files or environment.
pub fn from_toml_str(overrides: &str) -> anyhow::Result<AppConfig> {
    let cfg = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        .add_source(::config::File::from_str(overrides, ::config::FileFormat::Toml))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.database.url.trim().is_empty() {
        return Err(anyhow::anyhow!("database.url must not be empty"));
    }

    // Scan
    if cfg.scan.batch_size == 0 {
        return Err(anyhow::anyhow!("scan.batch_size must be > 0"));
    }

    // Checksum
    if let Err(e) = cfg.checksum.algorithm.parse::<ChecksumAlgorithm>() {
        return Err(anyhow::anyhow!("checksum.algorithm: {}", e));
    }
    if let Err(e) = cfg.checksum.size_threshold.to_bytes() {
        return Err(anyhow::anyhow!("checksum.size_threshold: {}", e));
    }
    if cfg.checksum.batch_size == 0 {
        return Err(anyhow::anyhow!("checksum.batch_size must be > 0"));
    }
    if let Some(w) = cfg.checksum.workers {
        if w == 0 || w > 256 {
            return Err(anyhow::anyhow!("checksum.workers must be in 1..=256"));
        }
    }
    if cfg.checksum.max_commit_attempts == 0 {
        return Err(anyhow::anyhow!("checksum.max_commit_attempts must be >= 1"));
    }

    // Duplicates
    if cfg.duplicates.min_group_size < 2 {
        return Err(anyhow::anyhow!("duplicates.min_group_size must be >= 2"));
    }

    Ok(())
}

/// Parses a human-readable size into bytes.
///
/// Accepts a plain number or a number followed by `B`, `K`, `M`, `G`, `T`
/// (optionally with `B` or `iB`), case-insensitive. Every suffix is
/// 1024-based. Fractions are allowed: `"1.5GiB"`.
pub fn parse_size(input: &str) -> anyhow::Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("empty size"));
    }
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().map_err(|_| anyhow::anyhow!("invalid size: {:?}", input))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => return Err(anyhow::anyhow!("unknown size unit {:?} in {:?}", other, input)),
    };

    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(anyhow::anyhow!("size out of range: {:?}", input));
    }
    Ok(bytes as u64)
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"));
    if let Some(path) = path {
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() || path.contains(":memory:") {
            return Ok(());
        }
        // On Windows, handle URLs like sqlite:///C:/... by stripping the leading '/'
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
