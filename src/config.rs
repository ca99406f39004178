//! Configuration for the tinycdn server

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compress::CompressionLevel;
use crate::error::{CdnError, Result};
use crate::hash::HashAlgorithm;

/// Extensions precompressed when `compression` is set but `compress` is not
pub const DEFAULT_COMPRESSIBLE: [&str; 10] = [
    "js", "css", "txt", "html", "svg", "md", "htm", "xml", "json", "yml",
];

/// Server configuration, loaded from a YAML file
///
/// Every key is optional; the defaults serve the current directory over
/// itself with ETags on and compression off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Read-only asset root; `~` expands to the home directory
    #[serde(default = "default_root")]
    pub source: String,

    /// Derivative cache root; should differ from `source` in practice
    #[serde(default = "default_root")]
    pub dest: String,

    /// Bind address for the listener binary
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Compression level; presence enables the compression path
    /// (string "best"|"speed"|"no"|"default" or integer 0-9)
    #[serde(default)]
    pub compression: Option<CompressionSetting>,

    /// Compressible extensions, with or without leading dot
    #[serde(default)]
    pub compress: Option<Vec<String>>,

    /// ETag sidecars: false disables, a string names the hash algorithm,
    /// true means sha256
    #[serde(default = "default_etag")]
    pub etag: EtagSetting,

    /// `max-age` seconds for `Cache-Control` and `Expires`
    #[serde(default = "default_max_age")]
    pub max_age: u64,

    /// Rewrite trailing-slash URLs to `index.html`
    #[serde(default = "default_true")]
    pub auto_index: bool,

    /// Skip the file-operation authority task and touch the filesystem
    /// directly from request tasks
    #[serde(default)]
    pub ignore_cluster: bool,

    /// Emits `Access-Control-Allow-Origin` when nonempty
    #[serde(default)]
    pub access_control_allow_origin: Option<String>,

    /// Custom 404 body served to clients accepting HTML
    #[serde(rename = "404.html", default)]
    pub not_found_html: Option<String>,

    /// Custom 404 body served to clients accepting JSON
    #[serde(rename = "404.json", default)]
    pub not_found_json: Option<String>,

    /// Custom 404 body for everyone else
    #[serde(rename = "404.txt", default)]
    pub not_found_text: Option<String>,
}

/// Raw `compression` value: a named level or a literal integer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompressionSetting {
    Named(String),
    Level(i64),
}

/// Raw `etag` value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EtagSetting {
    Enabled(bool),
    Algorithm(String),
}

fn default_root() -> String {
    ".".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_etag() -> EtagSetting {
    EtagSetting::Enabled(true)
}

fn default_max_age() -> u64 {
    30_672_000
}

fn default_true() -> bool {
    true
}

impl Default for CdnConfig {
    fn default() -> Self {
        CdnConfig {
            source: default_root(),
            dest: default_root(),
            listen: default_listen(),
            compression: None,
            compress: None,
            etag: default_etag(),
            max_age: default_max_age(),
            auto_index: default_true(),
            ignore_cluster: false,
            access_control_allow_origin: None,
            not_found_html: None,
            not_found_json: None,
            not_found_text: None,
        }
    }
}

impl CdnConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CdnError::ConfigError(format!("Failed to read config file: {e}")))?;
        let config: CdnConfig = serde_yaml::from_str(&content)
            .map_err(|e| CdnError::ConfigError(format!("Failed to parse config file: {e}")))?;
        Ok(config)
    }

    /// Asset root with `~` expanded
    pub fn source_root(&self) -> PathBuf {
        expand_home(&self.source)
    }

    /// Cache root with `~` expanded
    pub fn dest_root(&self) -> PathBuf {
        expand_home(&self.dest)
    }

    /// Resolved compression level; `None` means the compression path is off
    pub fn compression_level(&self) -> Option<CompressionLevel> {
        self.compression.as_ref().map(|setting| match setting {
            CompressionSetting::Named(name) => CompressionLevel::resolve_name(name),
            CompressionSetting::Level(level) => CompressionLevel::resolve_int(*level),
        })
    }

    /// Normalized compressible-extension set
    ///
    /// Empty when the compression path is off, so every request selects the
    /// raw group. Operator entries `"txt"` and `".txt"` are equivalent.
    pub fn compressible_extensions(&self) -> HashSet<String> {
        if self.compression.is_none() {
            return HashSet::new();
        }
        match &self.compress {
            Some(entries) => entries
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            None => DEFAULT_COMPRESSIBLE.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Resolved sidecar algorithm; `None` disables ETags entirely
    pub fn etag_algorithm(&self) -> Result<Option<HashAlgorithm>> {
        match &self.etag {
            EtagSetting::Enabled(false) => Ok(None),
            EtagSetting::Enabled(true) => Ok(Some(HashAlgorithm::Sha256)),
            EtagSetting::Algorithm(name) => HashAlgorithm::resolve(name).map(Some),
        }
    }

    /// Startup preflight over the configured roots
    ///
    /// Both roots must exist and be directories before the listener starts;
    /// anything else is fatal.
    pub fn validate_roots(&self) -> Result<()> {
        for (label, root) in [("source", self.source_root()), ("dest", self.dest_root())] {
            let metadata = fs::metadata(&root).map_err(|e| {
                CdnError::ConfigError(format!("{label} directory {}: {e}", root.display()))
            })?;
            if !metadata.is_dir() {
                return Err(CdnError::ConfigError(format!(
                    "{label} path {} is not a directory",
                    root.display()
                )));
            }
        }
        if self.source_root() == self.dest_root() {
            warn!(
                root = %self.source_root().display(),
                "source and dest are the same directory; derivatives will mix with assets"
            );
        }
        Ok(())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}
