//! Request URL sanitizing and asset path mapping
//!
//! Maps a raw request URL to the source file it addresses and the base path
//! its derivative artifacts live under in the destination tree.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::compress::Encoding;
use crate::error::{CdnError, Result};
use crate::hash::HashAlgorithm;

/// A sanitized request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    /// Cleaned URL path: query stripped, directory index applied
    pub clean_url: String,
    /// Absolute path of the asset under the source root
    pub source: PathBuf,
    /// Absolute path under the destination root that artifact suffixes
    /// are appended to
    pub dest_base: PathBuf,
}

impl AssetPaths {
    /// Path of the artifact served for `encoding`
    ///
    /// The raw group serves the source file itself; compressed groups serve
    /// `dest_base` with the group name appended as an extra extension.
    pub fn artifact(&self, encoding: Encoding) -> PathBuf {
        match encoding {
            Encoding::Raw => self.source.clone(),
            _ => append_suffix(&self.dest_base, encoding.token()),
        }
    }

    /// Path of the hash sidecar for `(asset, encoding)`
    pub fn sidecar(&self, encoding: Encoding, algorithm: HashAlgorithm) -> PathBuf {
        let with_group = append_suffix(&self.dest_base, encoding.token());
        append_suffix(&with_group, algorithm.name())
    }

    /// File extension of the cleaned URL, if any
    pub fn extension(&self) -> Option<&str> {
        let name = self.clean_url.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            // Dotfiles like /.gitignore have no extension.
            return None;
        }
        Some(ext)
    }
}

fn append_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_os_string();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

/// Sanitize a raw request URL into asset paths
///
/// Strips the query string, rewrites a trailing `/` to `/index.html` when
/// auto-index is on, and rejects directory requests otherwise. Forward
/// slashes become platform separators by joining URL segments as path
/// components. Segments that would escape the source root (`..`) are
/// rejected the same way directory requests are.
pub fn sanitize(
    raw_url: &str,
    source_root: &Path,
    dest_root: &Path,
    auto_index: bool,
) -> Result<AssetPaths> {
    let mut clean = match raw_url.find('?') {
        Some(idx) => raw_url[..idx].to_string(),
        None => raw_url.to_string(),
    };

    if clean.ends_with('/') {
        if auto_index {
            clean.push_str("index.html");
        } else {
            return Err(CdnError::DirectoryRequest(clean));
        }
    }

    let relative = clean.strip_prefix('/').unwrap_or(&clean);
    if relative.is_empty() {
        return Err(CdnError::DirectoryRequest(clean.clone()));
    }

    let mut source = source_root.to_path_buf();
    let mut dest_base = dest_root.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(CdnError::DirectoryRequest(clean.clone()));
        }
        source.push(segment);
        dest_base.push(segment);
    }

    Ok(AssetPaths {
        clean_url: clean,
        source,
        dest_base,
    })
}
