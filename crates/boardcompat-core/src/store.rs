//! Durable per-library result files.
//!
//! Layout: `<data_dir>/<sanitized library name>.json`, one file per library,
//! so concurrent workers never write the same file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CompatError, Result};
use crate::manifest::sanitize_name;
use crate::results::LibraryResultSet;

/// Filesystem-backed store of [`LibraryResultSet`]s.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| CompatError::ResultStoreUnwritable {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, library: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_name(library)))
    }

    /// Load the prior results of `library`; a missing file is an empty set.
    pub fn load(&self, library: &str) -> Result<LibraryResultSet> {
        let path = self.path_for(library);
        if !path.exists() {
            return Ok(LibraryResultSet::default());
        }
        read_result_file(&path)
    }

    /// Persist `results` as the result file of `library`.
    pub fn save(&self, library: &str, results: &LibraryResultSet) -> Result<PathBuf> {
        let path = self.path_for(library);
        write_result_file(&path, results)?;
        debug!(library = %library, path = %path.display(), "saved result file");
        Ok(path)
    }

    /// Every `*.json` file in the store, sorted by path.
    pub fn result_files(&self) -> Result<Vec<PathBuf>> {
        list_result_files(&self.dir)
    }
}

/// Read and parse one result file.
pub fn read_result_file(path: &Path) -> Result<LibraryResultSet> {
    let bytes = fs::read(path).map_err(|e| CompatError::ResultFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| CompatError::ResultFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Atomically write one result file (temp file in the same directory, then rename).
pub fn write_result_file(path: &Path, results: &LibraryResultSet) -> Result<()> {
    let unwritable = |source: std::io::Error| CompatError::ResultStoreUnwritable {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut json = serde_json::to_vec_pretty(results)
        .map_err(|e| unwritable(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    json.push(b'\n');

    let mut tmp = NamedTempFile::new_in(parent).map_err(unwritable)?;
    tmp.write_all(&json).map_err(unwritable)?;
    tmp.persist(path).map_err(|e| unwritable(e.error))?;
    Ok(())
}

/// List `*.json` files in `dir`, sorted by path.
pub fn list_result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| CompatError::ResultFile {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}
