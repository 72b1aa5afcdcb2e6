//! Probe project synthesis and example discovery.
//!
//! A probe project is a minimal sketch that only includes the library's
//! headers. It lives in a scratch directory owned by one orchestration call
//! and is removed when the [`ProbeProject`] is dropped, on every exit path.
//! A synthesized main header is scoped the same way, so the installed library
//! is left as it was found.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{CompatError, Result};
use crate::manifest::LibraryManifest;

const PROBE_SKETCH: &str = "probe";
const SKETCH_EXTENSIONS: [&str; 2] = ["ino", "pde"];

/// The library's main header, found or synthesized.
///
/// A synthesized header is deleted when this value is dropped, so every run
/// that finds no header records `no_main_header` again.
#[derive(Debug, PartialEq, Eq)]
pub struct MainHeader {
    pub file_name: String,
    pub path: PathBuf,
    /// No header existed; an empty one was written.
    pub synthesized: bool,
}

impl MainHeader {
    /// Look for `<sanitized name>.h` in `src/`, then in the library root.
    ///
    /// When neither exists an empty header is written to `src/` if the library
    /// uses the recursive layout, or to the root for the legacy flat layout.
    pub fn resolve(library_root: &Path, manifest: &LibraryManifest) -> Result<Self> {
        let file_name = manifest.main_header_name();
        let src_dir = library_root.join("src");

        for candidate in [src_dir.join(&file_name), library_root.join(&file_name)] {
            if candidate.is_file() {
                return Ok(Self {
                    file_name,
                    path: candidate,
                    synthesized: false,
                });
            }
        }

        let path = if src_dir.is_dir() {
            src_dir.join(&file_name)
        } else {
            library_root.join(&file_name)
        };
        fs::write(&path, b"").map_err(|e| CompatError::library_io(&path, e))?;
        Ok(Self {
            file_name,
            path,
            synthesized: true,
        })
    }
}

impl Drop for MainHeader {
    fn drop(&mut self) {
        if !self.synthesized {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed synthesized header"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove synthesized header"
            ),
        }
    }
}

/// Sketch text including either every explicit include or the main header.
pub fn probe_sketch_source(includes: &[String], main_header: &str) -> String {
    let mut sketch = String::new();
    if includes.is_empty() {
        sketch.push_str(&format!("#include <{main_header}>\n"));
    } else {
        for include in includes {
            sketch.push_str(&format!("#include <{include}>\n"));
        }
    }
    sketch.push_str("void setup() {}\n");
    sketch.push_str("void loop() {}\n");
    sketch
}

/// Ephemeral sketch project used to test plain library inclusion.
#[derive(Debug)]
pub struct ProbeProject {
    scratch: TempDir,
    sketch_dir: PathBuf,
}

impl ProbeProject {
    /// Materialize the probe sketch under `scratch_root` (system temp if `None`).
    pub fn create(
        scratch_root: Option<&Path>,
        manifest: &LibraryManifest,
        header: &MainHeader,
    ) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("boardcompat-");
        let scratch = match scratch_root {
            Some(root) => {
                fs::create_dir_all(root).map_err(CompatError::Scratch)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(CompatError::Scratch)?;

        let sketch_dir = scratch.path().join(PROBE_SKETCH);
        fs::create_dir(&sketch_dir).map_err(CompatError::Scratch)?;
        let source = probe_sketch_source(&manifest.includes, &header.file_name);
        fs::write(sketch_dir.join(format!("{PROBE_SKETCH}.ino")), source)
            .map_err(CompatError::Scratch)?;

        debug!(path = %sketch_dir.display(), "created probe project");
        Ok(Self {
            scratch,
            sketch_dir,
        })
    }

    pub fn sketch_dir(&self) -> &Path {
        &self.sketch_dir
    }

    /// Root of the scratch directory that is removed on drop.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// One directory visited below a library's `examples/` folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleEntry {
    pub dir: PathBuf,
    /// The directory directly contains a sketch file.
    pub is_sketch: bool,
}

impl ExampleEntry {
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The `examples/` tree of one library. Each call to [`ExampleTree::walk`]
/// starts a fresh traversal.
#[derive(Debug, Clone)]
pub struct ExampleTree {
    root: PathBuf,
}

impl ExampleTree {
    pub fn new(library_root: &Path) -> Self {
        Self {
            root: library_root.join("examples"),
        }
    }

    pub fn walk(&self) -> ExampleWalk {
        let mut pending = child_dirs(&self.root);
        pending.reverse();
        ExampleWalk { pending }
    }

    /// Directories that hold an example sketch.
    pub fn sketch_dirs(&self) -> Vec<ExampleEntry> {
        self.walk().filter(|e| e.is_sketch).collect()
    }
}

/// Lazy depth-first traversal of example directories.
#[derive(Debug)]
pub struct ExampleWalk {
    pending: Vec<PathBuf>,
}

impl Iterator for ExampleWalk {
    type Item = ExampleEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let dir = self.pending.pop()?;
        let children = child_dirs(&dir);
        // Reverse so the stack pops children in name order.
        self.pending.extend(children.into_iter().rev());
        let is_sketch = contains_sketch(&dir);
        Some(ExampleEntry { dir, is_sketch })
    }
}

fn child_dirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && !is_hidden(p))
        .collect();
    dirs.sort();
    dirs
}

fn contains_sketch(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|e| e.ok().map(|e| e.path())).any(|p| {
        p.is_file()
            && p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SKETCH_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
