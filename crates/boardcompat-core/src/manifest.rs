//! Library metadata reader (`library.properties`).

use std::path::{Path, PathBuf};

use crate::error::{CompatError, Result};

/// Manifest file name at the root of every library.
pub const MANIFEST_FILE: &str = "library.properties";

/// Architecture token meaning "compatible with every architecture".
pub const WILDCARD_ARCHITECTURE: &str = "*";

/// Declared metadata of one library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryManifest {
    pub name: String,
    pub version: String,
    /// Declared architectures. Empty means no declared compatibility.
    pub architectures: Vec<String>,
    /// Explicit header includes for the probe project.
    pub includes: Vec<String>,
}

impl LibraryManifest {
    /// Read `<library_root>/library.properties`.
    pub fn read(library_root: &Path) -> Result<Self> {
        let path = library_root.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path).map_err(|source| CompatError::ManifestNotFound {
            path: path.clone(),
            source,
        })?;
        Self::parse(&String::from_utf8_lossy(&bytes), path)
    }

    /// Parse manifest text. `origin` is only used for diagnostics.
    pub fn parse(text: &str, origin: impl Into<PathBuf>) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut name = String::new();
        let mut version = String::new();
        let mut architectures = String::new();
        let mut includes = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "name" => name = value,
                "version" => version = value,
                "architectures" => architectures = value,
                "includes" => includes = value,
                _ => {}
            }
        }

        if name.is_empty() {
            return Err(CompatError::ManifestInvalid {
                path: origin.into(),
                reason: "no library name".to_string(),
            });
        }

        Ok(Self {
            name,
            version,
            architectures: split_list(&architectures),
            includes: split_list(&includes),
        })
    }

    /// `name@version`, the prefix used in log lines.
    pub fn name_and_version(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// File name of the conventional main header.
    pub fn main_header_name(&self) -> String {
        format!("{}.h", sanitize_name(&self.name))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
///
/// Used for install directories, header names, result and report files.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Whether `core_architecture` is covered by a declared architecture list.
pub fn claims_architecture(declared: &[String], core_architecture: &str) -> bool {
    declared
        .iter()
        .any(|arch| arch == WILDCARD_ARCHITECTURE || arch.eq_ignore_ascii_case(core_architecture))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<LibraryManifest> {
        LibraryManifest::parse(text, "library.properties")
    }

    #[test]
    fn test_parse_full_manifest() {
        let m = parse(
            "name=Servo\nversion=1.2.1\narchitectures=avr, megaavr,sam\nincludes=Servo.h\n",
        )
        .unwrap();
        assert_eq!(m.name, "Servo");
        assert_eq!(m.version, "1.2.1");
        assert_eq!(m.architectures, vec!["avr", "megaavr", "sam"]);
        assert_eq!(m.includes, vec!["Servo.h"]);
        assert_eq!(m.name_and_version(), "Servo@1.2.1");
    }

    #[test]
    fn test_empty_tokens_discarded() {
        let m = parse("name=Foo\narchitectures=avr,,esp32,\nincludes=,\n").unwrap();
        assert_eq!(m.architectures, vec!["avr", "esp32"]);
        assert!(m.includes.is_empty());
    }

    #[test]
    fn test_empty_architectures_is_not_wildcard() {
        let m = parse("name=Foo\narchitectures=\n").unwrap();
        assert!(m.architectures.is_empty());
        assert!(!claims_architecture(&m.architectures, "avr"));
    }

    #[test]
    fn test_missing_name_is_invalid() {
        let err = parse("version=1.0.0\n").unwrap_err();
        assert!(matches!(err, CompatError::ManifestInvalid { .. }));

        let err = parse("name=\nversion=1.0.0\n").unwrap_err();
        assert!(matches!(err, CompatError::ManifestInvalid { .. }));
    }

    #[test]
    fn test_comments_bom_and_whitespace() {
        let m = parse("\u{feff}# comment\n! other comment\n\n  name = My Lib  \nversion=0.1\n")
            .unwrap();
        assert_eq!(m.name, "My Lib");
        assert_eq!(m.version, "0.1");
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibraryManifest::read(dir.path()).unwrap_err();
        assert!(matches!(err, CompatError::ManifestNotFound { .. }));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Adafruit NeoPixel"), "Adafruit_NeoPixel");
        assert_eq!(sanitize_name("Arduino_JSON-1.0"), "Arduino_JSON-1.0");
        assert_eq!(sanitize_name("A/B(C)"), "A_B_C_");
    }

    #[test]
    fn test_main_header_name() {
        let m = parse("name=Adafruit GFX Library\n").unwrap();
        assert_eq!(m.main_header_name(), "Adafruit_GFX_Library.h");
    }

    #[test]
    fn test_claims_architecture() {
        let declared = vec!["AVR".to_string()];
        assert!(claims_architecture(&declared, "avr"));
        assert!(!claims_architecture(&declared, "esp32"));
        assert!(claims_architecture(&["*".to_string()], "esp32"));
    }
}
