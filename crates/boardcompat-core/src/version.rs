//! Relaxed semantic-version ordering for library and core versions.
//!
//! Library authors publish versions like `1.2`, `v2.0.0-beta` or `1.0.0+build`.
//! Parsing is lenient: an optional `v` prefix, one to three numeric
//! components (missing ones are zero), an optional pre-release after `-`,
//! and build metadata after `+` which is ignored. Anything unparsable sorts
//! before every parsable version; unparsable versions compare by their text.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Semver {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Option<String>,
}

impl Semver {
    fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let input = input.strip_prefix('v').unwrap_or(input);
        let input = input.split_once('+').map_or(input, |(v, _)| v);

        let (version_part, pre) = match input.split_once('-') {
            Some((v, p)) if !p.is_empty() => (v, Some(p.to_string())),
            Some(_) => return None,
            None => (input, None),
        };

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return None;
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.parse::<u64>().ok()?;
        }

        Some(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
        })
    }

    /// Pre-release < release for equal numeric versions.
    fn cmp_version(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// Total order over version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Semver::parse(a), Semver::parse(b)) {
        (Some(x), Some(y)) => x.cmp_version(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Sort version strings ascending.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare_versions("1.2.10", "1.2.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0", "10.0.0"), Ordering::Less);
    }

    #[test]
    fn test_relaxed_forms() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.3.0", "1.2.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0+build5", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_prerelease_before_release() {
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
    }

    #[test]
    fn test_invalid_sorts_first() {
        assert_eq!(compare_versions("", "0.0.1"), Ordering::Less);
        assert_eq!(compare_versions("latest", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn test_sort_versions() {
        let mut v = vec!["1.8.6".to_string(), "1.8.10".to_string(), "1.6.0".to_string()];
        sort_versions(&mut v);
        assert_eq!(v, vec!["1.6.0", "1.8.6", "1.8.10"]);
    }
}
