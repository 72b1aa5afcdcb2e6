//! Compatibility aggregation over persisted result sets.
//!
//! [`aggregate`] is a pure fold: the same result sets in any order produce
//! the same [`AggregateReport`]. Every ordered output is explicitly sorted.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::architecture_of;
use crate::error::Result;
use crate::manifest::{sanitize_name, WILDCARD_ARCHITECTURE};
use crate::results::{LibraryResultSet, TestObservation};
use crate::store::{list_result_files, read_result_file};
use crate::version::{compare_versions, sort_versions};

/// Base of the canonical library reference pages.
pub const LIBRARY_REFERENCE_BASE: &str = "https://www.arduino.cc/reference/en/libraries/";

/// Pass/fail crossed with whether the library claimed the board's architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityStatus {
    PassClaim,
    PassNoclaim,
    FailClaim,
    FailNoclaim,
}

impl CompatibilityStatus {
    pub fn classify(passed: bool, claims: bool) -> Self {
        match (passed, claims) {
            (true, true) => CompatibilityStatus::PassClaim,
            (true, false) => CompatibilityStatus::PassNoclaim,
            (false, true) => CompatibilityStatus::FailClaim,
            (false, false) => CompatibilityStatus::FailNoclaim,
        }
    }

    pub fn of(observation: &TestObservation) -> Self {
        Self::classify(observation.passed(), observation.claims())
    }

    pub fn passed(self) -> bool {
        matches!(self, CompatibilityStatus::PassClaim | CompatibilityStatus::PassNoclaim)
    }

    pub fn claims(self) -> bool {
        matches!(self, CompatibilityStatus::PassClaim | CompatibilityStatus::FailClaim)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompatibilityStatus::PassClaim => "PASS_CLAIM",
            CompatibilityStatus::PassNoclaim => "PASS_NOCLAIM",
            CompatibilityStatus::FailClaim => "FAIL_CLAIM",
            CompatibilityStatus::FailNoclaim => "FAIL_NOCLAIM",
        }
    }
}

impl std::fmt::Display for CompatibilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics for one board across every library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoardStats {
    pub fqbn: String,
    pub architecture: String,
    /// Every core version this board was tested with, ascending.
    pub core_versions: Vec<String>,
    pub pass_claim: usize,
    pub pass_noclaim: usize,
    pub fail_claim: usize,
    pub fail_noclaim: usize,
    pub claim: usize,
    /// Claims made by libraries that did not declare the wildcard.
    pub explicit_claim: usize,
    pub claim_mismatch: usize,
    pub pass: usize,
    pub fail: usize,
    pub untested: usize,
    pub fail_claim_wildcard: usize,
    pub fail_explicit_claim: usize,
}

/// Per-library view: latest status and observation per board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryReport {
    pub name: String,
    /// Version of the newest observation.
    pub version: String,
    pub report_file: String,
    pub url: String,
    pub wildcard: bool,
    pub boards: BTreeMap<String, CompatibilityStatus>,
    pub results: BTreeMap<String, TestObservation>,
    /// Names of every example seen on any board, sorted.
    pub examples: Vec<String>,
    /// Example count of the newest observation.
    pub num_examples: usize,
}

/// How many libraries ship `examples` examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExampleCount {
    pub examples: usize,
    pub libraries: usize,
}

/// Everything the reporting layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub num_libraries: usize,
    pub num_boards: usize,
    pub num_libraries_wildcard: usize,
    pub num_claim_all_boards: usize,
    pub num_claim_no_boards: usize,
    pub num_pass_all_boards: usize,
    pub num_pass_no_boards: usize,
    pub num_fail_claim: usize,
    pub num_wildcard_fail: usize,
    pub has_untested: bool,
    pub boards: Vec<BoardStats>,
    pub libraries: Vec<LibraryReport>,
    pub examples: Vec<ExampleCount>,
}

impl AggregateReport {
    /// `count` as a share of all libraries.
    pub fn percent(&self, count: usize) -> String {
        format_percent(count, self.num_libraries)
    }

    pub fn board(&self, fqbn: &str) -> Option<&BoardStats> {
        self.boards.iter().find(|b| b.fqbn == fqbn)
    }

    pub fn library(&self, name: &str) -> Option<&LibraryReport> {
        self.libraries.iter().find(|l| l.name == name)
    }
}

/// `count / total` to one decimal place; `"0.0%"` when `total` is zero.
pub fn format_percent(count: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", count as f64 / total as f64 * 100.0)
}

/// Reference-page slug: trimmed, spaces to hyphens, lowercased, and only
/// `[a-z0-9_-]` kept.
pub fn library_slug(name: &str) -> String {
    name.trim()
        .replace(' ', "-")
        .to_lowercase()
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
        .collect()
}

pub fn library_url(name: &str) -> String {
    format!("{LIBRARY_REFERENCE_BASE}{}/", library_slug(name))
}

// Ascending library version, then core version. The remaining keys only
// make the order total so duplicates fold the same way regardless of input.
fn observation_order(a: &TestObservation, b: &TestObservation) -> Ordering {
    compare_versions(&a.version, &b.version)
        .then_with(|| compare_versions(&a.core_version, &b.core_version))
        .then_with(|| a.fqbn.cmp(&b.fqbn))
        .then_with(|| a.result.as_str().cmp(b.result.as_str()))
}

struct FoldedLibrary {
    version: String,
    wildcard: bool,
    num_examples: usize,
    boards: BTreeMap<String, (CompatibilityStatus, TestObservation)>,
}

/// Fold result sets into an [`AggregateReport`].
///
/// Sets with an empty name are ignored; sets sharing a name are merged.
pub fn aggregate<I>(sets: I) -> AggregateReport
where
    I: IntoIterator<Item = LibraryResultSet>,
{
    let mut merged: BTreeMap<String, Vec<TestObservation>> = BTreeMap::new();
    for set in sets {
        if set.name.is_empty() {
            debug!("ignoring result set without a library name");
            continue;
        }
        merged.entry(set.name).or_default().extend(set.tests);
    }

    let mut libraries: BTreeMap<String, FoldedLibrary> = BTreeMap::new();
    let mut board_versions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (name, mut tests) in merged {
        tests.sort_by(observation_order);
        let Some(latest) = tests.last() else {
            continue;
        };
        let mut folded = FoldedLibrary {
            version: latest.version.clone(),
            wildcard: latest.architectures.iter().any(|a| a == WILDCARD_ARCHITECTURE),
            num_examples: latest.examples.len(),
            boards: BTreeMap::new(),
        };
        for test in tests {
            board_versions
                .entry(test.fqbn.clone())
                .or_default()
                .insert(test.core_version.clone());
            let status = CompatibilityStatus::of(&test);
            folded.boards.insert(test.fqbn.clone(), (status, test));
        }
        libraries.insert(name, folded);
    }

    let num_libraries = libraries.len();
    let num_boards = board_versions.len();
    let mut report = AggregateReport {
        num_libraries,
        num_boards,
        num_libraries_wildcard: libraries.values().filter(|l| l.wildcard).count(),
        ..AggregateReport::default()
    };

    for (fqbn, versions) in board_versions {
        let mut stats = BoardStats {
            architecture: architecture_of(&fqbn).to_string(),
            core_versions: versions.into_iter().collect(),
            ..BoardStats::default()
        };
        sort_versions(&mut stats.core_versions);

        for library in libraries.values() {
            let Some((status, _)) = library.boards.get(&fqbn) else {
                continue;
            };
            match status {
                CompatibilityStatus::PassClaim => stats.pass_claim += 1,
                CompatibilityStatus::PassNoclaim => stats.pass_noclaim += 1,
                CompatibilityStatus::FailClaim => {
                    stats.fail_claim += 1;
                    if library.wildcard {
                        stats.fail_claim_wildcard += 1;
                    }
                }
                CompatibilityStatus::FailNoclaim => stats.fail_noclaim += 1,
            }
            if status.claims() && !library.wildcard {
                stats.explicit_claim += 1;
            }
        }

        stats.claim = stats.pass_claim + stats.fail_claim;
        stats.claim_mismatch = stats.pass_noclaim + stats.fail_claim;
        stats.pass = stats.pass_claim + stats.pass_noclaim;
        stats.fail = stats.fail_claim + stats.fail_noclaim;
        stats.untested = num_libraries.saturating_sub(stats.pass + stats.fail);
        stats.fail_explicit_claim = stats.fail_claim - stats.fail_claim_wildcard;
        report.has_untested |= stats.untested > 0;
        stats.fqbn = fqbn;
        report.boards.push(stats);
    }

    let mut example_distribution: BTreeMap<usize, usize> = BTreeMap::new();
    for (name, library) in libraries {
        let statuses = library.boards.values().map(|(s, _)| *s);
        let claims = statuses.clone().filter(|s| s.claims()).count();
        let passes = statuses.clone().filter(|s| s.passed()).count();
        let fails = statuses.clone().filter(|s| !s.passed()).count();
        let fail_claims = statuses.filter(|s| *s == CompatibilityStatus::FailClaim).count();

        report.num_claim_all_boards += usize::from(claims == num_boards);
        report.num_claim_no_boards += usize::from(claims == 0);
        report.num_pass_all_boards += usize::from(passes == num_boards);
        report.num_pass_no_boards += usize::from(passes == 0);
        report.num_fail_claim += usize::from(fail_claims > 0);
        report.num_wildcard_fail += usize::from(fails > 0 && library.wildcard);

        *example_distribution.entry(library.num_examples).or_default() += 1;

        let mut boards = BTreeMap::new();
        let mut results = BTreeMap::new();
        let mut examples = BTreeSet::new();
        for (fqbn, (status, observation)) in library.boards {
            examples.extend(observation.examples.iter().map(|e| e.name.clone()));
            boards.insert(fqbn.clone(), status);
            results.insert(fqbn, observation);
        }

        report.libraries.push(LibraryReport {
            report_file: format!("{}.html", sanitize_name(&name)),
            url: library_url(&name),
            name,
            version: library.version,
            wildcard: library.wildcard,
            boards,
            results,
            examples: examples.into_iter().collect(),
            num_examples: library.num_examples,
        });
    }

    report.examples = example_distribution
        .into_iter()
        .map(|(examples, libraries)| ExampleCount {
            examples,
            libraries,
        })
        .collect();
    report
}

/// Aggregate every result file in `dir`.
///
/// Unreadable or corrupt files are skipped with a warning.
pub fn aggregate_dir(dir: &Path) -> Result<AggregateReport> {
    let mut sets = Vec::new();
    for path in list_result_files(dir)? {
        match read_result_file(&path) {
            Ok(set) => sets.push(set),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping result file"),
        }
    }
    debug!(files = sets.len(), "aggregating result files");
    Ok(aggregate(sets))
}
