use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, as recorded in the run history.
pub type EpochMillis = i64;

/// Convert a filesystem timestamp to epoch milliseconds.
pub fn epoch_millis(time: SystemTime) -> EpochMillis {
    DateTime::<Utc>::from(time).timestamp_millis()
}

// ── Scanning ───────────────────────────────────────────────────────

/// A scanned source file and the class it defines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceUnit {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Store key derived from `path` (see [`crate::scan::path_key`]).
    pub key: String,
    /// Fully-qualified class name.
    pub class_name: String,
    pub modified_millis: EpochMillis,
}

/// Changed classes split by the kind of root they were found in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub production: BTreeSet<String>,
    pub tests: BTreeSet<String>,
}

impl ChangeSet {
    /// Build a change set; a name present in both inputs is kept as a test.
    pub fn new(
        production: impl IntoIterator<Item = String>,
        tests: impl IntoIterator<Item = String>,
    ) -> Self {
        let tests: BTreeSet<String> = tests.into_iter().collect();
        let production = production
            .into_iter()
            .filter(|p| !tests.contains(p))
            .collect();
        Self { production, tests }
    }

    pub fn is_empty(&self) -> bool {
        self.production.is_empty() && self.tests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.production.len() + self.tests.len()
    }
}

// ── Selection ──────────────────────────────────────────────────────

/// Why a test ended up in the selection.
///
/// Ordered by precedence: when several rules select the same test the
/// smallest variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// The test source itself changed.
    Changed,
    /// The test exercised a changed class in its last captured run.
    Dependency,
    /// The test failed on its last execution.
    PreviouslyFailed,
    /// The usage graph has no entry for this test.
    Unmapped,
    /// The usage graph is empty, or a forced run ignores it.
    Fallback,
}

impl SelectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Dependency => "dependency",
            Self::PreviouslyFailed => "previously_failed",
            Self::Unmapped => "unmapped",
            Self::Fallback => "fallback",
        }
    }

    /// Selected without positive dependency evidence.
    pub fn is_conservative(self) -> bool {
        matches!(self, Self::Unmapped | Self::Fallback)
    }
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedTest {
    pub name: String,
    pub reason: SelectionReason,
}

/// Tests chosen for execution, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub tests: Vec<SelectedTest>,
    /// `true` when selection was derived from the usage graph, `false` when it
    /// degraded to running every known test.
    pub per_test: bool,
}

impl SelectionResult {
    pub(crate) fn from_reasons(reasons: BTreeMap<String, SelectionReason>, per_test: bool) -> Self {
        Self {
            tests: reasons
                .into_iter()
                .map(|(name, reason)| SelectedTest { name, reason })
                .collect(),
            per_test,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tests.iter().map(|t| t.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tests
            .binary_search_by(|t| t.name.as_str().cmp(name))
            .is_ok()
    }

    pub fn reason_for(&self, name: &str) -> Option<SelectionReason> {
        self.tests
            .binary_search_by(|t| t.name.as_str().cmp(name))
            .ok()
            .map(|i| self.tests[i].reason)
    }

    /// Number of tests selected without dependency evidence.
    pub fn conservative_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.reason.is_conservative())
            .count()
    }
}

// ── Coverage protocol ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    #[default]
    Passed,
    Failed,
    Skipped,
}

/// Classes one test exercised during an instrumented execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCoverage {
    pub test: String,
    #[serde(default)]
    pub classes: BTreeSet<String>,
    #[serde(default)]
    pub outcome: TestOutcome,
}

/// Report produced by an instrumentation-capable runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub tests: Vec<TestCoverage>,
}

impl CoverageReport {
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Selected tests the report says nothing about.
    pub fn missing_from<'a>(&self, selection: &'a SelectionResult) -> Vec<&'a str> {
        let reported: BTreeSet<&str> = self.tests.iter().map(|t| t.test.as_str()).collect();
        selection
            .names()
            .filter(|name| !reported.contains(name))
            .collect()
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Failed)
            .map(|t| t.test.as_str())
    }
}

// ── Orchestration ──────────────────────────────────────────────────

/// Stages of one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Init,
    Scan,
    Select,
    Execute,
    Merge,
    Persist,
    Done,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Scan => "scan",
            Self::Select => "select",
            Self::Execute => "execute",
            Self::Merge => "merge",
            Self::Persist => "persist",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
