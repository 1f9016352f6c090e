use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::persist::{self, FORMAT_VERSION, LoadOutcome, Versioned};
use crate::error::StoreError;
use crate::types::{CoverageReport, TestOutcome};

/// One test's edge set as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub test: String,
    pub classes: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageFile {
    version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tests: Vec<UsageEntry>,
    #[serde(default)]
    failing: BTreeSet<String>,
}

impl Versioned for UsageFile {
    fn version(&self) -> u32 {
        self.version
    }
}

/// Test → classes it exercised in its last instrumented run.
///
/// Edge sets are only ever replaced whole. A test with an empty edge set is
/// still an entry: it ran and touched nothing worth tracking.
#[derive(Debug, Clone, Default)]
pub struct UsageGraphStore {
    edges: BTreeMap<String, BTreeSet<String>>,
    failing: BTreeSet<String>,
    load_outcome: LoadOutcome,
}

impl UsageGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip_all, name = "usage_load")]
    pub fn load(location: &Path) -> Self {
        let (file, load_outcome) = persist::read_json::<UsageFile>(location, "usage_graph");
        let (edges, failing) = file
            .map(|f| {
                let edges = f.tests.into_iter().map(|e| (e.test, e.classes)).collect();
                (edges, f.failing)
            })
            .unwrap_or_default();
        let store = Self {
            edges,
            failing,
            load_outcome,
        };
        debug!(
            tests = store.test_count(),
            edges = store.edge_count(),
            path = %location.display(),
            "Usage graph ready"
        );
        store
    }

    pub fn edges_for(&self, test: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(test)
    }

    pub fn contains_test(&self, test: &str) -> bool {
        self.edges.contains_key(test)
    }

    /// Replace the whole edge set of `test`. Edges from earlier runs are dropped.
    pub fn replace_edges(&mut self, test: impl Into<String>, classes: impl IntoIterator<Item = String>) {
        self.edges
            .insert(test.into(), classes.into_iter().collect());
    }

    pub fn remove_test(&mut self, test: &str) -> bool {
        self.failing.remove(test);
        self.edges.remove(test).is_some()
    }

    /// Remove entries for tests not in `known`. Returns the removed names.
    pub fn prune_tests(&mut self, known: &BTreeSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .edges
            .keys()
            .filter(|t| !known.contains(*t))
            .cloned()
            .collect();
        for test in &stale {
            self.edges.remove(test);
        }
        self.failing.retain(|t| known.contains(t));
        if !stale.is_empty() {
            debug!(pruned = stale.len(), "Pruned usage entries of removed tests");
        }
        stale
    }

    /// Apply an instrumentation report: replace each executed test's edges and
    /// track which tests are currently failing. Skipped tests were not
    /// instrumented, so their recorded edges stay as they are (and a skipped
    /// test without an entry stays unmapped). Returns how many tests were updated.
    pub fn apply_report(&mut self, report: &CoverageReport) -> usize {
        let mut updated = 0;
        for coverage in &report.tests {
            match coverage.outcome {
                TestOutcome::Skipped => continue,
                TestOutcome::Failed => {
                    self.failing.insert(coverage.test.clone());
                }
                TestOutcome::Passed => {
                    self.failing.remove(&coverage.test);
                }
            }
            self.replace_edges(coverage.test.clone(), coverage.classes.iter().cloned());
            updated += 1;
        }
        updated
    }

    pub fn is_failing(&self, test: &str) -> bool {
        self.failing.contains(test)
    }

    pub fn failing(&self) -> impl Iterator<Item = &str> {
        self.failing.iter().map(String::as_str)
    }

    pub fn tests(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.edges.iter().map(|(t, c)| (t.as_str(), c))
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn test_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    #[instrument(skip_all, name = "usage_save")]
    pub fn save(&self, location: &Path) -> Result<(), StoreError> {
        let file = UsageFile {
            version: FORMAT_VERSION,
            saved_at: Some(Utc::now()),
            tests: self
                .edges
                .iter()
                .map(|(test, classes)| UsageEntry {
                    test: test.clone(),
                    classes: classes.clone(),
                })
                .collect(),
            failing: self.failing.clone(),
        };
        persist::write_json_atomic(location, &file)?;
        debug!(tests = self.test_count(), path = %location.display(), "Usage graph saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestCoverage;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn replace_edges_replaces_instead_of_merging() {
        let mut graph = UsageGraphStore::new();
        graph.replace_edges("t.T", vec!["p.A".to_string()]);
        graph.replace_edges("t.T", vec!["p.B".to_string()]);
        assert_eq!(graph.edges_for("t.T"), Some(&set(&["p.B"])));
    }

    #[test]
    fn empty_edge_set_is_still_an_entry() {
        let mut graph = UsageGraphStore::new();
        graph.replace_edges("t.Isolated", Vec::new());
        assert!(graph.contains_test("t.Isolated"));
        assert!(!graph.is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn save_then_load_restores_edges_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testsift-usage.json");

        let mut graph = UsageGraphStore::new();
        graph.apply_report(&CoverageReport {
            tests: vec![
                TestCoverage {
                    test: "com.app.FooTest".into(),
                    classes: set(&["com.app.Foo", "com.app.Util"]),
                    outcome: TestOutcome::Passed,
                },
                TestCoverage {
                    test: "com.app.BarTest".into(),
                    classes: set(&["com.app.Bar"]),
                    outcome: TestOutcome::Failed,
                },
            ],
        });
        graph.save(&path).unwrap();

        let loaded = UsageGraphStore::load(&path);
        assert_eq!(loaded.load_outcome(), &LoadOutcome::Loaded);
        assert_eq!(loaded.test_count(), 2);
        assert_eq!(loaded.edge_count(), 3);
        assert_eq!(
            loaded.edges_for("com.app.FooTest"),
            Some(&set(&["com.app.Foo", "com.app.Util"]))
        );
        assert!(loaded.is_failing("com.app.BarTest"));
        assert!(!loaded.is_failing("com.app.FooTest"));
    }

    #[test]
    fn passing_run_clears_failure() {
        let mut graph = UsageGraphStore::new();
        let run = |outcome| CoverageReport {
            tests: vec![TestCoverage {
                test: "t.T".into(),
                classes: set(&["p.A"]),
                outcome,
            }],
        };
        graph.apply_report(&run(TestOutcome::Failed));
        assert!(graph.is_failing("t.T"));
        graph.apply_report(&run(TestOutcome::Skipped));
        assert!(graph.is_failing("t.T"));
        graph.apply_report(&run(TestOutcome::Passed));
        assert!(!graph.is_failing("t.T"));
    }

    #[test]
    fn skipped_test_keeps_recorded_edges() {
        let mut graph = UsageGraphStore::new();
        graph.replace_edges("t.T", vec!["p.A".to_string()]);
        let updated = graph.apply_report(&CoverageReport {
            tests: vec![
                TestCoverage {
                    test: "t.T".into(),
                    classes: BTreeSet::new(),
                    outcome: TestOutcome::Skipped,
                },
                TestCoverage {
                    test: "t.New".into(),
                    classes: BTreeSet::new(),
                    outcome: TestOutcome::Skipped,
                },
            ],
        });
        assert_eq!(updated, 0);
        assert_eq!(graph.edges_for("t.T"), Some(&set(&["p.A"])));
        assert!(!graph.contains_test("t.New"));
    }

    #[test]
    fn unreported_tests_keep_their_edges() {
        let mut graph = UsageGraphStore::new();
        graph.replace_edges("t.Kept", vec!["p.A".to_string()]);
        graph.apply_report(&CoverageReport {
            tests: vec![TestCoverage {
                test: "t.Other".into(),
                classes: set(&["p.B"]),
                outcome: TestOutcome::Passed,
            }],
        });
        assert_eq!(graph.edges_for("t.Kept"), Some(&set(&["p.A"])));
    }

    #[test]
    fn prune_tests_removes_deleted_tests() {
        let mut graph = UsageGraphStore::new();
        graph.replace_edges("t.Alive", vec!["p.A".to_string()]);
        graph.replace_edges("t.Gone", vec!["p.A".to_string()]);
        graph.failing.insert("t.Gone".into());

        let removed = graph.prune_tests(&set(&["t.Alive"]));
        assert_eq!(removed, vec!["t.Gone".to_string()]);
        assert!(!graph.contains_test("t.Gone"));
        assert!(!graph.is_failing("t.Gone"));
        assert!(graph.contains_test("t.Alive"));
    }

    #[test]
    fn corrupted_graph_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testsift-usage.json");
        std::fs::write(&path, "{\"version\":1,\"tests\":[{\"test\":").unwrap();

        let graph = UsageGraphStore::load(&path);
        assert!(graph.is_empty());
        assert!(graph.load_outcome().is_degraded());
    }
}
