// Run orchestrator: INIT → SCAN → SELECT → EXECUTE → MERGE → PERSIST.
//
// Load and save problems degrade (more tests run next time); configuration,
// scan and execution problems abort the run before anything is persisted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::config::TestsiftConfig;
use crate::error::{ConfigError, ScanError, TestsiftError};
use crate::execute::{ExecutionRequest, TestExecutor};
use crate::progress::ProgressReporter;
use crate::scan::{ChangeScanner, ScanOutcome, ScanSpec};
use crate::select;
use crate::store::{LoadOutcome, RunHistoryStore, UsageGraphStore};
use crate::types::{ChangeSet, CoverageReport, EpochMillis, RunStage, SelectionResult};

/// Behavior switches for one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore recorded history and usage edges: every file counts as changed
    /// and every known test is selected. A fresh baseline is still recorded.
    pub force: bool,
}

/// Where the three persisted stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocations {
    pub history: PathBuf,
    pub test_history: PathBuf,
    pub usage: PathBuf,
}

impl StoreLocations {
    pub fn from_config(config: &TestsiftConfig, project_root: &Path) -> Self {
        Self {
            history: config.history_path(project_root),
            test_history: config.test_history_path(project_root),
            usage: config.usage_path(project_root),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.history, &self.test_history, &self.usage]
    }
}

/// Everything known after SELECT. Nothing has been written yet.
#[derive(Debug)]
pub struct RunPlan {
    pub started_at: DateTime<Utc>,
    pub history: RunHistoryStore,
    pub test_history: RunHistoryStore,
    pub graph: UsageGraphStore,
    pub production: ScanOutcome,
    pub tests: ScanOutcome,
    pub changes: ChangeSet,
    /// Test-root classes that are runnable tests; support classes are left out.
    pub known_tests: BTreeSet<String>,
    pub selection: SelectionResult,
    /// Coverage recorded before this instant cannot describe this run.
    pub coverage_not_before: Option<EpochMillis>,
    /// Graph entries dropped because their test no longer exists.
    pub pruned_tests: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub production_scanned: usize,
    pub production_changed: usize,
    pub tests_scanned: usize,
    pub tests_changed: usize,
    pub selection: SelectionResult,
    pub executed: usize,
    pub failed: Vec<String>,
    pub history_saved: bool,
    pub test_history_saved: bool,
    pub graph_saved: bool,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl RunSummary {
    /// Every executed test passed. Store save failures do not count.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn fully_persisted(&self) -> bool {
        self.history_saved && self.test_history_saved && self.graph_saved
    }
}

/// Drives one invocation over a project. Holds no state between invocations;
/// two orchestrators must not target the same store locations concurrently.
#[derive(Debug, Clone)]
pub struct RunOrchestrator {
    project_root: PathBuf,
    config: TestsiftConfig,
    options: RunOptions,
}

impl RunOrchestrator {
    pub fn new(project_root: &Path, config: TestsiftConfig) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config,
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &TestsiftConfig {
        &self.config
    }

    pub fn locations(&self) -> StoreLocations {
        StoreLocations::from_config(&self.config, &self.project_root)
    }

    /// Full pass: plan, hand the selection to `executor`, merge and persist.
    #[instrument(skip_all, name = "run", fields(runner = executor.id()))]
    pub async fn run(
        &self,
        executor: &dyn TestExecutor,
        progress: &dyn ProgressReporter,
    ) -> crate::error::Result<RunSummary> {
        let plan = self.plan(progress).await?;
        self.complete(plan, executor, progress).await
    }

    /// INIT → SCAN → SELECT. Leaves every store on disk untouched.
    #[instrument(skip_all, name = "plan")]
    pub async fn plan(&self, progress: &dyn ProgressReporter) -> crate::error::Result<RunPlan> {
        let started_at = Utc::now();
        let mut warnings = Vec::new();
        let test_classes = self
            .config
            .test_class_matcher()
            .map_err(|e| abort(RunStage::Init, progress, e.into()))?;

        progress.stage(RunStage::Init, "loading stores");
        let locations = self.locations();
        let (history, test_history, mut graph) = self.init(&locations, &mut warnings);

        progress.stage(RunStage::Scan, "scanning source roots");
        let (history, production, test_history, tests) = self
            .scan(history, test_history)
            .await
            .map_err(|e| abort(RunStage::Scan, progress, e))?;
        check_cross_collisions(&production, &tests)
            .map_err(|e| abort(RunStage::Scan, progress, e.into()))?;
        for (label, outcome) in [("production", &production), ("test", &tests)] {
            if outcome.skipped > 0 {
                warnings.push(format!(
                    "{} unreadable {label} source file(s) skipped",
                    outcome.skipped
                ));
            }
        }

        progress.stage(RunStage::Select, "selecting tests");
        let known_tests: BTreeSet<String> = tests
            .class_names()
            .filter(|name| test_classes.is_test(name))
            .map(str::to_string)
            .collect();
        let pruned_tests = graph.prune_tests(&known_tests);
        let changes = ChangeSet::new(
            production.changed_class_names().map(str::to_string),
            tests.changed_class_names().map(str::to_string),
        );
        let selection = if self.options.force {
            select::select_all(&changes, &known_tests)
        } else {
            if graph.is_empty() && !known_tests.is_empty() {
                warnings.push(
                    "usage graph is empty; every known test is selected".to_string(),
                );
            }
            select::select(&changes, &graph, &known_tests)
        };

        let coverage_not_before = newest_input_millis(&production, &tests, &history, &test_history);

        info!(
            stage = %RunStage::Select,
            production_changed = changes.production.len(),
            tests_changed = changes.tests.len(),
            known_tests = known_tests.len(),
            selected = selection.len(),
            conservative = selection.conservative_count(),
            per_test = selection.per_test,
            force = self.options.force,
            "Selection ready"
        );
        for warning in &warnings {
            warn!("{warning}");
        }

        Ok(RunPlan {
            started_at,
            history,
            test_history,
            graph,
            production,
            tests,
            changes,
            known_tests,
            selection,
            coverage_not_before,
            pruned_tests,
            warnings,
        })
    }

    /// EXECUTE → MERGE → PERSIST for an existing plan.
    #[instrument(skip_all, name = "complete")]
    pub async fn complete(
        &self,
        mut plan: RunPlan,
        executor: &dyn TestExecutor,
        progress: &dyn ProgressReporter,
    ) -> crate::error::Result<RunSummary> {
        let start = Instant::now();

        progress.stage(
            RunStage::Execute,
            &format!("{} test(s) via {}", plan.selection.len(), executor.id()),
        );
        let request = ExecutionRequest::new(&plan.selection).not_before(plan.coverage_not_before);
        let report = executor
            .execute(request)
            .await
            .map_err(|e| abort(RunStage::Execute, progress, e.into()))?;

        progress.stage(RunStage::Merge, "recording results");
        let executed = merge(&mut plan, &report);
        let failed: Vec<String> = report.failed().map(str::to_string).collect();

        progress.stage(RunStage::Persist, "saving stores");
        let locations = self.locations();
        let mut warnings = std::mem::take(&mut plan.warnings);
        let history_saved = save_logged(
            "run history",
            &locations.history,
            plan.history.save(&locations.history),
            &mut warnings,
        );
        let test_history_saved = save_logged(
            "test run history",
            &locations.test_history,
            plan.test_history.save(&locations.test_history),
            &mut warnings,
        );
        let graph_saved = save_logged(
            "usage graph",
            &locations.usage,
            plan.graph.save(&locations.usage),
            &mut warnings,
        );

        progress.stage(RunStage::Done, "");
        progress.finish();

        let summary = RunSummary {
            production_scanned: plan.production.scanned.len(),
            production_changed: plan.production.changed.len(),
            tests_scanned: plan.tests.scanned.len(),
            tests_changed: plan.tests.changed.len(),
            selection: plan.selection,
            executed,
            failed,
            history_saved,
            test_history_saved,
            graph_saved,
            warnings,
            duration: start.elapsed(),
        };
        info!(
            stage = %RunStage::Done,
            executed = summary.executed,
            failed = summary.failed.len(),
            persisted = summary.fully_persisted(),
            duration = ?summary.duration,
            "Run complete"
        );
        Ok(summary)
    }

    fn init(
        &self,
        locations: &StoreLocations,
        warnings: &mut Vec<String>,
    ) -> (RunHistoryStore, RunHistoryStore, UsageGraphStore) {
        let mut history = RunHistoryStore::load(&locations.history);
        let mut test_history = RunHistoryStore::load(&locations.test_history);
        let graph = UsageGraphStore::load(&locations.usage);

        note_degraded("run history", &locations.history, history.load_outcome(), warnings);
        note_degraded(
            "test run history",
            &locations.test_history,
            test_history.load_outcome(),
            warnings,
        );
        note_degraded("usage graph", &locations.usage, graph.load_outcome(), warnings);

        if self.config.store.prune_missing {
            history.prune_missing();
            test_history.prune_missing();
        }
        info!(
            stage = %RunStage::Init,
            history = history.len(),
            test_history = test_history.len(),
            graph_tests = graph.test_count(),
            "Stores loaded"
        );
        (history, test_history, graph)
    }

    /// Scan production and test roots as two parallel blocking tasks.
    async fn scan(
        &self,
        history: RunHistoryStore,
        test_history: RunHistoryStore,
    ) -> crate::error::Result<(RunHistoryStore, ScanOutcome, RunHistoryStore, ScanOutcome)> {
        let production_scanner =
            ChangeScanner::new(ScanSpec::production(&self.config, &self.project_root))?;
        let test_scanner = ChangeScanner::new(ScanSpec::tests(&self.config, &self.project_root))?;
        let force = self.options.force;

        let production_task =
            tokio::task::spawn_blocking(move || scan_with(&production_scanner, history, force));
        let test_task =
            tokio::task::spawn_blocking(move || scan_with(&test_scanner, test_history, force));
        let (production_joined, test_joined) = tokio::join!(production_task, test_task);

        let (history, production) = production_joined.map_err(|e| ScanError::Interrupted {
            roots: "production".into(),
            message: e.to_string(),
        })?;
        let (test_history, tests) = test_joined.map_err(|e| ScanError::Interrupted {
            roots: "test".into(),
            message: e.to_string(),
        })?;
        Ok((history, production?, test_history, tests?))
    }
}

fn scan_with(
    scanner: &ChangeScanner,
    history: RunHistoryStore,
    force: bool,
) -> (RunHistoryStore, Result<ScanOutcome, ConfigError>) {
    let outcome = if force {
        scanner.scan(&RunHistoryStore::new())
    } else {
        scanner.scan(&history)
    };
    (history, outcome)
}

/// A class name may live in production or test roots, not both.
fn check_cross_collisions(production: &ScanOutcome, tests: &ScanOutcome) -> Result<(), ConfigError> {
    let test_units: std::collections::HashMap<&str, &PathBuf> = tests
        .scanned
        .iter()
        .map(|u| (u.class_name.as_str(), &u.path))
        .collect();
    for unit in &production.scanned {
        if let Some(test_path) = test_units.get(unit.class_name.as_str()) {
            return Err(ConfigError::ClassCollision {
                class_name: unit.class_name.clone(),
                first: unit.path.clone(),
                second: (*test_path).clone(),
            });
        }
    }
    Ok(())
}

/// The newest of: any changed source file, and the previous recorded run.
fn newest_input_millis(
    production: &ScanOutcome,
    tests: &ScanOutcome,
    history: &RunHistoryStore,
    test_history: &RunHistoryStore,
) -> Option<EpochMillis> {
    let newest_change = production
        .changed
        .iter()
        .chain(&tests.changed)
        .map(|u| u.modified_millis)
        .max();
    let previous_run = [history.time_range(), test_history.time_range()]
        .into_iter()
        .flatten()
        .map(|(_, newest)| newest)
        .max();
    newest_change.max(previous_run)
}

/// Record the run: every scanned file is processed as of the run start, and
/// every selected test that was reported gets its edge set replaced. Returns
/// the number of tests whose coverage was applied.
fn merge(plan: &mut RunPlan, report: &CoverageReport) -> usize {
    let run_millis = plan.started_at.timestamp_millis();
    for unit in &plan.production.scanned {
        plan.history.set(unit.key.clone(), run_millis);
    }
    for unit in &plan.tests.scanned {
        plan.test_history.set(unit.key.clone(), run_millis);
    }

    let (selected, unselected): (Vec<_>, Vec<_>) = report
        .tests
        .iter()
        .cloned()
        .partition(|t| plan.selection.contains(&t.test));
    for coverage in &unselected {
        warn!(test = %coverage.test, "Coverage reported for a test that was not selected, ignored");
    }
    let applied = plan.graph.apply_report(&CoverageReport { tests: selected });
    info!(
        stage = %RunStage::Merge,
        files = plan.production.scanned.len() + plan.tests.scanned.len(),
        tests = applied,
        ignored = unselected.len(),
        "Merged run results"
    );
    applied
}

fn note_degraded(store: &str, path: &Path, outcome: &LoadOutcome, warnings: &mut Vec<String>) {
    if let LoadOutcome::Corrupt(reason) = outcome {
        warnings.push(format!(
            "{store} at {} was unusable ({reason}); starting from scratch",
            path.display()
        ));
    }
}

fn save_logged(
    store: &str,
    path: &Path,
    result: Result<(), crate::error::StoreError>,
    warnings: &mut Vec<String>,
) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(store, path = %path.display(), error = %e, "Unable to write store; next run will re-select more tests");
            warnings.push(format!("{store} not saved: {e}"));
            false
        }
    }
}

fn abort(stage: RunStage, progress: &dyn ProgressReporter, err: TestsiftError) -> TestsiftError {
    error!(stage = %stage, error = %err, "Run aborted");
    progress.finish();
    err
}
