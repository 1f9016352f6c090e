// Integration test utilities and fixture management for testsift.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use testsift_core::config::{CONFIG_FILE_NAME, TestsiftConfig};
use testsift_core::error::ExecuteError;
use testsift_core::execute::{ExecutionRequest, TestExecutor};
use testsift_core::pipeline::{RunOptions, RunOrchestrator, RunSummary};
use testsift_core::progress::NoopReporter;
use testsift_core::types::{CoverageReport, TestCoverage, TestOutcome};

/// A temporary project with a Maven-style source layout.
#[derive(Debug)]
pub struct TestProject {
    pub dir: tempfile::TempDir,
    config: TestsiftConfig,
}

impl TestProject {
    /// Empty project with the default configuration written to disk.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let project = Self {
            dir,
            config: TestsiftConfig::default(),
        };
        project.save_config();
        project
    }

    /// Two production classes, each with one test:
    /// `com.app.Foo` ← `com.app.FooTest`, `com.app.Bar` ← `com.app.BarTest`.
    pub fn foo_bar() -> Self {
        let project = Self::empty();
        let past = SystemTime::now() - Duration::from_secs(60);
        project.write_source("src/main/java/com/app/Foo.java", past);
        project.write_source("src/main/java/com/app/Bar.java", past);
        project.write_source("src/test/java/com/app/FooTest.java", past);
        project.write_source("src/test/java/com/app/BarTest.java", past);
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &TestsiftConfig {
        &self.config
    }

    /// Replace the configuration, in memory and in `testsift.toml`.
    pub fn set_config(&mut self, config: TestsiftConfig) {
        self.config = config;
        self.save_config();
    }

    fn save_config(&self) {
        let text = self.config.to_toml_string().expect("serialize config");
        std::fs::write(self.path().join(CONFIG_FILE_NAME), text).expect("write config");
    }

    /// Write a source file with an explicit modification time.
    pub fn write_source(&self, relative: &str, modified: SystemTime) -> PathBuf {
        let path = self.path().join(relative);
        std::fs::create_dir_all(path.parent().expect("source has parent")).expect("create dirs");
        let class = Path::new(relative)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unnamed");
        std::fs::write(&path, format!("class {class} {{}}\n")).expect("write source");
        set_mtime(&path, modified);
        path
    }

    /// Mark a file as edited after every run recorded so far.
    pub fn touch(&self, relative: &str) {
        std::thread::sleep(Duration::from_millis(5));
        set_mtime(&self.path().join(relative), SystemTime::now());
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.path().join(relative)).expect("remove source");
    }

    /// Write the coverage report the `report-file` runner consumes, as an
    /// instrumented run finishing now would.
    pub fn write_report(&self, report: &CoverageReport) {
        let path = self.config.report_path(self.path());
        std::fs::create_dir_all(path.parent().expect("report has parent")).expect("create dirs");
        let text = serde_json::to_string_pretty(report).expect("serialize report");
        std::fs::write(&path, text).expect("write report");
        std::thread::sleep(Duration::from_millis(5));
        set_mtime(&path, SystemTime::now());
    }

    pub fn orchestrator(&self) -> RunOrchestrator {
        RunOrchestrator::new(self.path(), self.config.clone())
    }

    pub fn forced_orchestrator(&self) -> RunOrchestrator {
        self.orchestrator().with_options(RunOptions { force: true })
    }

    /// Full run with `executor`, panicking on error.
    pub async fn run(&self, executor: &dyn TestExecutor) -> RunSummary {
        self.orchestrator()
            .run(executor, &NoopReporter)
            .await
            .expect("run succeeds")
    }

    /// Names of the tests a plan-only pass would select.
    pub async fn selected(&self) -> Vec<String> {
        let plan = self
            .orchestrator()
            .plan(&NoopReporter)
            .await
            .expect("plan succeeds");
        plan.selection.names().map(str::to_string).collect()
    }
}

fn set_mtime(path: &Path, modified: SystemTime) {
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .expect("open for mtime");
    file.set_modified(modified).expect("set mtime");
}

/// Build a coverage report from `(test, classes, outcome)` triples.
pub fn report(entries: &[(&str, &[&str], TestOutcome)]) -> CoverageReport {
    CoverageReport {
        tests: entries
            .iter()
            .map(|(test, classes, outcome)| TestCoverage {
                test: (*test).to_string(),
                classes: classes.iter().map(|c| (*c).to_string()).collect(),
                outcome: *outcome,
            })
            .collect(),
    }
}

/// In-process executor: pretends to run the selected tests and reports the
/// coverage it was configured with. Tests without configured coverage are
/// reported as passing with no classes.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    coverage: Mutex<BTreeMap<String, (BTreeSet<String>, TestOutcome)>>,
    runs: Mutex<Vec<Vec<String>>>,
    omit: Mutex<BTreeSet<String>>,
}

impl FakeExecutor {
    pub fn new(coverage: &[(&str, &[&str])]) -> Self {
        let executor = Self::default();
        for (test, classes) in coverage {
            executor.cover(test, classes, TestOutcome::Passed);
        }
        executor
    }

    /// The `foo_bar` project's true dependencies.
    pub fn foo_bar() -> Self {
        Self::new(&[
            ("com.app.FooTest", &["com.app.Foo"]),
            ("com.app.BarTest", &["com.app.Bar"]),
        ])
    }

    pub fn cover(&self, test: &str, classes: &[&str], outcome: TestOutcome) {
        self.coverage.lock().expect("coverage lock").insert(
            test.to_string(),
            (classes.iter().map(|c| (*c).to_string()).collect(), outcome),
        );
    }

    /// Leave `test` out of every report, as a crashed runner would.
    pub fn omit(&self, test: &str) {
        self.omit.lock().expect("omit lock").insert(test.to_string());
    }

    /// Selections received, oldest first.
    pub fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().expect("runs lock").clone()
    }

    pub fn last_run(&self) -> Vec<String> {
        self.runs().pop().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TestExecutor for FakeExecutor {
    fn id(&self) -> &str {
        "fake"
    }

    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<CoverageReport, ExecuteError> {
        let names: Vec<String> = request.selection.names().map(str::to_string).collect();
        self.runs.lock().expect("runs lock").push(names.clone());

        let coverage = self.coverage.lock().expect("coverage lock");
        let omit = self.omit.lock().expect("omit lock");
        let missing: Vec<String> = names.iter().filter(|n| omit.contains(*n)).cloned().collect();
        if !missing.is_empty() {
            return Err(ExecuteError::MissingCoverage { missing });
        }

        Ok(CoverageReport {
            tests: names
                .into_iter()
                .map(|test| {
                    let (classes, outcome) = coverage.get(&test).cloned().unwrap_or_default();
                    TestCoverage {
                        test,
                        classes,
                        outcome,
                    }
                })
                .collect(),
        })
    }
}
