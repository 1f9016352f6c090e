// Boundary to the external test runner.
//
// testsift does not run tests itself. An executor receives the selection and
// hands back the coverage report of an instrumented run; that report is the
// only input the merge stage consumes.

pub mod report_file;

use std::path::Path;

use crate::config::TestsiftConfig;
use crate::error::{ConfigError, ExecuteError};
use crate::types::{CoverageReport, EpochMillis, SelectionResult};

pub use report_file::ReportFileExecutor;

/// Runner id of [`ReportFileExecutor`].
pub const REPORT_FILE_RUNNER: &str = "report-file";

/// Runner ids that [`executor_for`] can build.
pub const BUILTIN_RUNNERS: &[&str] = &[REPORT_FILE_RUNNER];

/// What one invocation asks an executor to run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub selection: &'a SelectionResult,
    /// Coverage recorded before this instant predates the inputs of the run:
    /// the newest changed source file, or the previous recorded run.
    pub not_before: Option<EpochMillis>,
}

impl<'a> ExecutionRequest<'a> {
    pub fn new(selection: &'a SelectionResult) -> Self {
        Self {
            selection,
            not_before: None,
        }
    }

    #[must_use]
    pub fn not_before(mut self, millis: Option<EpochMillis>) -> Self {
        self.not_before = millis;
        self
    }
}

/// Executes the selected tests under instrumentation.
#[async_trait::async_trait]
pub trait TestExecutor: Send + Sync {
    /// Runner identifier, as configured in `runner.id`.
    fn id(&self) -> &str;

    /// Run the requested selection and report, per executed test, the classes
    /// it touched.
    ///
    /// Implementations must report every selected test or fail; a partial
    /// report would let the merge stage mark unverified changes as processed.
    /// Coverage older than `request.not_before` must be refused for the same
    /// reason.
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<CoverageReport, ExecuteError>;
}

/// Build the executor named by `runner_id`.
pub fn executor_for(
    runner_id: &str,
    config: &TestsiftConfig,
    project_root: &Path,
) -> Result<Box<dyn TestExecutor>, ConfigError> {
    match runner_id {
        REPORT_FILE_RUNNER => Ok(Box::new(ReportFileExecutor::new(
            config.report_path(project_root),
        ))),
        other => Err(ConfigError::UnknownRunner(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_runner_resolves() {
        let config = TestsiftConfig::default();
        let executor = executor_for(REPORT_FILE_RUNNER, &config, Path::new("/p")).unwrap();
        assert_eq!(executor.id(), REPORT_FILE_RUNNER);
    }

    #[test]
    fn unknown_runner_is_config_error() {
        let config = TestsiftConfig::default();
        let err = executor_for("surefire", &config, Path::new("/p"))
            .err()
            .expect("unknown runner should fail");
        assert!(matches!(err, ConfigError::UnknownRunner(id) if id == "surefire"));
    }
}
