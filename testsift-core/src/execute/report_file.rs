use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::{ExecutionRequest, REPORT_FILE_RUNNER, TestExecutor};
use crate::error::ExecuteError;
use crate::types::{CoverageReport, EpochMillis, epoch_millis};

/// Reads the coverage report an instrumented external run left on disk.
///
/// The host build runs the selected tests with the instrumentation agent
/// attached, then invokes testsift, which picks the report up from here.
/// A report older than the request's `not_before` is left over from an
/// earlier cycle and is refused.
#[derive(Debug, Clone)]
pub struct ReportFileExecutor {
    report: PathBuf,
}

impl ReportFileExecutor {
    pub fn new(report: impl Into<PathBuf>) -> Self {
        Self {
            report: report.into(),
        }
    }

    pub fn report_path(&self) -> &Path {
        &self.report
    }

    fn report_io(&self, source: std::io::Error) -> ExecuteError {
        ExecuteError::ReportIo {
            path: self.report.clone(),
            source,
        }
    }

    fn check_fresh(&self, not_before: Option<EpochMillis>) -> Result<(), ExecuteError> {
        let Some(not_before) = not_before else {
            return Ok(());
        };
        let modified = std::fs::metadata(&self.report)
            .and_then(|m| m.modified())
            .map_err(|e| self.report_io(e))?;
        let modified = epoch_millis(modified);
        if modified < not_before {
            return Err(ExecuteError::StaleReport {
                path: self.report.clone(),
                modified,
                not_before,
            });
        }
        Ok(())
    }

    fn read_report(&self) -> Result<CoverageReport, ExecuteError> {
        let raw = std::fs::read_to_string(&self.report).map_err(|e| self.report_io(e))?;
        serde_json::from_str(&raw).map_err(|e| ExecuteError::ReportParse {
            path: self.report.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl TestExecutor for ReportFileExecutor {
    fn id(&self) -> &str {
        REPORT_FILE_RUNNER
    }

    #[instrument(skip_all, name = "report_file_execute")]
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<CoverageReport, ExecuteError> {
        if request.selection.is_empty() {
            debug!("Nothing selected, coverage report not needed");
            return Ok(CoverageReport::default());
        }

        self.check_fresh(request.not_before)?;
        let report = self.read_report()?;
        let missing = report.missing_from(request.selection);
        if !missing.is_empty() {
            return Err(ExecuteError::MissingCoverage {
                missing: missing.into_iter().map(str::to_string).collect(),
            });
        }
        info!(
            path = %self.report.display(),
            reported = report.tests.len(),
            "Coverage report loaded"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime};

    use crate::types::{SelectionReason, SelectionResult, TestOutcome};

    fn selection(tests: &[&str]) -> SelectionResult {
        let reasons: BTreeMap<String, SelectionReason> = tests
            .iter()
            .map(|t| ((*t).to_string(), SelectionReason::Changed))
            .collect();
        SelectionResult::from_reasons(reasons, true)
    }

    fn write_report(path: &Path, body: &str, modified: SystemTime) {
        std::fs::write(path, body).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    const ONE_TEST: &str = r#"{"tests":[{"test":"a.ATest","classes":["a.A"]}]}"#;

    #[tokio::test]
    async fn empty_selection_needs_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ReportFileExecutor::new(dir.path().join("missing.json"));
        let report = executor.execute(ExecutionRequest::new(&selection(&[]))).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn reads_complete_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        std::fs::write(
            &path,
            r#"{"tests":[
                {"test":"a.ATest","classes":["a.A","a.B"],"outcome":"passed"},
                {"test":"a.CTest","classes":[],"outcome":"failed"}
            ]}"#,
        )
        .unwrap();

        let executor = ReportFileExecutor::new(&path);
        let report = executor
            .execute(ExecutionRequest::new(&selection(&["a.ATest", "a.CTest"])))
            .await
            .unwrap();
        assert_eq!(report.tests.len(), 2);
        assert_eq!(report.tests[1].outcome, TestOutcome::Failed);
    }

    #[tokio::test]
    async fn incomplete_report_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        std::fs::write(&path, r#"{"tests":[{"test":"a.ATest","classes":["a.A"]}]}"#).unwrap();

        let err = ReportFileExecutor::new(&path)
            .execute(ExecutionRequest::new(&selection(&["a.ATest", "a.BTest"])))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ExecuteError::MissingCoverage { missing } if missing == &vec!["a.BTest".to_string()]),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn missing_report_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReportFileExecutor::new(dir.path().join("none.json"))
            .execute(ExecutionRequest::new(&selection(&["a.ATest"])))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::ReportIo { .. }));
    }

    #[tokio::test]
    async fn garbled_report_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        std::fs::write(&path, "{\"tests\": [").unwrap();
        let err = ReportFileExecutor::new(&path)
            .execute(ExecutionRequest::new(&selection(&["a.ATest"])))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::ReportParse { .. }));
    }

    #[tokio::test]
    async fn report_older_than_inputs_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        let written = SystemTime::now() - Duration::from_secs(30);
        write_report(&path, ONE_TEST, written);

        let selected = selection(&["a.ATest"]);
        let request = ExecutionRequest::new(&selected).not_before(Some(epoch_millis(written) + 1));
        let err = ReportFileExecutor::new(&path).execute(request).await.unwrap_err();
        assert!(
            matches!(&err, ExecuteError::StaleReport { modified, .. } if *modified == epoch_millis(written)),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn report_written_after_inputs_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        let written = SystemTime::now() - Duration::from_secs(30);
        write_report(&path, ONE_TEST, written);

        let selected = selection(&["a.ATest"]);
        for not_before in [epoch_millis(written), epoch_millis(written) - 5_000] {
            let request = ExecutionRequest::new(&selected).not_before(Some(not_before));
            let report = ReportFileExecutor::new(&path).execute(request).await.unwrap();
            assert_eq!(report.tests.len(), 1);
        }
    }
}
