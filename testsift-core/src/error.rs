use std::path::PathBuf;

/// Top-level testsift error type.
///
/// All fallible operations in `testsift-core` return [`Result<T, TestsiftError>`](Result).
/// Each variant wraps a stage-specific error enum, so callers can tell a
/// configuration problem apart from a failed execution without string matching.
#[derive(thiserror::Error, Debug)]
pub enum TestsiftError {
    /// Invalid or inconsistent configuration. Always fatal, raised before selection.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scanning a source root failed as a whole.
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Persisted store could not be written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The external test executor did not deliver a usable coverage report.
    #[error("Execution error: {0}")]
    Execute(#[from] ExecuteError),
}

/// Errors in testsift configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),

    /// An include or exclude pattern is not a valid glob.
    #[error("Invalid glob pattern `{pattern}`: {message}")]
    Pattern {
        /// The offending pattern as written in the configuration.
        pattern: String,
        /// Description from the glob parser.
        message: String,
    },

    /// Two scanned files map onto the same class name.
    #[error("Class name collision for `{class_name}`: {} and {}", first.display(), second.display())]
    ClassCollision {
        /// The fully-qualified class name both files map to.
        class_name: String,
        /// The file that claimed the name first.
        first: PathBuf,
        /// The file that collided with it.
        second: PathBuf,
    },

    /// A source root exists but cannot be read.
    #[error("Unreadable source root {}: {message}", path.display())]
    UnreadableRoot {
        /// The root directory.
        path: PathBuf,
        /// Underlying I/O failure.
        message: String,
    },

    /// No executor is registered under the configured runner id.
    #[error("Unknown runner `{0}`")]
    UnknownRunner(String),
}

/// Errors that abort a scan (individual unreadable files are skipped instead).
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The background scan task panicked or was cancelled.
    #[error("Scan task for {roots} interrupted: {message}")]
    Interrupted {
        /// Which scan was running (production or test roots).
        roots: String,
        /// Description of the join failure.
        message: String,
    },

    /// Filesystem I/O error while enumerating a root.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the JSON-backed persisted stores.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Writing or renaming the store file failed.
    #[error("IO error writing {}: {source}", path.display())]
    Io {
        /// Target store file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// JSON serialization of the store failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reported by a [`TestExecutor`](crate::execute::TestExecutor).
#[derive(thiserror::Error, Debug)]
pub enum ExecuteError {
    /// The coverage report could not be read.
    #[error("Cannot read coverage report {}: {source}", path.display())]
    ReportIo {
        /// Location of the report.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The coverage report is not valid JSON in the expected shape.
    #[error("Malformed coverage report {}: {message}", path.display())]
    ReportParse {
        /// Location of the report.
        path: PathBuf,
        /// Description of the parse failure.
        message: String,
    },

    /// Selected tests are absent from the coverage report.
    #[error("Coverage report has no entry for {} selected test(s): {}", missing.len(), missing.join(", "))]
    MissingCoverage {
        /// Selected tests that were not reported.
        missing: Vec<String>,
    },

    /// The coverage report was written before the run's inputs last changed.
    #[error(
        "Coverage report {} is stale: written at {modified} ms, inputs changed at {not_before} ms; rerun the instrumented tests",
        path.display()
    )]
    StaleReport {
        /// Location of the report.
        path: PathBuf,
        /// Report modification time, epoch millis.
        modified: i64,
        /// Oldest acceptable modification time, epoch millis.
        not_before: i64,
    },

    /// Runner-specific failure.
    #[error("Runner `{runner}` failed: {message}")]
    Runner {
        /// Runner id.
        runner: String,
        /// Description of the failure.
        message: String,
    },
}

/// Convenience alias for `Result<T, TestsiftError>`.
pub type Result<T> = std::result::Result<T, TestsiftError>;
