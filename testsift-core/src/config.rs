use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "testsift.toml";

/// Run history file, written into each output directory.
pub const HISTORY_FILE_NAME: &str = "testsift-runs.json";

/// Usage graph file, written into the test output directory.
pub const USAGE_FILE_NAME: &str = "testsift-usage.json";

/// Top-level testsift configuration, matching `testsift.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestsiftConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub production: FilterSection,
    #[serde(default)]
    pub tests: TestsSection,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

/// Source layout of the project. Relative paths resolve against the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub source_roots: Vec<PathBuf>,
    pub test_source_roots: Vec<PathBuf>,
    pub output_directory: PathBuf,
    pub test_output_directory: PathBuf,
    /// Source file extension without the leading dot.
    pub source_suffix: String,
    pub namespace_separator: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            source_roots: vec![PathBuf::from("src/main/java")],
            test_source_roots: vec![PathBuf::from("src/test/java")],
            output_directory: PathBuf::from("target/classes"),
            test_output_directory: PathBuf::from("target/test-classes"),
            source_suffix: "java".to_string(),
            namespace_separator: ".".to_string(),
        }
    }
}

/// Include/exclude globs, relative to each source root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

/// Test-root filters. Every included file is scanned and tracked, but only
/// classes whose simple name matches `test_classes` are runnable tests; the
/// rest (fixtures, base classes, helpers) are support code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsSection {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Globs over the simple class name. Empty means every class is a test.
    pub test_classes: Vec<String>,
}

impl Default for TestsSection {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            test_classes: ["Test*", "*Test", "*Tests", "*TestCase"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Decides which test-root classes are runnable tests.
#[derive(Debug, Clone)]
pub struct TestClassMatcher {
    patterns: Vec<glob::Pattern>,
    separator: String,
}

impl TestClassMatcher {
    pub fn is_test(&self, class_name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let simple = class_name
            .rsplit(self.separator.as_str())
            .next()
            .unwrap_or(class_name);
        self.patterns.iter().any(|p| p.matches(simple))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Tolerance window (ms) added to the recorded run time before a newer
    /// modification time counts as a change.
    pub stale_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Drop history records for files that no longer exist when loading.
    pub prune_missing: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            prune_missing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Identifier of the test execution strategy.
    pub id: String,
    /// Coverage report consumed by the `report-file` runner.
    pub report: PathBuf,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            id: crate::execute::REPORT_FILE_RUNNER.to_string(),
            report: PathBuf::from("target/testsift-coverage.json"),
        }
    }
}

impl TestsiftConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject configurations that would make scanning ambiguous.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let suffix = self.project.source_suffix.trim_start_matches('.');
        if suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "project.source_suffix must not be empty".into(),
            ));
        }
        if self.project.namespace_separator.is_empty() {
            return Err(ConfigError::Invalid(
                "project.namespace_separator must not be empty".into(),
            ));
        }
        if self.runner.id.trim().is_empty() {
            return Err(ConfigError::Invalid("runner.id must not be empty".into()));
        }
        if !crate::execute::BUILTIN_RUNNERS.contains(&self.runner.id.as_str()) {
            return Err(ConfigError::UnknownRunner(self.runner.id.clone()));
        }
        for pattern in self
            .production
            .includes
            .iter()
            .chain(&self.production.excludes)
            .chain(&self.tests.includes)
            .chain(&self.tests.excludes)
            .chain(&self.tests.test_classes)
        {
            compile_pattern(pattern)?;
        }
        for pattern in self.production.includes.iter().chain(&self.tests.includes) {
            if let Some(extension) = literal_extension(pattern).filter(|e| *e != suffix) {
                return Err(ConfigError::Invalid(format!(
                    "include `{pattern}` selects `.{extension}` files but project.source_suffix is `{suffix}`"
                )));
            }
        }
        Ok(())
    }

    /// Source suffix without a leading dot.
    pub fn source_suffix(&self) -> &str {
        self.project.source_suffix.trim_start_matches('.')
    }

    /// The glob used when a filter section lists no includes.
    pub fn default_include(&self) -> String {
        format!("**/*.{}", self.source_suffix())
    }

    pub fn production_includes(&self) -> Vec<String> {
        self.includes_or_default(&self.production.includes)
    }

    pub fn test_includes(&self) -> Vec<String> {
        self.includes_or_default(&self.tests.includes)
    }

    fn includes_or_default(&self, includes: &[String]) -> Vec<String> {
        if includes.is_empty() {
            vec![self.default_include()]
        } else {
            includes.to_vec()
        }
    }

    pub fn test_class_matcher(&self) -> Result<TestClassMatcher, ConfigError> {
        Ok(TestClassMatcher {
            patterns: self
                .tests
                .test_classes
                .iter()
                .map(|p| compile_pattern(p))
                .collect::<Result<_, _>>()?,
            separator: self.project.namespace_separator.clone(),
        })
    }

    /// Run history location for production sources.
    pub fn history_path(&self, project_root: &Path) -> PathBuf {
        resolve(project_root, &self.project.output_directory).join(HISTORY_FILE_NAME)
    }

    /// Run history location for test sources.
    pub fn test_history_path(&self, project_root: &Path) -> PathBuf {
        resolve(project_root, &self.project.test_output_directory).join(HISTORY_FILE_NAME)
    }

    pub fn usage_path(&self, project_root: &Path) -> PathBuf {
        resolve(project_root, &self.project.test_output_directory).join(USAGE_FILE_NAME)
    }

    pub fn report_path(&self, project_root: &Path) -> PathBuf {
        resolve(project_root, &self.runner.report)
    }

    pub fn source_roots(&self, project_root: &Path) -> Vec<PathBuf> {
        self.project
            .source_roots
            .iter()
            .map(|p| resolve(project_root, p))
            .collect()
    }

    pub fn test_source_roots(&self, project_root: &Path) -> Vec<PathBuf> {
        self.project
            .test_source_roots
            .iter()
            .map(|p| resolve(project_root, p))
            .collect()
    }
}

fn compile_pattern(pattern: &str) -> Result<glob::Pattern, ConfigError> {
    glob::Pattern::new(pattern).map_err(|e| ConfigError::Pattern {
        pattern: pattern.to_string(),
        message: e.msg.to_string(),
    })
}

/// The extension a file glob pins down, if its last segment ends in a
/// wildcard-free `.ext`.
fn literal_extension(pattern: &str) -> Option<&str> {
    let last = pattern.rsplit('/').next()?;
    let (_, extension) = last.rsplit_once('.')?;
    if extension.is_empty() || extension.contains(['*', '?', '[', ']', '{', '}']) {
        None
    } else {
        Some(extension)
    }
}

/// Join `path` onto `root` unless it is already absolute.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_maven_layout() {
        let config = TestsiftConfig::from_toml_str("").unwrap();
        assert_eq!(config, TestsiftConfig::default());
        assert_eq!(config.production_includes(), vec!["**/*.java".to_string()]);
        assert_eq!(config.runner.id, "report-file");
        assert!(config.store.prune_missing);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = TestsiftConfig::from_toml_str(
            "[scan]\nstale_millis = 250\n\n[tests]\nincludes = [\"**/*Test.java\"]\n",
        )
        .unwrap();
        assert_eq!(config.scan.stale_millis, 250);
        assert_eq!(config.test_includes(), vec!["**/*Test.java".to_string()]);
        assert_eq!(config.production_includes(), vec!["**/*.java".to_string()]);
        assert_eq!(config.project.output_directory, PathBuf::from("target/classes"));
    }

    #[test]
    fn suffix_with_leading_dot_is_normalized() {
        let config =
            TestsiftConfig::from_toml_str("[project]\nsource_suffix = \".kt\"\n").unwrap();
        assert_eq!(config.source_suffix(), "kt");
        assert_eq!(config.default_include(), "**/*.kt");
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = TestsiftConfig::from_toml_str("[production]\nexcludes = [\"***/x\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }), "got {err:?}");
    }

    #[test]
    fn empty_suffix_is_rejected() {
        let err = TestsiftConfig::from_toml_str("[project]\nsource_suffix = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_runner_is_rejected() {
        let err = TestsiftConfig::from_toml_str("[runner]\nid = \"gradle\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRunner(id) if id == "gradle"));
    }

    #[test]
    fn default_test_classes_skip_helpers() {
        let matcher = TestsiftConfig::default().test_class_matcher().unwrap();
        assert!(matcher.is_test("com.app.FooTest"));
        assert!(matcher.is_test("com.app.TestBar"));
        assert!(matcher.is_test("com.app.AllTests"));
        assert!(matcher.is_test("com.app.LegacyTestCase"));
        assert!(!matcher.is_test("com.app.Fixtures"));
        assert!(!matcher.is_test("com.app.testing.Builders"));
    }

    #[test]
    fn empty_test_classes_accepts_every_class() {
        let config =
            TestsiftConfig::from_toml_str("[tests]\ntest_classes = []\n").unwrap();
        assert!(config.test_class_matcher().unwrap().is_test("com.app.Fixtures"));
    }

    #[test]
    fn include_for_another_extension_is_rejected() {
        let err = TestsiftConfig::from_toml_str("[production]\nincludes = [\"**/*.kt\"]\n")
            .unwrap_err();
        assert!(matches!(&err, ConfigError::Invalid(m) if m.contains("`.kt`")), "got {err:?}");

        TestsiftConfig::from_toml_str("[tests]\nincludes = [\"**/*Test.java\", \"**/it/**\"]\n")
            .unwrap();
        TestsiftConfig::from_toml_str(
            "[project]\nsource_suffix = \"kt\"\n\n[production]\nincludes = [\"**/*.kt\"]\n",
        )
        .unwrap();
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = TestsiftConfig::from_toml_str("[scan\nstale_millis = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = TestsiftConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn store_paths_live_in_output_directories() {
        let config = TestsiftConfig::default();
        let root = Path::new("/work/app");
        assert_eq!(
            config.history_path(root),
            PathBuf::from("/work/app/target/classes/testsift-runs.json")
        );
        assert_eq!(
            config.test_history_path(root),
            PathBuf::from("/work/app/target/test-classes/testsift-runs.json")
        );
        assert_eq!(
            config.usage_path(root),
            PathBuf::from("/work/app/target/test-classes/testsift-usage.json")
        );
    }

    #[test]
    fn serialized_config_reloads() {
        let mut config = TestsiftConfig::default();
        config.scan.stale_millis = 10;
        config.production.excludes = vec!["**/generated/**".into()];
        let text = config.to_toml_string().unwrap();
        assert_eq!(TestsiftConfig::from_toml_str(&text).unwrap(), config);
    }
}
