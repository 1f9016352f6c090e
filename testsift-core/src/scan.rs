// Change detection: glob enumeration of source roots, timestamp comparison
// against the run history, and path → class name mapping.
//
// The scanner never writes to the history; recording processed files is the
// orchestrator's job once the run has gone far enough to be trusted.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use glob::{MatchOptions, Pattern};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::config::TestsiftConfig;
use crate::error::ConfigError;
use crate::store::RunHistoryStore;
use crate::types::{EpochMillis, SourceUnit, epoch_millis};

const EXCLUDE_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// What to scan and how to name what is found.
#[derive(Debug, Clone)]
pub struct ScanSpec {
    /// Human-readable label used in logs ("production", "test").
    pub label: &'static str,
    pub roots: Vec<PathBuf>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Source extension without the leading dot.
    pub source_suffix: String,
    pub namespace_separator: String,
    pub stale_millis: u64,
}

impl ScanSpec {
    pub fn production(config: &TestsiftConfig, project_root: &Path) -> Self {
        Self {
            label: "production",
            roots: config.source_roots(project_root),
            includes: config.production_includes(),
            excludes: config.production.excludes.clone(),
            source_suffix: config.source_suffix().to_string(),
            namespace_separator: config.project.namespace_separator.clone(),
            stale_millis: config.scan.stale_millis,
        }
    }

    pub fn tests(config: &TestsiftConfig, project_root: &Path) -> Self {
        Self {
            label: "test",
            roots: config.test_source_roots(project_root),
            includes: config.test_includes(),
            excludes: config.tests.excludes.clone(),
            source_suffix: config.source_suffix().to_string(),
            namespace_separator: config.project.namespace_separator.clone(),
            stale_millis: config.scan.stale_millis,
        }
    }
}

/// Result of scanning one set of roots.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Every file that matched the filters, changed or not.
    pub scanned: Vec<SourceUnit>,
    /// The subset that is new or modified since its recorded run.
    pub changed: Vec<SourceUnit>,
    /// Entries skipped because they could not be read.
    pub skipped: usize,
}

impl ScanOutcome {
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.scanned.iter().map(|u| u.class_name.as_str())
    }

    pub fn changed_class_names(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(|u| u.class_name.as_str())
    }
}

/// A file matched by the include globs, before it has been stat'ed.
#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    relative: PathBuf,
}

/// Detects new and modified source files against a [`RunHistoryStore`].
#[derive(Debug, Clone)]
pub struct ChangeScanner {
    spec: ScanSpec,
    excludes: Vec<Pattern>,
}

impl ChangeScanner {
    /// Compile the filters. An invalid glob is a configuration error.
    pub fn new(mut spec: ScanSpec) -> Result<Self, ConfigError> {
        if spec.includes.is_empty() {
            spec.includes = vec![format!("**/*.{}", spec.source_suffix)];
        }
        for pattern in &spec.includes {
            compile(pattern)?;
        }
        let excludes = spec
            .excludes
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { spec, excludes })
    }

    pub fn spec(&self) -> &ScanSpec {
        &self.spec
    }

    /// Scan every root and classify each matched file against `history`.
    ///
    /// A file is changed when it has no record, or when its modification time
    /// is strictly later than the recorded run time plus the stale tolerance.
    #[instrument(skip_all, name = "scan", fields(roots = self.spec.label))]
    pub fn scan(&self, history: &RunHistoryStore) -> Result<ScanOutcome, ConfigError> {
        let start = Instant::now();
        let mut skipped = 0;

        let mut candidates = Vec::new();
        for root in &self.spec.roots {
            if !root.is_dir() {
                debug!(root = %root.display(), "Source root absent, skipping");
                continue;
            }
            let canonical_root = canonical_root(root)?;
            self.collect_candidates(&canonical_root, &mut candidates, &mut skipped);
        }

        // Stat in parallel; collect preserves candidate order.
        let stats: Vec<_> = candidates
            .par_iter()
            .map(|c| stat(&c.path).map_err(|e| (c.path.clone(), e)))
            .collect();

        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut owners: HashMap<String, PathBuf> = HashMap::new();
        let mut outcome = ScanOutcome::default();

        for (candidate, stat) in candidates.iter().zip(stats) {
            let (canonical, modified) = match stat {
                Ok(s) => s,
                Err((path, e)) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat source file, skipping");
                    skipped += 1;
                    continue;
                }
            };
            let key = path_key(&canonical);
            if !seen_keys.insert(key.clone()) {
                debug!(path = %canonical.display(), "File reached through overlapping roots");
                continue;
            }
            let Some(class_name) = class_name(
                &candidate.relative,
                &self.spec.source_suffix,
                &self.spec.namespace_separator,
            ) else {
                warn!(path = %candidate.path.display(), "Cannot derive class name, skipping");
                skipped += 1;
                continue;
            };

            match owners.entry(class_name.clone()) {
                Entry::Occupied(first) => {
                    return Err(ConfigError::ClassCollision {
                        class_name,
                        first: first.get().clone(),
                        second: canonical,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(canonical.clone());
                }
            }

            let unit = SourceUnit {
                path: canonical,
                key,
                class_name,
                modified_millis: modified,
            };
            if is_changed(unit.modified_millis, history.get(&unit.key), self.spec.stale_millis) {
                outcome.changed.push(unit.clone());
            }
            outcome.scanned.push(unit);
        }

        outcome.skipped = skipped;
        info!(
            roots = self.spec.label,
            scanned = outcome.scanned.len(),
            changed = outcome.changed.len(),
            skipped,
            duration = ?start.elapsed(),
            "Scan complete"
        );
        Ok(outcome)
    }

    fn collect_candidates(
        &self,
        root: &Path,
        candidates: &mut Vec<Candidate>,
        skipped: &mut usize,
    ) {
        let base = Pattern::escape(&root.to_string_lossy());
        let mut matched = Vec::new();
        for pattern in &self.spec.includes {
            let full_pattern = Path::new(&base).join(pattern).to_string_lossy().to_string();
            let paths = match glob::glob(&full_pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    // Patterns were validated in `new`; only the escaped root can fail here.
                    warn!(pattern = %full_pattern, error = %e, "Invalid glob pattern");
                    continue;
                }
            };
            for entry in paths {
                match entry {
                    Ok(path) => matched.push(path),
                    Err(e) => {
                        warn!(path = %e.path().display(), error = %e.error(), "Unreadable entry, skipping");
                        *skipped += 1;
                    }
                }
            }
        }

        // Several includes may match the same file.
        matched.sort();
        matched.dedup();

        for path in matched {
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root).map(Path::to_path_buf) else {
                continue;
            };
            if self.is_excluded(&relative) {
                continue;
            }
            if !has_suffix(&relative, &self.spec.source_suffix) {
                debug!(path = %path.display(), "Not a source file, ignored");
                continue;
            }
            candidates.push(Candidate { path, relative });
        }
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        self.excludes
            .iter()
            .any(|p| p.matches_path_with(relative, EXCLUDE_OPTIONS))
    }
}

fn compile(pattern: &str) -> Result<Pattern, ConfigError> {
    Pattern::new(pattern).map_err(|e| ConfigError::Pattern {
        pattern: pattern.to_string(),
        message: e.msg.to_string(),
    })
}

fn canonical_root(root: &Path) -> Result<PathBuf, ConfigError> {
    let unreadable = |e: std::io::Error| ConfigError::UnreadableRoot {
        path: root.to_path_buf(),
        message: e.to_string(),
    };
    let canonical = std::fs::canonicalize(root).map_err(unreadable)?;
    std::fs::read_dir(&canonical).map_err(unreadable)?;
    Ok(canonical)
}

fn stat(path: &Path) -> std::io::Result<(PathBuf, EpochMillis)> {
    let canonical = std::fs::canonicalize(path)?;
    let modified = std::fs::metadata(&canonical)?.modified()?;
    Ok((canonical, epoch_millis(modified)))
}

/// Store key for a canonical path. Case is folded on platforms whose default
/// filesystems are case-insensitive.
pub fn path_key(canonical: &Path) -> String {
    let key = canonical.to_string_lossy();
    if cfg!(any(windows, target_os = "macos")) {
        key.to_lowercase()
    } else {
        key.into_owned()
    }
}

/// Map a root-relative path to a class name: drop the source suffix and join
/// the directory components with `separator`.
///
/// Returns `None` for paths with non-UTF-8 or non-normal components, and for
/// files that do not carry the source suffix.
pub fn class_name(relative: &Path, suffix: &str, separator: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    let file = parts.pop()?;
    let stem = file.strip_suffix(suffix)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    parts.push(stem);
    Some(parts.join(separator))
}

fn has_suffix(relative: &Path, suffix: &str) -> bool {
    relative
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(suffix))
        .is_some_and(|rest| rest.len() > 1 && rest.ends_with('.'))
}

/// Staleness rule: strictly later than `last_run + stale_millis`.
pub fn is_changed(modified: EpochMillis, last_run: Option<EpochMillis>, stale_millis: u64) -> bool {
    match last_run {
        None => true,
        Some(last) => {
            let tolerance = i64::try_from(stale_millis).unwrap_or(i64::MAX);
            modified > last.saturating_add(tolerance)
        }
    }
}
