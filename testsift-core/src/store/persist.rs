// JSON persistence shared by the run history and usage graph stores.
//
// Reads never fail: a missing file is an empty store, anything unreadable is
// reported as corrupt and also treated as empty. Writes go through a temp file
// and a rename so an interrupted save leaves the previous store intact.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Current on-disk format version of both stores.
pub const FORMAT_VERSION: u32 = 1;

/// What happened when a store was loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file was read and parsed.
    Loaded,
    /// No file existed yet.
    #[default]
    Missing,
    /// The file existed but could not be used; the store starts empty.
    Corrupt(String),
}

impl LoadOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

/// Implemented by persisted documents that carry a format version.
pub(crate) trait Versioned {
    fn version(&self) -> u32;
}

/// Read a versioned JSON document, degrading to `None` on any problem.
pub(crate) fn read_json<T>(path: &Path, store: &'static str) -> (Option<T>, LoadOutcome)
where
    T: DeserializeOwned + Versioned,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(store, path = %path.display(), "No persisted store, starting empty");
            return (None, LoadOutcome::Missing);
        }
        Err(e) => {
            return corrupt(path, store, format!("cannot read: {e}"));
        }
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(doc) if doc.version() == FORMAT_VERSION => {
            debug!(store, path = %path.display(), "Loaded persisted store");
            (Some(doc), LoadOutcome::Loaded)
        }
        Ok(doc) => corrupt(
            path,
            store,
            format!("unsupported format version {}", doc.version()),
        ),
        Err(e) => corrupt(path, store, format!("cannot parse: {e}")),
    }
}

fn corrupt<T>(path: &Path, store: &'static str, reason: String) -> (Option<T>, LoadOutcome) {
    warn!(
        store,
        path = %path.display(),
        reason = %reason,
        "Persisted store unusable, starting empty (more tests will run)"
    );
    (None, LoadOutcome::Corrupt(reason))
}

/// Atomically write `value` as pretty JSON (temp file + rename).
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');

    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(io_err)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }
    Ok(())
}
