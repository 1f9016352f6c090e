//! Progress reporting for orchestrated runs.
//!
//! The CLI uses [`IndicatifReporter`] for a spinner that follows the run
//! stages. Library callers can use [`NoopReporter`] or provide their own
//! implementation.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::types::RunStage;

/// Receives stage transitions of a [`RunOrchestrator`](crate::pipeline::RunOrchestrator).
pub trait ProgressReporter: Send + Sync {
    /// A new stage started; `detail` is a short human description.
    fn stage(&self, stage: RunStage, detail: &str);

    /// Display an informational message without disturbing the stage line.
    fn message(&self, msg: &str);

    /// The run reached a terminal state.
    fn finish(&self);
}

/// No-op reporter for library callers that don't need progress output.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn stage(&self, _stage: RunStage, _detail: &str) {}
    fn message(&self, _msg: &str) {}
    fn finish(&self) {}
}

/// Spinner backed by `indicatif`. Draws nothing when stderr is not a terminal.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    last_stage: Mutex<Option<RunStage>>,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{prefix}] {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            last_stage: Mutex::new(None),
        }
    }

    /// Stage most recently reported, if any.
    pub fn last_stage(&self) -> Option<RunStage> {
        self.last_stage.lock().ok().and_then(|s| *s)
    }
}

impl ProgressReporter for IndicatifReporter {
    fn stage(&self, stage: RunStage, detail: &str) {
        if let Ok(mut last) = self.last_stage.lock() {
            *last = Some(stage);
        }
        self.bar.set_prefix(stage.as_str());
        self.bar.set_message(detail.to_string());
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Reporter that records stage transitions, for tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    stages: Mutex<Vec<RunStage>>,
}

impl RecordingReporter {
    pub fn stages(&self) -> Vec<RunStage> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingReporter {
    fn stage(&self, stage: RunStage, _detail: &str) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(stage);
        }
    }
    fn message(&self, _msg: &str) {}
    fn finish(&self) {}
}
