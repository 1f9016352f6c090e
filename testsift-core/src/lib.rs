//! testsift core library: change scanning, test selection and run stores.
//!
//! The main entry point is [`pipeline::RunOrchestrator`], which runs the
//! Scan → Select → Execute → Merge → Persist cycle against the stores in
//! [`store`], handing the selection to a [`execute::TestExecutor`].

pub mod config;
pub mod error;
pub mod execute;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod select;
pub mod store;
pub mod types;
