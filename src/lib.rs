//! volley: a sequential load-test orchestrator.
//!
//! This crate runs a batch of load-test definitions one after another, each
//! in its own engine subprocess, while an optional external event scheduler
//! watches the session and may cancel the running test at any moment.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Discovery**: Find test definitions with Ant-style include/exclude patterns
//! - **Remote**: Decide per test whether to start/stop remote load servers
//! - **Supervisor**: Launch one engine process, drain its output, classify its exit
//! - **Cancel**: Kill-switch handed to the scheduler for the running test
//! - **Scheduler**: External session lifecycle (start, stop, abort)
//! - **Orchestrator**: Sequence the tests, pause between them, notify the scheduler
//! - **Report**: Console summary and JSON result manifest
//!
//! # Example
//!
//! ```no_run
//! use volley::config::load_config;
//! use volley::orchestrator::Orchestrator;
//! use volley::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("volley.toml"))?;
//!     let report = Orchestrator::new(config, ConsoleReporter::new()).run().await?;
//!     println!("{} result files", report.result_files().len());
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod discovery;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod scheduler;
pub mod supervisor;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cancel::{CancelReason, KillSwitch};
pub use config::{Config, load_config};
pub use discovery::{TestDefinition, TestDiscovery};
pub use orchestrator::{Orchestrator, RunReport};
pub use report::Reporter;
pub use scheduler::EventScheduler;
pub use supervisor::{ExecutionOutcome, RunError, TestExecution};
