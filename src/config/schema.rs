//! Configuration schema definitions for volley.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section is optional; a missing section
//! takes its defaults.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunSettings            - Test selection, pacing, cancellation policy
//! ├── EngineConfig           - How a single test subprocess is launched
//! ├── RemoteConfig           - Remote server start/stop policy
//! ├── ReportConfig           - Dashboard reports and result manifest
//! └── SchedulerConfig        - Tagged enum selecting the event scheduler
//!     ├── None               - No external scheduler
//!     └── Command            - Shell-command driven scheduler
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Root configuration structure for volley.
///
/// # TOML Structure
///
/// ```toml
/// [run]
/// test_files_directory = "src/test/jmeter"
/// post_test_pause_secs = 5
///
/// [engine]
/// program = "java"
/// runtime_jar = "ApacheJMeter.jar"
/// working_dir = "target/jmeter/bin"
///
/// [remote]
/// servers = ["10.0.0.4", "10.0.0.5"]
/// start_servers_before_tests = true
/// stop_servers_after_tests = true
///
/// [report]
/// generate_reports = true
///
/// [scheduler]
/// type = "none"
/// ```
///
/// # Example
///
/// ```
/// use volley::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [run]
///     test_files_directory = "tests/load"
/// "#).unwrap();
/// assert_eq!(config.run.include, vec!["**/*.jmx".to_string()]);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Test selection and run pacing.
    #[serde(default)]
    pub run: RunSettings,

    /// Subprocess launch settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Remote server policy.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Report configuration (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,

    /// External event scheduler.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Test selection, pacing and cancellation policy.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `test_files_directory` | None (nothing is discovered) |
/// | `include` | `["**/*.jmx"]` |
/// | `exclude` | `[]` |
/// | `post_test_pause_secs` | 0 |
/// | `on_scheduler_cancel` | `continue` |
/// | `run_id_argument` | `-Jtest.testRunId={run_id}` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSettings {
    /// Root directory scanned for test definitions.
    ///
    /// `~` is expanded. When unset or missing, discovery yields no tests.
    pub test_files_directory: Option<PathBuf>,

    /// Include patterns, relative to `test_files_directory`.
    ///
    /// An empty list is treated as the catch-all default.
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Exclude patterns, relative to `test_files_directory`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Pause after each test, in seconds.
    ///
    /// Accepts an integer, a float (truncated) or a string. Negative or
    /// unparseable values are clamped to zero with a warning.
    #[serde(default)]
    pub post_test_pause_secs: PauseSetting,

    /// What a scheduler-triggered cancellation means for the rest of the run.
    #[serde(default)]
    pub on_scheduler_cancel: CancelPolicy,

    /// Locally configured run identifier.
    ///
    /// When the scheduler reports a different identifier, an override
    /// argument is appended to every test command.
    pub run_id: Option<String>,

    /// Template for the run identifier override; `{run_id}` is substituted.
    #[serde(default = "default_run_id_argument")]
    pub run_id_argument: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            test_files_directory: None,
            include: default_include(),
            exclude: Vec::new(),
            post_test_pause_secs: PauseSetting::default(),
            on_scheduler_cancel: CancelPolicy::default(),
            run_id: None,
            run_id_argument: default_run_id_argument(),
        }
    }
}

impl RunSettings {
    /// Include patterns with the catch-all applied when none are given.
    pub fn include_patterns(&self) -> Vec<String> {
        if self.include.is_empty() {
            default_include()
        } else {
            self.include.clone()
        }
    }

    /// The inter-test pause, clamped to zero when the setting is invalid.
    pub fn post_test_pause(&self) -> Duration {
        self.post_test_pause_secs.to_duration()
    }

    /// The test directory with `~` expanded.
    pub fn test_files_directory(&self) -> Option<PathBuf> {
        self.test_files_directory.as_deref().map(expand_path)
    }
}

fn default_include() -> Vec<String> {
    vec!["**/*.jmx".to_string()]
}

fn default_run_id_argument() -> String {
    "-Jtest.testRunId={run_id}".to_string()
}

/// Raw pause value as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PauseSetting {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl Default for PauseSetting {
    fn default() -> Self {
        PauseSetting::Seconds(0)
    }
}

impl PauseSetting {
    /// Converts the raw setting into a duration.
    pub fn to_duration(&self) -> Duration {
        let secs = match self {
            PauseSetting::Seconds(secs) => *secs,
            PauseSetting::Fractional(secs) => {
                if !secs.is_finite() {
                    warn!(
                        "post_test_pause_secs '{}' is not a number, will default to 0",
                        secs
                    );
                    return Duration::ZERO;
                }
                warn!(
                    "post_test_pause_secs '{}' is not an integer, truncating to {}",
                    secs,
                    secs.trunc()
                );
                secs.trunc() as i64
            }
            PauseSetting::Text(text) => match text.trim().parse::<i64>() {
                Ok(secs) => secs,
                Err(_) => {
                    warn!(
                        "Error parsing post_test_pause_secs '{}' as an integer, will default to 0",
                        text
                    );
                    return Duration::ZERO;
                }
            },
        };

        if secs < 0 {
            warn!("post_test_pause_secs is negative ({}), will default to 0", secs);
            return Duration::ZERO;
        }

        Duration::from_secs(secs as u64)
    }
}

/// Run-level reaction to a scheduler kill, abort or stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// The cancelled test counts as a graceful stop; later tests still run.
    #[default]
    Continue,
    /// Remaining tests are skipped and the session is stopped normally.
    StopRun,
}

/// Settings for launching one test subprocess.
///
/// The final command line is
/// `program runtime_args... [-jar runtime_jar] arguments... <per-test extras>`.
///
/// # Example
///
/// ```toml
/// [engine]
/// program = "java"
/// runtime_args = ["-Xms512m", "-Xmx2g", "-Djava.awt.headless=true"]
/// runtime_jar = "ApacheJMeter-5.6.3.jar"
/// working_dir = "target/jmeter/bin"
/// arguments = ["-n", "-t", "{test}", "-l", "{results}", "-d", ".."]
/// results_dir = "target/jmeter/results"
/// results_format = "csv"
/// tolerate_force_kill = true
///
/// [engine.env]
/// JVM_ARGS = "-Duser.language=en"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Program to execute.
    ///
    /// Default: `java`
    #[serde(default = "default_program")]
    pub program: String,

    /// Runtime arguments placed before `-jar`.
    #[serde(default)]
    pub runtime_args: Vec<String>,

    /// Runtime jar launched with `-jar`, if any.
    pub runtime_jar: Option<String>,

    /// Working directory for the subprocess.
    ///
    /// If not specified, uses the current working directory.
    pub working_dir: Option<PathBuf>,

    /// Base argument template.
    ///
    /// Placeholders: `{test}` (absolute test path), `{results}` (result file
    /// path), `{name}` (test file stem).
    #[serde(default = "default_arguments")]
    pub arguments: Vec<String>,

    /// Directory receiving result files.
    ///
    /// Default: `target/jmeter/results`
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Result file format, which decides the file extension.
    #[serde(default)]
    pub results_format: ResultsFormat,

    /// Extra environment variables for the subprocess.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Demote subprocess standard output to debug level.
    #[serde(default)]
    pub suppress_output: bool,

    /// Treat `force_killed_exit_code` as a warning instead of a failure.
    #[serde(default)]
    pub tolerate_force_kill: bool,

    /// Exit status reserved for "killed by the host".
    ///
    /// Default: 143 (128 + SIGTERM)
    #[serde(default = "default_force_killed_exit_code")]
    pub force_killed_exit_code: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            runtime_args: Vec::new(),
            runtime_jar: None,
            working_dir: None,
            arguments: default_arguments(),
            results_dir: default_results_dir(),
            results_format: ResultsFormat::default(),
            env: BTreeMap::new(),
            suppress_output: false,
            tolerate_force_kill: false,
            force_killed_exit_code: default_force_killed_exit_code(),
        }
    }
}

impl EngineConfig {
    /// The results directory with `~` expanded.
    pub fn results_dir(&self) -> PathBuf {
        expand_path(&self.results_dir)
    }

    /// The working directory with `~` expanded.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir.as_deref().map(expand_path)
    }
}

fn default_program() -> String {
    "java".to_string()
}

fn default_arguments() -> Vec<String> {
    ["-n", "-t", "{test}", "-l", "{results}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("target/jmeter/results")
}

fn default_force_killed_exit_code() -> i32 {
    143
}

/// Result file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsFormat {
    #[default]
    Jtl,
    Csv,
}

impl ResultsFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ResultsFormat::Jtl => "jtl",
            ResultsFormat::Csv => "csv",
        }
    }
}

/// Remote server start/stop policy.
///
/// `start_and_stop_servers_for_each_test` overrides the other two flags:
/// every test is bracketed by its own start and stop.
///
/// # Example
///
/// ```toml
/// [remote]
/// servers = ["192.168.0.10", "192.168.0.11:1099"]
/// start_servers_before_tests = true
/// stop_servers_after_tests = true
///
/// [remote.properties]
/// threads = "50"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Remote server addresses; empty means "all servers known to the engine".
    #[serde(default)]
    pub servers: Vec<String>,

    #[serde(default)]
    pub start_servers_before_tests: bool,

    #[serde(default)]
    pub stop_servers_after_tests: bool,

    #[serde(default)]
    pub start_and_stop_servers_for_each_test: bool,

    /// Global properties sent to every remote server (`-G<key>=<value>`).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl RemoteConfig {
    /// Comma separated server list as the engine expects it.
    pub fn server_list(&self) -> String {
        self.servers.join(",")
    }
}

/// Report and manifest settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `generate_reports` | `false` |
/// | `output_dir` | `"target/jmeter/reports"` |
/// | `arguments` | `["-e", "-o", "{report_dir}"]` |
/// | `manifest` | `true` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Ask the engine to generate a dashboard per test.
    #[serde(default)]
    pub generate_reports: bool,

    /// Root directory for per-test report folders.
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,

    /// Arguments appended when reports are enabled; `{report_dir}` is
    /// substituted.
    #[serde(default = "default_report_arguments")]
    pub arguments: Vec<String>,

    /// Write `result-files.json` into the results directory after a run.
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            generate_reports: false,
            output_dir: default_report_dir(),
            arguments: default_report_arguments(),
            manifest: true,
        }
    }
}

impl ReportConfig {
    /// The report root with `~` expanded.
    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.output_dir)
    }
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("target/jmeter/reports")
}

fn default_report_arguments() -> Vec<String> {
    ["-e", "-o", "{report_dir}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

/// External event scheduler selection.
///
/// # Example
///
/// ```toml
/// [scheduler]
/// type = "command"
/// start_command = "./perfana.sh start"
/// stop_command = "./perfana.sh stop"
/// abort_command = "./perfana.sh abort"
/// run_id_command = "./perfana.sh init"
/// watch_command = "./perfana.sh watch"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SchedulerConfig {
    /// No scheduler; tests run without session callbacks.
    #[default]
    None,

    /// Session lifecycle driven by shell commands.
    Command(CommandSchedulerConfig),
}

/// Configuration for the shell-command scheduler.
///
/// All commands run via `sh -c` and receive `VOLLEY_SESSION_ID` in their
/// environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandSchedulerConfig {
    /// Run when the session starts.
    pub start_command: Option<String>,

    /// Run when the session ends normally.
    pub stop_command: Option<String>,

    /// Run when the session is aborted.
    pub abort_command: Option<String>,

    /// First non-empty stdout line is used as the run identifier.
    pub run_id_command: Option<String>,

    /// Long-running command started with the session.
    ///
    /// Each stdout line of the form `kill|abort|stop [message]` fires the
    /// registered kill-switch.
    pub watch_command: Option<String>,

    /// Working directory for all scheduler commands.
    pub working_dir: Option<PathBuf>,

    /// Forward scheduler debug messages.
    #[serde(default)]
    pub debug: bool,

    /// Timeout for start/stop/abort/run-id commands in seconds.
    ///
    /// Default: 120
    #[serde(default = "default_scheduler_timeout")]
    pub timeout_secs: u64,
}

impl Default for CommandSchedulerConfig {
    fn default() -> Self {
        Self {
            start_command: None,
            stop_command: None,
            abort_command: None,
            run_id_command: None,
            watch_command: None,
            working_dir: None,
            debug: false,
            timeout_secs: default_scheduler_timeout(),
        }
    }
}

fn default_scheduler_timeout() -> u64 {
    120
}

fn expand_path(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
