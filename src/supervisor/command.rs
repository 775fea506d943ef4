//! Engine command-line assembly.
//!
//! A test invocation is rendered as
//!
//! ```text
//! program runtime_args... [-jar runtime_jar] arguments...
//!         [report arguments] [remote directives] [-G properties] [run id override]
//! ```
//!
//! where `arguments` and the report arguments are templates with
//! `{test}`, `{results}`, `{name}` and `{report_dir}` placeholders.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::config::{EngineConfig, RemoteConfig, ReportConfig};
use crate::remote::{self, RemoteDirectives};

/// A fully resolved subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// The program to run.
    pub program: String,
    /// Arguments to pass to the program.
    pub args: Vec<String>,
    /// Working directory (optional).
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set.
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-quoted rendering for logs.
    pub fn to_shell_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| shell_words::quote(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the process with piped output, null stdin and kill-on-drop.
    pub fn to_process(&self) -> tokio::process::Command {
        let mut process = tokio::process::Command::new(&self.program);
        process.args(&self.args);

        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }
        for (key, value) in &self.env {
            process.env(key, value);
        }

        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());
        process.kill_on_drop(true);
        process
    }
}

/// Per-test values substituted into the templates.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub test_path: &'a Path,
    pub test_name: &'a str,
    pub result_file: &'a Path,
    pub report_dir: Option<&'a Path>,
    pub directives: RemoteDirectives,
    pub extra_args: &'a [String],
}

/// Assembles the command line for one test.
pub fn build(
    engine: &EngineConfig,
    remote_config: &RemoteConfig,
    report: &ReportConfig,
    invocation: &Invocation<'_>,
) -> LaunchCommand {
    let test = invocation.test_path.to_string_lossy();
    let results = invocation.result_file.to_string_lossy();
    let report_dir = invocation
        .report_dir
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();

    let vars = [
        ("test", test.as_ref()),
        ("results", results.as_ref()),
        ("name", invocation.test_name),
        ("report_dir", report_dir.as_str()),
    ];

    let mut cmd = LaunchCommand::new(&engine.program).args(engine.runtime_args.iter().cloned());

    if let Some(jar) = &engine.runtime_jar {
        cmd = cmd.arg("-jar").arg(jar);
    }

    cmd = cmd.args(engine.arguments.iter().map(|a| substitute(a, &vars)));

    if invocation.report_dir.is_some() {
        cmd = cmd.args(report.arguments.iter().map(|a| substitute(a, &vars)));
    }

    cmd = cmd
        .args(remote::directive_arguments(invocation.directives, remote_config))
        .args(remote::property_arguments(remote_config))
        .args(invocation.extra_args.iter().cloned());

    if let Some(dir) = engine.working_dir() {
        cmd = cmd.working_dir(dir);
    }
    for (key, value) in &engine.env {
        cmd = cmd.env(key, value);
    }

    cmd
}

/// Replaces every `{key}` with its value.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
