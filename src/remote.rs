//! Remote server start/stop policy.
//!
//! Decides, for each position in the discovered test list, whether the
//! engine should be told to start remote servers before the test and/or
//! stop them after it. The decision is a pure function of the list length,
//! the position, and [`RemoteConfig`]; the orchestrator re-evaluates it for
//! every test.

use crate::config::RemoteConfig;

/// Remote server directives for one test invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteDirectives {
    pub start: bool,
    pub stop: bool,
}

impl RemoteDirectives {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.start && !self.stop
    }
}

/// Evaluates the remote policy for the test at `index` of `test_count`.
///
/// - start: every test is bracketed, or this is the first test and servers
///   start before tests.
/// - stop: every test is bracketed, or this is the last test and servers
///   stop after tests.
///
/// # Example
///
/// ```
/// use volley::config::RemoteConfig;
/// use volley::remote::evaluate;
///
/// let config = RemoteConfig {
///     start_servers_before_tests: true,
///     stop_servers_after_tests: true,
///     ..Default::default()
/// };
///
/// let only = evaluate(1, 0, &config);
/// assert!(only.start && only.stop);
/// ```
pub fn evaluate(test_count: usize, index: usize, config: &RemoteConfig) -> RemoteDirectives {
    let every = config.start_and_stop_servers_for_each_test;
    let is_first = index == 0;
    let is_last = test_count > 0 && index == test_count - 1;

    RemoteDirectives {
        start: every || (config.start_servers_before_tests && is_first),
        stop: every || (config.stop_servers_after_tests && is_last),
    }
}

/// Evaluates the policy for every position of a run.
pub fn plan(test_count: usize, config: &RemoteConfig) -> Vec<RemoteDirectives> {
    (0..test_count)
        .map(|index| evaluate(test_count, index, config))
        .collect()
}

/// Renders the directives into engine arguments.
///
/// Start becomes `-R <servers>` when servers are listed and `-r` otherwise;
/// stop becomes `-X`.
pub fn directive_arguments(directives: RemoteDirectives, config: &RemoteConfig) -> Vec<String> {
    let mut args = Vec::new();

    if directives.start {
        if config.servers.is_empty() {
            args.push("-r".to_string());
        } else {
            args.push("-R".to_string());
            args.push(config.server_list());
        }
    }

    if directives.stop {
        args.push("-X".to_string());
    }

    args
}

/// Global properties for the remote servers as `-G<key>=<value>` arguments.
pub fn property_arguments(config: &RemoteConfig) -> Vec<String> {
    config
        .properties
        .iter()
        .map(|(key, value)| format!("-G{}={}", key, value))
        .collect()
}
