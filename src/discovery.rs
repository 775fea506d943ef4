//! Test definition discovery.
//!
//! Scans a root directory for load-test definition files selected by
//! include and exclude patterns (see [`pattern`] for the syntax).
//!
//! # Ordering
//!
//! Directories are walked depth-first with entries sorted by file name, so
//! two scans of an unchanged tree always return the same ordered list. The
//! first and last elements of that list are the ones the remote server
//! policy brackets.
//!
//! # Missing roots
//!
//! An unset or non-existent root yields an empty list rather than an error;
//! the caller decides whether "no tests" is a failure.

pub mod pattern;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::RunSettings;

pub use pattern::{PathPattern, PatternSet};

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur during test discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid test file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One discovered load-test definition.
///
/// Identified by its path relative to the scan root, always with `/`
/// separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestDefinition {
    relative_path: String,
}

impl TestDefinition {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into().replace('\\', "/"),
        }
    }

    /// Path relative to the discovery root.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Absolute location under `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.relative_path)
    }

    /// File name without directories.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    /// Relative path with the file extension removed.
    pub fn without_extension(&self) -> String {
        let name = self.file_name();
        let dir_len = self.relative_path.len() - name.len();
        format!("{}{}", &self.relative_path[..dir_len], self.stem())
    }
}

impl std::fmt::Display for TestDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.relative_path)
    }
}

/// Scans a directory tree for test definitions.
#[derive(Debug, Clone)]
pub struct TestDiscovery {
    root: Option<PathBuf>,
    includes: PatternSet,
    excludes: PatternSet,
}

impl TestDiscovery {
    /// Creates a discovery over `root`.
    ///
    /// An empty `includes` falls back to `**/*.jmx`.
    pub fn new<S: AsRef<str>>(
        root: Option<PathBuf>,
        includes: &[S],
        excludes: &[S],
    ) -> DiscoveryResult<Self> {
        let includes = if includes.is_empty() {
            PatternSet::new(["**/*.jmx"])?
        } else {
            PatternSet::new(includes.iter().map(AsRef::as_ref))?
        };
        let excludes = PatternSet::new(excludes.iter().map(AsRef::as_ref))?;

        Ok(Self {
            root,
            includes,
            excludes,
        })
    }

    /// Creates a discovery from the `[run]` section of the configuration.
    pub fn from_settings(settings: &RunSettings) -> DiscoveryResult<Self> {
        Self::new(
            settings.test_files_directory(),
            &settings.include_patterns(),
            &settings.exclude,
        )
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Returns the matching test definitions in discovery order.
    pub fn discover(&self) -> Vec<TestDefinition> {
        let Some(root) = self.root.as_deref() else {
            debug!("No test files directory configured");
            return Vec::new();
        };

        if !root.exists() {
            debug!("Test files directory {} does not exist", root.display());
            return Vec::new();
        }

        let mut tests = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during discovery: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };

            if self.includes.is_match(&relative) && !self.excludes.is_match(&relative) {
                tests.push(TestDefinition::new(relative));
            }
        }

        debug!("Discovered {} test definitions in {}", tests.len(), root.display());
        tests
    }

    /// Runs discovery and bundles the result with the selection it used.
    pub fn describe(&self) -> DiscoveryListing {
        DiscoveryListing {
            root: self.root.clone(),
            includes: self.includes.as_strs().into_iter().map(String::from).collect(),
            excludes: self.excludes.as_strs().into_iter().map(String::from).collect(),
            tests: self.discover(),
        }
    }
}

/// Discovery result as listed by `volley collect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryListing {
    pub root: Option<PathBuf>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub tests: Vec<TestDefinition>,
}

impl std::fmt::Display for DiscoveryListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.root {
            Some(root) => writeln!(f, "Root: {}", root.display())?,
            None => writeln!(f, "Root: <not configured>")?,
        }
        writeln!(f, "Include: {}", self.includes.join(", "))?;
        if !self.excludes.is_empty() {
            writeln!(f, "Exclude: {}", self.excludes.join(", "))?;
        }
        writeln!(f, "Tests ({}):", self.tests.len())?;
        for test in &self.tests {
            writeln!(f, "  {}", test)?;
        }
        Ok(())
    }
}

/// `/`-joined path of `path` relative to `root`, or `None` for the root itself.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
