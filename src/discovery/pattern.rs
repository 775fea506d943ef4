//! Ant-style path patterns.
//!
//! Patterns are matched against `/`-separated paths relative to the scan
//! root:
//!
//! | Token | Matches |
//! |-------|---------|
//! | `*`   | zero or more characters inside one segment |
//! | `?`   | exactly one character inside one segment |
//! | `**`  | zero or more whole segments |
//!
//! A trailing `/` behaves like a trailing `/**`, and `\` is accepted as a
//! separator.

use regex::Regex;

use super::{DiscoveryError, DiscoveryResult};

/// A single compiled include or exclude pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
}

impl PathPattern {
    /// Compiles an Ant-style pattern.
    pub fn new(pattern: &str) -> DiscoveryResult<Self> {
        let regex = Regex::new(&translate(pattern)).map_err(|source| {
            DiscoveryError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Returns true if the relative path matches this pattern.
    pub fn matches(&self, relative_path: &str) -> bool {
        self.regex.is_match(relative_path)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// An ordered set of patterns; a path matches the set if any pattern matches.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> DiscoveryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| PathPattern::new(p.as_ref()))
            .collect::<DiscoveryResult<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn is_match(&self, relative_path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(relative_path))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// The patterns as written.
    pub fn as_strs(&self) -> Vec<&str> {
        self.patterns.iter().map(PathPattern::as_str).collect()
    }
}

/// Translates an Ant-style pattern into an anchored regular expression.
fn translate(pattern: &str) -> String {
    let mut normalized = pattern.replace('\\', "/");
    if normalized.ends_with('/') {
        normalized.push_str("**");
    }

    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.len().saturating_sub(1);

    let mut out = String::from("^");
    for (i, segment) in segments.iter().enumerate() {
        if *segment == "**" {
            if i == last {
                out.push_str(".*");
            } else {
                out.push_str("(?:[^/]*/)*");
            }
            continue;
        }

        let mut literal = String::new();
        for c in segment.chars() {
            match c {
                '*' => {
                    out.push_str(&regex::escape(&literal));
                    literal.clear();
                    out.push_str("[^/]*");
                }
                '?' => {
                    out.push_str(&regex::escape(&literal));
                    literal.clear();
                    out.push_str("[^/]");
                }
                _ => literal.push(c),
            }
        }
        out.push_str(&regex::escape(&literal));

        if i != last {
            out.push('/');
        }
    }
    out.push('$');
    out
}
