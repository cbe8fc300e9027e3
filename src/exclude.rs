//! Selection of archive entries to drop.

use std::collections::BTreeSet;

use globset::GlobMatcher;
use regex::Regex;
use tracing::{debug, Span};

use crate::config::{compile_glob, ExclusionRule};
use crate::error::{RepairError, Result};

/// Compiled exclusion rules.
///
/// Globs that do not start with `*` are anchored as a suffix across
/// directory levels (`foo.so` behaves as `**/foo.so`). `*` and `?` never
/// cross a `/`. Regexes are searched anywhere in the relative path.
#[derive(Debug)]
pub struct ExclusionMatcher {
    globs: Vec<(String, GlobMatcher)>,
    regexes: Vec<Regex>,
    log: Span,
}

impl ExclusionMatcher {
    pub fn new(rules: &[ExclusionRule], log: Span) -> Result<Self> {
        let mut globs = Vec::new();
        let mut regexes = Vec::new();
        for rule in rules {
            match rule {
                ExclusionRule::Glob(pattern) => {
                    let anchored = anchor_glob(pattern);
                    let matcher = compile_glob(&anchored, "exclude glob")?;
                    globs.push((pattern.clone(), matcher));
                }
                ExclusionRule::Regex(expr) => {
                    let regex = Regex::new(expr).map_err(|e| {
                        RepairError::Config(format!("exclude_regex {expr:?}: {e}"))
                    })?;
                    regexes.push(regex);
                }
            }
        }
        Ok(Self {
            globs,
            regexes,
            log,
        })
    }

    /// Entries of `files` matched by any rule.
    ///
    /// The result is always a subset of `files` and does not depend on
    /// rule order.
    #[must_use]
    pub fn matches<S: AsRef<str>>(&self, files: &[S]) -> BTreeSet<String> {
        let mut matched = BTreeSet::new();
        for file in files {
            let file = file.as_ref();
            if let Some(rule) = self.first_rule_matching(file) {
                debug!(parent: &self.log, file, rule = %rule, "excluded");
                matched.insert(file.to_string());
            }
        }
        debug!(parent: &self.log, count = matched.len(), "exclusion set computed");
        matched
    }

    fn first_rule_matching(&self, file: &str) -> Option<String> {
        if let Some((pattern, _)) = self.globs.iter().find(|(_, g)| g.is_match(file)) {
            return Some(format!("glob {pattern}"));
        }
        self.regexes
            .iter()
            .find(|r| r.is_match(file))
            .map(|r| format!("regex {}", r.as_str()))
    }
}

fn anchor_glob(pattern: &str) -> String {
    if pattern.starts_with('*') {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    }
}
