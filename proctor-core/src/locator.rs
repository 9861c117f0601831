// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test discovery.
//!
//! [`Locator`] is the contract the orchestrator drives during reconciliation:
//! given a file and the editor's detection rules, produce the ordered list of
//! tests currently present. [`PatternLocator`] is the stock implementation,
//! scanning the file against per-language regexes. [`nearest_test`] is the
//! pure position lookup shared by cursor queries and output presentation.

use crate::{errors::LocatorError, models::Test};
use camino::Utf8Path;
use regex::Regex;
use serde::Deserialize;
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    rc::Rc,
};

/// Detection rules for one file, as handed over by the editor.
///
/// Each rule is a regex matched against the start of a line, capturing the
/// test name in its first group. Rules may arrive in vim's `\v` syntax; they
/// are converted before compilation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionRules {
    /// Patterns that match a test definition line.
    pub test: Vec<String>,
}

impl DetectionRules {
    /// Creates rules from a list of patterns.
    pub fn new(test: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            test: test.into_iter().map(Into::into).collect(),
        }
    }

    /// True if no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.test.is_empty()
    }
}

/// Finds the tests currently present in a file.
///
/// Implementations are driven from a [`tokio::task::LocalSet`] and need not be
/// `Send`.
#[allow(async_fn_in_trait)]
pub trait Locator {
    /// Returns the ordered list of tests in `file`. The returned order is
    /// authoritative: it becomes the new snapshot order for the file.
    async fn find_all(
        &self,
        file: &Utf8Path,
        rules: &DetectionRules,
    ) -> Result<Vec<Test>, LocatorError>;
}

impl<T: Locator> Locator for Rc<T> {
    async fn find_all(
        &self,
        file: &Utf8Path,
        rules: &DetectionRules,
    ) -> Result<Vec<Test>, LocatorError> {
        (**self).find_all(file, rules).await
    }
}

/// Finds the test nearest to `line` in a line-ordered test list.
///
/// The nearest test is the last test starting at or before `line`; a line
/// above the first test has no nearest test. In strict mode the test must
/// start exactly at `line`.
pub fn nearest_test(line: u32, tests: &[Test], strict: bool) -> Option<&Test> {
    let idx = tests.partition_point(|test| test.line <= line);
    let candidate = &tests[idx.checked_sub(1)?];
    if strict && candidate.line != line {
        return None;
    }
    Some(candidate)
}

/// The stock pattern-based locator.
///
/// Scans the file's lines in reverse, accumulating the text between test
/// definitions so each test's id can be derived from its name plus a hash of
/// its body. Ids therefore stay stable when other tests in the file are
/// edited, and change only when the test itself is renamed or rewritten.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatternLocator;

impl Locator for PatternLocator {
    async fn find_all(
        &self,
        file: &Utf8Path,
        rules: &DetectionRules,
    ) -> Result<Vec<Test>, LocatorError> {
        let patterns = compile_rules(rules)?;
        let text = tokio::fs::read_to_string(file)
            .await
            .map_err(|error| LocatorError::Read {
                file: file.to_owned(),
                error,
            })?;
        Ok(scan(file, &patterns, &text))
    }
}

fn compile_rules(rules: &DetectionRules) -> Result<Vec<Regex>, LocatorError> {
    rules
        .test
        .iter()
        .map(|raw| {
            let converted = convert_pattern(raw);
            Regex::new(&format!("^(?:{converted})")).map_err(|error| LocatorError::Pattern {
                pattern: converted,
                error,
            })
        })
        .collect()
}

/// Converts a vim `\v` pattern to standard regex syntax: the magic prefix is
/// dropped and `%(` groups become non-capturing `(?:` groups, leaving the
/// name capture as group 1.
fn convert_pattern(vim_pattern: &str) -> String {
    vim_pattern.replace(r"\v", "").replace("%(", "(?:")
}

fn scan(file: &Utf8Path, patterns: &[Regex], text: &str) -> Vec<Test> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tests = Vec::new();
    let mut body = String::new();
    for (index, line) in lines.iter().enumerate().rev() {
        if let Some(name) = match_name(line, patterns) {
            let id = test_id(&name, &body);
            tests.push(Test {
                id,
                name,
                file: file.to_owned(),
                line: (index + 1) as u32,
                col: 1,
                running: false,
            });
            body.clear();
        } else {
            body.push_str(line.trim());
        }
    }
    tests.reverse();
    tests
}

fn match_name(line: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().to_owned())
    })
}

fn test_id(name: &str, body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{name}{}", hasher.finish())
        .chars()
        .map(|c| match c {
            '.' | '\'' | '"' | ' ' | '\\' | '/' => '_',
            other => other,
        })
        .collect()
}
