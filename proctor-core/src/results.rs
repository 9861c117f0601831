// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-file result cache.

use crate::models::TestResult;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    cell::RefCell,
    collections::HashMap,
};

/// Last known results, partitioned by file and keyed by test id.
///
/// Holds at most one result per id: a later run of the same test supersedes
/// the earlier result. Results deliberately outlive snapshot membership, so a
/// test that disappears and reappears (e.g. across an undo) regains its last
/// known result during reconciliation.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: RefCell<HashMap<Utf8PathBuf, HashMap<String, TestResult>>>,
}

impl ResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `result` for `file`, superseding any prior result for its id.
    pub fn add(&self, file: &Utf8Path, result: TestResult) {
        self.results
            .borrow_mut()
            .entry(file.to_owned())
            .or_default()
            .insert(result.id.clone(), result);
    }

    /// Returns the last known result for `(file, id)`, if any.
    pub fn get(&self, file: &Utf8Path, id: &str) -> Option<TestResult> {
        self.results.borrow().get(file)?.get(id).cloned()
    }

    /// Drops all results recorded for `file`.
    pub fn clear_file(&self, file: &Utf8Path) {
        self.results.borrow_mut().remove(file);
    }
}
