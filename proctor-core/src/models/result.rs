// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// The outcome of one completed run of a test.
///
/// Keyed by the same `(file, id)` pair as the owning [`Test`](super::Test).
/// Immutable once created; a later run of the same test supersedes it in the
/// [`ResultStore`](crate::results::ResultStore) rather than merging with it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Identity of the test this result belongs to.
    pub id: String,

    /// The file the test lives in.
    pub file: Utf8PathBuf,

    /// Process exit code. Zero is success; anything else is a test failure,
    /// which is a normal result rather than an orchestrator error.
    pub code: i32,

    /// Captured output of the run.
    pub output: String,
}

impl TestResult {
    /// True if the run failed (non-zero exit code).
    pub fn failed(&self) -> bool {
        self.code != 0
    }
}
