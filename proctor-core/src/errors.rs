// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by proctor.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error that occurred while building a [`Test`](crate::models::Test) from
/// an externally-supplied payload.
///
/// External runners report lifecycle through loosely-typed payloads; proctor
/// fails closed on anything that doesn't match the fixed `Test` shape, without
/// mutating any orchestrator state.
#[derive(Debug, Error)]
#[error("malformed external test payload")]
pub struct PayloadError {
    #[source]
    err: serde_json::Error,
}

impl PayloadError {
    pub(crate) fn new(err: serde_json::Error) -> Self {
        Self { err }
    }
}

/// An error that occurred while locating tests in a file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LocatorError {
    /// The file could not be read.
    #[error("failed to read `{file}`")]
    Read {
        /// The file that was being scanned.
        file: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A detection rule failed to compile.
    #[error("failed to compile detection pattern `{pattern}`")]
    Pattern {
        /// The pattern, after conversion to standard regex syntax.
        pattern: String,
        /// The underlying error.
        #[source]
        error: regex::Error,
    },
}

/// An error that occurred while the run engine was executing a test.
///
/// A test process exiting non-zero is *not* an engine error: that is a normal
/// [`TestResult`](crate::models::TestResult). These errors cover the cases
/// where no result could be produced at all.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The resolved command line was empty.
    #[error("empty command line for test `{id}`")]
    EmptyCommand {
        /// The test id the command was built for.
        id: String,
    },

    /// The test process failed to start.
    #[error("failed to spawn `{program}`")]
    Spawn {
        /// The program that was being spawned.
        program: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The test process was spawned but could not be waited on, or its output
    /// streams could not be drained.
    #[error("failed to collect output for test `{id}`")]
    Collect {
        /// The test id being executed.
        id: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The engine's scratch directory could not be created or written to.
    #[error("failed to prepare engine scratch storage")]
    Scratch {
        /// The underlying error.
        #[source]
        error: io::Error,
    },
}
