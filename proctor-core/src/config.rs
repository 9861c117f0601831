// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrator configuration.
//!
//! Terminal dimensions for test output are carried here and passed into the
//! run engine's execution context explicitly, rather than mutated into the
//! parent process environment.

use serde::Deserialize;

/// Configuration for the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HandlerConfig {
    /// Automatically present a failing run's output when it completes and the
    /// cursor is on the owning test.
    pub output_on_run: bool,

    /// Output sizing handed to the run engine.
    pub output: OutputConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            output_on_run: true,
            output: OutputConfig::default(),
        }
    }
}

/// Terminal dimensions advertised to test processes.
///
/// When set, these are passed to each child as `ROWS`/`COLUMNS` so that test
/// frameworks size their output for the editor's output window.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Rows available for output, if constrained.
    pub rows: Option<u32>,

    /// Columns available for output, if constrained.
    pub cols: Option<u32>,
}
