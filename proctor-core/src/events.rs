// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events emitted by the orchestrator towards the editor.
//!
//! Events are fire-and-forget: the orchestrator never waits for the editor to
//! acknowledge one. For a single test id, `Started` always precedes
//! `Finished`; within one reconciliation pass, per-test events are emitted in
//! the new snapshot's order followed by exactly one `PositionsUpdated`.

use crate::models::{Test, TestResult};
use camino::Utf8PathBuf;

/// A state transition the editor should reflect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestEvent {
    /// A run was dispatched for this test.
    Started {
        /// The test, with `running` set.
        test: Test,
    },

    /// A run completed for this test.
    Finished {
        /// The test, with `running` cleared.
        test: Test,
        /// The outcome of the run.
        result: TestResult,
    },

    /// A known test changed position, or its visual running state changed.
    Moved {
        /// The test at its new position.
        test: Test,
    },

    /// A test was discovered that has no prior result.
    New {
        /// The newly discovered test.
        test: Test,
    },

    /// A test was re-discovered and a prior result exists for its id: it
    /// regains that result instead of starting from scratch.
    Replaced {
        /// The re-discovered test.
        test: Test,
        /// The last known result for the test's id.
        result: TestResult,
    },

    /// A previously known test is no longer present in its file.
    Removed {
        /// The test as last known.
        test: Test,
    },

    /// A reconciliation pass committed; all per-test events for it have been
    /// delivered. Intended for batched follow-up such as redrawing signs.
    PositionsUpdated {
        /// The file whose snapshot was replaced.
        file: Utf8PathBuf,
    },

    /// A failed run's output should be presented to the user.
    OutputOpened {
        /// The failing result.
        result: TestResult,
    },
}
