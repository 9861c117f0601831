// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The editor boundary.
//!
//! The orchestrator talks to the host editor through [`EditorClient`]:
//! fire-and-forget notifications going out, and a handful of reads coming
//! back. The async reads are editor round-trips; they may suspend the calling
//! task but must never block the event loop as a whole, which is why they are
//! `async` rather than plain methods.

use crate::{events::TestEvent, locator::DetectionRules, models::Test};
use camino::{Utf8Path, Utf8PathBuf};
use std::rc::Rc;

/// The orchestrator's view of the host editor.
///
/// Implementations are driven from a [`tokio::task::LocalSet`] and need not be
/// `Send`.
#[allow(async_fn_in_trait)]
pub trait EditorClient {
    /// Delivers a state transition to the editor. Fire-and-forget.
    fn notify(&self, event: TestEvent);

    /// Resets any per-file result/position caches the editor keeps. Called
    /// before the first snapshot population for a file; idempotent.
    fn clear_file_state(&self, file: &Utf8Path);

    /// Hands the editor the authoritative test order for `file`, so position
    /// caches can be rebuilt before per-test events arrive.
    fn store_test_order(&self, file: &Utf8Path, ids: &[String]);

    /// The project root test commands should run from, if configured.
    async fn project_root(&self) -> Option<Utf8PathBuf>;

    /// The file displayed in the current buffer, if any.
    async fn current_file(&self) -> Option<Utf8PathBuf>;

    /// The cursor line in the buffer displaying `file`, if it is open.
    async fn current_line(&self, file: &Utf8Path) -> Option<u32>;

    /// Builds the command line that executes `test`. Returns `None` if no
    /// runner is configured for the test's language.
    async fn build_command(&self, test: &Test) -> Option<String>;

    /// The detection rules for `file`, or `None` if none are configured or
    /// evaluating them failed.
    async fn detection_rules(&self, file: &Utf8Path) -> Option<DetectionRules>;
}

impl<T: EditorClient> EditorClient for Rc<T> {
    fn notify(&self, event: TestEvent) {
        (**self).notify(event)
    }

    fn clear_file_state(&self, file: &Utf8Path) {
        (**self).clear_file_state(file)
    }

    fn store_test_order(&self, file: &Utf8Path, ids: &[String]) {
        (**self).store_test_order(file, ids)
    }

    async fn project_root(&self) -> Option<Utf8PathBuf> {
        (**self).project_root().await
    }

    async fn current_file(&self) -> Option<Utf8PathBuf> {
        (**self).current_file().await
    }

    async fn current_line(&self, file: &Utf8Path) -> Option<u32> {
        (**self).current_line(file).await
    }

    async fn build_command(&self, test: &Test) -> Option<String> {
        (**self).build_command(test).await
    }

    async fn detection_rules(&self, file: &Utf8Path) -> Option<DetectionRules> {
        (**self).detection_rules(file).await
    }
}
