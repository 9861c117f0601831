// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::HandlerConfig,
    editor::EditorClient,
    engine::{AttachScript, RunEngine},
    errors::PayloadError,
    events::TestEvent,
    locator::{Locator, nearest_test},
    models::{Test, TestResult},
    results::ResultStore,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{cell::RefCell, collections::HashMap, future::Future, rc::Rc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Task-registry token for reconciliation passes. Runs are keyed by test id;
/// reconciliation shares this fixed token, so a newer pass supersedes an
/// in-flight one.
const POSITIONS_TASK: &str = "update_positions";

/// The orchestration core.
///
/// Owns the authoritative per-file snapshot of known tests, drives the
/// [`Locator`] to refresh it, diffs old against new snapshots into lifecycle
/// [`TestEvent`]s, dispatches runs through the [`RunEngine`], and merges
/// completed results into the [`ResultStore`].
///
/// All state mutation happens on one cooperative event loop: the handler must
/// be driven from within a [`tokio::task::LocalSet`] on a current-thread
/// runtime, and every unit of work it launches is a local task. Serialization
/// is achieved by construction, so neither the snapshot nor the caches are
/// behind locks.
///
/// `Handler` is a cheap handle: clones share the same state.
pub struct Handler<C, L, E> {
    inner: Rc<Inner<C, L, E>>,
}

struct Inner<C, L, E> {
    editor: C,
    locator: L,
    engine: E,
    config: HandlerConfig,
    results: ResultStore,
    /// file -> ordered list of known tests. Mutated only by reconciliation
    /// commits and single-test status flips, always on the local loop.
    snapshot: RefCell<HashMap<Utf8PathBuf, Vec<Test>>>,
    /// Cancellation handles for in-flight units of work, keyed by test id
    /// (runs) or by [`POSITIONS_TASK`] (reconciliation).
    tasks: RefCell<HashMap<String, JoinHandle<()>>>,
}

impl<C, L, E> Clone for Handler<C, L, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C, L, E> Handler<C, L, E>
where
    C: EditorClient + 'static,
    L: Locator + 'static,
    E: RunEngine + 'static,
{
    /// Creates a handler around its three collaborators.
    pub fn new(editor: C, locator: L, engine: E, config: HandlerConfig) -> Self {
        debug!("handler created");
        Self {
            inner: Rc::new(Inner {
                editor,
                locator,
                engine,
                config,
                results: ResultStore::new(),
                snapshot: RefCell::new(HashMap::new()),
                tasks: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// The most recently committed snapshot for `file`, in discovery order.
    pub fn stored_tests(&self, file: &Utf8Path) -> Vec<Test> {
        self.inner
            .snapshot
            .borrow()
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    /// Checks for new, moved and removed tests in `file` and emits the
    /// corresponding lifecycle events, replacing the file's snapshot.
    ///
    /// No-ops if the file has no on-disk content or no detection rules are
    /// configured for it.
    pub fn update_positions(&self, file: &Utf8Path) {
        self.update_positions_inner(file, None);
    }

    fn update_positions_inner(&self, file: &Utf8Path, on_updated: Option<Box<dyn FnOnce()>>) {
        if !file.is_file() {
            debug!("{file} has no content on disk");
            return;
        }
        let this = self.clone();
        let file = file.to_owned();
        self.launch(POSITIONS_TASK, async move {
            this.reconcile(file, on_updated).await;
        });
    }

    async fn reconcile(&self, file: Utf8PathBuf, on_updated: Option<Box<dyn FnOnce()>>) {
        let inner = &self.inner;
        let rules = match inner.editor.detection_rules(&file).await {
            Some(rules) if !rules.is_empty() => rules,
            _ => {
                debug!("no detection rules for {file}");
                return;
            }
        };

        let mut previous: IndexMap<String, Test> = self
            .stored_tests(&file)
            .into_iter()
            .map(|test| (test.id.clone(), test))
            .collect();
        if previous.is_empty() {
            // First population for this file: reset any per-file caches the
            // editor kept from an earlier session. Idempotent.
            inner.editor.clear_file_state(&file);
        }

        info!("updating positions in {file}");
        let discovered = match inner.locator.find_all(&file, &rules).await {
            Ok(discovered) => discovered,
            Err(error) => {
                warn!("failed to locate tests in {file}: {error}");
                return;
            }
        };

        let ids: Vec<String> = discovered.iter().map(|test| test.id.clone()).collect();
        inner.editor.store_test_order(&file, &ids);

        let mut committed = Vec::with_capacity(discovered.len());
        for mut test in discovered {
            match previous.shift_remove(&test.id) {
                Some(prior) => {
                    // A run may have started or finished during the refresh:
                    // the engine, not the stale snapshot, knows the truth.
                    test.running = inner.engine.is_running(&test.id);
                    if prior.line != test.line {
                        debug!(
                            "moving test {} from line {} to {} in {file}",
                            test.id, prior.line, test.line
                        );
                        inner.editor.notify(TestEvent::Moved { test: test.clone() });
                    }
                }
                None => match inner.results.get(&file, &test.id) {
                    Some(result) => {
                        debug!("replacing test {} at line {} in {file}", test.id, test.line);
                        inner.editor.notify(TestEvent::Replaced {
                            test: test.clone(),
                            result,
                        });
                    }
                    None => {
                        debug!("new test {} found in {file}", test.id);
                        inner.editor.notify(TestEvent::New { test: test.clone() });
                    }
                },
            }
            committed.push(test);
        }

        for (id, removed) in previous {
            debug!("removing test {id} from {file}");
            inner.editor.notify(TestEvent::Removed { test: removed });
        }

        inner.snapshot.borrow_mut().insert(file.clone(), committed);
        inner.editor.notify(TestEvent::PositionsUpdated { file });
        if let Some(on_updated) = on_updated {
            on_updated();
        }
    }

    /// Runs all known tests in `file`.
    ///
    /// If the snapshot is empty the positions are refreshed first and the run
    /// retried exactly once.
    pub fn run_all(&self, file: &Utf8Path) {
        self.run_all_inner(file, true);
    }

    fn run_all_inner(&self, file: &Utf8Path, update_empty: bool) {
        info!("running all tests in {file}");
        let tests = self.stored_tests(file);
        if tests.is_empty() {
            if update_empty {
                info!("no tests known in {file}, rerunning after processing positions");
                let this = self.clone();
                let file_owned = file.to_owned();
                self.update_positions_inner(
                    file,
                    Some(Box::new(move || {
                        let retry = this.clone();
                        this.schedule(async move { retry.run_all_inner(&file_owned, false) });
                    })),
                );
            }
            return;
        }
        self.run_tests(tests);
    }

    /// Runs the test nearest to `line` in `file`, with the same single
    /// refresh-and-retry as [`run_all`](Self::run_all).
    pub fn run_nearest(&self, line: u32, file: &Utf8Path) {
        self.run_nearest_inner(line, file, true);
    }

    fn run_nearest_inner(&self, line: u32, file: &Utf8Path, update_empty: bool) {
        info!("running nearest test in {file} at line {line}");
        let tests = self.stored_tests(file);
        if tests.is_empty() {
            if update_empty {
                info!("no tests known in {file}, rerunning after processing positions");
                let this = self.clone();
                let file_owned = file.to_owned();
                self.update_positions_inner(
                    file,
                    Some(Box::new(move || {
                        let retry = this.clone();
                        this.schedule(async move { retry.run_nearest_inner(line, &file_owned, false) });
                    })),
                );
            }
            return;
        }
        if let Some(test) = nearest_test(line, &tests, false) {
            info!("nearest test found is {}", test.id);
            let test = test.clone();
            self.run_tests(vec![test]);
        }
    }

    /// Runs the known test with `id` in `file`, if present.
    pub fn run_single(&self, id: &str, file: &Utf8Path) {
        info!("running test {id} in {file}");
        let tests = self
            .stored_tests(file)
            .into_iter()
            .filter(|test| test.id == id)
            .collect();
        self.run_tests(tests);
    }

    /// Marks each test started and launches one independent cancellable unit
    /// of work per test id.
    fn run_tests(&self, tests: Vec<Test>) {
        for mut test in tests {
            self.register_started(&mut test);
            let this = self.clone();
            let id = test.id.clone();
            self.launch(&id, async move {
                this.execute(test).await;
            });
        }
    }

    async fn execute(&self, test: Test) {
        let inner = &self.inner;
        let Some(command_line) = inner.editor.build_command(&test).await else {
            warn!("no command could be built for test {}", test.id);
            self.rollback_started(test);
            return;
        };
        // Some runner command builders don't split their arguments properly.
        let argv = match shell_words::split(&command_line) {
            Ok(argv) => argv,
            Err(error) => {
                warn!("unparseable command for test {}: {error}", test.id);
                self.rollback_started(test);
                return;
            }
        };
        let root = inner.editor.project_root().await;

        debug!("handing {} to the run engine", test.id);
        match inner.engine.run(&argv, &test, root.as_deref()).await {
            Ok(result) => self.register_result(test, result),
            Err(error) => {
                warn!("run engine failed for test {}: {error}", test.id);
                self.rollback_started(test);
            }
        }
    }

    fn register_started(&self, test: &mut Test) {
        test.running = true;
        self.set_running(&test.file, &test.id, true);
        self.inner.engine.register_new_test(test);
        self.inner
            .editor
            .notify(TestEvent::Started { test: test.clone() });
    }

    /// Undoes a started mark that will never see a result: the run could not
    /// be dispatched at all.
    fn rollback_started(&self, mut test: Test) {
        test.running = false;
        self.set_running(&test.file, &test.id, false);
        // The live mark set at register time has no run left to clear it.
        self.inner.engine.clear_external_output(&test.id);
        self.inner.editor.notify(TestEvent::Moved { test });
    }

    fn register_result(&self, mut test: Test, result: TestResult) {
        self.inner.results.add(&result.file, result.clone());
        test.running = false;
        self.set_running(&test.file, &test.id, false);
        self.inner.editor.notify(TestEvent::Finished {
            test,
            result: result.clone(),
        });
        if self.inner.config.output_on_run && !result.output.is_empty() {
            // Deferred a loop turn so presentation never reenters the editor
            // callback that delivered the result.
            let this = self.clone();
            self.schedule(async move {
                this.present_output(result).await;
            });
        }
    }

    /// Surfaces a failed run's output, but only if the user is still looking
    /// at the owning test: "nearest test at cursor" is re-resolved now, at
    /// completion time, not at launch time.
    async fn present_output(&self, result: TestResult) {
        if !result.failed() {
            return;
        }
        let inner = &self.inner;
        if inner.editor.current_file().await.as_deref() != Some(result.file.as_path()) {
            return;
        }
        let Some(line) = inner.editor.current_line(&result.file).await else {
            return;
        };
        let tests = self.stored_tests(&result.file);
        if nearest_test(line, &tests, false).map(|test| test.id.as_str())
            == Some(result.id.as_str())
        {
            debug!("showing {} output", result.id);
            inner.editor.notify(TestEvent::OutputOpened { result });
        }
    }

    /// Registers an externally-run test as started. `stdout` carries any
    /// streamed output already available for it.
    pub fn external_start(
        &self,
        payload: serde_json::Value,
        stdout: Option<&str>,
    ) -> Result<(), PayloadError> {
        let mut test = Test::from_payload(payload)?;
        debug!("external test {} registered", test.id);
        self.register_started(&mut test);
        if let Some(stdout) = stdout.filter(|stdout| !stdout.is_empty()) {
            self.inner.engine.register_external_output(&test.id, stdout);
        }
        Ok(())
    }

    /// Registers the result of an externally-run test, feeding it through the
    /// same completion path as an internally dispatched run.
    pub fn external_result(
        &self,
        payload: serde_json::Value,
        exit_code: i32,
        stdout: Option<&str>,
    ) -> Result<(), PayloadError> {
        let test = Test::from_payload(payload)?;
        let result = TestResult {
            id: test.id.clone(),
            file: test.file.clone(),
            code: exit_code,
            output: stdout.unwrap_or_default().to_owned(),
        };
        debug!("external test {} result registered: {result:?}", test.id);
        self.inner.engine.clear_external_output(&test.id);
        self.register_result(test, result);
        Ok(())
    }

    /// Pure read against the snapshot: the test nearest to `line` in `file`
    /// under the documented tie-break, or an exact match in strict mode.
    pub fn get_nearest_test(&self, line: u32, file: &Utf8Path, strict: bool) -> Option<Test> {
        let tests = self.stored_tests(file);
        nearest_test(line, &tests, strict).cloned()
    }

    /// An artifact for attaching an external terminal to a live run, or
    /// `None` if `id` is not running.
    pub fn get_attach_script(&self, id: &str) -> Option<AttachScript> {
        info!("creating script to attach to test {id}");
        self.inner.engine.create_attach_script(id)
    }

    /// Cancels the unit of work for the test in `payload`, leaving the test
    /// in the snapshot. No-op without a payload.
    pub fn stop_test(&self, payload: Option<serde_json::Value>) -> Result<(), PayloadError> {
        let Some(payload) = payload else {
            debug!("no test to cancel");
            return Ok(());
        };
        let mut test = Test::from_payload(payload)?;
        info!("stopping all jobs for test {}", test.id);
        if let Some(handle) = self.inner.tasks.borrow_mut().remove(&test.id) {
            handle.abort();
        }
        // The aborted task may not have reached the engine yet, in which case
        // its live mark would otherwise outlive the run.
        self.inner.engine.clear_external_output(&test.id);
        test.running = false;
        self.set_running(&test.file, &test.id, false);
        self.inner.editor.notify(TestEvent::Moved { test });
        Ok(())
    }

    fn set_running(&self, file: &Utf8Path, id: &str, running: bool) {
        if let Some(tests) = self.inner.snapshot.borrow_mut().get_mut(file) {
            if let Some(test) = tests.iter_mut().find(|test| test.id == id) {
                test.running = running;
            }
        }
    }

    /// Launches a unit of work under `token`, superseding any in-flight task
    /// with the same token. The registry entry is removed when the task
    /// completes, so `stop` only ever cancels live work.
    fn launch(&self, token: &str, work: impl Future<Output = ()> + 'static) {
        if let Some(previous) = self.inner.tasks.borrow_mut().remove(token) {
            previous.abort();
        }
        let this = self.clone();
        let key = token.to_owned();
        let handle = tokio::task::spawn_local({
            let key = key.clone();
            async move {
                work.await;
                this.inner.tasks.borrow_mut().remove(&key);
            }
        });
        self.inner.tasks.borrow_mut().insert(key, handle);
    }

    /// Defers `work` to the next turn of the local loop. Used wherever
    /// invoking UI-affecting code from inside a UI-originated callback would
    /// reenter the editor.
    fn schedule(&self, work: impl Future<Output = ()> + 'static) {
        tokio::task::spawn_local(work);
    }
}
