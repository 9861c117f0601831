// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test execution.
//!
//! [`RunEngine`] is the contract the orchestrator dispatches through: execute
//! a test as one cancellable unit of work, report which ids are live, and
//! maintain the per-id output buffers that back live attach and external
//! (out-of-process) runs. [`ProcessEngine`] is the stock implementation on
//! top of [`tokio::process`].

use crate::{
    config::OutputConfig,
    errors::EngineError,
    models::{Test, TestResult},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use std::{cell::RefCell, collections::HashMap, io, process::Stdio, rc::Rc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// An artifact that lets an external terminal attach to a live run's streams:
/// where the script should be placed, and what it should contain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachScript {
    /// Where the editor should place the script.
    pub path: Utf8PathBuf,

    /// The script body.
    pub content: String,
}

/// Executes tests and tracks which ids are live.
///
/// Implementations are driven from a [`tokio::task::LocalSet`] and need not be
/// `Send`.
#[allow(async_fn_in_trait)]
pub trait RunEngine {
    /// Marks `test` as having a unit of work in flight and prepares its
    /// output buffer.
    fn register_new_test(&self, test: &Test);

    /// Executes `argv` for `test`, resolving when the process exits. At most
    /// one call per id is in flight at a time; cancelling the returned future
    /// cancels the run.
    async fn run(
        &self,
        argv: &[String],
        test: &Test,
        cwd: Option<&Utf8Path>,
    ) -> Result<TestResult, EngineError>;

    /// True if a unit of work (internal or external) is live for `id`.
    fn is_running(&self, id: &str) -> bool;

    /// Appends streamed output for an externally-run test to its buffer.
    fn register_external_output(&self, id: &str, output: &str);

    /// Drops the external output buffer for `id` and clears its live mark.
    fn clear_external_output(&self, id: &str);

    /// Produces an attach artifact for a live run, or `None` if `id` is not
    /// running.
    fn create_attach_script(&self, id: &str) -> Option<AttachScript>;
}

impl<T: RunEngine> RunEngine for Rc<T> {
    fn register_new_test(&self, test: &Test) {
        (**self).register_new_test(test)
    }

    async fn run(
        &self,
        argv: &[String],
        test: &Test,
        cwd: Option<&Utf8Path>,
    ) -> Result<TestResult, EngineError> {
        (**self).run(argv, test, cwd).await
    }

    fn is_running(&self, id: &str) -> bool {
        (**self).is_running(id)
    }

    fn register_external_output(&self, id: &str, output: &str) {
        (**self).register_external_output(id, output)
    }

    fn clear_external_output(&self, id: &str) {
        (**self).clear_external_output(id)
    }

    fn create_attach_script(&self, id: &str) -> Option<AttachScript> {
        (**self).create_attach_script(id)
    }
}

#[derive(Debug)]
struct Unit {
    output_path: Utf8PathBuf,
}

/// The stock process-spawning engine.
///
/// Each run gets null stdin and captured stdout/stderr; the combined output
/// is teed to a per-id file under a crate-owned scratch directory, which is
/// what attach scripts tail. Terminal dimensions come from [`OutputConfig`]
/// and are passed to the child as `ROWS`/`COLUMNS` rather than mutated into
/// the parent environment.
#[derive(Debug)]
pub struct ProcessEngine {
    output: OutputConfig,
    scratch: Utf8TempDir,
    running: RefCell<HashMap<String, Unit>>,
}

impl ProcessEngine {
    /// Creates an engine with its own scratch directory.
    pub fn new(output: OutputConfig) -> Result<Self, EngineError> {
        let scratch =
            camino_tempfile::tempdir().map_err(|error| EngineError::Scratch { error })?;
        Ok(Self {
            output,
            scratch,
            running: RefCell::new(HashMap::new()),
        })
    }

    /// Returns the output path for `id`, creating its buffer and live mark if
    /// absent.
    fn ensure_unit(&self, id: &str) -> Utf8PathBuf {
        let mut running = self.running.borrow_mut();
        if let Some(unit) = running.get(id) {
            return unit.output_path.clone();
        }
        let path = self.scratch.path().join(format!("{}.out", file_stem(id)));
        if let Err(error) = std::fs::write(&path, b"") {
            warn!("failed to create output buffer for {id}: {error}");
        }
        running.insert(
            id.to_owned(),
            Unit {
                output_path: path.clone(),
            },
        );
        path
    }
}

impl RunEngine for ProcessEngine {
    fn register_new_test(&self, test: &Test) {
        debug!("registering test {}", test.id);
        self.ensure_unit(&test.id);
    }

    async fn run(
        &self,
        argv: &[String],
        test: &Test,
        cwd: Option<&Utf8Path>,
    ) -> Result<TestResult, EngineError> {
        let (program, args) = argv.split_first().ok_or_else(|| EngineError::EmptyCommand {
            id: test.id.clone(),
        })?;
        let output_path = self.ensure_unit(&test.id);
        // Clears the live mark even if this future is cancelled mid-run.
        let _mark = RunningMark {
            engine: self,
            id: &test.id,
        };

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        if let Some(rows) = self.output.rows {
            command.env("ROWS", rows.to_string());
        }
        if let Some(cols) = self.output.cols {
            command.env("COLUMNS", cols.to_string());
        }

        debug!("spawning `{program}` for test {}", test.id);
        let mut child = command.spawn().map_err(|error| EngineError::Spawn {
            program: program.clone(),
            error,
        })?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        // Tee each chunk into the per-id buffer as it arrives, so an attached
        // terminal sees output while the run is still live.
        let collected = async {
            let mut sink = tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&output_path)
                .await?;
            let mut combined = Vec::new();
            let mut out_buf = vec![0u8; 4096];
            let mut err_buf = vec![0u8; 4096];
            let mut out_done = stdout.is_none();
            let mut err_done = stderr.is_none();
            while !(out_done && err_done) {
                let (read, from_stdout) = tokio::select! {
                    read = read_chunk(stdout.as_mut(), &mut out_buf), if !out_done => (read?, true),
                    read = read_chunk(stderr.as_mut(), &mut err_buf), if !err_done => (read?, false),
                };
                if read == 0 {
                    if from_stdout {
                        out_done = true;
                    } else {
                        err_done = true;
                    }
                    continue;
                }
                let chunk = if from_stdout {
                    &out_buf[..read]
                } else {
                    &err_buf[..read]
                };
                sink.write_all(chunk).await?;
                sink.flush().await?;
                combined.extend_from_slice(chunk);
            }
            Ok::<_, io::Error>(combined)
        }
        .await
        .map_err(|error| EngineError::Collect {
            id: test.id.clone(),
            error,
        })?;

        let status = child.wait().await.map_err(|error| EngineError::Collect {
            id: test.id.clone(),
            error,
        })?;

        let output = String::from_utf8_lossy(&collected).into_owned();
        // Signal-terminated processes have no exit code.
        let code = status.code().unwrap_or(-1);
        Ok(TestResult {
            id: test.id.clone(),
            file: test.file.clone(),
            code,
            output,
        })
    }

    fn is_running(&self, id: &str) -> bool {
        self.running.borrow().contains_key(id)
    }

    fn register_external_output(&self, id: &str, output: &str) {
        use std::io::Write;

        let path = self.ensure_unit(id);
        let appended = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .and_then(|mut buffer| buffer.write_all(output.as_bytes()));
        if let Err(error) = appended {
            warn!("failed to append external output for {id}: {error}");
        }
    }

    fn clear_external_output(&self, id: &str) {
        if let Some(unit) = self.running.borrow_mut().remove(id) {
            if let Err(error) = std::fs::remove_file(&unit.output_path) {
                debug!("failed to remove output buffer for {id}: {error}");
            }
        }
    }

    fn create_attach_script(&self, id: &str) -> Option<AttachScript> {
        let running = self.running.borrow();
        let unit = running.get(id)?;
        Some(AttachScript {
            path: self.scratch.path().join(format!("attach-{}.sh", file_stem(id))),
            content: format!("#!/bin/sh\nexec tail -f -c +1 '{}'\n", unit.output_path),
        })
    }
}

struct RunningMark<'a> {
    engine: &'a ProcessEngine,
    id: &'a str,
}

impl Drop for RunningMark<'_> {
    fn drop(&mut self) {
        self.engine.running.borrow_mut().remove(self.id);
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(stream: Option<&mut R>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => Ok(0),
    }
}

fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
