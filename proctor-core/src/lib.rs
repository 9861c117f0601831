// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Editor-embedded test orchestration.
//!
//! proctor tracks the set of discoverable tests in a source file, runs them
//! concurrently on demand, reconciles test identity across edits (tests move,
//! appear, disappear) and caches their results for later display. The
//! [`Handler`](handler::Handler) is the core: it owns the per-file snapshot of
//! known tests and coordinates three collaborators — a [`Locator`](locator::Locator)
//! that finds tests, a [`RunEngine`](engine::RunEngine) that executes them as
//! cancellable units of work, and the host editor behind
//! [`EditorClient`](editor::EditorClient).
//!
//! Everything runs on one cooperative event loop: construct the handler inside
//! a [`tokio::task::LocalSet`] on a current-thread runtime and drive it from
//! there. All state mutation is serialized by construction, so there are no
//! locks anywhere in the crate.

pub mod config;
pub mod editor;
pub mod engine;
pub mod errors;
pub mod events;
pub mod handler;
pub mod locator;
pub mod models;
pub mod results;
