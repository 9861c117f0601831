// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The orchestrator.
//!
//! The main structure in this module is [`Handler`].

mod imp;

pub use imp::*;
