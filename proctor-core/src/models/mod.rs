// Copyright (c) The proctor Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value types shared across the orchestrator and its collaborators.

mod result;

pub use result::*;
pub use test::*;
