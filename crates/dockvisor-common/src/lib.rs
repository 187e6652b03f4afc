//! # dockvisor-common
//!
//! Shared types, task/executor descriptors, error definitions,
//! configuration flags, and constants used across the entire dockvisor
//! workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the foundational primitives that the
//! runtime collaborators and the containerizer build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod types;
