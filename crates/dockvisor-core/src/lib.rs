//! # dockvisor-core
//!
//! Host primitives the containerizer builds on:
//! - **Cgroups v1**: locating hierarchies and adjusting `cpu` and `memory`
//!   control files of runtime-created cgroups.
//! - **Processes**: `/proc` process trees, tree-wide signalling and wait
//!   status encoding.
//! - **Usage**: CPU time, thread and RSS sampling of a process tree.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod process;
pub mod usage;
