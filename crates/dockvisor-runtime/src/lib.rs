//! Collaborators the containerizer drives: the container runtime, the
//! asset fetcher, the process reaper, the executor launcher, and the
//! checkpointed state read back during recovery.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod fetcher;
pub mod logs;
pub mod paths;
pub mod process;
pub mod reaper;
pub mod state;
