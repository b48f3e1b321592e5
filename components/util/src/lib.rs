// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Ambient utilities shared by every crate in the stack: the process-wide
//! logger, a monotonic clock type, and the rate-counter mechanism behind the
//! `ctrs` fields in the NS and BSSGP data model. This is the workspace's
//! `tikv_util` analogue, scoped down to what a single-threaded protocol
//! stack actually needs (no thread-pool helpers, no cgroup/sysinfo probing:
//! this stack never spawns a thread).

pub mod logger;
pub mod rate_ctr;
pub mod time;

pub use collections::{HashMap, HashSet};
