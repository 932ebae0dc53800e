//! Task controller for the ctk client.
//!
//! Drives the lifecycle of container tasks and their exec'd processes
//! against a remote task service, manages their local standard streams, and
//! checkpoints running tasks into content-addressed images.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod checkpoint;
pub mod client;
pub mod container;
pub mod exec;
pub mod io;
pub mod metrics;
pub mod options;
pub mod process;
pub mod services;
pub mod state;
pub mod task;
