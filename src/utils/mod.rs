//! Utility functions and helpers for lazarus-sw.
//!
//! # Submodules
//!
//! - `logging`: Tracing and logging initialization.
//! - `retry`: Exponential backoff for re-registration attempts.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
