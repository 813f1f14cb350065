//! Offline reader for rmsprof trace logs.
//!
//! A finalized log is a flat sequence of [`rmsprof_trace::TraceEvent`]
//! records. [`aggregate`] streams it into a call graph and a worst-case cost
//! table keyed by `(subject, rms)`; [`rank`] orders subjects for reporting
//! and [`storage`] exports results to SQLite.

pub mod aggregate;
pub mod cli;
pub mod commands;
pub mod error;
pub mod log;
pub mod rank;
pub mod storage;

pub use error::{Error, Result};
