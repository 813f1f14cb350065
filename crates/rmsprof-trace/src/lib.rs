//! Runtime library for rmsprof.
//!
//! Linked into an instrumented program, this crate measures for every call
//! the pair (footprint, cost): the number of distinct memory units the call
//! touched ("related metric of size", RMS) and the cost units it spent.
//! Each returning call appends one fixed-size [`TraceEvent`] to a shared,
//! memory-mapped log that the `rmsprof` CLI aggregates offline.
//!
//! # Usage
//!
//! From instrumented code, call the C-ABI hooks in [`hooks`]:
//!
//! ```c
//! rmsprof_enter(42);
//! rmsprof_memory_access((uint64_t)buf, len);
//! rmsprof_return(42, cost);
//! rmsprof_final();   /* also registered with atexit */
//! ```
//!
//! The log location and size come from the environment:
//!
//! ```bash
//! RMSPROF_LOG=/tmp/app.trace RMSPROF_CAPACITY=16G ./instrumented-app
//! RMSPROF_LOG=shm:/rmsprof ./instrumented-app
//! ```
//!
//! From Rust, [`TraceChannel`] and [`Recorder`] can also be owned directly.

pub mod channel;
pub mod config;
pub mod event;
pub mod footprint;
pub mod hooks;
pub mod recorder;

pub use channel::{ChannelError, FinalizeSummary, TraceChannel};
pub use config::{Backing, ConfigError, TraceConfig};
pub use event::{RECORD_SIZE, TERMINATOR_ID, TraceEvent};
pub use footprint::FootprintTracker;
pub use hooks::{TraceGuard, install};
pub use recorder::Recorder;
