//! C-ABI entry points called by instrumented code.
//!
//! These are a thin shim over [`TraceChannel`] and [`Recorder`]: one channel
//! per process, opened on first use from the environment, and one recorder
//! per thread. Setup failures and a full log terminate the process, since a
//! partial trace yields misleading profiles.

use crate::channel::{ChannelError, TraceChannel};
use crate::config::TraceConfig;
use crate::recorder::Recorder;
use std::cell::RefCell;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

struct Runtime {
    channel: Arc<TraceChannel>,
    unit_shift: u32,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

thread_local! {
    static RECORDER: RefCell<Option<Recorder>> = const { RefCell::new(None) };
}

fn fatal(context: &str, err: impl Display) -> ! {
    eprintln!("[rmsprof] {context}: {err}");
    std::process::exit(1);
}

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let config =
            TraceConfig::from_env().unwrap_or_else(|e| fatal("invalid configuration", e));
        let channel = TraceChannel::open(&config)
            .unwrap_or_else(|e| fatal("cannot open trace log", e));

        // Normal process exit always finalizes, even if the instrumented
        // program never reaches its own call to rmsprof_final.
        unsafe { libc::atexit(finalize_at_exit) };

        Runtime {
            channel: Arc::new(channel),
            unit_shift: config.unit_shift,
        }
    })
}

extern "C" fn finalize_at_exit() {
    rmsprof_final();
}

/// Run `f` on this thread's recorder. Calls made while the thread is being
/// torn down, or re-entrantly from inside a hook, are dropped.
#[inline]
fn with_recorder<R>(f: impl FnOnce(&mut Recorder) -> R) -> Option<R> {
    let rt = runtime();
    RECORDER
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            let recorder = slot
                .get_or_insert_with(|| Recorder::new(Arc::clone(&rt.channel), rt.unit_shift));
            Some(f(recorder))
        })
        .ok()
        .flatten()
}

/// Open the trace channel. Optional; every other hook opens it on first use.
#[unsafe(no_mangle)]
pub extern "C" fn rmsprof_init() {
    runtime();
}

/// A call to `subject_id` begins.
#[unsafe(no_mangle)]
pub extern "C" fn rmsprof_enter(subject_id: u32) {
    with_recorder(|rec| rec.enter(subject_id));
}

/// The call to `subject_id` returns after `cost` units of its own work.
#[unsafe(no_mangle)]
pub extern "C" fn rmsprof_return(subject_id: u32, cost: u64) {
    match with_recorder(|rec| rec.exit(subject_id, cost)) {
        None | Some(Ok(_)) => {}
        // after rmsprof_final nothing more is recorded
        Some(Err(ChannelError::Finalized)) => {}
        Some(Err(e)) => fatal("cannot record call", e),
    }
}

/// The current call touched `length` bytes at `address`.
#[unsafe(no_mangle)]
pub extern "C" fn rmsprof_memory_access(address: u64, length: u64) {
    with_recorder(|rec| rec.memory_access(address, length));
}

/// Add `length` input units that do not correspond to memory the program
/// touches (e.g. bytes read by an I/O call) to the current call.
#[unsafe(no_mangle)]
pub extern "C" fn rmsprof_increment_rms(length: u64) {
    with_recorder(|rec| rec.increment_rms(length));
}

/// Terminate and close the trace log. Safe to call more than once.
#[unsafe(no_mangle)]
pub extern "C" fn rmsprof_final() {
    let Some(rt) = RUNTIME.get() else {
        return;
    };
    match rt.channel.finalize() {
        Ok(_) | Err(ChannelError::Finalized) => {}
        Err(e) => fatal("cannot finalize trace log", e),
    }
}

/// Finalizes the process-wide trace log when dropped.
///
/// For Rust programs that call the hooks directly:
///
/// ```rust,no_run
/// let _trace = rmsprof_trace::install();
/// rmsprof_trace::hooks::rmsprof_enter(1);
/// rmsprof_trace::hooks::rmsprof_return(1, 10);
/// ```
#[must_use = "the trace log is finalized when the guard is dropped"]
pub struct TraceGuard {
    _private: (),
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        rmsprof_final();
    }
}

/// Open the process-wide trace log and return a guard that finalizes it.
pub fn install() -> TraceGuard {
    rmsprof_init();
    TraceGuard { _private: () }
}
