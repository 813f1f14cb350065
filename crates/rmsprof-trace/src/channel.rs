//! Trace channel: an append-only log of fixed-size records in a shared,
//! memory-mapped region.
//!
//! The only shared mutable state is the next free slot, guarded by a
//! compare-and-swap spin lock so that the hot path never enters the kernel.
//! Readers only look at the backing store after [`TraceChannel::finalize`],
//! which writes the terminator and truncates the store to the bytes used.

use crate::config::{Backing, TraceConfig};
use crate::event::{RECORD_SIZE, TraceEvent};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;

/// Failed lock attempts before a waiter gives up its time slice.
const SPINS_BEFORE_YIELD: u32 = 256;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Invalid log name {0:?}: contains a NUL byte")]
    InvalidName(String),

    #[error("Failed to {op} {backing}: {source}")]
    Setup {
        op: &'static str,
        backing: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capacity of {capacity} bytes holds fewer than two 24-byte records")]
    CapacityTooSmall { capacity: u64 },

    #[error("Capacity of {capacity} bytes does not fit in the address space")]
    CapacityOverflow { capacity: u64 },

    #[error("Capacity of {capacity} bytes exceeds the {available} bytes available for {backing}")]
    InsufficientStorage {
        backing: String,
        capacity: u64,
        available: u64,
    },

    #[error("Trace log full after {records} records ({capacity} bytes); raise RMSPROF_CAPACITY")]
    CapacityExhausted { records: u64, capacity: u64 },

    #[error("Subject id 0 is reserved for the log terminator")]
    ReservedSubject,

    #[error("Trace channel already finalized")]
    Finalized,

    #[error("Failed to {op} while finalizing {backing}: {source}")]
    Teardown {
        op: &'static str,
        backing: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a successful [`TraceChannel::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeSummary {
    /// Data records written (terminator excluded)
    pub records: u64,
    /// Final size of the backing store
    pub bytes: u64,
    /// Failed lock attempts observed over the channel's lifetime
    pub contended_spins: u64,
}

/// Busy-wait mutual exclusion for the append offset.
struct SpinLock {
    locked: AtomicBool,
    contended: AtomicU64,
}

struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinLock {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            contended: AtomicU64::new(0),
        }
    }

    #[inline]
    fn lock(&self) -> SpinGuard<'_> {
        let mut spins = 0u32;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins = spins.wrapping_add(1);
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                core::hint::spin_loop();
            }
        }
        if spins > 0 {
            self.contended.fetch_add(u64::from(spins), Ordering::Relaxed);
        }
        SpinGuard { lock: self }
    }
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Shared append-only trace log.
pub struct TraceChannel {
    base: *mut u8,
    map_len: usize,
    fd: libc::c_int,
    backing: Backing,
    capacity: u64,
    /// Slots in the mapping, terminator slot included
    slots: u64,
    next_slot: AtomicU64,
    clock: AtomicU32,
    lock: SpinLock,
    finalized: AtomicBool,
}

// Safety: `base` is only written under `lock`, and never after `finalized`
// is set (which also happens under `lock`).
unsafe impl Send for TraceChannel {}
unsafe impl Sync for TraceChannel {}

impl TraceChannel {
    /// Create the backing store, size it to the configured capacity and map
    /// it. Any existing log of the same name is replaced.
    pub fn open(config: &TraceConfig) -> Result<Self, ChannelError> {
        let capacity = config.capacity;
        let slots = config.capacity_records();
        if slots < 2 {
            return Err(ChannelError::CapacityTooSmall { capacity });
        }
        let map_len = usize::try_from(slots * RECORD_SIZE as u64)
            .map_err(|_| ChannelError::CapacityOverflow { capacity })?;

        let backing = config.backing.clone();
        let fd = open_backing(&backing)?;

        let setup = || -> Result<*mut u8, ChannelError> {
            let available = available_bytes(fd, &backing)?;
            if map_len as u64 > available {
                return Err(ChannelError::InsufficientStorage {
                    backing: backing.to_string(),
                    capacity,
                    available,
                });
            }

            unsafe {
                if libc::ftruncate(fd, map_len as libc::off_t) < 0 {
                    return Err(setup_error("size", &backing));
                }

                let ptr = libc::mmap(
                    std::ptr::null_mut(),
                    map_len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_NORESERVE,
                    fd,
                    0,
                );
                if ptr == libc::MAP_FAILED {
                    return Err(setup_error("map", &backing));
                }
                Ok(ptr as *mut u8)
            }
        };

        let base = match setup() {
            Ok(base) => base,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(%backing, capacity, slots, "trace channel opened");

        Ok(TraceChannel {
            base,
            map_len,
            fd,
            backing,
            capacity,
            slots,
            next_slot: AtomicU64::new(0),
            clock: AtomicU32::new(1),
            lock: SpinLock::new(),
            finalized: AtomicBool::new(false),
        })
    }

    /// Append one record and return the slot it was written to.
    #[inline]
    pub fn record_event(&self, event: &TraceEvent) -> Result<u64, ChannelError> {
        if event.is_terminator() {
            return Err(ChannelError::ReservedSubject);
        }

        let _guard = self.lock.lock();
        if self.finalized.load(Ordering::Relaxed) {
            return Err(ChannelError::Finalized);
        }
        let slot = self.next_slot.load(Ordering::Relaxed);
        // last slot stays free for the terminator
        if slot + 1 >= self.slots {
            return Err(ChannelError::CapacityExhausted {
                records: slot,
                capacity: self.capacity,
            });
        }
        unsafe { self.write_slot(slot, *event) };
        self.next_slot.store(slot + 1, Ordering::Relaxed);
        Ok(slot)
    }

    /// Next value of the process-wide call sequence. Starts at 1 and wraps
    /// after `u32::MAX` calls.
    #[inline]
    pub fn next_timestamp(&self) -> u32 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Records appended so far.
    pub fn len(&self) -> u64 {
        self.next_slot.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data records the log can hold (terminator slot excluded).
    pub fn capacity_records(&self) -> u64 {
        self.slots - 1
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Write the terminator, release the mapping and truncate the backing
    /// store to `(records + 1) * RECORD_SIZE` bytes. Only the first call does
    /// any work; later calls return [`ChannelError::Finalized`].
    pub fn finalize(&self) -> Result<FinalizeSummary, ChannelError> {
        let _guard = self.lock.lock();
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::Finalized);
        }

        let records = self.next_slot.load(Ordering::Relaxed);
        let bytes = (records + 1) * RECORD_SIZE as u64;
        let mut first_error = None;

        unsafe {
            self.write_slot(records, TraceEvent::terminator());

            if libc::munmap(self.base as *mut libc::c_void, self.map_len) < 0 && first_error.is_none() {
                first_error = Some(self.teardown_error("unmap"));
            }
            if libc::ftruncate(self.fd, bytes as libc::off_t) < 0 && first_error.is_none() {
                first_error = Some(self.teardown_error("truncate"));
            }
            if libc::close(self.fd) < 0 && first_error.is_none() {
                first_error = Some(self.teardown_error("close"));
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let contended_spins = self.lock.contended.load(Ordering::Relaxed);
        tracing::info!(
            backing = %self.backing,
            records,
            bytes,
            contended_spins,
            "trace channel finalized"
        );

        Ok(FinalizeSummary {
            records,
            bytes,
            contended_spins,
        })
    }

    /// # Safety
    ///
    /// Caller holds `lock`, the mapping is still live and `slot < slots`.
    #[inline]
    unsafe fn write_slot(&self, slot: u64, event: TraceEvent) {
        unsafe {
            let dst = self.base.add(slot as usize * RECORD_SIZE) as *mut TraceEvent;
            std::ptr::write(dst, event);
        }
    }

    fn teardown_error(&self, op: &'static str) -> ChannelError {
        ChannelError::Teardown {
            op,
            backing: self.backing.to_string(),
            source: std::io::Error::last_os_error(),
        }
    }
}

impl Drop for TraceChannel {
    fn drop(&mut self) {
        if self.is_finalized() {
            return;
        }
        if let Err(e) = self.finalize() {
            tracing::error!(backing = %self.backing, "failed to finalize trace channel on drop: {e}");
        }
    }
}

fn setup_error(op: &'static str, backing: &Backing) -> ChannelError {
    ChannelError::Setup {
        op,
        backing: backing.to_string(),
        source: std::io::Error::last_os_error(),
    }
}

/// Create a fresh, empty backing store and return its descriptor.
fn open_backing(backing: &Backing) -> Result<libc::c_int, ChannelError> {
    let fd = match backing {
        Backing::File(path) => {
            let c_path = CString::new(path.as_os_str().as_bytes())
                .map_err(|_| ChannelError::InvalidName(path.display().to_string()))?;
            unsafe {
                libc::open(
                    c_path.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                    0o644 as libc::c_uint,
                )
            }
        }
        Backing::SharedMemory(name) => {
            let c_name =
                CString::new(name.as_str()).map_err(|_| ChannelError::InvalidName(name.clone()))?;
            unsafe {
                // Remove a stale object from a previous run, then insist on
                // creating our own.
                libc::shm_unlink(c_name.as_ptr());
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                    0o600 as libc::mode_t,
                )
            }
        }
    };

    if fd < 0 {
        return Err(setup_error("create", backing));
    }
    Ok(fd)
}

/// Free bytes on the filesystem holding `fd`.
fn available_bytes(fd: libc::c_int, backing: &Backing) -> Result<u64, ChannelError> {
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::fstatvfs(fd, &mut stat) < 0 {
            return Err(setup_error("stat", backing));
        }
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir, records: u64) -> TraceConfig {
        TraceConfig::default()
            .with_backing(Backing::File(dir.path().join("trace.log")))
            .with_capacity(records * RECORD_SIZE as u64)
    }

    fn read_records(dir: &TempDir) -> Vec<TraceEvent> {
        let bytes = std::fs::read(dir.path().join("trace.log")).unwrap();
        bytes
            .chunks_exact(RECORD_SIZE)
            .map(|chunk| TraceEvent::from_bytes(chunk).unwrap())
            .take_while(|event| !event.is_terminator())
            .collect()
    }

    #[test]
    fn test_finalize_truncates_to_used_records() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 1024)).unwrap();

        for i in 1..=5u32 {
            let slot = channel
                .record_event(&TraceEvent::new(i, i, i as i64, 10 * i as u64))
                .unwrap();
            assert_eq!(slot, (i - 1) as u64);
        }

        let summary = channel.finalize().unwrap();
        assert_eq!(summary.records, 5);
        assert_eq!(summary.bytes, 6 * RECORD_SIZE as u64);

        let len = std::fs::metadata(dir.path().join("trace.log")).unwrap().len();
        assert_eq!(len, 6 * RECORD_SIZE as u64);

        let records = read_records(&dir);
        assert_eq!(records.len(), 5);
        assert_eq!(records[2], TraceEvent::new(3, 3, 3, 30));
    }

    #[test]
    fn test_empty_log_holds_only_terminator() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 16)).unwrap();
        channel.finalize().unwrap();

        let bytes = std::fs::read(dir.path().join("trace.log")).unwrap();
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert!(TraceEvent::from_bytes(&bytes).unwrap().is_terminator());
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        const THREADS: u32 = 8;
        const PER_THREAD: u64 = 5_000;

        let dir = TempDir::new().unwrap();
        let total = THREADS as u64 * PER_THREAD;
        let channel = Arc::new(TraceChannel::open(&file_config(&dir, total + 1)).unwrap());

        let handles: Vec<_> = (1..=THREADS)
            .map(|subject| {
                let channel = Arc::clone(&channel);
                std::thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|seq| {
                            let ts = channel.next_timestamp();
                            channel
                                .record_event(&TraceEvent::new(subject, ts, 0, seq))
                                .unwrap()
                        })
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut slots = HashSet::new();
        for handle in handles {
            for slot in handle.join().unwrap() {
                assert!(slots.insert(slot), "slot {slot} handed out twice");
            }
        }
        assert_eq!(slots.len() as u64, total);
        assert_eq!(channel.len(), total);

        let summary = channel.finalize().unwrap();
        assert_eq!(summary.bytes, (total + 1) * RECORD_SIZE as u64);

        let records = read_records(&dir);
        assert_eq!(records.len() as u64, total);

        let mut timestamps = HashSet::new();
        for subject in 1..=THREADS {
            let mut seqs: Vec<u64> = records
                .iter()
                .filter(|r| r.subject_id == subject)
                .map(|r| r.cost)
                .collect();
            // per-thread order is preserved
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
            seqs.dedup();
            assert_eq!(seqs.len() as u64, PER_THREAD);
        }
        for record in &records {
            assert!(timestamps.insert(record.timestamp));
        }
    }

    #[test]
    fn test_capacity_exhaustion_is_reported() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 4)).unwrap();
        assert_eq!(channel.capacity_records(), 3);

        for i in 1..=3 {
            channel.record_event(&TraceEvent::new(i, i, 0, 0)).unwrap();
        }
        let err = channel
            .record_event(&TraceEvent::new(9, 9, 0, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::CapacityExhausted { records: 3, .. }
        ));

        let summary = channel.finalize().unwrap();
        assert_eq!(summary.bytes, 4 * RECORD_SIZE as u64);
    }

    #[test]
    fn test_capacity_must_hold_a_record_and_terminator() {
        let dir = TempDir::new().unwrap();
        let err = TraceChannel::open(&file_config(&dir, 1)).err().unwrap();
        assert!(matches!(err, ChannelError::CapacityTooSmall { .. }));
    }

    #[test]
    fn test_capacity_beyond_free_space_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, 1).with_capacity(u64::MAX / 2);
        let err = TraceChannel::open(&config).err().unwrap();
        assert!(matches!(
            err,
            ChannelError::InsufficientStorage { .. } | ChannelError::CapacityOverflow { .. }
        ));
    }

    #[test]
    fn test_missing_directory_fails_setup() {
        let dir = TempDir::new().unwrap();
        let config = TraceConfig::default()
            .with_backing(Backing::File(dir.path().join("missing/trace.log")))
            .with_capacity(64 * RECORD_SIZE as u64);
        let err = TraceChannel::open(&config).err().unwrap();
        assert!(matches!(err, ChannelError::Setup { op: "create", .. }));
    }

    #[test]
    fn test_finalize_runs_once() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 8)).unwrap();
        channel.finalize().unwrap();
        assert!(matches!(channel.finalize(), Err(ChannelError::Finalized)));
        assert!(matches!(
            channel.record_event(&TraceEvent::new(1, 1, 0, 0)),
            Err(ChannelError::Finalized)
        ));
    }

    #[test]
    fn test_terminator_cannot_be_recorded() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 8)).unwrap();
        assert!(matches!(
            channel.record_event(&TraceEvent::terminator()),
            Err(ChannelError::ReservedSubject)
        ));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_drop_finalizes() {
        let dir = TempDir::new().unwrap();
        {
            let channel = TraceChannel::open(&file_config(&dir, 64)).unwrap();
            channel.record_event(&TraceEvent::new(1, 1, 1, 1)).unwrap();
            channel.record_event(&TraceEvent::new(2, 2, 2, 2)).unwrap();
        }
        let len = std::fs::metadata(dir.path().join("trace.log")).unwrap().len();
        assert_eq!(len, 3 * RECORD_SIZE as u64);
        assert_eq!(read_records(&dir).len(), 2);
    }

    #[test]
    fn test_reopen_replaces_previous_log() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 64)).unwrap();
        channel.record_event(&TraceEvent::new(1, 1, 1, 1)).unwrap();
        channel.finalize().unwrap();

        let channel = TraceChannel::open(&file_config(&dir, 64)).unwrap();
        channel.finalize().unwrap();
        assert!(read_records(&dir).is_empty());
    }

    #[test]
    fn test_timestamps_increase() {
        let dir = TempDir::new().unwrap();
        let channel = TraceChannel::open(&file_config(&dir, 8)).unwrap();
        let a = channel.next_timestamp();
        let b = channel.next_timestamp();
        assert_eq!(a, 1);
        assert!(b > a);
    }
}
