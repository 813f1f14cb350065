//! Read-only access to a finalized trace log.
//!
//! The log is memory-mapped and walked one record at a time, so logs much
//! larger than memory can be aggregated; only the pages being read are
//! resident.

use crate::error::{Error, Result};
use memmap2::Mmap;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use rmsprof_trace::config::SHM_PREFIX;
use rmsprof_trace::{RECORD_SIZE, TraceEvent};
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::slice::ChunksExact;

/// Where a log is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    File(PathBuf),
    /// POSIX shared-memory object name, e.g. `/rmsprof`
    SharedMemory(String),
}

impl LogSource {
    /// `shm:/name` selects a shared-memory object; anything else is a path.
    pub fn parse(value: &str) -> Result<Self> {
        match value.strip_prefix(SHM_PREFIX) {
            Some(name) if name.len() > 1 && name.starts_with('/') && !name[1..].contains('/') => {
                Ok(LogSource::SharedMemory(name.to_string()))
            }
            Some(_) => Err(Error::InvalidArgument(format!(
                "shared memory log '{value}' must look like shm:/name"
            ))),
            None if value.is_empty() => {
                Err(Error::InvalidArgument("empty log path".to_string()))
            }
            None => Ok(LogSource::File(PathBuf::from(value))),
        }
    }

    fn open_file(&self) -> Result<File> {
        match self {
            LogSource::File(path) => {
                File::open(path).map_err(|e| Error::from_open(&self.to_string(), e))
            }
            LogSource::SharedMemory(name) => {
                let fd = nix::sys::mman::shm_open(name.as_str(), OFlag::O_RDONLY, Mode::empty())
                    .map_err(|errno| match errno {
                        nix::errno::Errno::ENOENT => Error::LogNotFound(self.to_string()),
                        nix::errno::Errno::EACCES => Error::PermissionDenied(self.to_string()),
                        source => Error::SharedMemory {
                            name: name.clone(),
                            source,
                        },
                    })?;
                Ok(File::from(fd))
            }
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::File(path) => write!(f, "{}", path.display()),
            LogSource::SharedMemory(name) => write!(f, "{SHM_PREFIX}{name}"),
        }
    }
}

impl std::str::FromStr for LogSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LogSource::parse(s)
    }
}

/// A mapped trace log.
pub struct TraceLog {
    source: LogSource,
    // None for an empty backing store, which cannot be mapped
    map: Option<Mmap>,
}

impl TraceLog {
    pub fn open(source: &LogSource) -> Result<Self> {
        let file = source.open_file()?;
        let len = file.metadata()?.len();

        let map = if len == 0 {
            None
        } else {
            // Safety: the log is only read after the writer has finalized it.
            let map = unsafe { Mmap::map(&file)? };
            #[cfg(unix)]
            map.advise(memmap2::Advice::Sequential)?;
            Some(map)
        };

        tracing::debug!(log = %source, bytes = len, "opened trace log");

        Ok(Self {
            source: source.clone(),
            map,
        })
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Size of the backing store in bytes.
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the records up to, not including, the terminator.
    pub fn records(&self) -> Records<'_> {
        Records::new(self.bytes())
    }
}

/// Streaming iterator over the records of a log.
///
/// Ends at the first terminator record, or at the end of the data for a log
/// that was never finalized. A partial record at the very end is skipped
/// with a warning.
pub struct Records<'a> {
    chunks: ChunksExact<'a, u8>,
    terminated: bool,
    done: bool,
}

impl<'a> Records<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            chunks: bytes.chunks_exact(RECORD_SIZE),
            terminated: false,
            done: false,
        }
    }

    /// Whether iteration stopped at a terminator record.
    pub fn saw_terminator(&self) -> bool {
        self.terminated
    }

    /// Length of the partial record at the end of the data. Only meaningful
    /// when no terminator was seen.
    pub fn truncated_bytes(&self) -> usize {
        if self.terminated {
            0
        } else {
            self.chunks.remainder().len()
        }
    }
}

impl Iterator for Records<'_> {
    type Item = TraceEvent;

    fn next(&mut self) -> Option<TraceEvent> {
        if self.done {
            return None;
        }

        let Some(chunk) = self.chunks.next() else {
            self.done = true;
            let partial = self.chunks.remainder().len();
            if partial > 0 {
                tracing::warn!(bytes = partial, "ignoring truncated record at end of log");
            } else {
                tracing::warn!("log has no terminator record; reading to end of data");
            }
            return None;
        };

        let event = TraceEvent::from_bytes(chunk)?;
        if event.is_terminator() {
            self.terminated = true;
            self.done = true;
            return None;
        }
        Some(event)
    }
}
