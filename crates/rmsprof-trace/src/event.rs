//! Fixed-size trace record shared by the runtime and the offline reader.

/// Subject id reserved for "no subject"; a record carrying it ends the log.
pub const TERMINATOR_ID: u32 = 0;

/// Size in bytes of one record in the log.
pub const RECORD_SIZE: usize = core::mem::size_of::<TraceEvent>();

/// One call record, committed when the call returns.
///
/// The layout is `#[repr(C)]` and written in native byte order, so a log can
/// only be read on a machine with the same endianness as the one that
/// produced it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceEvent {
    /// Function, call-site or loop id assigned by the instrumentor
    pub subject_id: u32,
    /// Sequence number taken when the call was entered
    pub timestamp: u32,
    /// Distinct-cell footprint of the call
    pub rms: i64,
    /// Accumulated cost units of the call
    pub cost: u64,
}

const _: () = assert!(RECORD_SIZE == 24);

impl TraceEvent {
    pub const fn new(subject_id: u32, timestamp: u32, rms: i64, cost: u64) -> Self {
        Self {
            subject_id,
            timestamp,
            rms,
            cost,
        }
    }

    /// The record that terminates the valid portion of a log.
    pub const fn terminator() -> Self {
        Self::new(TERMINATOR_ID, 0, 0, 0)
    }

    #[inline]
    pub const fn is_terminator(&self) -> bool {
        self.subject_id == TERMINATOR_ID
    }

    /// Encode into the on-disk representation.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.subject_id.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.rms.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.cost.to_ne_bytes());
        buf
    }

    /// Decode one record. Returns `None` if `bytes` is shorter than a record.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let buf: &[u8; RECORD_SIZE] = bytes.get(..RECORD_SIZE)?.try_into().ok()?;
        Some(Self {
            subject_id: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            timestamp: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
            rms: i64::from_ne_bytes(buf[8..16].try_into().ok()?),
            cost: u64::from_ne_bytes(buf[16..24].try_into().ok()?),
        })
    }
}
