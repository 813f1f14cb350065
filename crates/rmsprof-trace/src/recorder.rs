//! Per-thread shadow stack turning enter/access/return hooks into records.

use crate::channel::{ChannelError, TraceChannel};
use crate::event::TraceEvent;
use crate::footprint::FootprintTracker;
use std::sync::Arc;

/// One in-flight call.
#[derive(Debug)]
struct Frame {
    subject_id: u32,
    timestamp: u32,
    /// Explicit increments, own and inherited from returned callees
    extra_rms: i64,
    /// Cost inherited from returned callees
    cost: u64,
    /// Units touched by this call and every callee that has returned
    tracker: FootprintTracker,
}

/// Shadow stack of one thread of the instrumented program.
///
/// Each frame owns its own [`FootprintTracker`]. When a call returns, its
/// record is committed to the channel, its touched units are merged into the
/// caller's tracker and its cost is added to the caller's, so a record
/// carries the inclusive totals of its call. A unit touched by both a caller
/// and a callee, or by two callees, counts once.
pub struct Recorder {
    channel: Arc<TraceChannel>,
    unit_shift: u32,
    stack: Vec<Frame>,
    /// Reset trackers kept for reuse by later frames
    spare: Vec<FootprintTracker>,
}

impl Recorder {
    pub fn new(channel: Arc<TraceChannel>, unit_shift: u32) -> Self {
        Self {
            channel,
            unit_shift,
            stack: Vec::new(),
            spare: Vec::new(),
        }
    }

    pub fn channel(&self) -> &Arc<TraceChannel> {
        &self.channel
    }

    /// Number of calls currently open on this thread.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// A call to `subject_id` starts.
    #[inline]
    pub fn enter(&mut self, subject_id: u32) {
        let tracker = self
            .spare
            .pop()
            .unwrap_or_else(|| FootprintTracker::new(self.unit_shift));
        self.stack.push(Frame {
            subject_id,
            timestamp: self.channel.next_timestamp(),
            extra_rms: 0,
            cost: 0,
            tracker,
        });
    }

    /// The current call touched `[address, address + length)`. Accesses
    /// outside any call are not attributed.
    #[inline]
    pub fn memory_access(&mut self, address: u64, length: u64) {
        if let Some(frame) = self.stack.last_mut() {
            frame.tracker.insert_and_count(address, length);
        }
    }

    /// Add `length` opaque input units (e.g. bytes read by an I/O call) to the
    /// current call's footprint.
    #[inline]
    pub fn increment_rms(&mut self, length: u64) {
        if let Some(frame) = self.stack.last_mut() {
            let length = i64::try_from(length).unwrap_or(i64::MAX);
            frame.extra_rms = frame.extra_rms.saturating_add(length);
        }
    }

    /// The call to `subject_id` returns after spending `cost` units in its
    /// own body. Commits and returns its record.
    ///
    /// Frames opened above the matching one (calls left by unwinding or a
    /// non-local jump) are committed first with no cost of their own. A
    /// return with no matching frame is recorded on its own with an empty
    /// footprint.
    pub fn exit(&mut self, subject_id: u32, cost: u64) -> Result<TraceEvent, ChannelError> {
        let Some(pos) = self.stack.iter().rposition(|f| f.subject_id == subject_id) else {
            let event = TraceEvent::new(subject_id, self.channel.next_timestamp(), 0, cost);
            self.channel.record_event(&event)?;
            return Ok(event);
        };

        while self.stack.len() > pos + 1 {
            self.pop_and_commit(0)?;
        }
        self.pop_and_commit(cost)
    }

    fn pop_and_commit(&mut self, own_cost: u64) -> Result<TraceEvent, ChannelError> {
        let Some(mut frame) = self.stack.pop() else {
            unreachable!("pop_and_commit called on an empty stack");
        };

        let distinct = i64::try_from(frame.tracker.distinct_count()).unwrap_or(i64::MAX);
        let rms = frame.extra_rms.saturating_add(distinct);
        let cost = frame.cost.saturating_add(own_cost);
        let event = TraceEvent::new(frame.subject_id, frame.timestamp, rms, cost);

        if let Some(parent) = self.stack.last_mut() {
            parent.tracker.merge_from(&frame.tracker);
            parent.extra_rms = parent.extra_rms.saturating_add(frame.extra_rms);
            parent.cost = parent.cost.saturating_add(cost);
        }

        frame.tracker.reset();
        self.spare.push(frame.tracker);

        self.channel.record_event(&event)?;
        Ok(event)
    }
}
