//! Streaming aggregation of a trace log into a call graph and a cost table.
//!
//! Records arrive in commit order, i.e. in the order calls *returned*, each
//! stamped with the time its call was *entered*. A callee returns before its
//! caller but was entered after it, so a drop in timestamp between adjacent
//! records marks the second record as the caller of the first, and of every
//! record still pending since the last drop:
//!
//! ```text
//! commit order:  C(ts 3)  B(ts 2)  C(ts 4)  A(ts 1)
//! pairs:         3 > 2  -> B calls C
//!                2 < 4  -> B pending
//!                4 > 1  -> A calls C, A calls B
//! ```
//!
//! The record stream carries no explicit call/return tag, so this is a
//! heuristic: exact for well-nested single-threaded traces, approximate
//! otherwise. Malformed input is never rejected.

mod callgraph;
mod cost;
pub mod output;

pub use callgraph::CallGraph;
pub use cost::CostTable;

use crate::log::{Records, TraceLog};
use rmsprof_trace::TraceEvent;

/// Counters describing one aggregation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    /// Records read, terminator excluded
    pub records: u64,
    /// Adjacent pairs whose timestamp dropped, i.e. caller/callee boundaries
    pub out_of_order_pairs: u64,
    /// Bytes of a partial record ignored at the end of the log
    pub truncated_bytes: usize,
    /// Whether the pass ended at a terminator record
    pub terminated: bool,
}

/// Result of a full pass.
#[derive(Debug, Default, Clone)]
pub struct Aggregate {
    pub graph: CallGraph,
    pub costs: CostTable,
    pub stats: AggregateStats,
}

/// Incremental aggregator; feed records in log order, then [`finish`].
///
/// Holds a single record of lookahead plus the ids pending a caller.
///
/// [`finish`]: Aggregator::finish
#[derive(Debug, Default)]
pub struct Aggregator {
    graph: CallGraph,
    costs: CostTable,
    pending: Vec<u32>,
    previous: Option<TraceEvent>,
    stats: AggregateStats,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: TraceEvent) {
        self.stats.records += 1;
        self.costs.observe(event.subject_id, event.rms, event.cost);

        if let Some(previous) = self.previous.replace(event) {
            self.observe_pair(&previous, &event);
        }
    }

    fn observe_pair(&mut self, x: &TraceEvent, y: &TraceEvent) {
        if x.timestamp > y.timestamp {
            self.stats.out_of_order_pairs += 1;
            self.graph.add_edge(y.subject_id, x.subject_id);
            for pending in self.pending.drain(..) {
                self.graph.add_edge(y.subject_id, pending);
            }
        } else {
            self.pending.push(x.subject_id);
        }
    }

    /// Feed every record of `records`, recording how the stream ended.
    pub fn feed_records(&mut self, records: &mut Records<'_>) {
        for event in records.by_ref() {
            self.feed(event);
        }
        self.stats.terminated = records.saw_terminator();
        self.stats.truncated_bytes = records.truncated_bytes();
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    pub fn finish(self) -> Aggregate {
        Aggregate {
            graph: self.graph,
            costs: self.costs,
            stats: self.stats,
        }
    }
}

/// Aggregate a whole log in one streaming pass.
pub fn aggregate_log(log: &TraceLog) -> Aggregate {
    let mut aggregator = Aggregator::new();
    aggregator.feed_records(&mut log.records());

    let stats = aggregator.stats();
    tracing::info!(
        log = %log.source(),
        records = stats.records,
        boundaries = stats.out_of_order_pairs,
        terminated = stats.terminated,
        "aggregated trace log"
    );

    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 1;
    const B: u32 = 2;
    const C: u32 = 3;

    fn run(events: &[TraceEvent]) -> Aggregate {
        let bytes: Vec<u8> = events.iter().flat_map(|e| e.to_bytes()).collect();
        let mut aggregator = Aggregator::new();
        aggregator.feed_records(&mut Records::new(&bytes));
        aggregator.finish()
    }

    #[test]
    fn test_nested_calls_in_commit_order() {
        // A { B { C } C }
        let result = run(&[
            TraceEvent::new(C, 3, 1, 5),
            TraceEvent::new(B, 2, 3, 15),
            TraceEvent::new(C, 4, 3, 7),
            TraceEvent::new(A, 1, 7, 23),
            TraceEvent::terminator(),
        ]);

        assert!(result.graph.contains_edge(A, B));
        assert!(result.graph.contains_edge(A, C));
        assert!(result.graph.contains_edge(B, C));
        assert_eq!(result.graph.edge_count(), 3);
        assert_eq!(result.stats.records, 4);
        assert_eq!(result.stats.out_of_order_pairs, 2);
        assert!(result.stats.terminated);
    }

    #[test]
    fn test_chain_edges_and_closure() {
        // A { B { C } }
        let result = run(&[
            TraceEvent::new(C, 3, 1, 1),
            TraceEvent::new(B, 2, 2, 2),
            TraceEvent::new(A, 1, 3, 3),
            TraceEvent::terminator(),
        ]);
        assert!(result.graph.contains_edge(A, B));
        assert!(result.graph.contains_edge(B, C));
        assert!(!result.graph.contains_edge(A, C));

        let full = result.graph.closure();
        assert!(full.contains_edge(A, B));
        assert!(full.contains_edge(A, C));
        assert!(full.contains_edge(B, C));
    }

    #[test]
    fn test_pending_siblings_attach_to_next_caller() {
        // A { B C D }
        let result = run(&[
            TraceEvent::new(B, 2, 1, 1),
            TraceEvent::new(C, 3, 1, 1),
            TraceEvent::new(4, 4, 1, 1),
            TraceEvent::new(A, 1, 3, 3),
        ]);
        let callees: Vec<u32> = result.graph.callees(A).unwrap().iter().copied().collect();
        assert_eq!(callees, vec![B, C, 4]);
        assert_eq!(result.graph.caller_count(), 1);
        assert!(!result.stats.terminated);
    }

    #[test]
    fn test_increasing_timestamps_give_no_edges() {
        let result = run(&[
            TraceEvent::new(A, 0, 0, 0),
            TraceEvent::new(B, 1, 0, 0),
            TraceEvent::new(C, 2, 0, 0),
            TraceEvent::new(C, 3, 0, 0),
            TraceEvent::new(B, 4, 0, 0),
            TraceEvent::new(A, 5, 0, 0),
            TraceEvent::terminator(),
        ]);
        assert!(result.graph.is_empty());
        assert_eq!(result.costs.len(), 3);
    }

    #[test]
    fn test_terminator_ends_traversal() {
        let result = run(&[
            TraceEvent::new(C, 3, 1, 1),
            TraceEvent::new(B, 2, 1, 1),
            TraceEvent::terminator(),
            TraceEvent::new(A, 1, 9, 9),
        ]);
        assert!(result.graph.contains_edge(B, C));
        assert!(result.graph.callees(A).is_none());
        assert_eq!(result.costs.get(A, 9), None);
        assert_eq!(result.stats.records, 2);
    }

    #[test]
    fn test_cost_table_keeps_worst_cost() {
        let result = run(&[
            TraceEvent::new(5, 1, 10, 100),
            TraceEvent::new(5, 2, 10, 250),
            TraceEvent::terminator(),
        ]);
        assert_eq!(result.costs.get(5, 10), Some(250));
        assert_eq!(result.costs.len(), 1);
    }

    #[test]
    fn test_terminator_only_log_is_empty() {
        let result = run(&[TraceEvent::terminator()]);
        assert!(result.graph.is_empty());
        assert!(result.costs.is_empty());
        assert_eq!(result.stats.records, 0);
        assert!(result.stats.terminated);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let mut bytes: Vec<u8> = [TraceEvent::new(C, 2, 1, 1), TraceEvent::new(B, 1, 1, 1)]
            .iter()
            .flat_map(|e| e.to_bytes())
            .collect();
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut aggregator = Aggregator::new();
        aggregator.feed_records(&mut Records::new(&bytes));
        let result = aggregator.finish();
        assert!(result.graph.contains_edge(B, C));
        assert_eq!(result.stats.truncated_bytes, 3);
        assert!(!result.stats.terminated);
    }
}
