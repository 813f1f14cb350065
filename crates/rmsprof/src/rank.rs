//! Ranking of subjects for `rmsprof top`.

use crate::aggregate::{CallGraph, CostTable};

/// One ranked subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankEntry {
    pub subject_id: u32,
    /// Largest cost observed for this subject
    pub worst_cost: u64,
    /// Footprint at which the worst cost was observed (smallest if tied)
    pub worst_rms: i64,
    /// Number of distinct footprints recorded
    pub footprints: usize,
}

/// Rank subjects by worst cost, callees first.
///
/// Subjects are sorted by descending worst cost, then each is moved in front
/// of the first already-placed subject that transitively calls it, so that
/// expensive leaves are reported before the callers whose cost they explain.
pub fn rank(costs: &CostTable, graph: &CallGraph) -> Vec<RankEntry> {
    let mut by_cost = summarize(costs);
    by_cost.sort_by(|a, b| {
        b.worst_cost
            .cmp(&a.worst_cost)
            .then(a.subject_id.cmp(&b.subject_id))
    });

    let reach = graph.closure();
    let mut ranked: Vec<RankEntry> = Vec::with_capacity(by_cost.len());

    for entry in by_cost {
        let caller_pos = ranked
            .iter()
            .position(|placed| reach.contains_edge(placed.subject_id, entry.subject_id));
        match caller_pos {
            Some(pos) => ranked.insert(pos, entry),
            None => ranked.push(entry),
        }
    }

    ranked
}

fn summarize(costs: &CostTable) -> Vec<RankEntry> {
    let mut entries: Vec<RankEntry> = Vec::new();

    // iter() is ordered by subject, so a subject's rows are contiguous
    for (subject_id, rms, cost) in costs.iter() {
        match entries.last_mut() {
            Some(last) if last.subject_id == subject_id => {
                last.footprints += 1;
                if cost > last.worst_cost {
                    last.worst_cost = cost;
                    last.worst_rms = rms;
                }
            }
            _ => entries.push(RankEntry {
                subject_id,
                worst_cost: cost,
                worst_rms: rms,
                footprints: 1,
            }),
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ranked: &[RankEntry]) -> Vec<u32> {
        ranked.iter().map(|e| e.subject_id).collect()
    }

    #[test]
    fn test_sorted_by_worst_cost_without_calls() {
        let mut costs = CostTable::new();
        costs.observe(1, 10, 5);
        costs.observe(2, 10, 50);
        costs.observe(2, 20, 500);
        costs.observe(3, 1, 50);
        let ranked = rank(&costs, &CallGraph::new());
        assert_eq!(ids(&ranked), vec![2, 3, 1]);
        assert_eq!(ranked[0].worst_rms, 20);
        assert_eq!(ranked[0].footprints, 2);
    }

    #[test]
    fn test_callees_precede_transitive_callers() {
        let mut costs = CostTable::new();
        costs.observe(1, 1, 100); // main
        costs.observe(2, 1, 80); // parse
        costs.observe(3, 1, 60); // lex, called by parse
        costs.observe(4, 1, 70); // unrelated

        let mut graph = CallGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);

        let ranked = rank(&costs, &graph);
        assert_eq!(ids(&ranked), vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_empty() {
        assert!(rank(&CostTable::new(), &CallGraph::new()).is_empty());
    }
}
