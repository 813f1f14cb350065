use std::collections::{BTreeMap, BTreeSet};

/// Caller to callee edges, deduplicated and kept in key order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallGraph {
    edges: BTreeMap<u32, BTreeSet<u32>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, caller: u32, callee: u32) {
        self.edges.entry(caller).or_default().insert(callee);
    }

    pub fn callees(&self, caller: u32) -> Option<&BTreeSet<u32>> {
        self.edges.get(&caller)
    }

    pub fn contains_edge(&self, caller: u32, callee: u32) -> bool {
        self.edges
            .get(&caller)
            .is_some_and(|callees| callees.contains(&callee))
    }

    /// Callers in ascending order with their callee sets.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &BTreeSet<u32>)> {
        self.edges.iter().map(|(caller, callees)| (*caller, callees))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn caller_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Transitive closure: every subject reachable from each caller.
    ///
    /// Cycles (recursion) are handled; a subject reaches itself only when it
    /// lies on a cycle.
    pub fn closure(&self) -> CallGraph {
        let mut edges = BTreeMap::new();

        for (&caller, direct) in &self.edges {
            let mut reached = BTreeSet::new();
            let mut worklist: Vec<u32> = direct.iter().copied().collect();

            while let Some(next) = worklist.pop() {
                if !reached.insert(next) {
                    continue;
                }
                if let Some(further) = self.edges.get(&next) {
                    worklist.extend(further.iter().filter(|s| !reached.contains(*s)));
                }
            }

            edges.insert(caller, reached);
        }

        CallGraph { edges }
    }
}
