use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Worst observed cost per `(subject, rms)`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CostTable {
    costs: BTreeMap<(u32, i64), u64>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `cost` if it is the largest seen for `(subject, rms)`.
    pub fn observe(&mut self, subject_id: u32, rms: i64, cost: u64) {
        match self.costs.entry((subject_id, rms)) {
            Entry::Vacant(slot) => {
                slot.insert(cost);
            }
            Entry::Occupied(mut slot) => {
                if *slot.get() < cost {
                    slot.insert(cost);
                }
            }
        }
    }

    pub fn get(&self, subject_id: u32, rms: i64) -> Option<u64> {
        self.costs.get(&(subject_id, rms)).copied()
    }

    /// `(subject, rms, cost)` triples in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, i64, u64)> + '_ {
        self.costs
            .iter()
            .map(|(&(subject, rms), &cost)| (subject, rms, cost))
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Largest cost of each subject over all footprints.
    pub fn worst_by_subject(&self) -> BTreeMap<u32, u64> {
        let mut worst = BTreeMap::new();
        for (subject, _, cost) in self.iter() {
            let entry = worst.entry(subject).or_insert(cost);
            *entry = (*entry).max(cost);
        }
        worst
    }
}
