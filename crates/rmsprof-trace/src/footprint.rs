//! Footprint tracker: a sparse four-level trie over the address space that
//! counts distinct memory units touched during one measurement scope.
//!
//! An address is first reduced to a unit index (`address >> unit_shift`),
//! which is then split into four fields:
//!
//! ```text
//!  47                                                       0
//! | top (12 - shift) | mid (12) | mid (12) | leaf (12) | unit |
//! ```
//!
//! The root is an array of `1 << top_bits` child slots, each mid level an
//! array of 4096 slots, and a leaf a 4096-bit presence bitmap. Nodes live in
//! two arenas and refer to each other by index, so a tracker can be reset or
//! dropped without walking pointers. Only paths that are actually visited
//! allocate.

/// Width of the tracked virtual address space (x86-64 / AArch64 user space).
pub const ADDRESS_BITS: u32 = 48;

/// Largest supported granularity: one unit per 4 KiB page.
pub const MAX_UNIT_SHIFT: u32 = 12;

/// Default granularity: one unit per 8-byte word.
pub const DEFAULT_UNIT_SHIFT: u32 = 3;

const MID_BITS: u32 = 12;
const LEAF_BITS: u32 = 12;
const MID_SLOTS: usize = 1 << MID_BITS;
const MID_MASK: u64 = (1 << MID_BITS) - 1;
const LEAF_MASK: u64 = (1 << LEAF_BITS) - 1;
const LEAF_WORDS: usize = (1 << LEAF_BITS) / 64;

const ROOT: u32 = 0;
const NO_CHILD: u32 = u32::MAX;

/// Sparse distinct-unit counter, owned by exactly one scope.
#[derive(Debug, Clone)]
pub struct FootprintTracker {
    unit_shift: u32,
    top_bits: u32,
    /// Interior nodes; index 0 is the root.
    interior: Vec<Box<[u32]>>,
    /// Leaf bitmaps.
    leaves: Vec<Box<[u64]>>,
    /// Page of each leaf, parallel to `leaves`.
    leaf_pages: Vec<u64>,
    count: u64,
    /// Last leaf looked up, keyed by page (unit index without leaf bits).
    last_leaf: Option<(u64, u32)>,
}

impl Default for FootprintTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_SHIFT)
    }
}

impl FootprintTracker {
    /// Create an empty tracker with one unit per `1 << unit_shift` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `unit_shift > MAX_UNIT_SHIFT`.
    pub fn new(unit_shift: u32) -> Self {
        assert!(
            unit_shift <= MAX_UNIT_SHIFT,
            "unit shift {unit_shift} exceeds {MAX_UNIT_SHIFT}"
        );
        let top_bits = ADDRESS_BITS - unit_shift - 2 * MID_BITS - LEAF_BITS;
        Self {
            unit_shift,
            top_bits,
            interior: vec![empty_interior(1 << top_bits)],
            leaves: Vec::new(),
            leaf_pages: Vec::new(),
            count: 0,
            last_leaf: None,
        }
    }

    /// Mark `[address, address + weight)` as touched and return the number of
    /// distinct units touched so far in this scope.
    ///
    /// A zero `weight` touches nothing and returns the current count.
    ///
    /// # Panics
    ///
    /// The last byte of the range must lie below `1 << ADDRESS_BITS`. A wider
    /// address means the platform's pointer layout does not match the trie
    /// split, which the caller has to rule out up front.
    pub fn insert_and_count(&mut self, address: u64, weight: u64) -> u64 {
        if weight == 0 {
            return self.count;
        }
        let last = address.saturating_add(weight - 1);
        assert!(
            last >> ADDRESS_BITS == 0,
            "address {last:#x} is outside the {ADDRESS_BITS}-bit tracked address space"
        );
        self.mark_units(address >> self.unit_shift, last >> self.unit_shift);
        self.count
    }

    /// Whether the unit containing `address` has been touched.
    pub fn contains(&self, address: u64) -> bool {
        if address >> ADDRESS_BITS != 0 {
            return false;
        }
        let unit = address >> self.unit_shift;
        let Some(leaf) = self.find_leaf(unit >> LEAF_BITS) else {
            return false;
        };
        let bit = (unit & LEAF_MASK) as usize;
        self.leaves[leaf as usize][bit / 64] & (1 << (bit % 64)) != 0
    }

    /// Distinct units touched since creation or the last reset.
    #[inline]
    pub fn distinct_count(&self) -> u64 {
        self.count
    }

    /// Add every unit touched in `other` and return how many were new.
    ///
    /// # Panics
    ///
    /// Panics if the two trackers use different unit sizes.
    pub fn merge_from(&mut self, other: &FootprintTracker) -> u64 {
        assert_eq!(
            self.unit_shift, other.unit_shift,
            "cannot merge trackers with different unit sizes"
        );
        let before = self.count;
        for (&page, words) in other.leaf_pages.iter().zip(&other.leaves) {
            let leaf = self.leaf_for(page);
            let dst = &mut self.leaves[leaf as usize];
            for (d, &w) in dst.iter_mut().zip(words.iter()) {
                self.count += u64::from((w & !*d).count_ones());
                *d |= w;
            }
        }
        self.count - before
    }

    /// Drop every node except the root. Cost is proportional to the number of
    /// allocated nodes.
    pub fn reset(&mut self) {
        self.interior.truncate(1);
        self.interior[ROOT as usize].fill(NO_CHILD);
        self.leaves.clear();
        self.leaf_pages.clear();
        self.count = 0;
        self.last_leaf = None;
    }

    pub fn unit_shift(&self) -> u32 {
        self.unit_shift
    }

    /// Bytes covered by one unit.
    pub fn unit_size(&self) -> u64 {
        1 << self.unit_shift
    }

    /// Interior nodes currently allocated, root included.
    pub fn interior_nodes(&self) -> usize {
        self.interior.len()
    }

    pub fn leaf_nodes(&self) -> usize {
        self.leaves.len()
    }

    /// Approximate heap footprint of the trie itself.
    pub fn allocated_bytes(&self) -> usize {
        let root = (1usize << self.top_bits) * size_of::<u32>();
        let mids = (self.interior.len() - 1) * MID_SLOTS * size_of::<u32>();
        let leaves = self.leaves.len() * LEAF_WORDS * size_of::<u64>();
        root + mids + leaves
    }

    fn mark_units(&mut self, first_unit: u64, last_unit: u64) {
        let mut unit = first_unit;
        loop {
            let page = unit >> LEAF_BITS;
            let page_end = unit | LEAF_MASK;
            let end = last_unit.min(page_end);

            let leaf = self.leaf_for(page);
            let words = &mut self.leaves[leaf as usize];
            self.count += set_bits(words, (unit & LEAF_MASK) as usize, (end & LEAF_MASK) as usize);

            if end == last_unit {
                break;
            }
            unit = end + 1;
        }
    }

    /// Find the leaf for `page`, allocating the path to it if needed.
    #[inline]
    fn leaf_for(&mut self, page: u64) -> u32 {
        if let Some((cached_page, leaf)) = self.last_leaf
            && cached_page == page
        {
            return leaf;
        }

        let (top, mid1, mid2) = split_page(page);
        let first = self.interior_child(ROOT, top);
        let second = self.interior_child(first, mid1);

        let slot = &mut self.interior[second as usize][mid2];
        let leaf = if *slot == NO_CHILD {
            let idx = self.leaves.len() as u32;
            *slot = idx;
            self.leaves.push(vec![0u64; LEAF_WORDS].into_boxed_slice());
            self.leaf_pages.push(page);
            idx
        } else {
            *slot
        };

        self.last_leaf = Some((page, leaf));
        leaf
    }

    fn interior_child(&mut self, node: u32, slot: usize) -> u32 {
        let child = self.interior[node as usize][slot];
        if child != NO_CHILD {
            return child;
        }
        let idx = self.interior.len() as u32;
        self.interior.push(empty_interior(MID_SLOTS));
        self.interior[node as usize][slot] = idx;
        idx
    }

    fn find_leaf(&self, page: u64) -> Option<u32> {
        let (top, mid1, mid2) = split_page(page);
        let first = self.interior[ROOT as usize][top];
        if first == NO_CHILD {
            return None;
        }
        let second = self.interior[first as usize][mid1];
        if second == NO_CHILD {
            return None;
        }
        let leaf = self.interior[second as usize][mid2];
        (leaf != NO_CHILD).then_some(leaf)
    }
}

fn empty_interior(slots: usize) -> Box<[u32]> {
    vec![NO_CHILD; slots].into_boxed_slice()
}

#[inline]
fn split_page(page: u64) -> (usize, usize, usize) {
    (
        (page >> (2 * MID_BITS)) as usize,
        ((page >> MID_BITS) & MID_MASK) as usize,
        (page & MID_MASK) as usize,
    )
}

/// Set bits `lo..=hi` and return how many were previously clear.
#[inline]
fn set_bits(words: &mut [u64], lo: usize, hi: usize) -> u64 {
    let (first_word, last_word) = (lo / 64, hi / 64);
    let mut added = 0u64;
    for (w, word) in words
        .iter_mut()
        .enumerate()
        .take(last_word + 1)
        .skip(first_word)
    {
        let start = if w == first_word { lo % 64 } else { 0 };
        let end = if w == last_word { hi % 64 } else { 63 };
        let mask = (u64::MAX >> (63 - (end - start))) << start;
        added += u64::from((mask & !*word).count_ones());
        *word |= mask;
    }
    added
}
