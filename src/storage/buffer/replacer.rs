//! LRU-K replacement policy for the buffer pool.
//!
//! The replacer tracks which frames are evictable and, on demand, picks
//! the victim with the largest *backward k-distance*: the time since the
//! k-th most recent access. Frames with fewer than `k` recorded accesses
//! have infinite distance and are preferred as victims, tie-broken by
//! earliest first access (classical LRU).
//!
//! # Representation
//!
//! Valid frames are partitioned into two structures:
//!
//! - a *cold* side for frames with fewer than `k` accesses, ordered by
//!   first-access timestamp; eviction scans it in order for the first
//!   evictable frame, and
//! - a *hot* side for frames with at least `k` accesses: a binary heap
//!   keyed by the k-th most recent access timestamp (the oldest such
//!   timestamp, i.e. the largest k-distance, sits at the root), with a
//!   per-frame position index so updates and removals are `O(log n)`.
//!
//! Because the heap root may be pinned, eviction descends past
//! non-evictable nodes, pruning any subtree that can no longer beat the
//! best evictable frame found so far.

use std::collections::{BTreeMap, VecDeque};

use super::frame::FrameId;

/// How a page is being accessed.
///
/// Carried through `record_access` for policies that distinguish scan
/// traffic from point lookups; the LRU-K policy treats all access types
/// alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// Per-frame access history.
///
/// A node is *valid* from the first recorded access until the frame is
/// evicted or removed. `history` keeps the `k` most recent access
/// timestamps, oldest first; while the frame is cold the front entry is
/// its first access, once hot it is the k-th most recent access.
struct LruKNode {
    history: VecDeque<u64>,
    evictable: bool,
    valid: bool,
    /// Position in the hot heap, `None` while cold.
    heap_pos: Option<usize>,
}

impl LruKNode {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            evictable: false,
            valid: false,
            heap_pos: None,
        }
    }

    /// First access timestamp (cold) or k-th most recent (hot).
    fn front_ts(&self) -> u64 {
        *self.history.front().expect("valid node has history")
    }
}

/// LRU-K replacer over a fixed set of frames.
///
/// All operations are invoked under the buffer pool's state mutex, which
/// serializes them and makes the internal timestamp counter a total
/// order over accesses.
pub struct LruKReplacer {
    nodes: Vec<LruKNode>,

    /// Cold frames ordered by first-access timestamp.
    cold: BTreeMap<u64, FrameId>,

    /// Hot frames; min-heap on the k-th most recent access timestamp,
    /// so the maximum-distance frame is at the root.
    heap: Vec<FrameId>,

    /// Number of valid, evictable frames.
    evictable_count: usize,

    k: usize,
    clock: u64,
}

impl LruKReplacer {
    /// Creates a replacer for `num_frames` frames with history depth `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k` is 0.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            nodes: (0..num_frames).map(|_| LruKNode::new(k)).collect(),
            cold: BTreeMap::new(),
            heap: Vec::new(),
            evictable_count: 0,
            k,
            clock: 0,
        }
    }

    /// Records an access to a frame at the current timestamp.
    ///
    /// A frame without a valid node is initialized (non-evictable) on
    /// its first access. The frame moves from the cold to the hot side
    /// the moment its access count reaches `k`.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range.
    pub fn record_access(&mut self, frame_id: FrameId, _access: AccessType) {
        assert!(frame_id < self.nodes.len(), "invalid frame id {}", frame_id);

        self.clock += 1;
        let ts = self.clock;

        let node = &mut self.nodes[frame_id];
        if !node.valid {
            node.valid = true;
            node.evictable = false;
            node.heap_pos = None;
            node.history.clear();
            node.history.push_back(ts);
            if self.k == 1 {
                self.heap_push(frame_id);
            } else {
                self.cold.insert(ts, frame_id);
            }
            return;
        }

        match node.heap_pos {
            None => {
                // Cold: history only grows; its slot in the cold order is
                // keyed by the unchanged first access.
                node.history.push_back(ts);
                if node.history.len() >= self.k {
                    let first = node.front_ts();
                    self.cold.remove(&first);
                    self.heap_push(frame_id);
                }
            }
            Some(pos) => {
                // Hot: the k-th most recent timestamp advances, so the
                // k-distance shrinks and the node moves away from the root.
                node.history.pop_front();
                node.history.push_back(ts);
                self.sift_down(pos);
            }
        }
    }

    /// Toggles a frame's eviction eligibility.
    ///
    /// A no-op for frames without a valid node.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        assert!(frame_id < self.nodes.len(), "invalid frame id {}", frame_id);

        let node = &mut self.nodes[frame_id];
        if !node.valid || node.evictable == evictable {
            return;
        }
        node.evictable = evictable;
        if evictable {
            self.evictable_count += 1;
        } else {
            self.evictable_count -= 1;
        }
    }

    /// Selects, invalidates, and returns the eviction victim, or `None`
    /// if no frame is evictable. Never blocks.
    pub fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_count == 0 {
            return None;
        }

        // Cold frames all share infinite distance; the earliest first
        // access wins.
        let cold_victim = self
            .cold
            .iter()
            .find(|&(_, &frame_id)| self.nodes[frame_id].evictable)
            .map(|(&ts, &frame_id)| (ts, frame_id));
        if let Some((ts, frame_id)) = cold_victim {
            self.cold.remove(&ts);
            self.invalidate(frame_id);
            return Some(frame_id);
        }

        let frame_id = self.heap_evict()?;
        let pos = self.nodes[frame_id]
            .heap_pos
            .expect("hot victim has a heap position");
        self.heap_remove(pos);
        self.invalidate(frame_id);
        Some(frame_id)
    }

    /// Forcibly drops a frame from the replacer.
    ///
    /// A no-op for frames without a valid node.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range, or if the frame is tracked
    /// but not evictable.
    pub fn remove(&mut self, frame_id: FrameId) {
        assert!(frame_id < self.nodes.len(), "invalid frame id {}", frame_id);

        let node = &self.nodes[frame_id];
        if !node.valid {
            return;
        }
        assert!(
            node.evictable,
            "cannot remove non-evictable frame {}",
            frame_id
        );

        match node.heap_pos {
            Some(pos) => self.heap_remove(pos),
            None => {
                let first = node.front_ts();
                self.cold.remove(&first);
            }
        }
        self.invalidate(frame_id);
    }

    /// Number of valid, evictable frames.
    pub fn size(&self) -> usize {
        self.evictable_count
    }

    fn invalidate(&mut self, frame_id: FrameId) {
        let node = &mut self.nodes[frame_id];
        debug_assert!(node.valid && node.evictable);
        node.valid = false;
        node.evictable = false;
        node.heap_pos = None;
        node.history.clear();
        self.evictable_count -= 1;
    }

    /// Finds the evictable hot frame with the largest k-distance.
    ///
    /// Descends from the root past non-evictable nodes; a child is only
    /// explored while its distance could still beat the best evictable
    /// frame found so far. An evictable node dominates its whole
    /// subtree, so the descent stops there.
    fn heap_evict(&self) -> Option<FrameId> {
        if self.heap.is_empty() {
            return None;
        }

        let mut best: Option<(u64, FrameId)> = None;
        let mut frontier = vec![0usize];
        while let Some(pos) = frontier.pop() {
            let frame_id = self.heap[pos];
            let key = self.nodes[frame_id].front_ts();
            if self.nodes[frame_id].evictable {
                if best.is_none_or(|(best_key, _)| key < best_key) {
                    best = Some((key, frame_id));
                }
                continue;
            }
            for child in [2 * pos + 1, 2 * pos + 2] {
                if child < self.heap.len() {
                    let child_key = self.nodes[self.heap[child]].front_ts();
                    if best.is_none_or(|(best_key, _)| child_key < best_key) {
                        frontier.push(child);
                    }
                }
            }
        }
        best.map(|(_, frame_id)| frame_id)
    }

    fn key_at(&self, pos: usize) -> u64 {
        self.nodes[self.heap[pos]].front_ts()
    }

    fn heap_push(&mut self, frame_id: FrameId) {
        self.nodes[frame_id].heap_pos = Some(self.heap.len());
        self.heap.push(frame_id);
        self.sift_up(self.heap.len() - 1);
    }

    fn heap_remove(&mut self, pos: usize) {
        let last = self.heap.len() - 1;
        self.heap_swap(pos, last);
        let removed = self.heap.pop().expect("heap is non-empty");
        self.nodes[removed].heap_pos = None;
        if pos < self.heap.len() {
            self.sift_down(pos);
            self.sift_up(pos);
        }
    }

    fn heap_swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.nodes[self.heap[a]].heap_pos = Some(a);
        self.nodes[self.heap[b]].heap_pos = Some(b);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.key_at(pos) < self.key_at(parent) {
                self.heap_swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            if left >= self.heap.len() {
                break;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < self.heap.len() && self.key_at(right) < self.key_at(left) {
                smallest = right;
            }
            if self.key_at(smallest) < self.key_at(pos) {
                self.heap_swap(pos, smallest);
                pos = smallest;
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(replacer: &mut LruKReplacer, frames: &[FrameId]) {
        for &frame_id in frames {
            replacer.record_access(frame_id, AccessType::Unknown);
        }
    }

    fn make_evictable(replacer: &mut LruKReplacer, frames: &[FrameId]) {
        for &frame_id in frames {
            replacer.set_evictable(frame_id, true);
        }
    }

    #[test]
    fn test_evict_empty() {
        let mut replacer = LruKReplacer::new(4, 2);
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_infinite_distance_evicted_first() {
        // Accesses A A B C with k=2: A is hot, B and C are cold with
        // infinite distance. B's first access precedes C's, so B goes.
        let mut replacer = LruKReplacer::new(4, 2);
        access(&mut replacer, &[0, 0, 1, 2]);
        make_evictable(&mut replacer, &[0, 1, 2]);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_finite_distance_survives_infinite() {
        // Accesses A B A with k=2: A has a finite distance, B infinite.
        let mut replacer = LruKReplacer::new(2, 2);
        access(&mut replacer, &[0, 1, 0]);
        make_evictable(&mut replacer, &[0, 1]);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_single_cold_frame_tiebreak() {
        // Accesses 0 1 2 0 1 with k=2: frame 2 is the only cold frame.
        let mut replacer = LruKReplacer::new(3, 2);
        access(&mut replacer, &[0, 1, 2, 0, 1]);
        make_evictable(&mut replacer, &[0, 1, 2]);

        assert_eq!(replacer.evict(), Some(2));
        // Among the hot frames, 0's second-most-recent access is older.
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_hot_ordering_by_kth_access() {
        let mut replacer = LruKReplacer::new(3, 2);
        access(&mut replacer, &[0, 1, 1, 0, 2, 2]);
        make_evictable(&mut replacer, &[0, 1, 2]);

        // k-th most recent timestamps: 0 -> 1, 1 -> 2, 2 -> 5.
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn test_evict_descends_past_pinned_root() {
        // With k=1 all frames are hot immediately; frame 0 holds the
        // largest distance at the root but is not evictable.
        let mut replacer = LruKReplacer::new(3, 1);
        access(&mut replacer, &[0, 1, 2]);
        make_evictable(&mut replacer, &[1, 2]);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);

        make_evictable(&mut replacer, &[0]);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_set_evictable_hides_and_restores() {
        let mut replacer = LruKReplacer::new(2, 2);
        access(&mut replacer, &[0, 0, 1, 1]);
        make_evictable(&mut replacer, &[0, 1]);
        assert_eq!(replacer.size(), 2);

        replacer.set_evictable(0, false);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);

        // Restoring re-exposes the frame at its prior distance.
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_set_evictable_unknown_frame_is_noop() {
        let mut replacer = LruKReplacer::new(2, 2);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove() {
        let mut replacer = LruKReplacer::new(3, 2);
        access(&mut replacer, &[0, 0, 1]);
        make_evictable(&mut replacer, &[0, 1]);

        replacer.remove(0); // hot side
        replacer.remove(1); // cold side
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        // Removed frames start fresh on their next access.
        access(&mut replacer, &[0]);
        make_evictable(&mut replacer, &[0]);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    #[should_panic(expected = "cannot remove non-evictable frame")]
    fn test_remove_non_evictable_panics() {
        let mut replacer = LruKReplacer::new(2, 2);
        access(&mut replacer, &[0]);
        replacer.remove(0);
    }

    #[test]
    #[should_panic(expected = "invalid frame id")]
    fn test_record_access_out_of_range_panics() {
        let mut replacer = LruKReplacer::new(2, 2);
        replacer.record_access(2, AccessType::Unknown);
    }

    #[test]
    fn test_reaccess_after_eviction_reinitializes() {
        let mut replacer = LruKReplacer::new(2, 2);
        access(&mut replacer, &[0, 0]);
        make_evictable(&mut replacer, &[0]);
        assert_eq!(replacer.evict(), Some(0));

        // The frame is cold again: a single access leaves it with
        // infinite distance.
        access(&mut replacer, &[0, 1, 1]);
        make_evictable(&mut replacer, &[0, 1]);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_size_tracks_evictable_frames() {
        let mut replacer = LruKReplacer::new(8, 3);
        access(&mut replacer, &[0, 1, 2, 3, 0, 0]);
        assert_eq!(replacer.size(), 0);

        make_evictable(&mut replacer, &[0, 1, 2]);
        assert_eq!(replacer.size(), 3);

        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 2);

        replacer.evict();
        assert_eq!(replacer.size(), 1);
    }
}
