//! Consolidation policies: `list of segment_meta -> subset to merge`.
//! Ships two reference policies — `ConsolidateAllPolicy`, used by the
//! ingestion binary's `--consolidate-all` flag, and
//! `TierConsolidationPolicy`, a size-tiered policy that merges the
//! smallest segments together first, the common strategy in
//! log-structured stores.

use crate::segment_meta::SegmentMeta;

pub trait ConsolidationPolicy: Send + Sync {
    /// Given the manifest's current live segments (already filtered down
    /// to ones not already part of an in-flight consolidation by the
    /// index writer), returns the subset to merge. A result of 0 or 1
    /// segments means "nothing to do this iteration".
    fn select(&self, segments: &[SegmentMeta]) -> Vec<SegmentMeta>;
}

/// Never merges anything; useful for tests and for callers that want to
/// drive consolidation manually rather than on a background loop.
pub struct NeverConsolidate;

impl ConsolidationPolicy for NeverConsolidate {
    fn select(&self, _segments: &[SegmentMeta]) -> Vec<SegmentMeta> {
        Vec::new()
    }
}

/// Merges every live segment whenever there's more than one, matching the
/// CLI's `--consolidate-all true` mode.
pub struct ConsolidateAllPolicy;

impl ConsolidationPolicy for ConsolidateAllPolicy {
    fn select(&self, segments: &[SegmentMeta]) -> Vec<SegmentMeta> {
        if segments.len() < 2 {
            return Vec::new();
        }
        segments.to_vec()
    }
}

/// Merges the `segments_per_merge` smallest (by document count) segments
/// together, once there are at least `min_segments` live segments —
/// a minimal size-tiered policy in the spirit of the consolidation
/// strategies the CLI's `--consolidate-all`-less default path would
/// otherwise need.
pub struct TierConsolidationPolicy {
    pub min_segments: usize,
    pub segments_per_merge: usize,
}

impl Default for TierConsolidationPolicy {
    fn default() -> Self {
        TierConsolidationPolicy {
            min_segments: 2,
            segments_per_merge: 4,
        }
    }
}

impl ConsolidationPolicy for TierConsolidationPolicy {
    fn select(&self, segments: &[SegmentMeta]) -> Vec<SegmentMeta> {
        if segments.len() < self.min_segments || segments.len() < 2 {
            return Vec::new();
        }
        // Order by ascending doc_count using a max-heap over the negated
        // key, so the smallest segments bubble to the heap's root.
        let heap: std::collections::BinaryHeap<std::cmp::Reverse<(u64, usize)>> = segments
            .iter()
            .enumerate()
            .map(|(i, s)| std::cmp::Reverse((s.doc_count, i)))
            .collect();
        let k = self.segments_per_merge.min(segments.len());
        let mut selected_indices = Vec::with_capacity(k);
        for_each_top(&heap.into_vec(), k, |std::cmp::Reverse((_, idx))| {
            selected_indices.push(*idx);
        });
        selected_indices.iter().map(|&i| segments[i].clone()).collect()
    }
}

/// Visits the top `k` elements of a binary max-heap, given as a flat
/// array in the standard `2i+1`/`2i+2` children layout, without popping
/// or otherwise mutating it. Walks an explicit stack rather than
/// recursing, since Rust gives no tail-call guarantee and a heap can be
/// deep enough that a naive recursive walk risks the call stack.
fn for_each_top<T>(heap: &[T], k: usize, mut visit: impl FnMut(&T)) {
    if heap.is_empty() || k == 0 {
        return;
    }
    let mut stack = vec![0usize];
    let mut visited = 0usize;
    while let Some(idx) = stack.pop() {
        if visited >= k || idx >= heap.len() {
            continue;
        }
        visit(&heap[idx]);
        visited += 1;
        if visited >= k {
            continue;
        }
        stack.push(2 * idx + 2);
        stack.push(2 * idx + 1);
    }
}
