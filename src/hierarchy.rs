//! Depth reconstruction for one list's flat item sequence.
//!
//! The remote API returns items in traversal order: a parent always comes before its
//! descendants. A single forward pass keeps the current root-to-leaf path as an
//! array-as-stack (`path_ids[d]` is the item at depth `d`), so memory is bounded by
//! the nesting depth, not the list length. Items are never reordered.

use crate::model::{Item, DEPTH_INVALID, DEPTH_ORPHAN_INACTIVE};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// What to do with a visible item whose parent is not on the current path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrphanPolicy {
    /// Keep it, with `depth = DEPTH_INVALID`.
    #[default]
    Flag,
    /// Drop it from the sequence.
    Remove,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HierarchyStats {
    pub orphaned_inactive: usize,
    pub invalid_visible: usize,
    pub removed: usize,
    /// Kept items per assigned depth (including the negative sentinels).
    pub depth_counts: AHashMap<i32, usize>,
}

impl HierarchyStats {
    pub fn merge(&mut self, other: &HierarchyStats) {
        self.orphaned_inactive += other.orphaned_inactive;
        self.invalid_visible += other.invalid_visible;
        self.removed += other.removed;
        for (d, n) in &other.depth_counts {
            *self.depth_counts.entry(*d).or_insert(0) += n;
        }
    }

    /// Sorted `(depth, count)` pairs, for logging.
    pub fn depth_histogram(&self) -> Vec<(i32, usize)> {
        let mut v: Vec<_> = self.depth_counts.iter().map(|(d, n)| (*d, *n)).collect();
        v.sort_unstable();
        v
    }
}

/// Stateful across the pages of one list; call `reset` before the next list.
#[derive(Clone, Debug, Default)]
pub struct HierarchyBuilder {
    policy: OrphanPolicy,
    path_ids: Vec<String>,
    path_active: Vec<bool>,
}

impl HierarchyBuilder {
    pub fn new(policy: OrphanPolicy) -> Self {
        Self { policy, path_ids: Vec::new(), path_active: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.path_ids.clear();
        self.path_active.clear();
    }

    /// Annotate a whole list in one go.
    pub fn annotate(&mut self, items: &mut Vec<Item>) -> HierarchyStats {
        self.reset();
        let mut stats = HierarchyStats::default();
        self.annotate_page(items, &mut stats);
        stats
    }

    /// Annotate the next page of the current list, continuing from the path left by
    /// earlier pages. Removed orphans are dropped from `items` in place.
    pub fn annotate_page(&mut self, items: &mut Vec<Item>, stats: &mut HierarchyStats) {
        items.retain_mut(|item| {
            let keep = self.visit(item, stats);
            if keep {
                *stats.depth_counts.entry(item.depth).or_insert(0) += 1;
            }
            keep
        });
    }

    fn visit(&mut self, item: &mut Item, stats: &mut HierarchyStats) -> bool {
        let active = item.is_active();

        let Some(parent) = item.parent_id.as_deref() else {
            self.path_ids.clear();
            self.path_active.clear();
            self.path_ids.push(item.id.clone());
            self.path_active.push(active);
            item.depth = 0;
            item.parent_is_active = true;
            return true;
        };

        // Linear membership test on the current path; a self-reference never matches,
        // so cycles fall through to the orphan branch.
        let found = if parent == item.id {
            None
        } else {
            self.path_ids.iter().position(|p| p == parent)
        };

        if let Some(idx) = found {
            self.path_ids.truncate(idx + 1);
            self.path_active.truncate(idx + 1);
            item.depth = (idx + 1) as i32;
            item.parent_is_active = self.path_active[idx];
            if self.path_ids.last() != Some(&item.id) {
                self.path_ids.push(item.id.clone());
                self.path_active.push(active);
            }
            return true;
        }

        item.parent_is_active = false;
        if !active {
            item.depth = DEPTH_ORPHAN_INACTIVE;
            stats.orphaned_inactive += 1;
            return true;
        }
        match self.policy {
            OrphanPolicy::Flag => {
                item.depth = DEPTH_INVALID;
                stats.invalid_visible += 1;
                true
            }
            OrphanPolicy::Remove => {
                stats.removed += 1;
                false
            }
        }
    }
}
