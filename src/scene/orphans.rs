use std::collections::HashMap;

use itertools::Itertools;

use crate::scene::entity::{Kinematics, LocalHandle, RegionId};

/// A child whose declared parent has not arrived yet, plus the relative state
/// to replay once it does.
#[derive(Debug, Clone)]
pub struct OrphanRecord {
    pub child: LocalHandle,
    pub declared_parent: LocalHandle,
    pub region: RegionId,
    pub relative_state: Kinematics,
}

/// Multimap from a not-yet-registered parent handle to its waiting children.
/// Insertion order is preserved per parent so replay is deterministic.
#[derive(Debug, Default)]
pub struct OrphanTable {
    by_parent: HashMap<LocalHandle, Vec<OrphanRecord>>,
    child_index: HashMap<LocalHandle, LocalHandle>,
}

impl OrphanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per child: re-deferring replaces the stored state (and
    /// moves the record if the declared parent changed), never duplicates.
    pub fn defer(
        &mut self,
        child: LocalHandle,
        declared_parent: LocalHandle,
        region: RegionId,
        relative_state: Kinematics,
    ) {
        if let Some(previous_parent) = self.child_index.get(&child).copied() {
            if previous_parent == declared_parent {
                if let Some(records) = self.by_parent.get_mut(&declared_parent) {
                    for record in records.iter_mut() {
                        if record.child == child {
                            record.relative_state = relative_state;
                            record.region = region;
                            return;
                        }
                    }
                }
            } else {
                self.forget_child(child);
            }
        }

        self.child_index.insert(child, declared_parent);
        self.by_parent
            .entry(declared_parent)
            .or_default()
            .push(OrphanRecord {
                child,
                declared_parent,
                region,
                relative_state,
            });
    }

    /// Drains and returns the children deferred under `parent`, in insertion
    /// order, for replay as if freshly delivered.
    pub fn resolve_children_of(&mut self, parent: LocalHandle) -> Vec<OrphanRecord> {
        let records = self.by_parent.remove(&parent).unwrap_or_default();
        for record in &records {
            self.child_index.remove(&record.child);
        }
        records
    }

    pub fn contains_child(&self, child: LocalHandle) -> bool {
        self.child_index.contains_key(&child)
    }

    /// Drops a single child's record, e.g. when the child itself is killed
    /// before its parent ever arrives.
    pub fn forget_child(&mut self, child: LocalHandle) {
        let Some(parent) = self.child_index.remove(&child) else {
            return;
        };
        if let Some(records) = self.by_parent.get_mut(&parent) {
            records.retain(|record| record.child != child);
            if records.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
    }

    /// Region-leave cleanup: local handles are region-scoped, so every record
    /// of that region goes in one pass.
    pub fn purge_region(&mut self, region: RegionId) {
        let stale_children = self
            .by_parent
            .values()
            .flatten()
            .filter(|record| record.region == region)
            .map(|record| record.child)
            .collect_vec();

        for child in stale_children {
            self.forget_child(child);
        }
    }

    pub fn len(&self) -> usize {
        self.child_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_index.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_parent.clear();
        self.child_index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    const REGION: RegionId = RegionId(1);

    #[test]
    fn resolve_returns_children_in_insertion_order() {
        let mut table = OrphanTable::new();
        table.defer(LocalHandle(10), LocalHandle(3), REGION, Kinematics::default());
        table.defer(LocalHandle(11), LocalHandle(3), REGION, Kinematics::default());
        table.defer(LocalHandle(12), LocalHandle(4), REGION, Kinematics::default());

        let resolved = table.resolve_children_of(LocalHandle(3));
        let children = resolved.iter().map(|r| r.child).collect_vec();
        assert_eq!(children, vec![LocalHandle(10), LocalHandle(11)]);

        assert!(table.contains_child(LocalHandle(12)));
        assert!(!table.contains_child(LocalHandle(10)));
        assert!(table.resolve_children_of(LocalHandle(3)).is_empty());
    }

    #[test]
    fn redeferring_replaces_instead_of_duplicating() {
        let mut table = OrphanTable::new();
        table.defer(LocalHandle(10), LocalHandle(3), REGION, Kinematics::default());
        table.defer(
            LocalHandle(10),
            LocalHandle(3),
            REGION,
            Kinematics::at(Vec3::splat(5.0)),
        );

        let resolved = table.resolve_children_of(LocalHandle(3));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].relative_state.position, Vec3::splat(5.0));
    }

    #[test]
    fn redeferring_under_a_new_parent_moves_the_record() {
        let mut table = OrphanTable::new();
        table.defer(LocalHandle(10), LocalHandle(3), REGION, Kinematics::default());
        table.defer(LocalHandle(10), LocalHandle(4), REGION, Kinematics::default());

        assert!(table.resolve_children_of(LocalHandle(3)).is_empty());
        let resolved = table.resolve_children_of(LocalHandle(4));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].child, LocalHandle(10));
    }

    #[test]
    fn purge_region_only_touches_that_region() {
        let mut table = OrphanTable::new();
        table.defer(LocalHandle(10), LocalHandle(3), RegionId(1), Kinematics::default());
        table.defer(LocalHandle(11), LocalHandle(3), RegionId(2), Kinematics::default());

        table.purge_region(RegionId(1));
        assert!(!table.contains_child(LocalHandle(10)));
        assert!(table.contains_child(LocalHandle(11)));
        assert_eq!(table.len(), 1);
    }
}
