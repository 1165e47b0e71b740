//! In-flight relation changes.
//!
//! `add`, `remove` and `clear` on a collection relation are recorded here
//! and flushed when the owner is saved. A `clear` discards the intent
//! recorded before it; intent recorded after it is kept.

use crate::instance::InstanceId;

/// Pending operations for one (owner, relation) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationChange {
    clear: bool,
    add: Vec<InstanceId>,
    remove: Vec<InstanceId>,
}

/// One storage operation of a flush, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOp {
    /// Detach every related row
    Clear,
    /// Detach these rows, as one statement
    Remove(Vec<InstanceId>),
    /// Attach these rows, as one statement
    Add(Vec<InstanceId>),
}

impl RelationChange {
    pub fn is_empty(&self) -> bool {
        !self.clear && self.add.is_empty() && self.remove.is_empty()
    }

    pub fn clears(&self) -> bool {
        self.clear
    }

    pub fn added(&self) -> &[InstanceId] {
        &self.add
    }

    pub fn removed(&self) -> &[InstanceId] {
        &self.remove
    }

    pub(crate) fn add(&mut self, id: InstanceId) {
        self.remove.retain(|r| *r != id);
        if !self.add.contains(&id) {
            self.add.push(id);
        }
    }

    pub(crate) fn remove(&mut self, id: InstanceId) {
        self.add.retain(|a| *a != id);
        if !self.remove.contains(&id) {
            self.remove.push(id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.clear = true;
        self.add.clear();
        self.remove.clear();
    }

    /// Operations to issue: clear, then the remove batch, then the add batch.
    pub fn ops(&self) -> Vec<FlushOp> {
        let mut ops = Vec::with_capacity(3);
        if self.clear {
            ops.push(FlushOp::Clear);
        }
        if !self.remove.is_empty() {
            ops.push(FlushOp::Remove(self.remove.clone()));
        }
        if !self.add.is_empty() {
            ops.push(FlushOp::Add(self.add.clone()));
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> InstanceId {
        InstanceId::from_index(n)
    }

    #[test]
    fn clear_discards_only_earlier_intent() {
        let (x, y) = (id(1), id(2));
        let mut change = RelationChange::default();
        change.add(x);
        change.remove(x);
        change.add(y);
        change.clear();
        change.add(x);
        assert_eq!(change.ops(), vec![FlushOp::Clear, FlushOp::Add(vec![x])]);
    }

    #[test]
    fn add_and_remove_cancel_each_other() {
        let mut change = RelationChange::default();
        change.add(id(1));
        change.add(id(2));
        change.remove(id(1));
        change.add(id(2));
        assert_eq!(change.added(), &[id(2)]);
        assert_eq!(change.removed(), &[id(1)]);
        assert_eq!(
            change.ops(),
            vec![FlushOp::Remove(vec![id(1)]), FlushOp::Add(vec![id(2)])]
        );
    }

    #[test]
    fn empty_change_has_no_ops() {
        let change = RelationChange::default();
        assert!(change.is_empty());
        assert!(change.ops().is_empty());
    }
}
