use crate::model::change::{Change, Serial};
use crate::model::error::{EditError, Result};
use std::sync::Arc;

/// Linear undo/redo history.
///
/// The undo stack holds the changes currently in effect, oldest first; the
/// redo stack holds undone changes with the next one to redo on top.
/// Applying a new change always discards the redo stack.
#[derive(Debug)]
pub struct ChangeLog {
    undo_stack: Vec<Arc<Change>>,
    redo_stack: Vec<Arc<Change>>,
    next_serial: Serial,
    open_transaction: Option<u64>,
    next_transaction: u64,
    /// Changes applied since the open transaction began
    transaction_changes: usize,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            next_serial: Serial::FIRST,
            open_transaction: None,
            next_transaction: 1,
            transaction_changes: 0,
        }
    }

    /// Hand out the next serial. Serials are never reused, even if the log
    /// is cleared.
    pub fn allocate_serial(&mut self) -> Serial {
        let serial = self.next_serial;
        self.next_serial = serial.next();
        serial
    }

    /// Transaction new changes should be tagged with, if one is open.
    pub fn transaction(&self) -> Option<u64> {
        self.open_transaction
    }

    pub fn in_transaction(&self) -> bool {
        self.open_transaction.is_some()
    }

    pub fn begin_transaction(&mut self) -> Result<u64> {
        if self.open_transaction.is_some() {
            return Err(EditError::TransactionState("a transaction is already open"));
        }
        let id = self.next_transaction;
        self.next_transaction += 1;
        self.open_transaction = Some(id);
        self.transaction_changes = 0;
        Ok(id)
    }

    /// Close the open transaction, returning how many changes it grouped.
    pub fn end_transaction(&mut self) -> Result<usize> {
        if self.open_transaction.take().is_none() {
            return Err(EditError::TransactionState("no transaction is open"));
        }
        Ok(std::mem::take(&mut self.transaction_changes))
    }

    /// Record a change that has just been applied. Returns how many redoable
    /// changes were discarded.
    pub fn apply(&mut self, change: Change) -> usize {
        let discarded = self.redo_stack.len();
        self.redo_stack.clear();
        if self.open_transaction.is_some() {
            self.transaction_changes += 1;
        }
        self.undo_stack.push(Arc::new(change));
        discarded
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// The changes the next undo reverts, in stack order (the last element
    /// is reverted first). A transaction is reverted as a whole.
    pub fn undo_group(&self) -> &[Arc<Change>] {
        &self.undo_stack[Self::group_start(&self.undo_stack)..]
    }

    /// The changes the next redo re-applies, in stack order (the last
    /// element is re-applied first).
    pub fn redo_group(&self) -> &[Arc<Change>] {
        &self.redo_stack[Self::group_start(&self.redo_stack)..]
    }

    fn group_start(stack: &[Arc<Change>]) -> usize {
        let Some(top) = stack.last() else {
            return 0;
        };
        match top.transaction() {
            None => stack.len() - 1,
            Some(id) => stack
                .iter()
                .rposition(|change| change.transaction() != Some(id))
                .map_or(0, |pos| pos + 1),
        }
    }

    /// Move the top `count` changes from the undo stack to the redo stack.
    pub fn commit_undo(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(change) = self.undo_stack.pop() {
                self.redo_stack.push(change);
            }
        }
    }

    /// Move the top `count` changes from the redo stack to the undo stack.
    pub fn commit_redo(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(change) = self.redo_stack.pop() {
                self.undo_stack.push(change);
            }
        }
    }

    /// Changes currently in effect, in the order they were applied.
    pub fn active(&self) -> impl DoubleEndedIterator<Item = &Change> + ExactSizeIterator {
        self.undo_stack.iter().map(|change| change.as_ref())
    }

    pub fn applied_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn undone_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn last_change(&self) -> Option<&Change> {
        self.undo_stack.last().map(|change| change.as_ref())
    }

    /// The most recently undone change.
    pub fn last_undo(&self) -> Option<&Change> {
        self.redo_stack.last().map(|change| change.as_ref())
    }

    /// Look up a change by serial in either stack.
    pub fn find(&self, serial: Serial) -> Option<&Change> {
        // serials increase along the undo stack
        if let Ok(pos) = self
            .undo_stack
            .binary_search_by_key(&serial, |change| change.serial())
        {
            return Some(&self.undo_stack[pos]);
        }
        self.redo_stack
            .iter()
            .find(|change| change.serial() == serial)
            .map(|change| change.as_ref())
    }

    /// Copy of the redo stack, for putting back with `restore_redo`.
    pub fn redo_snapshot(&self) -> Vec<Arc<Change>> {
        self.redo_stack.clone()
    }

    /// Replace the redo stack with an earlier snapshot.
    pub fn restore_redo(&mut self, redo: Vec<Arc<Change>>) {
        self.redo_stack = redo;
    }

    /// Forget all history. The serial counter keeps counting.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.open_transaction = None;
        self.transaction_changes = 0;
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(log: &mut ChangeLog, offset: u64) -> Serial {
        let serial = log.allocate_serial();
        let change = Change::insert(serial, offset, Arc::from(&b"x"[..]), log.transaction());
        log.apply(change);
        serial
    }

    fn serials(changes: &[Arc<Change>]) -> Vec<u64> {
        changes.iter().map(|c| c.serial().get()).collect()
    }

    #[test]
    fn test_undo_redo_moves_between_stacks() {
        let mut log = ChangeLog::new();
        insert(&mut log, 0);
        insert(&mut log, 1);

        assert_eq!(serials(log.undo_group()), vec![2]);
        log.commit_undo(1);
        assert_eq!(log.applied_count(), 1);
        assert_eq!(log.last_undo().map(|c| c.serial().get()), Some(2));

        assert_eq!(serials(log.redo_group()), vec![2]);
        log.commit_redo(1);
        assert_eq!(log.applied_count(), 2);
        assert!(!log.can_redo());
    }

    #[test]
    fn test_apply_discards_redo() {
        let mut log = ChangeLog::new();
        insert(&mut log, 0);
        insert(&mut log, 1);
        log.commit_undo(1);
        log.commit_undo(1);
        assert_eq!(log.undone_count(), 2);

        let serial = insert(&mut log, 0);
        assert_eq!(serial.get(), 3, "serials are never reused");
        assert!(!log.can_redo());
    }

    #[test]
    fn test_transaction_groups() {
        let mut log = ChangeLog::new();
        insert(&mut log, 0);
        log.begin_transaction().unwrap();
        assert!(log.begin_transaction().is_err());
        insert(&mut log, 1);
        insert(&mut log, 2);
        insert(&mut log, 3);
        assert_eq!(log.end_transaction().unwrap(), 3);
        assert!(log.end_transaction().is_err());

        assert_eq!(serials(log.undo_group()), vec![2, 3, 4]);
        log.commit_undo(3);
        assert_eq!(serials(log.undo_group()), vec![1]);
        // redo re-applies 2 first, so it is on top
        assert_eq!(serials(log.redo_group()), vec![4, 3, 2]);
    }

    #[test]
    fn test_restore_redo() {
        let mut log = ChangeLog::new();
        insert(&mut log, 0);
        log.commit_undo(1);
        let saved = log.redo_snapshot();

        insert(&mut log, 0);
        assert!(!log.can_redo());
        log.commit_undo(1);
        log.restore_redo(saved);
        assert_eq!(serials(log.redo_group()), vec![1]);
    }

    #[test]
    fn test_find_and_clear() {
        let mut log = ChangeLog::new();
        for offset in 0..5 {
            insert(&mut log, offset);
        }
        log.commit_undo(2);
        assert_eq!(log.find(Serial::new(3).unwrap()).unwrap().offset(), 2);
        assert_eq!(log.find(Serial::new(5).unwrap()).unwrap().offset(), 4);
        assert!(log.find(Serial::new(6).unwrap()).is_none());

        log.clear();
        assert!(!log.can_undo() && !log.can_redo());
        assert_eq!(log.allocate_serial().get(), 6);
    }
}
