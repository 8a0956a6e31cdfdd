use crate::model::piece_tree::{PieceTree, Segment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// Serial number of a change. Strictly increasing within a session and never
/// reused, not even across undo/redo. Zero is reserved for "no change".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(NonZeroU64);

impl Serial {
    pub const FIRST: Serial = Serial(NonZeroU64::MIN);

    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collapse an edit result into the integer convention used by bindings:
/// the positive serial on success, zero otherwise.
pub fn serial_or_zero<E>(result: &Result<Serial, E>) -> u64 {
    result.as_ref().map_or(0, |serial| serial.get())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Overwrite,
    Delete,
}

/// Footprint of one mutation in logical coordinates: `removed` bytes at
/// `offset` were replaced by `inserted` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub offset: u64,
    pub removed: u64,
    pub inserted: u64,
}

impl Effect {
    /// Signed change in logical length.
    pub fn delta(&self) -> i128 {
        i128::from(self.inserted) - i128::from(self.removed)
    }

    /// The same footprint seen from the other side (what undo does).
    pub fn inverse(&self) -> Self {
        Self {
            offset: self.offset,
            removed: self.inserted,
            inserted: self.removed,
        }
    }
}

/// An immutable record of one edit.
///
/// Undo and redo only move a change between the log's stacks; the record
/// itself never changes. Delete and overwrite records also keep the segments
/// they covered so that undo can put them back without copying bytes.
#[derive(Debug, Clone)]
pub struct Change {
    serial: Serial,
    kind: ChangeKind,
    offset: u64,
    length: u64,
    data: Option<Arc<[u8]>>,
    transaction: Option<u64>,
    displaced: PieceTree,
}

impl Change {
    pub(crate) fn insert(
        serial: Serial,
        offset: u64,
        data: Arc<[u8]>,
        transaction: Option<u64>,
    ) -> Self {
        Self {
            serial,
            kind: ChangeKind::Insert,
            offset,
            length: data.len() as u64,
            data: Some(data),
            transaction,
            displaced: PieceTree::empty(),
        }
    }

    pub(crate) fn overwrite(
        serial: Serial,
        offset: u64,
        data: Arc<[u8]>,
        displaced: PieceTree,
        transaction: Option<u64>,
    ) -> Self {
        Self {
            serial,
            kind: ChangeKind::Overwrite,
            offset,
            length: data.len() as u64,
            data: Some(data),
            transaction,
            displaced,
        }
    }

    pub(crate) fn delete(
        serial: Serial,
        offset: u64,
        displaced: PieceTree,
        transaction: Option<u64>,
    ) -> Self {
        Self {
            serial,
            kind: ChangeKind::Delete,
            offset,
            length: displaced.total_bytes(),
            data: None,
            transaction,
            displaced,
        }
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes inserted (insert/overwrite) or removed (delete).
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Payload of an insert or overwrite.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn transaction(&self) -> Option<u64> {
        self.transaction
    }

    /// Bytes covered before an overwrite took effect. Smaller than `length`
    /// when the overwrite ran past the end of the content.
    pub fn displaced_length(&self) -> u64 {
        self.displaced.total_bytes()
    }

    pub(crate) fn displaced(&self) -> &PieceTree {
        &self.displaced
    }

    /// Segment referencing this change's payload.
    pub(crate) fn segment(&self) -> Option<Segment> {
        self.data
            .as_ref()
            .map(|data| Segment::edit(self.serial, Arc::clone(data)))
    }

    /// Footprint of applying this change.
    pub fn effect(&self) -> Effect {
        let (removed, inserted) = match self.kind {
            ChangeKind::Insert => (0, self.length),
            ChangeKind::Delete => (self.length, 0),
            ChangeKind::Overwrite => (self.displaced.total_bytes(), self.length),
        };
        Effect {
            offset: self.offset,
            removed,
            inserted,
        }
    }

    pub fn to_entry(&self) -> ChangeEntry {
        ChangeEntry {
            serial: self.serial.get(),
            kind: self.kind,
            offset: self.offset,
            length: self.length,
            data: self.data.as_ref().map(|data| data.to_vec()),
        }
    }
}

/// Serialized form of a change: enough to replay it against the original
/// source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub serial: u64,
    pub kind: ChangeKind,
    pub offset: u64,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}
