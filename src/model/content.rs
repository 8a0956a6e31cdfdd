use crate::model::change::{Change, ChangeKind, Effect};
use crate::model::error::{EditError, Result};
use crate::model::piece_tree::{PieceTree, Segment, TreeStats};
use crate::model::source::ByteSource;
use std::sync::Arc;

/// The session's logical content: a byte source plus the segment tree that
/// says which source ranges and which edit payloads make up each offset.
///
/// Cloning is cheap (two `Arc` bumps) and the clone is an independent
/// snapshot, which is how multi-step operations stay all-or-nothing.
#[derive(Debug, Clone)]
pub struct ContentModel {
    source: Arc<dyn ByteSource>,
    tree: PieceTree,
}

impl ContentModel {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        let tree = PieceTree::from_segment(Segment::source(0, source.len()));
        Self { source, tree }
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    pub fn tree(&self) -> &PieceTree {
        &self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.total_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TreeStats {
        self.tree.stats()
    }

    /// Drop every edit and go back to the untouched source.
    pub fn reset(&mut self) {
        self.tree = PieceTree::from_segment(Segment::source(0, self.source.len()));
    }

    /// Offsets in `[0, len]` are valid insertion points.
    pub fn check_offset(&self, offset: u64) -> Result<()> {
        let length = self.len();
        if offset > length {
            return Err(EditError::InvalidOffset { offset, length });
        }
        Ok(())
    }

    /// `[offset, offset + len)` must lie inside the content.
    pub fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        self.check_offset(offset)?;
        let length = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= length => Ok(()),
            _ => Err(EditError::RangeOutOfBounds {
                offset,
                len,
                length,
            }),
        }
    }

    /// Read `len` logical bytes at `offset`.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;
        let len = usize::try_from(len).map_err(|_| EditError::RangeOutOfBounds {
            offset,
            len,
            length: self.len(),
        })?;
        let mut buf = vec![0u8; len];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` with the logical bytes starting at `offset`.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len() as u64)?;
        let end = offset + buf.len() as u64;

        for piece in self.tree.iter_pieces_in_range(offset, end) {
            let from = offset.max(piece.doc_offset);
            let to = end.min(piece.doc_offset + piece.segment.len());
            // both bounds lie inside buf, whose length is a usize
            let dst = &mut buf[(from - offset) as usize..(to - offset) as usize];
            let skip = from - piece.doc_offset;

            match &piece.segment {
                Segment::Source { offset: src, .. } => {
                    self.source.read_into(src + skip, dst)?;
                }
                Segment::Edit { data, start, .. } => {
                    let begin = start + skip as usize;
                    dst.copy_from_slice(&data[begin..begin + dst.len()]);
                }
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, offset: u64, segment: Segment) -> Result<()> {
        self.check_offset(offset)?;
        self.tree.insert(offset, segment);
        Ok(())
    }

    /// Remove a range, returning the segments that covered it.
    pub fn delete(&mut self, offset: u64, len: u64) -> Result<PieceTree> {
        self.check_range(offset, len)?;
        Ok(self.tree.remove(offset, len))
    }

    /// Replace the range covered by `segment` starting at `offset`. Bytes past
    /// the current end are appended. Returns the segments that were covered,
    /// which is shorter than `segment` when it ran past the end.
    pub fn overwrite(&mut self, offset: u64, segment: Segment) -> Result<PieceTree> {
        self.check_offset(offset)?;
        let covered = segment.len().min(self.len() - offset);
        let displaced = self.tree.remove(offset, covered);
        self.tree.insert(offset, segment);
        Ok(displaced)
    }

    /// Re-apply a change that was previously undone.
    pub fn apply_change(&mut self, change: &Change) -> Result<Effect> {
        match change.kind() {
            ChangeKind::Insert => {
                let segment = change.segment().ok_or(EditError::EmptyEdit)?;
                self.insert(change.offset(), segment)?;
            }
            ChangeKind::Delete => {
                self.delete(change.offset(), change.length())?;
            }
            ChangeKind::Overwrite => {
                let segment = change.segment().ok_or(EditError::EmptyEdit)?;
                self.overwrite(change.offset(), segment)?;
            }
        }
        Ok(change.effect())
    }

    /// Reverse the effect of `change`, which must be the most recently
    /// applied change still in effect.
    pub fn revert_change(&mut self, change: &Change) -> Result<Effect> {
        match change.kind() {
            ChangeKind::Insert => {
                self.delete(change.offset(), change.length())?;
            }
            ChangeKind::Delete => {
                self.check_offset(change.offset())?;
                self.tree.insert_tree(change.offset(), change.displaced());
            }
            ChangeKind::Overwrite => {
                self.delete(change.offset(), change.length())?;
                self.tree.insert_tree(change.offset(), change.displaced());
            }
        }
        Ok(change.effect().inverse())
    }
}
