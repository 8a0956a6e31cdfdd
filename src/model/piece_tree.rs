//! Persistent segment tree mapping logical offsets to physical storage.
//!
//! Every node holds one segment plus the byte and segment totals of its
//! subtree, so locating an offset and shifting everything after it are both
//! a single root-to-leaf walk. Nodes are shared through `Arc` and never
//! mutated: an edit builds a new spine and leaves the old tree intact, which
//! is what lets a change record keep the segments it displaced for undo.
//!
//! The tree is height balanced (AVL). `split` and `join` are the only
//! structural primitives; insert, delete and overwrite are compositions of
//! them and cost O(log n) in the number of segments.

use crate::model::change::Serial;
use std::sync::Arc;

/// A contiguous run of logical bytes backed by one kind of storage.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Range of the session's byte source
    Source { offset: u64, len: u64 },
    /// Range inside a change record's payload
    Edit {
        serial: Serial,
        data: Arc<[u8]>,
        start: usize,
        len: usize,
    },
}

impl Segment {
    pub fn source(offset: u64, len: u64) -> Self {
        Self::Source { offset, len }
    }

    /// Segment covering a whole payload.
    pub fn edit(serial: Serial, data: Arc<[u8]>) -> Self {
        let len = data.len();
        Self::Edit {
            serial,
            data,
            start: 0,
            len,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Source { len, .. } => *len,
            Self::Edit { len, .. } => *len as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serial of the change that owns the bytes, `None` for source bytes.
    pub fn serial(&self) -> Option<Serial> {
        match self {
            Self::Source { .. } => None,
            Self::Edit { serial, .. } => Some(*serial),
        }
    }

    /// Split into `[0, at)` and `[at, len)`. `at` must be strictly inside.
    pub fn split_at(&self, at: u64) -> (Segment, Segment) {
        debug_assert!(at > 0 && at < self.len());
        match self {
            Self::Source { offset, len } => (
                Self::Source { offset: *offset, len: at },
                Self::Source {
                    offset: offset + at,
                    len: len - at,
                },
            ),
            Self::Edit {
                serial,
                data,
                start,
                len,
            } => {
                // at < len, and len is a usize
                let at = at as usize;
                (
                    Self::Edit {
                        serial: *serial,
                        data: Arc::clone(data),
                        start: *start,
                        len: at,
                    },
                    Self::Edit {
                        serial: *serial,
                        data: Arc::clone(data),
                        start: start + at,
                        len: len - at,
                    },
                )
            }
        }
    }
}

type Link = Option<Arc<Node>>;

#[derive(Debug)]
struct Node {
    segment: Segment,
    left: Link,
    right: Link,
    height: u32,
    bytes: u64,
    pieces: usize,
}

fn height(link: &Link) -> u32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn bytes(link: &Link) -> u64 {
    link.as_ref().map_or(0, |n| n.bytes)
}

fn pieces(link: &Link) -> usize {
    link.as_ref().map_or(0, |n| n.pieces)
}

fn node(left: Link, segment: Segment, right: Link) -> Arc<Node> {
    Arc::new(Node {
        height: 1 + height(&left).max(height(&right)),
        bytes: bytes(&left) + segment.len() + bytes(&right),
        pieces: pieces(&left) + 1 + pieces(&right),
        segment,
        left,
        right,
    })
}

/// Build a node whose children differ in height by at most two, rotating
/// once or twice to restore the AVL property.
fn balance(left: Link, segment: Segment, right: Link) -> Arc<Node> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        if let Some(l) = &left {
            if height(&l.left) >= height(&l.right) {
                return node(
                    l.left.clone(),
                    l.segment.clone(),
                    Some(node(l.right.clone(), segment, right)),
                );
            }
            if let Some(lr) = &l.right {
                return node(
                    Some(node(l.left.clone(), l.segment.clone(), lr.left.clone())),
                    lr.segment.clone(),
                    Some(node(lr.right.clone(), segment, right)),
                );
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            if height(&r.right) >= height(&r.left) {
                return node(
                    Some(node(left, segment, r.left.clone())),
                    r.segment.clone(),
                    r.right.clone(),
                );
            }
            if let Some(rl) = &r.left {
                return node(
                    Some(node(left, segment, rl.left.clone())),
                    rl.segment.clone(),
                    Some(node(rl.right.clone(), r.segment.clone(), r.right.clone())),
                );
            }
        }
    }
    node(left, segment, right)
}

/// Concatenate `left`, `segment` and `right` in order. Cost is proportional
/// to the height difference of the two trees.
fn join(left: Link, segment: Segment, right: Link) -> Arc<Node> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        if let Some(l) = &left {
            let joined = join(l.right.clone(), segment, right);
            return balance(l.left.clone(), l.segment.clone(), Some(joined));
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            let joined = join(left, segment, r.left.clone());
            return balance(Some(joined), r.segment.clone(), r.right.clone());
        }
    }
    node(left, segment, right)
}

fn pop_first(n: &Arc<Node>) -> (Segment, Link) {
    match &n.left {
        None => (n.segment.clone(), n.right.clone()),
        Some(l) => {
            let (first, rest) = pop_first(l);
            (
                first,
                Some(join(rest, n.segment.clone(), n.right.clone())),
            )
        }
    }
}

fn concat(left: Link, right: Link) -> Link {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(l), Some(r)) => {
            let (first, rest) = pop_first(&r);
            Some(join(Some(l), first, rest))
        }
    }
}

/// Split into the first `at` bytes and the rest, cutting a segment in two if
/// `at` falls inside it.
fn split(link: &Link, at: u64) -> (Link, Link) {
    let Some(n) = link else {
        return (None, None);
    };
    if at == 0 {
        return (None, link.clone());
    }
    if at >= n.bytes {
        return (link.clone(), None);
    }

    let left_bytes = bytes(&n.left);
    let seg_end = left_bytes + n.segment.len();
    if at <= left_bytes {
        let (ll, lr) = split(&n.left, at);
        (ll, Some(join(lr, n.segment.clone(), n.right.clone())))
    } else if at >= seg_end {
        let (rl, rr) = split(&n.right, at - seg_end);
        (Some(join(n.left.clone(), n.segment.clone(), rl)), rr)
    } else {
        let (head, tail) = n.segment.split_at(at - left_bytes);
        (
            Some(join(n.left.clone(), head, None)),
            Some(join(None, tail, n.right.clone())),
        )
    }
}

/// Location of a logical offset inside the tree.
#[derive(Debug, Clone)]
pub struct PieceInfo {
    pub segment: Segment,
    /// Logical offset where the segment starts
    pub doc_offset: u64,
    /// How far into the segment the queried offset is
    pub offset_in_piece: u64,
}

/// Statistics about the tree structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub total_bytes: u64,
    pub depth: usize,
    pub piece_count: usize,
}

/// Ordered partition of the logical address space into segments.
#[derive(Debug, Clone, Default)]
pub struct PieceTree {
    root: Link,
}

impl PieceTree {
    pub fn empty() -> Self {
        Self { root: None }
    }

    pub fn from_segment(segment: Segment) -> Self {
        if segment.is_empty() {
            return Self::empty();
        }
        Self {
            root: Some(node(None, segment, None)),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        bytes(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn piece_count(&self) -> usize {
        pieces(&self.root)
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            total_bytes: self.total_bytes(),
            depth: height(&self.root) as usize,
            piece_count: self.piece_count(),
        }
    }

    /// True if both trees share the same root node.
    pub fn ptr_eq(&self, other: &PieceTree) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Find the segment containing `offset`.
    pub fn find_by_offset(&self, offset: u64) -> Option<PieceInfo> {
        let mut link = &self.root;
        let mut base = 0;
        while let Some(n) = link {
            let seg_start = base + bytes(&n.left);
            let seg_end = seg_start + n.segment.len();
            if offset < seg_start {
                link = &n.left;
            } else if offset >= seg_end {
                base = seg_end;
                link = &n.right;
            } else {
                return Some(PieceInfo {
                    segment: n.segment.clone(),
                    doc_offset: seg_start,
                    offset_in_piece: offset - seg_start,
                });
            }
        }
        None
    }

    /// Insert a segment at `offset`; everything from `offset` on moves right.
    pub fn insert(&mut self, offset: u64, segment: Segment) {
        debug_assert!(offset <= self.total_bytes());
        if segment.is_empty() {
            return;
        }
        let (left, right) = split(&self.root, offset);
        self.root = Some(join(left, segment, right));
    }

    /// Insert all segments of `other` at `offset`.
    pub fn insert_tree(&mut self, offset: u64, other: &PieceTree) {
        debug_assert!(offset <= self.total_bytes());
        if other.is_empty() {
            return;
        }
        let (left, right) = split(&self.root, offset);
        self.root = concat(concat(left, other.root.clone()), right);
    }

    /// Remove `len` bytes at `offset` and return the removed segments as a
    /// tree of their own.
    pub fn remove(&mut self, offset: u64, len: u64) -> PieceTree {
        debug_assert!(offset + len <= self.total_bytes());
        if len == 0 {
            return PieceTree::empty();
        }
        let (left, rest) = split(&self.root, offset);
        let (removed, right) = split(&rest, len);
        self.root = concat(left, right);
        PieceTree { root: removed }
    }

    /// Iterate the segments intersecting `[start, end)` in order. The first
    /// and last segment may extend past the range; callers clip.
    pub fn iter_pieces_in_range(&self, start: u64, end: u64) -> PieceRangeIter {
        PieceRangeIter::new(&self.root, start, end)
    }

    /// All segments in order
    pub fn segments(&self) -> Vec<Segment> {
        self.iter_pieces_in_range(0, self.total_bytes())
            .map(|view| view.segment)
            .collect()
    }

    /// Verify the cached totals and the balance of every node.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        fn walk(link: &Link) -> (u32, u64, usize) {
            let Some(n) = link else {
                return (0, 0, 0);
            };
            assert!(!n.segment.is_empty(), "empty segment stored in tree");
            let (hl, bl, pl) = walk(&n.left);
            let (hr, br, pr) = walk(&n.right);
            assert!(hl.abs_diff(hr) <= 1, "unbalanced node: {hl} vs {hr}");
            assert_eq!(n.height, 1 + hl.max(hr));
            assert_eq!(n.bytes, bl + n.segment.len() + br);
            assert_eq!(n.pieces, pl + 1 + pr);
            (n.height, n.bytes, n.pieces)
        }
        walk(&self.root);
    }
}

/// A segment together with its logical start offset
#[derive(Debug, Clone)]
pub struct PieceView {
    pub doc_offset: u64,
    pub segment: Segment,
}

/// Lazy in-order walk over the segments of a range. Holds only the current
/// root-to-node path, so starting a walk is O(log n) regardless of where it
/// begins.
#[derive(Debug)]
pub struct PieceRangeIter {
    // (node, logical offset where the node's subtree starts)
    stack: Vec<(Arc<Node>, u64)>,
    end: u64,
}

impl PieceRangeIter {
    fn new(root: &Link, start: u64, end: u64) -> Self {
        let mut stack = Vec::new();
        let mut link = root.clone();
        let mut base = 0;
        while let Some(n) = link {
            let seg_start = base + bytes(&n.left);
            let seg_end = seg_start + n.segment.len();
            if start < seg_start {
                link = n.left.clone();
                stack.push((n, base));
            } else if start >= seg_end {
                base = seg_end;
                link = n.right.clone();
            } else {
                stack.push((n, base));
                break;
            }
        }
        Self { stack, end }
    }

    fn push_left_spine(&mut self, mut link: Link, base: u64) {
        while let Some(n) = link {
            link = n.left.clone();
            self.stack.push((n, base));
        }
    }
}

impl Iterator for PieceRangeIter {
    type Item = PieceView;

    fn next(&mut self) -> Option<Self::Item> {
        let (n, base) = self.stack.pop()?;
        let seg_start = base + bytes(&n.left);
        if seg_start >= self.end {
            self.stack.clear();
            return None;
        }
        let seg_end = seg_start + n.segment.len();
        self.push_left_spine(n.right.clone(), seg_end);
        Some(PieceView {
            doc_offset: seg_start,
            segment: n.segment.clone(),
        })
    }
}
