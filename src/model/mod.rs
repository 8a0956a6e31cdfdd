//! Content model: original bytes, change records and the segment tree that
//! maps one onto the other.

pub mod change;
pub mod content;
pub mod error;
pub mod history;
pub mod piece_tree;
pub mod source;
