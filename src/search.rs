//! Forward pattern search over a session's logical bytes.
//!
//! A search context reads through the content model, so it sees unsaved
//! edits. The scan pulls overlapping windows (`chunk_size` new bytes plus
//! `pattern.len() - 1` carried over) so matches that straddle a window or a
//! segment boundary are found exactly once.

use crate::model::content::ContentModel;
use crate::model::error::{EditError, Result};

slotmap::new_key_type! {
    /// Handle to a search context registered with a session.
    pub struct SearchId;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// ASCII case-insensitive matching
    pub case_insensitive: bool,
    /// First offset to search
    pub offset: u64,
    /// Bytes to search from `offset`; `None` tracks the current content
    /// length on every call.
    pub length: Option<u64>,
}

impl SearchOptions {
    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    pub fn starting_at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limited_to(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

/// Outcome of one bounded search step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// Match at this offset
    Found(u64),
    /// No match before the end of the range
    NotFound,
    /// Budget exhausted; call again to continue
    Pending,
}

/// Stateful forward cursor for one pattern.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pattern: Vec<u8>,
    case_insensitive: bool,
    begin: u64,
    length: Option<u64>,
    cursor: u64,
    match_length: u64,
    resume: Option<u64>,
    outdated: bool,
}

impl SearchContext {
    pub(crate) fn new(pattern: &[u8], options: SearchOptions, max_pattern: usize) -> Result<Self> {
        if pattern.is_empty() {
            return Err(EditError::EmptyPattern);
        }
        if pattern.len() > max_pattern {
            return Err(EditError::PatternTooLong {
                len: pattern.len(),
                max: max_pattern,
            });
        }
        let mut pattern = pattern.to_vec();
        if options.case_insensitive {
            pattern.make_ascii_lowercase();
        }
        Ok(Self {
            pattern,
            case_insensitive: options.case_insensitive,
            begin: options.offset,
            length: options.length.filter(|&len| len > 0),
            cursor: options.offset,
            match_length: 0,
            resume: None,
            outdated: false,
        })
    }

    /// The pattern as matched (lowercased for case-insensitive searches)
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// Explicit range length, `None` if tracking the content length.
    pub fn range_length(&self) -> Option<u64> {
        self.length
    }

    /// Offset of the last match, or the end of the range after a miss.
    pub fn offset(&self) -> u64 {
        self.cursor
    }

    /// Length of the last match, zero after a miss.
    pub fn match_length(&self) -> u64 {
        self.match_length
    }

    /// True if the session changed since the last reset or match. Cursor
    /// positions are never rebased; callers decide whether to `reset`.
    pub fn is_outdated(&self) -> bool {
        self.outdated
    }

    pub(crate) fn mark_outdated(&mut self) {
        self.outdated = true;
    }

    /// Rewind to the start of the range.
    pub fn reset(&mut self) {
        self.cursor = self.begin;
        self.match_length = 0;
        self.resume = None;
        self.outdated = false;
    }

    /// End of the search range against the content as it is now.
    pub fn effective_end(&self, content_len: u64) -> u64 {
        match self.length {
            Some(len) => self.begin.saturating_add(len).min(content_len),
            None => content_len,
        }
    }

    /// Scan forward at most `budget` candidate positions (unbounded for
    /// `None`). The cursor is first advanced by `advance` unless a previous
    /// step is pending, in which case the scan resumes where it stopped.
    pub(crate) fn step(
        &mut self,
        content: &ContentModel,
        advance: u64,
        budget: Option<u64>,
        chunk_size: usize,
    ) -> Result<SearchStep> {
        let end = self.effective_end(content.len());
        let pattern_len = self.pattern.len() as u64;
        let mut pos = self
            .resume
            .take()
            .unwrap_or_else(|| self.cursor.saturating_add(advance));

        let chunk = chunk_size.max(1) as u64;
        let mut scanned = 0u64;
        let mut window = Vec::new();

        while pos.saturating_add(pattern_len) <= end {
            let window_end = pos.saturating_add(chunk + pattern_len - 1).min(end);
            // window_end - pos is at most chunk + pattern_len, both usize
            window.resize((window_end - pos) as usize, 0);
            content.read_into(pos, &mut window)?;
            if self.case_insensitive {
                window.make_ascii_lowercase();
            }

            if let Some(found) = find_in_bytes(&window, &self.pattern) {
                let offset = pos + found as u64;
                self.cursor = offset;
                self.match_length = pattern_len;
                self.outdated = false;
                return Ok(SearchStep::Found(offset));
            }

            // every start position that fits in the window has been checked
            let next = window_end - pattern_len + 1;
            scanned += next - pos;
            pos = next;

            if budget.is_some_and(|budget| scanned >= budget) && pos + pattern_len <= end {
                self.resume = Some(pos);
                return Ok(SearchStep::Pending);
            }
        }

        self.cursor = end;
        self.match_length = 0;
        Ok(SearchStep::NotFound)
    }
}

/// Naive substring search
fn find_in_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let (&first, rest) = needle.split_first()?;
    if needle.len() > haystack.len() {
        return None;
    }
    let last_start = haystack.len() - needle.len();
    let mut i = 0;
    while i <= last_start {
        let skip = haystack[i..=last_start].iter().position(|&b| b == first)?;
        i += skip;
        if &haystack[i + 1..i + needle.len()] == rest {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::change::Serial;
    use crate::model::piece_tree::Segment;
    use crate::model::source::MemorySource;
    use std::sync::Arc;

    fn content(s: &str) -> ContentModel {
        ContentModel::new(Arc::new(MemorySource::from(s)))
    }

    fn context(pattern: &str, options: SearchOptions) -> SearchContext {
        SearchContext::new(pattern.as_bytes(), options, 1024).unwrap()
    }

    #[test]
    fn test_find_in_bytes() {
        assert_eq!(find_in_bytes(b"hello world", b"world"), Some(6));
        assert_eq!(find_in_bytes(b"aaab", b"aab"), Some(1));
        assert_eq!(find_in_bytes(b"abc", b"abcd"), None);
        assert_eq!(find_in_bytes(b"abc", b""), None);
        assert_eq!(find_in_bytes(b"xyz", b"z"), Some(2));
    }

    #[test]
    fn test_successive_matches() {
        let content = content("abc abc abc");
        let mut ctx = context("abc", SearchOptions::default());
        let mut found = Vec::new();
        let mut advance = 0;
        while let SearchStep::Found(at) = ctx.step(&content, advance, None, 4).unwrap() {
            found.push(at);
            advance = 1;
        }
        assert_eq!(found, vec![0, 4, 8]);
        assert_eq!(ctx.offset(), 11);
        assert_eq!(ctx.match_length(), 0);
    }

    #[test]
    fn test_match_across_chunks_and_segments() {
        let mut content = content("xxxxxxxxneedxxxx");
        content
            .insert(10, Segment::edit(Serial::FIRST, Arc::from(&b"EE"[..])))
            .unwrap();
        // "xxxxxxxxneEEedxxxx"
        let mut ctx = context("neeeed", SearchOptions::default().case_insensitive(true));
        assert_eq!(ctx.step(&content, 0, None, 3).unwrap(), SearchStep::Found(8));
    }

    #[test]
    fn test_case_sensitivity() {
        let content = content("Fox fox FOX");
        let mut sensitive = context("FOX", SearchOptions::default());
        assert_eq!(sensitive.step(&content, 0, None, 64).unwrap(), SearchStep::Found(8));

        let mut insensitive = context("FOX", SearchOptions::default().case_insensitive(true));
        assert_eq!(insensitive.step(&content, 0, None, 64).unwrap(), SearchStep::Found(0));
        assert_eq!(insensitive.pattern(), b"fox");
    }

    #[test]
    fn test_explicit_range() {
        let content = content("ab ab ab ab");
        let options = SearchOptions::default().starting_at(1).limited_to(7);
        let mut ctx = context("ab", options);
        // range is [1, 8): "b ab ab"
        assert_eq!(ctx.step(&content, 0, None, 64).unwrap(), SearchStep::Found(3));
        assert_eq!(ctx.step(&content, 1, None, 64).unwrap(), SearchStep::Found(6));
        assert_eq!(ctx.step(&content, 1, None, 64).unwrap(), SearchStep::NotFound);
        assert_eq!(ctx.offset(), 8);
    }

    #[test]
    fn test_budget_yields_pending() {
        let haystack = format!("{}needle", "-".repeat(100));
        let content = content(&haystack);
        let mut ctx = context("needle", SearchOptions::default());

        let mut steps = 0;
        let found = loop {
            steps += 1;
            match ctx.step(&content, 0, Some(16), 8).unwrap() {
                SearchStep::Pending => continue,
                other => break other,
            }
        };
        assert_eq!(found, SearchStep::Found(100));
        assert!(steps > 1);
    }

    #[test]
    fn test_rejects_bad_patterns() {
        assert!(matches!(
            SearchContext::new(b"", SearchOptions::default(), 8),
            Err(EditError::EmptyPattern)
        ));
        assert!(matches!(
            SearchContext::new(b"123456789", SearchOptions::default(), 8),
            Err(EditError::PatternTooLong { len: 9, max: 8 })
        ));
    }

    #[test]
    fn test_reset_rewinds() {
        let content = content("one two one");
        let mut ctx = context("one", SearchOptions::default());
        assert_eq!(ctx.step(&content, 0, None, 64).unwrap(), SearchStep::Found(0));
        assert_eq!(ctx.step(&content, 1, None, 64).unwrap(), SearchStep::Found(8));
        ctx.reset();
        assert_eq!(ctx.offset(), 0);
        assert_eq!(ctx.step(&content, 0, None, 64).unwrap(), SearchStep::Found(0));
    }
}
