// End-to-end behaviour of the session API

mod common;

use byteweave::{
    serial_or_zero, ByteSource, EditError, SearchOptions, SearchStep, Session, SessionConfig,
    ViewportOptions,
};
use common::{session, text};
use std::io;
use std::sync::Arc;

const FOX: &str = "The quick brown fox\n";

#[test]
fn test_insert_undo_overwrite_search_scenario() {
    let mut s = session(FOX);
    assert_eq!(s.logical_length(), 20);

    s.insert(16, b"red ").unwrap();
    assert_eq!(s.logical_length(), 24);
    assert_eq!(s.read(16, 4).unwrap(), b"red ");
    assert_eq!(s.read(20, 3).unwrap(), b"fox");

    s.undo().unwrap();
    assert_eq!(s.logical_length(), 20);
    assert_eq!(s.read(0, 20).unwrap(), FOX.as_bytes());

    s.overwrite(4, b"slow ").unwrap();
    assert_eq!(s.read(0, 9).unwrap(), b"The slow ");
    assert_eq!(text(&s), "The slow  brown fox\n");

    let id = s
        .create_search_context(b"FOX", SearchOptions::default().case_insensitive(true))
        .unwrap();
    assert!(s.next_match(id, 0).unwrap());
    assert_eq!(s.search_context(id).unwrap().offset(), 16);
}

#[test]
fn test_delete_undo_scenario() {
    let mut s = session(FOX);
    s.delete(0, 4).unwrap();
    assert_eq!(s.read(0, 5).unwrap(), b"quick");
    s.undo().unwrap();
    assert_eq!(s.logical_length(), 20);
    assert_eq!(text(&s), FOX);
}

#[test]
fn test_insert_preserves_surroundings() {
    let original = b"0123456789abcdef";
    for offset in 0..=original.len() as u64 {
        let mut s = Session::from_bytes(original);
        s.insert(offset, b"XYZ").unwrap();
        let o = offset as usize;
        assert_eq!(s.read(offset, 3).unwrap(), b"XYZ");
        assert_eq!(s.read(0, offset).unwrap(), &original[..o]);
        assert_eq!(s.read(offset + 3, 16 - offset).unwrap(), &original[o..]);
    }
}

#[test]
fn test_serial_contract() {
    let mut s = session("abc");
    let first = s.insert(0, b"x");
    let failed = s.insert(99, b"x");
    assert_eq!(serial_or_zero(&first), 1);
    assert_eq!(serial_or_zero(&failed), 0);

    s.undo().unwrap();
    s.redo().unwrap();
    let next = s.delete(0, 1).unwrap();
    assert_eq!(next.get(), 2);
}

#[test]
fn test_apply_after_undo_discards_redo() {
    let mut s = session("abcdef");
    s.insert(0, b"1").unwrap();
    s.insert(0, b"2").unwrap();
    s.undo().unwrap();
    s.undo().unwrap();
    assert_eq!(s.counts().undone_changes, 2);

    s.overwrite(0, b"Z").unwrap();
    assert!(matches!(s.redo(), Err(EditError::NothingToRedo)));
    assert_eq!(text(&s), "Zbcdef");
}

#[test]
fn test_errors_leave_state_untouched() {
    let mut s = session("abcdef");
    s.insert(3, b"--").unwrap();
    let before = text(&s);
    let counts = s.counts();

    assert!(matches!(
        s.insert(9, b"x"),
        Err(EditError::InvalidOffset { offset: 9, length: 8 })
    ));
    assert!(matches!(
        s.overwrite(9, b"x"),
        Err(EditError::InvalidOffset { .. })
    ));
    assert!(matches!(
        s.delete(6, 3),
        Err(EditError::RangeOutOfBounds { offset: 6, len: 3, length: 8 })
    ));
    assert!(matches!(s.read(7, 2), Err(EditError::RangeOutOfBounds { .. })));

    assert_eq!(text(&s), before);
    assert_eq!(s.counts(), counts);
}

#[derive(Debug)]
struct FlakySource;

impl ByteSource for FlakySource {
    fn len(&self) -> u64 {
        100
    }

    fn read_into(&self, offset: u64, _buf: &mut [u8]) -> io::Result<()> {
        Err(io::Error::other(format!("disk gone at {offset}")))
    }
}

#[test]
fn test_source_failures_are_surfaced() {
    let mut s = Session::new(Arc::new(FlakySource));
    s.insert(0, b"ok").unwrap();
    assert_eq!(s.read(0, 2).unwrap(), b"ok");
    assert!(matches!(s.read(0, 4), Err(EditError::SourceRead(_))));

    // edits never read the source
    s.delete(10, 50).unwrap();
    s.undo().unwrap();
    assert_eq!(s.logical_length(), 102);
}

#[test]
fn test_viewports_follow_inserts() {
    let mut s = session("0123456789abcdefghij");
    let before = s.register_viewport(2, 4).unwrap();
    let at = s.register_viewport(8, 4).unwrap();
    let after = s.register_viewport(12, 4).unwrap();
    for id in [before, at, after] {
        s.refresh_viewport(id).unwrap();
    }

    s.insert(8, b"+++").unwrap();
    assert_eq!(s.viewport(before).unwrap().offset(), 2);
    assert!(!s.viewport_has_changes(before).unwrap());
    assert_eq!(s.viewport(at).unwrap().offset(), 11);
    assert_eq!(s.viewport(after).unwrap().offset(), 15);

    // the tracked bytes are unchanged
    assert_eq!(s.refresh_viewport(at).unwrap(), b"89ab");
    assert_eq!(s.refresh_viewport(after).unwrap(), b"cdef");
}

#[test]
fn test_viewport_overlapping_overwrite_is_stale_only() {
    let mut s = session("0123456789");
    let vp = s.register_viewport(2, 4).unwrap();
    let tail = s.register_viewport(7, 3).unwrap();
    s.refresh_viewport(vp).unwrap();
    s.refresh_viewport(tail).unwrap();

    s.overwrite(4, b"##").unwrap();
    assert!(s.viewport_has_changes(vp).unwrap());
    assert!(!s.viewport_has_changes(tail).unwrap());
    assert_eq!(s.viewport(vp).unwrap().data(), b"2345");
    assert_eq!(s.refresh_viewport(vp).unwrap(), b"23##");
}

#[test]
fn test_fixed_viewport_sees_shifted_content() {
    let mut s = session("0123456789");
    let vp = s
        .register_viewport_with(4, 3, ViewportOptions { floating: false }, None)
        .unwrap();
    s.refresh_viewport(vp).unwrap();
    s.delete(0, 2).unwrap();
    assert_eq!(s.viewport(vp).unwrap().offset(), 4);
    assert_eq!(s.refresh_viewport(vp).unwrap(), b"678");
}

#[test]
fn test_modify_viewport() {
    let mut s = session("0123456789");
    let vp = s.register_viewport(0, 2).unwrap();
    s.refresh_viewport(vp).unwrap();
    s.modify_viewport(vp, 5, 3).unwrap();
    assert!(s.viewport_has_changes(vp).unwrap());
    assert_eq!(s.refresh_viewport(vp).unwrap(), b"567");
    assert!(s.modify_viewport(vp, 0, 0).is_err());
}

#[test]
fn test_successive_matches_are_monotonic() {
    let mut s = session("abababababab");
    s.insert(5, b"ab").unwrap();
    let id = s
        .create_search_context(b"aba", SearchOptions::default())
        .unwrap();
    let mut last = None;
    let mut advance = 0;
    while s.next_match(id, advance).unwrap() {
        let offset = s.search_context(id).unwrap().offset();
        if let Some(prev) = last {
            assert!(offset > prev);
        }
        last = Some(offset);
        advance = 1;
    }
    assert_eq!(s.search_context(id).unwrap().offset(), s.logical_length());
}

#[test]
fn test_tracked_search_end_after_shrink() {
    let mut s = session("needle needle needle");
    let id = s
        .create_search_context(b"needle", SearchOptions::default())
        .unwrap();
    assert!(s.next_match(id, 0).unwrap());
    assert!(s.next_match(id, 1).unwrap());
    assert_eq!(s.search_context(id).unwrap().offset(), 7);

    s.delete(5, 15).unwrap();
    assert!(!s.next_match(id, 1).unwrap());
    // clamped to the new end
    assert_eq!(s.search_context(id).unwrap().offset(), 5);
}

#[test]
fn test_zero_search_length_tracks_content() {
    let mut s = session("ab ab");
    let id = s
        .create_search_context(b"ab", SearchOptions::default().limited_to(0))
        .unwrap();
    assert_eq!(s.search_context(id).unwrap().range_length(), None);

    s.insert(5, b" ab").unwrap();
    let mut found = Vec::new();
    let mut advance = 0;
    while s.next_match(id, advance).unwrap() {
        found.push(s.search_context(id).unwrap().offset());
        advance = 1;
    }
    assert_eq!(found, vec![0, 3, 6]);
    assert_eq!(s.search_context(id).unwrap().offset(), 8);
}

#[test]
fn test_bounded_search_steps() {
    common::init_tracing();
    let config = SessionConfig {
        search_chunk_size: 16,
        ..SessionConfig::default()
    };
    let mut content = vec![b'.'; 4096];
    content.extend_from_slice(b"target");
    let mut s = Session::with_config(
        Arc::new(byteweave::MemorySource::from(content)),
        config,
    );
    let id = s
        .create_search_context(b"TARGET", SearchOptions::default().case_insensitive(true))
        .unwrap();

    let mut pending = 0;
    loop {
        match s.search_step(id, 0, Some(256)).unwrap() {
            SearchStep::Pending => pending += 1,
            SearchStep::Found(offset) => {
                assert_eq!(offset, 4096);
                break;
            }
            SearchStep::NotFound => panic!("pattern not found"),
        }
    }
    assert!(pending >= 10);
}

#[test]
fn test_search_all_respects_limit_and_range() {
    let s = session("x.x.x.x.x");
    assert_eq!(
        s.search_all(b"x", SearchOptions::default(), None).unwrap(),
        vec![0, 2, 4, 6, 8]
    );
    assert_eq!(
        s.search_all(b"x", SearchOptions::default(), Some(2)).unwrap(),
        vec![0, 2]
    );
    let options = SearchOptions::default().starting_at(3).limited_to(4);
    assert_eq!(s.search_all(b"x", options, None).unwrap(), vec![4, 6]);
}

#[test]
fn test_search_all_is_non_overlapping() {
    let s = session("aaaaa");
    assert_eq!(
        s.search_all(b"aa", SearchOptions::default(), None).unwrap(),
        vec![0, 2]
    );
}

#[test]
fn test_transaction_with_no_changes() {
    let mut s = session("abc");
    s.begin_transaction().unwrap();
    assert!(s.in_transaction());
    assert_eq!(s.end_transaction().unwrap(), 0);
    assert!(matches!(s.undo(), Err(EditError::NothingToUndo)));
    assert!(matches!(
        s.end_transaction(),
        Err(EditError::TransactionState(_))
    ));
}

#[test]
fn test_change_lookup() {
    let mut s = session("abcdef");
    let a = s.insert(0, b"1").unwrap();
    let b = s.delete(3, 2).unwrap();
    s.undo().unwrap();

    assert_eq!(s.change(a).unwrap().offset(), 0);
    assert_eq!(s.change(b).unwrap().length(), 2);
    assert_eq!(s.last_change().unwrap().serial(), a);
    assert_eq!(s.last_undo().unwrap().serial(), b);
    assert_eq!(s.active_changes().count(), 1);
}

#[test]
fn test_counts_serialize() {
    let mut s = session("abc");
    s.insert(0, b"z").unwrap();
    let json = serde_json::to_value(s.counts()).unwrap();
    assert_eq!(json["computed_length"], 4);
    assert_eq!(json["applied_changes"], 1);
}

#[test]
fn test_large_edit_history_stays_balanced() {
    let mut s = Session::from_bytes(&vec![b'-'; 10_000]);
    for i in 0..2_000u64 {
        s.insert((i * 7) % s.logical_length(), b"+").unwrap();
    }
    let stats = s.stats();
    assert_eq!(stats.total_bytes, 12_000);
    // a flat list would have depth ~ piece_count
    assert!(stats.depth <= 2 * (usize::BITS - stats.piece_count.leading_zeros()) as usize);
    for _ in 0..2_000 {
        s.undo().unwrap();
    }
    assert_eq!(s.read_all().unwrap(), vec![b'-'; 10_000]);
}
