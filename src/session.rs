//! The editing session: one content model, one change log, and the
//! viewports and search contexts watching them.
//!
//! Every mutation goes through the same path: validate, build the new
//! segment tree, record the change, then push notifications. Viewports are
//! shifted and flagged stale during the push; their bytes are only re-read
//! when someone calls `refresh_viewport`. The session is single-writer; wrap
//! it in a lock to share it between threads.

use crate::config::SessionConfig;
use crate::model::change::{Change, Effect, Serial};
use crate::model::content::ContentModel;
use crate::model::error::{EditError, Result};
use crate::model::history::ChangeLog;
use crate::model::piece_tree::{Segment, TreeStats};
use crate::model::source::{ByteSource, FileSource, MemorySource};
use crate::profile::ByteProfile;
use crate::search::{SearchContext, SearchId, SearchOptions, SearchStep};
use crate::view::viewport::{
    Viewport, ViewportCallback, ViewportEventKind, ViewportId, ViewportNotice, ViewportOptions,
};
use serde::Serialize;
use slotmap::SlotMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

slotmap::new_key_type! {
    /// Handle to a session event subscription.
    pub struct SubscriberId;
}

/// Session-wide notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Edit { serial: Serial, effect: Effect },
    Undo { serial: Serial, effect: Effect },
    Redo { serial: Serial, effect: Effect },
    Clear,
    Save { path: PathBuf },
    TransactionBegin,
    TransactionEnd { changes: usize },
}

pub type SessionCallback = Box<dyn FnMut(&SessionEvent) + Send>;

/// Snapshot of session bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub computed_length: u64,
    pub applied_changes: usize,
    pub undone_changes: usize,
    pub viewports: usize,
    pub search_contexts: usize,
    pub segments: usize,
    pub in_transaction: bool,
    pub changes_paused: bool,
}

pub struct Session {
    config: SessionConfig,
    content: ContentModel,
    log: ChangeLog,
    viewports: SlotMap<ViewportId, Viewport>,
    searches: SlotMap<SearchId, SearchContext>,
    subscribers: SlotMap<SubscriberId, SessionCallback>,
    changes_paused: bool,
    viewport_events_paused: bool,
}

impl Session {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self::with_config(source, SessionConfig::default())
    }

    pub fn with_config(source: Arc<dyn ByteSource>, config: SessionConfig) -> Self {
        tracing::debug!("Session::new: source of {} bytes", source.len());
        Self {
            config,
            content: ContentModel::new(source),
            log: ChangeLog::new(),
            viewports: SlotMap::with_key(),
            searches: SlotMap::with_key(),
            subscribers: SlotMap::with_key(),
            changes_paused: false,
            viewport_events_paused: false,
        }
    }

    /// Session over an in-memory copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(Arc::new(MemorySource::from(bytes)))
    }

    /// Session over an empty source
    pub fn empty() -> Self {
        Self::new(Arc::new(MemorySource::default()))
    }

    /// Session over a file, read lazily
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::new(Arc::new(FileSource::open(path)?)))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        self.content.source()
    }

    pub fn content(&self) -> &ContentModel {
        &self.content
    }

    pub fn logical_length(&self) -> u64 {
        self.content.len()
    }

    pub fn len(&self) -> u64 {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn stats(&self) -> TreeStats {
        self.content.stats()
    }

    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.content.read(offset, len)
    }

    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.content.read_into(offset, buf)
    }

    /// Whole logical content. Only sensible for small sessions.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.content.read(0, self.content.len())
    }

    // Mutations

    fn ensure_changes_allowed(&self) -> Result<()> {
        if self.changes_paused {
            tracing::warn!("Session: rejected change while changes are paused");
            return Err(EditError::ChangesPaused);
        }
        Ok(())
    }

    /// Insert `data` at `offset` (0 ≤ offset ≤ length).
    pub fn insert(&mut self, offset: u64, data: &[u8]) -> Result<Serial> {
        self.ensure_changes_allowed()?;
        if data.is_empty() {
            return Err(EditError::EmptyEdit);
        }
        self.content.check_offset(offset)?;

        let serial = self.log.allocate_serial();
        let payload: Arc<[u8]> = Arc::from(data);
        self.content
            .insert(offset, Segment::edit(serial, Arc::clone(&payload)))?;
        let change = Change::insert(serial, offset, payload, self.log.transaction());
        Ok(self.record(change))
    }

    /// Overwrite bytes starting at `offset`. Bytes that run past the end of
    /// the content are appended, so `offset == length` is a plain append.
    pub fn overwrite(&mut self, offset: u64, data: &[u8]) -> Result<Serial> {
        self.ensure_changes_allowed()?;
        if data.is_empty() {
            return Err(EditError::EmptyEdit);
        }
        self.content.check_offset(offset)?;

        let serial = self.log.allocate_serial();
        let payload: Arc<[u8]> = Arc::from(data);
        let displaced = self
            .content
            .overwrite(offset, Segment::edit(serial, Arc::clone(&payload)))?;
        let change = Change::overwrite(serial, offset, payload, displaced, self.log.transaction());
        Ok(self.record(change))
    }

    /// Delete `len` bytes at `offset`.
    pub fn delete(&mut self, offset: u64, len: u64) -> Result<Serial> {
        self.ensure_changes_allowed()?;
        if len == 0 {
            return Err(EditError::EmptyEdit);
        }
        self.content.check_range(offset, len)?;

        let serial = self.log.allocate_serial();
        let displaced = self.content.delete(offset, len)?;
        let change = Change::delete(serial, offset, displaced, self.log.transaction());
        Ok(self.record(change))
    }

    /// Replace `len` bytes at `offset` with `data` as one undoable step.
    /// Returns the serial of the last change made.
    pub fn replace(&mut self, offset: u64, len: u64, data: &[u8]) -> Result<Serial> {
        self.ensure_changes_allowed()?;
        self.content.check_range(offset, len)?;
        if len == data.len() as u64 {
            return self.overwrite(offset, data);
        }
        if data.is_empty() {
            return self.delete(offset, len);
        }
        if len == 0 {
            return self.insert(offset, data);
        }
        self.grouped(|session| {
            session.delete(offset, len)?;
            session.insert(offset, data)
        })
    }

    fn record(&mut self, change: Change) -> Serial {
        let serial = change.serial();
        let effect = change.effect();
        tracing::trace!(
            "Session: applied {:?} #{} at {} ({:+} bytes)",
            change.kind(),
            serial,
            effect.offset,
            effect.delta()
        );
        let discarded = self.log.apply(change);
        if discarded > 0 {
            tracing::trace!("Session: discarded {} redoable changes", discarded);
        }
        self.propagate(effect, ViewportEventKind::Edit, Some(serial));
        self.emit(&SessionEvent::Edit { serial, effect });
        serial
    }

    /// Revert the most recent change (or transaction). Returns the serial of
    /// the most recent change reverted.
    pub fn undo(&mut self) -> Result<Serial> {
        self.ensure_changes_allowed()?;
        if self.log.in_transaction() {
            return Err(EditError::TransactionState(
                "cannot undo while a transaction is open",
            ));
        }
        let group: Vec<Arc<Change>> = self.log.undo_group().to_vec();
        let Some(latest) = group.last().map(|change| change.serial()) else {
            return Err(EditError::NothingToUndo);
        };

        let mut content = self.content.clone();
        let mut effects = Vec::with_capacity(group.len());
        for change in group.iter().rev() {
            effects.push((change.serial(), content.revert_change(change)?));
        }

        self.content = content;
        self.log.commit_undo(group.len());
        tracing::trace!("Session: undid {} change(s) ending at #{}", group.len(), latest);
        for (serial, effect) in effects {
            self.propagate(effect, ViewportEventKind::Undo, Some(serial));
            self.emit(&SessionEvent::Undo { serial, effect });
        }
        Ok(latest)
    }

    /// Re-apply the most recently undone change (or transaction). Returns the
    /// serial of the last change re-applied.
    pub fn redo(&mut self) -> Result<Serial> {
        self.ensure_changes_allowed()?;
        if self.log.in_transaction() {
            return Err(EditError::TransactionState(
                "cannot redo while a transaction is open",
            ));
        }
        let group: Vec<Arc<Change>> = self.log.redo_group().to_vec();
        let Some(latest) = group.first().map(|change| change.serial()) else {
            return Err(EditError::NothingToRedo);
        };

        let mut content = self.content.clone();
        let mut effects = Vec::with_capacity(group.len());
        for change in group.iter().rev() {
            effects.push((change.serial(), content.apply_change(change)?));
        }

        self.content = content;
        self.log.commit_redo(group.len());
        tracing::trace!("Session: redid {} change(s) ending at #{}", group.len(), latest);
        for (serial, effect) in effects {
            self.propagate(effect, ViewportEventKind::Redo, Some(serial));
            self.emit(&SessionEvent::Redo { serial, effect });
        }
        Ok(latest)
    }

    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }

    /// Drop all changes and return to the original source content.
    pub fn clear_changes(&mut self) -> Result<()> {
        self.ensure_changes_allowed()?;
        tracing::debug!(
            "Session: clearing {} applied and {} undone changes",
            self.log.applied_count(),
            self.log.undone_count()
        );
        self.content.reset();
        self.log.clear();

        let deliver = !self.viewport_events_paused;
        for (id, viewport) in self.viewports.iter_mut() {
            viewport.mark_stale();
            if deliver {
                let notice = notice(id, viewport, ViewportEventKind::Clear, None);
                viewport.notify(&notice);
            }
        }
        for (_, search) in self.searches.iter_mut() {
            search.mark_outdated();
        }
        self.emit(&SessionEvent::Clear);
        Ok(())
    }

    /// Replace the source and forget all history, e.g. after saving over
    /// the file the session was reading.
    pub(crate) fn rebase_onto(&mut self, source: Arc<dyn ByteSource>) {
        self.content = ContentModel::new(source);
        self.log.clear();
        for (_, viewport) in self.viewports.iter_mut() {
            viewport.mark_stale();
        }
        for (_, search) in self.searches.iter_mut() {
            search.mark_outdated();
        }
    }

    // Transactions

    /// Group subsequent changes so one undo reverts them all.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.log.begin_transaction()?;
        self.emit(&SessionEvent::TransactionBegin);
        Ok(())
    }

    /// Close the open transaction, returning how many changes it holds.
    pub fn end_transaction(&mut self) -> Result<usize> {
        let changes = self.log.end_transaction()?;
        self.emit(&SessionEvent::TransactionEnd { changes });
        Ok(changes)
    }

    pub fn in_transaction(&self) -> bool {
        self.log.in_transaction()
    }

    /// Run `f` inside a transaction unless one is already open. If `f`
    /// fails, whatever it applied is reverted and the redo history it
    /// displaced is put back.
    fn grouped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.log.in_transaction() {
            return f(self);
        }
        let redo = self.log.redo_snapshot();
        self.begin_transaction()?;
        let result = f(self);
        let applied = self.end_transaction()?;
        if result.is_err() && applied > 0 {
            tracing::debug!("Session: rolling back {} change(s) of a failed group", applied);
            self.undo()?;
            self.log.restore_redo(redo);
        }
        result
    }

    // Pausing

    /// Reject every mutation until `resume_changes`.
    pub fn pause_changes(&mut self) {
        self.changes_paused = true;
    }

    pub fn resume_changes(&mut self) {
        self.changes_paused = false;
    }

    pub fn changes_paused(&self) -> bool {
        self.changes_paused
    }

    /// Keep shifting and flagging viewports but stop invoking callbacks.
    pub fn pause_viewport_events(&mut self) {
        self.viewport_events_paused = true;
    }

    pub fn resume_viewport_events(&mut self) {
        self.viewport_events_paused = false;
    }

    pub fn viewport_events_paused(&self) -> bool {
        self.viewport_events_paused
    }

    /// Invoke the callback of every stale viewport. Returns how many
    /// viewports are stale.
    pub fn notify_changed_viewports(&mut self) -> usize {
        let mut notified = 0;
        for (id, viewport) in self.viewports.iter_mut() {
            if viewport.is_stale() {
                let notice = notice(id, viewport, ViewportEventKind::Changes, None);
                viewport.notify(&notice);
                notified += 1;
            }
        }
        notified
    }

    // Notification

    fn propagate(&mut self, effect: Effect, kind: ViewportEventKind, serial: Option<Serial>) {
        let deliver = !self.viewport_events_paused;
        for (id, viewport) in self.viewports.iter_mut() {
            if viewport.apply_effect(&effect) {
                tracing::trace!(
                    "Session: viewport {:?} affected, now at {}",
                    id,
                    viewport.offset()
                );
                if deliver {
                    let notice = notice(id, viewport, kind, serial);
                    viewport.notify(&notice);
                }
            }
        }
        for (_, search) in self.searches.iter_mut() {
            search.mark_outdated();
        }
    }

    fn emit(&mut self, event: &SessionEvent) {
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(event);
        }
    }

    pub(crate) fn emit_saved(&mut self, path: PathBuf) {
        self.emit(&SessionEvent::Save { path });
    }

    pub fn subscribe(&mut self, callback: SessionCallback) -> SubscriberId {
        self.subscribers.insert(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> Result<()> {
        self.subscribers
            .remove(id)
            .map(|_| ())
            .ok_or(EditError::InvalidHandle)
    }

    // Viewports

    fn check_capacity(&self, capacity: u64) -> Result<()> {
        let max = self.config.max_viewport_capacity;
        if capacity == 0 || capacity > max {
            return Err(EditError::InvalidCapacity { capacity, max });
        }
        Ok(())
    }

    /// Register a floating viewport without a callback.
    pub fn register_viewport(&mut self, offset: u64, capacity: u64) -> Result<ViewportId> {
        self.register_viewport_with(offset, capacity, ViewportOptions::default(), None)
    }

    /// Register a viewport. It starts stale; the first refresh materializes
    /// it. The offset may lie past the current end of the content.
    pub fn register_viewport_with(
        &mut self,
        offset: u64,
        capacity: u64,
        options: ViewportOptions,
        callback: Option<ViewportCallback>,
    ) -> Result<ViewportId> {
        self.check_capacity(capacity)?;
        let id = self
            .viewports
            .insert(Viewport::new(offset, capacity, options, callback));
        tracing::trace!("Session: registered viewport {:?} at {}+{}", id, offset, capacity);
        Ok(id)
    }

    pub fn unregister_viewport(&mut self, id: ViewportId) -> Result<()> {
        self.viewports
            .remove(id)
            .map(|_| ())
            .ok_or(EditError::InvalidHandle)
    }

    pub fn viewport(&self, id: ViewportId) -> Result<&Viewport> {
        self.viewports.get(id).ok_or(EditError::InvalidHandle)
    }

    pub fn viewport_ids(&self) -> impl Iterator<Item = ViewportId> + '_ {
        self.viewports.keys()
    }

    pub fn viewport_has_changes(&self, id: ViewportId) -> Result<bool> {
        self.viewport(id).map(Viewport::is_stale)
    }

    /// Move or resize a viewport. Marks it stale and fires its callback.
    pub fn modify_viewport(&mut self, id: ViewportId, offset: u64, capacity: u64) -> Result<()> {
        self.check_capacity(capacity)?;
        let deliver = !self.viewport_events_paused;
        let viewport = self.viewports.get_mut(id).ok_or(EditError::InvalidHandle)?;
        viewport.reposition(offset, capacity);
        if deliver {
            let notice = notice(id, viewport, ViewportEventKind::Modified, None);
            viewport.notify(&notice);
        }
        Ok(())
    }

    /// Re-read a viewport's window from the content model.
    pub fn refresh_viewport(&mut self, id: ViewportId) -> Result<&[u8]> {
        let viewport = self.viewports.get_mut(id).ok_or(EditError::InvalidHandle)?;
        let length = self.content.len();
        let start = viewport.offset().min(length);
        let end = viewport.end().min(length);
        let data = self.content.read(start, end - start)?;
        viewport.set_data(data);
        Ok(viewport.data())
    }

    /// Viewport bytes, refreshing first if the window is stale.
    pub fn viewport_data(&mut self, id: ViewportId) -> Result<&[u8]> {
        if self.viewport(id)?.is_stale() {
            return self.refresh_viewport(id);
        }
        self.viewport(id).map(Viewport::data)
    }

    // Search

    pub fn create_search_context(
        &mut self,
        pattern: &[u8],
        options: SearchOptions,
    ) -> Result<SearchId> {
        self.content.check_offset(options.offset)?;
        let context = SearchContext::new(pattern, options, self.config.max_pattern_length)?;
        Ok(self.searches.insert(context))
    }

    pub fn search_context(&self, id: SearchId) -> Result<&SearchContext> {
        self.searches.get(id).ok_or(EditError::InvalidHandle)
    }

    pub fn destroy_search_context(&mut self, id: SearchId) -> Result<()> {
        self.searches
            .remove(id)
            .map(|_| ())
            .ok_or(EditError::InvalidHandle)
    }

    /// Advance the cursor by `advance` and scan for the next match. On a
    /// match the context's offset is the match start; otherwise it is the
    /// end of the range.
    pub fn next_match(&mut self, id: SearchId, advance: u64) -> Result<bool> {
        let step = self.search_step(id, advance, None)?;
        Ok(matches!(step, SearchStep::Found(_)))
    }

    /// Like `next_match` but gives up after scanning `budget` positions,
    /// returning `Pending`. A later call resumes the scan.
    pub fn search_step(
        &mut self,
        id: SearchId,
        advance: u64,
        budget: Option<u64>,
    ) -> Result<SearchStep> {
        let chunk_size = self.config.search_chunk_size;
        let context = self.searches.get_mut(id).ok_or(EditError::InvalidHandle)?;
        context.step(&self.content, advance, budget, chunk_size)
    }

    pub fn reset_search(&mut self, id: SearchId) -> Result<()> {
        self.searches
            .get_mut(id)
            .ok_or(EditError::InvalidHandle)?
            .reset();
        Ok(())
    }

    /// Offsets of non-overlapping matches, at most `limit` of them.
    pub fn search_all(
        &self,
        pattern: &[u8],
        options: SearchOptions,
        limit: Option<usize>,
    ) -> Result<Vec<u64>> {
        self.content.check_offset(options.offset)?;
        let mut context = SearchContext::new(pattern, options, self.config.max_pattern_length)?;
        let advance = pattern.len() as u64;
        let mut matches = Vec::new();
        let mut next_advance = 0;
        while limit.is_none_or(|limit| matches.len() < limit) {
            match context.step(
                &self.content,
                next_advance,
                None,
                self.config.search_chunk_size,
            )? {
                SearchStep::Found(offset) => matches.push(offset),
                SearchStep::NotFound | SearchStep::Pending => break,
            }
            next_advance = advance;
        }
        Ok(matches)
    }

    /// Replace every non-overlapping match as a single undoable step.
    /// Returns the number of replacements.
    pub fn replace_all(
        &mut self,
        pattern: &[u8],
        replacement: &[u8],
        options: SearchOptions,
    ) -> Result<usize> {
        self.ensure_changes_allowed()?;
        let matches = self.search_all(pattern, options, None)?;
        if matches.is_empty() {
            return Ok(0);
        }
        let len = pattern.len() as u64;
        self.grouped(|session| {
            // back to front so earlier offsets stay valid
            for &offset in matches.iter().rev() {
                session.replace(offset, len, replacement)?;
            }
            Ok(())
        })?;
        tracing::debug!("Session: replaced {} occurrence(s)", matches.len());
        Ok(matches.len())
    }

    /// Replace the first match in range. Returns the offset just past the
    /// replacement, where the next search should start, or `None` if there
    /// was no match.
    pub fn replace_next(
        &mut self,
        pattern: &[u8],
        replacement: &[u8],
        options: SearchOptions,
    ) -> Result<Option<u64>> {
        self.ensure_changes_allowed()?;
        let Some(&offset) = self.search_all(pattern, options, Some(1))?.first() else {
            return Ok(None);
        };
        self.replace(offset, pattern.len() as u64, replacement)?;
        Ok(Some(offset + replacement.len() as u64))
    }

    // Inspection

    /// Byte histogram of `[offset, offset + length)`; `length` 0 means to
    /// the end of the content.
    pub fn byte_profile(&self, offset: u64, length: u64) -> Result<ByteProfile> {
        self.content.check_offset(offset)?;
        let length = if length == 0 {
            self.content.len() - offset
        } else {
            length
        };
        self.content.check_range(offset, length)?;

        let mut profile = ByteProfile::new();
        let chunk = self.config.search_chunk_size.max(1) as u64;
        let mut buf = Vec::new();
        let mut pos = offset;
        let end = offset + length;
        while pos < end {
            let n = chunk.min(end - pos);
            buf.resize(n as usize, 0);
            self.content.read_into(pos, &mut buf)?;
            profile.add(&buf);
            pos += n;
        }
        Ok(profile)
    }

    pub fn counts(&self) -> SessionCounts {
        SessionCounts {
            computed_length: self.content.len(),
            applied_changes: self.log.applied_count(),
            undone_changes: self.log.undone_count(),
            viewports: self.viewports.len(),
            search_contexts: self.searches.len(),
            segments: self.content.tree().piece_count(),
            in_transaction: self.log.in_transaction(),
            changes_paused: self.changes_paused,
        }
    }

    pub fn change(&self, serial: Serial) -> Option<&Change> {
        self.log.find(serial)
    }

    pub fn last_change(&self) -> Option<&Change> {
        self.log.last_change()
    }

    pub fn last_undo(&self) -> Option<&Change> {
        self.log.last_undo()
    }

    /// Changes in effect, oldest first. Replaying them against the original
    /// source reproduces the current content.
    pub fn active_changes(&self) -> impl DoubleEndedIterator<Item = &Change> + ExactSizeIterator {
        self.log.active()
    }
}

fn notice(
    id: ViewportId,
    viewport: &Viewport,
    kind: ViewportEventKind,
    serial: Option<Serial>,
) -> ViewportNotice {
    ViewportNotice {
        viewport: id,
        kind,
        serial,
        offset: viewport.offset(),
        capacity: viewport.capacity(),
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("length", &self.content.len())
            .field("applied_changes", &self.log.applied_count())
            .field("undone_changes", &self.log.undone_count())
            .field("viewports", &self.viewports.len())
            .field("search_contexts", &self.searches.len())
            .finish()
    }
}
