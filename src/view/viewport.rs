use crate::model::change::{Effect, Serial};
use std::fmt;

slotmap::new_key_type! {
    /// Handle to a viewport registered with a session.
    pub struct ViewportId;
}

/// Why a viewport callback fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportEventKind {
    Edit,
    Undo,
    Redo,
    Clear,
    /// The viewport itself was moved or resized
    Modified,
    /// Delivered by `Session::notify_changed_viewports`
    Changes,
}

/// What a viewport callback receives. Tells the subscriber *that* its window
/// changed; the bytes are pulled with `Session::refresh_viewport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportNotice {
    pub viewport: ViewportId,
    pub kind: ViewportEventKind,
    pub serial: Option<Serial>,
    /// Start offset after any shift
    pub offset: u64,
    pub capacity: u64,
}

pub type ViewportCallback = Box<dyn FnMut(&ViewportNotice) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportOptions {
    /// Follow the content it was showing when edits happen before it. A
    /// fixed viewport stays at its offset and sees whatever lands there.
    pub floating: bool,
}

impl Default for ViewportOptions {
    fn default() -> Self {
        Self { floating: true }
    }
}

/// A window of `capacity` logical bytes starting at `offset`.
///
/// The materialized data is only as fresh as the last refresh: edits shift
/// the offset and set the stale flag, nothing more.
pub struct Viewport {
    offset: u64,
    capacity: u64,
    data: Vec<u8>,
    stale: bool,
    floating: bool,
    callback: Option<ViewportCallback>,
}

impl Viewport {
    pub(crate) fn new(
        offset: u64,
        capacity: u64,
        options: ViewportOptions,
        callback: Option<ViewportCallback>,
    ) -> Self {
        Self {
            offset,
            capacity,
            data: Vec::new(),
            stale: true,
            floating: options.floating,
            callback,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// End of the window (exclusive)
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.capacity)
    }

    /// Bytes materialized by the last refresh. Shorter than `capacity` near
    /// the end of the content.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_floating(&self) -> bool {
        self.floating
    }

    pub(crate) fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.stale = false;
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub(crate) fn reposition(&mut self, offset: u64, capacity: u64) {
        self.offset = offset;
        self.capacity = capacity;
        self.stale = true;
    }

    /// Adjust for one mutation. Returns true if the window was affected,
    /// i.e. it moved or the bytes it covers changed.
    pub(crate) fn apply_effect(&mut self, effect: &Effect) -> bool {
        let affected = if self.floating {
            self.follow(effect)
        } else {
            self.fixed_overlaps(effect)
        };
        if affected {
            self.stale = true;
        }
        affected
    }

    fn follow(&mut self, effect: &Effect) -> bool {
        let start = self.offset;
        let removed_end = effect.offset + effect.removed;

        if start >= removed_end {
            // Entirely after the replaced range: track the same bytes
            if effect.inserted == effect.removed {
                return false;
            }
            self.offset = start - effect.removed + effect.inserted;
            return true;
        }
        if start >= effect.offset {
            // Starts inside the replaced range; keep it inside the new one
            self.offset = start.min(effect.offset + effect.inserted);
            return true;
        }
        // Starts before the change: affected only if the window reaches it
        self.end() > effect.offset
    }

    fn fixed_overlaps(&self, effect: &Effect) -> bool {
        if effect.inserted != effect.removed {
            // everything from the change onward moved
            return self.end() > effect.offset;
        }
        self.offset < effect.offset + effect.removed && self.end() > effect.offset
    }

    pub(crate) fn notify(&mut self, notice: &ViewportNotice) {
        if let Some(callback) = self.callback.as_mut() {
            callback(notice);
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Viewport")
            .field("offset", &self.offset)
            .field("capacity", &self.capacity)
            .field("data_len", &self.data.len())
            .field("stale", &self.stale)
            .field("floating", &self.floating)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
