//! Byte-level editing engine for arbitrarily large content.
//!
//! A [`Session`] wraps a read-only [`ByteSource`] and layers edits on top of
//! it without copying the source. Edits are recorded as immutable change
//! records that can be undone and redone; viewports and search contexts
//! registered with the session are kept consistent as the content changes.

pub mod config;
pub mod model;
pub mod persistence;
pub mod profile;
pub mod search;
pub mod session;
pub mod view;

pub use config::SessionConfig;
pub use model::change::{serial_or_zero, Change, ChangeEntry, ChangeKind, Effect, Serial};
pub use model::error::{EditError, Result};
pub use model::source::{ByteSource, FileSource, MemorySource};
pub use persistence::ChangeScript;
pub use profile::ByteProfile;
pub use search::{SearchContext, SearchId, SearchOptions, SearchStep};
pub use session::{Session, SessionCallback, SessionCounts, SessionEvent, SubscriberId};
pub use view::viewport::{
    Viewport, ViewportCallback, ViewportEventKind, ViewportId, ViewportNotice, ViewportOptions,
};
