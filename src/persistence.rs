//! Getting a session's work onto disk.
//!
//! Two forms are supported: a change script (the active change records as
//! JSON Lines, replayable onto a fresh session over the same source) and a
//! snapshot of the logical content written through a temporary file.

use crate::model::change::{ChangeEntry, ChangeKind};
use crate::model::piece_tree::Segment;
use crate::model::source::FileSource;
use crate::session::Session;
use anyhow::Context;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ordered list of the changes in effect in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeScript {
    entries: Vec<ChangeEntry>,
}

impl ChangeScript {
    pub fn from_session(session: &Session) -> Self {
        Self {
            entries: session.active_changes().map(|c| c.to_entry()).collect(),
        }
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write one JSON object per line
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create change script {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            let json = serde_json::to_string(entry)?;
            writeln!(writer, "{json}")?;
        }
        writer.flush()?;
        tracing::debug!(
            "Saved {} change(s) to {}",
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open change script {}", path.display()))?;
        let reader = std::io::BufReader::new(file);

        let mut entries = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ChangeEntry = serde_json::from_str(&line).with_context(|| {
                format!("Malformed change on line {} of {}", index + 1, path.display())
            })?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Apply every entry to `session` in order. Returns the number applied.
    /// The session should be over the same source the script was taken from.
    pub fn replay(&self, session: &mut Session) -> anyhow::Result<usize> {
        for entry in &self.entries {
            let result = match entry.kind {
                ChangeKind::Insert => session.insert(entry.offset, payload(entry)?),
                ChangeKind::Overwrite => session.overwrite(entry.offset, payload(entry)?),
                ChangeKind::Delete => session.delete(entry.offset, entry.length),
            };
            result.with_context(|| {
                format!(
                    "Failed to replay change #{} ({:?} at {})",
                    entry.serial, entry.kind, entry.offset
                )
            })?;
        }
        Ok(self.entries.len())
    }
}

fn payload(entry: &ChangeEntry) -> anyhow::Result<&[u8]> {
    let data = entry
        .data
        .as_deref()
        .with_context(|| format!("Change #{} has no payload", entry.serial))?;
    anyhow::ensure!(
        data.len() as u64 == entry.length,
        "Change #{} payload is {} bytes, expected {}",
        entry.serial,
        data.len(),
        entry.length
    );
    Ok(data)
}

/// `dir/stem-N.ext` for the smallest N that does not exist yet.
fn unique_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u64..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl Session {
    /// Write the logical content to `path`.
    ///
    /// The bytes are streamed segment by segment into a temporary file next
    /// to the destination, which is then renamed into place. If `path`
    /// exists and `overwrite` is false, a fresh `stem-N.ext` name is used
    /// instead. Returns the path actually written.
    ///
    /// Saving over the file the session reads from reopens it as the new
    /// source and clears the change history.
    pub fn save_to<P: AsRef<Path>>(&mut self, path: P, overwrite: bool) -> anyhow::Result<PathBuf> {
        let requested = path.as_ref();
        let dest = if !overwrite && requested.exists() {
            unique_path(requested)
        } else {
            requested.to_path_buf()
        };
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let replaces_source = self
            .source()
            .backing_path()
            .is_some_and(|source| same_file(source, &dest));
        let original_metadata = std::fs::metadata(&dest).ok();

        let temp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            self.write_content(&mut writer)
                .with_context(|| format!("Failed to write {}", temp.path().display()))?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        if let Some(metadata) = original_metadata {
            // keep the mode of the file being replaced
            std::fs::set_permissions(temp.path(), metadata.permissions())?;
        }
        temp.persist(&dest)
            .with_context(|| format!("Failed to move saved content to {}", dest.display()))?;

        tracing::debug!("Session: saved {} bytes to {}", self.len(), dest.display());
        if replaces_source {
            let source = FileSource::open(&dest)
                .with_context(|| format!("Failed to reopen {}", dest.display()))?;
            self.rebase_onto(Arc::new(source));
        }
        self.emit_saved(dest.clone());
        Ok(dest)
    }

    fn write_content<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let chunk = self.config().save_chunk_size.max(1) as u64;
        let source = self.source();
        let mut buf = Vec::new();
        for piece in self.content().tree().iter_pieces_in_range(0, self.len()) {
            match &piece.segment {
                Segment::Edit {
                    data, start, len, ..
                } => out.write_all(&data[*start..*start + *len])?,
                Segment::Source { offset, len } => {
                    let end = offset + len;
                    let mut pos = *offset;
                    while pos < end {
                        let n = chunk.min(end - pos);
                        buf.resize(n as usize, 0);
                        source.read_into(pos, &mut buf)?;
                        out.write_all(&buf)?;
                        pos += n;
                    }
                }
            }
        }
        Ok(())
    }
}
