// SPDX-License-Identifier: Apache-2.0

//! External Query Text File
//!
//! Normalized rule texts are appended to a single file, each followed by a
//! NUL byte. Entries keep only an offset and a length. Space is reserved
//! through [`SharedState`] so concurrent appenders never overlap.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::engine::SharedState;
use crate::error::{FirewallError, FirewallResult};
use crate::store::{TextEncoding, TextRef};

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredText {
    pub text_ref: TextRef,
    /// GC cycle observed when space was reserved
    pub gc_cycle: u64,
}

#[derive(Debug, Clone)]
pub struct QueryTextFile {
    path: PathBuf,
}

impl QueryTextFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops any leftover file and starts from an empty one.
    pub fn recreate(&self) -> FirewallResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FirewallError::persistence(format!(
                    "could not create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        File::create(&self.path).map_err(|e| {
            FirewallError::persistence(format!("could not create {}: {e}", self.path.display()))
        })?;
        Ok(())
    }

    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }

    /// Appends `text` and its terminator at a freshly reserved offset.
    pub fn store(&self, state: &SharedState, text: &str) -> FirewallResult<StoredText> {
        let len = u32::try_from(text.len())
            .map_err(|_| FirewallError::persistence("query text too long to store"))?;

        let (reservation, _writer) = state.reserve(text.len());
        if let Err(e) = self.write_at(reservation.offset, text.as_bytes()) {
            error!("Could not write query text file {}: {}", self.path.display(), e);
            return Err(FirewallError::persistence(format!(
                "could not write {}: {e}",
                self.path.display()
            )));
        }

        Ok(StoredText {
            text_ref: TextRef {
                offset: reservation.offset,
                len,
                encoding: TextEncoding::Utf8,
            },
            gc_cycle: reservation.gc_cycle,
        })
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        file.write_all(&[0])?;
        Ok(())
    }

    /// Reads the whole file. A missing file is an empty buffer; any other
    /// failure is logged and yields `None`.
    pub fn load(&self) -> Option<TextBuffer> {
        match fs::read(&self.path) {
            Ok(bytes) => Some(TextBuffer { bytes }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Some(TextBuffer::default()),
            Err(e) => {
                warn!("Could not read query text file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Replaces the file contents.
    pub fn rewrite(&self, bytes: &[u8]) -> io::Result<()> {
        fs::write(&self.path, bytes)
    }

    pub fn truncate(&self) -> FirewallResult<()> {
        self.rewrite(&[]).map_err(|e| {
            FirewallError::persistence(format!("could not truncate {}: {e}", self.path.display()))
        })
    }
}

/// In-memory copy of the text file
#[derive(Debug, Default)]
pub struct TextBuffer {
    bytes: Vec<u8>,
}

impl TextBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Text at `text`, if it is in bounds, terminated and valid UTF-8.
    pub fn fetch(&self, text: TextRef) -> Option<&str> {
        let start = usize::try_from(text.offset).ok()?;
        let end = start.checked_add(text.len as usize)?;
        if end >= self.bytes.len() || self.bytes[end] != 0 {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..end]).ok()
    }
}
