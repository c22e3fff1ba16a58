use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::audit::{AuditEntry, AuditEvent};
use crate::errors::AuditStoreError;

/// Append-only storage for audit entries.
pub trait AuditStore: Send + Sync {
    /// Persist `event` and return the stored entry with its sequence id.
    fn append(&self, event: AuditEvent, at: DateTime<Utc>) -> Result<AuditEntry, AuditStoreError>;

    /// Every entry in append order, oldest first.
    fn entries(&self) -> Result<Vec<AuditEntry>, AuditStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, event: AuditEvent, at: DateTime<Utc>) -> Result<AuditEntry, AuditStoreError> {
        let mut entries = self.entries.lock().map_err(|_| AuditStoreError::Poisoned)?;
        let id = entries.last().map(|e| e.id + 1).unwrap_or(1);
        let entry = event.into_entry(id, at);
        entries.push(entry.clone());
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let entries = self.entries.lock().map_err(|_| AuditStoreError::Poisoned)?;
        Ok(entries.clone())
    }
}

/// JSON-lines audit log. One entry per line; lines are only ever appended.
///
/// Each append re-reads the last id on disk, so several instances over the
/// same path keep one sequence as long as they do not append concurrently.
#[derive(Debug)]
pub struct FileAuditStore {
    path: PathBuf,
    /// Lowest id the next append may use; also serializes appends through
    /// this instance.
    next_id: Mutex<u64>,
}

impl FileAuditStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditStoreError> {
        let path = path.into();
        let last = last_id(&path)?;
        Ok(Self {
            path,
            next_id: Mutex::new(last + 1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> AuditStoreError {
        AuditStoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl AuditStore for FileAuditStore {
    fn append(&self, event: AuditEvent, at: DateTime<Utc>) -> Result<AuditEntry, AuditStoreError> {
        let mut next_id = self.next_id.lock().map_err(|_| AuditStoreError::Poisoned)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let id = (*next_id).max(last_id(&self.path)? + 1);
        let entry = event.into_entry(id, at);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        // A torn earlier write must not swallow this entry.
        if !ends_with_newline(&mut file).map_err(|e| self.io_err(e))? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes()).map_err(|e| self.io_err(e))?;

        *next_id = id + 1;
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, AuditStoreError> {
        // Hold the lock so a concurrent append is never read half-written.
        let _guard = self.next_id.lock().map_err(|_| AuditStoreError::Poisoned)?;
        read_entries(&self.path)
    }
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Id of the last readable entry, 0 for a missing or empty log.
fn last_id(path: &Path) -> Result<u64, AuditStoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(AuditStoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    Ok(text
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
        .map_or(0, |e| e.id))
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, AuditStoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).map_err(|source| AuditStoreError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| AuditStoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unreadable audit entry"
                );
            }
        }
    }
    Ok(entries)
}
