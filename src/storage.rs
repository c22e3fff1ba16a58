//! User Store boundary.
//!
//! The authorization core only reads users and changes their level through
//! [`UserStore::commit_level_change`]. Two implementations are provided: an
//! in-memory store for embedding and tests, and a JSON users file written
//! back atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::authz::resolver::{LegacyFlags, RawPayload};
use crate::authz::types::{Level, Principal};
use crate::errors::StoreError;

fn default_true() -> bool {
    true
}

/// A user row as the store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: i64,
    pub username: String,
    /// Opaque capability payload: a flag map, a token list, or nothing.
    #[serde(default)]
    pub caps: Value,
    /// Discrete level code, empty or missing when none is assigned.
    #[serde(default)]
    pub permission_level: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    /// Boolean columns of older rows.
    #[serde(flatten)]
    pub legacy: LegacyFlags,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl StoredUser {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            caps: Value::Null,
            permission_level: None,
            is_system: false,
            legacy: LegacyFlags::default(),
            active: true,
        }
    }

    /// The stored level, if it names one. Garbage never escalates: it is
    /// logged and treated as no level.
    pub fn stored_level(&self) -> Option<Level> {
        let code = self.permission_level.as_deref()?.trim();
        if code.is_empty() {
            return None;
        }
        let level = Level::parse(code);
        if level.is_none() {
            tracing::warn!(
                user = %self.username,
                code,
                "ignoring unknown stored permission level"
            );
        }
        level
    }

    /// Level after the legacy fallbacks: an explicit level wins, then the
    /// old `is_sysadmin`/`is_admin` columns map to L2/L1.
    pub fn assigned_level(&self) -> Option<Level> {
        self.stored_level().or(if self.legacy.is_sysadmin {
            Some(Level::L2)
        } else if self.legacy.is_admin {
            Some(Level::L1)
        } else {
            None
        })
    }

    /// True for the system account, flagged either by column or by an
    /// `is_system` entry in the payload.
    pub fn is_system_account(&self) -> bool {
        if self.is_system {
            return true;
        }
        match &self.caps {
            Value::Object(map) => map.get("is_system").is_some_and(|v| match v {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
                _ => false,
            }),
            _ => false,
        }
    }

    fn payload_is_empty(&self) -> bool {
        match &self.caps {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(list) => list.is_empty(),
            Value::String(s) => s.trim().is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }

    /// Payload handed to the resolver. Rows without a payload fall back to
    /// their legacy columns.
    pub fn raw_payload(&self) -> RawPayload {
        if self.payload_is_empty() {
            if self.legacy.any() {
                RawPayload::Legacy(self.legacy)
            } else {
                RawPayload::Absent
            }
        } else {
            RawPayload::Json(self.caps.clone())
        }
    }

    pub fn to_principal(&self) -> Principal {
        Principal::new(
            self.id,
            self.username.clone(),
            self.raw_payload(),
            self.assigned_level(),
            self.is_system_account(),
        )
    }

    /// Drop the old `is_admin`/`is_sysadmin` columns so they cannot stand in
    /// for a level that was just replaced or cleared.
    pub fn clear_legacy_admin(&mut self) {
        self.legacy.is_admin = false;
        self.legacy.is_sysadmin = false;
    }

    /// Remove module-level codes (`M1`..`M3C`) from the payload, keeping any
    /// other capability tokens.
    pub fn clear_module_grants(&mut self) {
        let is_module = |token: &str| Level::parse(token).is_some_and(|l| l.is_module());
        if self.caps.as_str().is_some_and(is_module) {
            self.caps = Value::Null;
            return;
        }
        match &mut self.caps {
            Value::Array(list) => {
                list.retain(|v| !v.as_str().is_some_and(is_module));
            }
            Value::Object(map) => {
                map.retain(|k, _| !is_module(k.as_str()));
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationKind {
    Elevation,
    Demotion,
}

/// History row written with every committed level change. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationRecord {
    pub kind: ElevationKind,
    pub target_user: String,
    pub old_level: Option<Level>,
    pub new_level: Option<Level>,
    pub elevated_by: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// One atomic level change.
#[derive(Debug, Clone)]
pub struct LevelChange {
    pub user_id: i64,
    pub new_level: Option<Level>,
    pub clear_module_grants: bool,
    pub record: ElevationRecord,
}

impl LevelChange {
    fn apply(&self, user: &mut StoredUser) {
        user.permission_level = self.new_level.map(|l| l.code().to_string());
        user.clear_legacy_admin();
        if self.clear_module_grants {
            user.clear_module_grants();
        }
    }
}

pub trait UserStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<Option<StoredUser>, StoreError>;

    fn find_by_id(&self, id: i64) -> Result<Option<StoredUser>, StoreError>;

    /// All users ordered by id; the system account only when asked for.
    fn list(&self, include_system: bool) -> Result<Vec<StoredUser>, StoreError>;

    /// Apply the level change and append its history record together, or
    /// not at all. Returns the updated user.
    fn commit_level_change(&self, change: LevelChange) -> Result<StoredUser, StoreError>;

    /// Newest first.
    fn elevation_history(&self, limit: usize) -> Result<Vec<ElevationRecord>, StoreError>;
}

/// Root structure of the users JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersFile {
    #[serde(default)]
    pub users: Vec<StoredUser>,
    #[serde(default)]
    pub elevation_history: Vec<ElevationRecord>,
}

impl UsersFile {
    fn find_by_username(&self, username: &str) -> Option<StoredUser> {
        self.users.iter().find(|u| u.username == username).cloned()
    }

    fn find_by_id(&self, id: i64) -> Option<StoredUser> {
        self.users.iter().find(|u| u.id == id).cloned()
    }

    fn list(&self, include_system: bool) -> Vec<StoredUser> {
        let mut users: Vec<StoredUser> = self
            .users
            .iter()
            .filter(|u| include_system || !u.is_system_account())
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        users
    }

    fn commit(&mut self, change: LevelChange) -> Result<StoredUser, StoreError> {
        let user = self
            .users
            .iter_mut()
            .find(|u| u.id == change.user_id)
            .ok_or(StoreError::UnknownUser(change.user_id))?;
        change.apply(user);
        let updated = user.clone();
        self.elevation_history.push(change.record);
        Ok(updated)
    }

    fn history(&self, limit: usize) -> Vec<ElevationRecord> {
        self.elevation_history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    inner: RwLock<UsersFile>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<StoredUser>) -> Self {
        Self {
            inner: RwLock::new(UsersFile {
                users,
                elevation_history: Vec::new(),
            }),
        }
    }

    /// Insert or replace by id.
    pub fn upsert(&self, user: StoredUser) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        match inner.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => inner.users.push(user),
        }
        Ok(())
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<StoredUser>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.find_by_username(username))
    }

    fn find_by_id(&self, id: i64) -> Result<Option<StoredUser>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.find_by_id(id))
    }

    fn list(&self, include_system: bool) -> Result<Vec<StoredUser>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.list(include_system))
    }

    fn commit_level_change(&self, change: LevelChange) -> Result<StoredUser, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.commit(change)
    }

    fn elevation_history(&self, limit: usize) -> Result<Vec<ElevationRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.history(limit))
    }
}

/// Users file on disk, cached in memory and rewritten on every commit.
#[derive(Debug)]
pub struct FileUserStore {
    path: PathBuf,
    inner: Mutex<UsersFile>,
}

impl FileUserStore {
    /// Open the users file. A missing file is an empty store; it is created
    /// on the first commit.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let contents = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| StoreError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            UsersFile::default()
        };

        tracing::info!(
            path = %path.display(),
            users = contents.users.len(),
            "Opened users file"
        );

        Ok(Self {
            path,
            inner: Mutex::new(contents),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, contents: &UsersFile) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(contents)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl UserStore for FileUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<StoredUser>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.find_by_username(username))
    }

    fn find_by_id(&self, id: i64) -> Result<Option<StoredUser>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.find_by_id(id))
    }

    fn list(&self, include_system: bool) -> Result<Vec<StoredUser>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.list(include_system))
    }

    fn commit_level_change(&self, change: LevelChange) -> Result<StoredUser, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        // Work on a copy so a failed write leaves memory and disk unchanged.
        let mut next = inner.clone();
        let updated = next.commit(change)?;
        self.write(&next)?;
        *inner = next;
        Ok(updated)
    }

    fn elevation_history(&self, limit: usize) -> Result<Vec<ElevationRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.history(limit))
    }
}
