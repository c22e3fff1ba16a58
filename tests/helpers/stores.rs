use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use warden::audit::store::{FileAuditStore, MemoryAuditStore};
use warden::audit::AuditRecorder;
use warden::authz::types::Principal;
use warden::authz::{loader, AuthzState, Hierarchy};
use warden::elevation::ElevationService;
use warden::storage::{MemoryUserStore, StoredUser, UsersFile, UserStore};

/// Built-in policies wired to in-memory stores
pub struct TestWarden {
    pub authz: AuthzState,
    pub users: Arc<MemoryUserStore>,
    pub audit: Arc<AuditRecorder>,
}

impl TestWarden {
    pub fn new(users: Vec<StoredUser>) -> Self {
        let authz = loader::builtin_policies().expect("Built-in policies must compile");
        Self {
            authz,
            users: Arc::new(MemoryUserStore::with_users(users)),
            audit: Arc::new(AuditRecorder::new(Arc::new(MemoryAuditStore::new()))),
        }
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.authz.hierarchy
    }

    pub fn elevation(&self) -> ElevationService {
        ElevationService::new(
            Arc::clone(&self.authz.hierarchy),
            self.users.clone(),
            self.audit.clone(),
        )
    }

    pub fn principal(&self, username: &str) -> Principal {
        self.users
            .find_by_username(username)
            .expect("Failed to read user store")
            .expect("User not found")
            .to_principal()
    }

    pub fn user(&self, username: &str) -> StoredUser {
        self.users
            .find_by_username(username)
            .expect("Failed to read user store")
            .expect("User not found")
    }
}

/// Users file and audit log in a temporary directory, cleaned up on drop
pub struct TestFiles {
    dir: TempDir,
}

impl TestFiles {
    pub fn new(users: Vec<StoredUser>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let file = UsersFile {
            users,
            elevation_history: Vec::new(),
        };
        std::fs::write(
            dir.path().join("users.json"),
            serde_json::to_string_pretty(&file).expect("Failed to serialize users"),
        )
        .expect("Failed to write users file");
        Self { dir }
    }

    pub fn users_path(&self) -> PathBuf {
        self.dir.path().join("users.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.path().join("audit").join("audit.jsonl")
    }

    pub fn recorder(&self) -> Arc<AuditRecorder> {
        let store = FileAuditStore::open(self.audit_path()).expect("Failed to open audit log");
        Arc::new(AuditRecorder::new(Arc::new(store)))
    }
}
