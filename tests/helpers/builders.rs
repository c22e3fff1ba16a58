use serde_json::Value;
use warden::authz::resolver::{LegacyFlags, RawPayload};
use warden::authz::types::{Level, Principal};
use warden::storage::StoredUser;

/// Builder for test users
pub struct UserBuilder {
    id: i64,
    username: String,
    caps: Value,
    level: Option<String>,
    is_system: bool,
    legacy: LegacyFlags,
    active: bool,
}

impl UserBuilder {
    pub fn new(id: i64, username: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            caps: Value::Null,
            level: None,
            is_system: false,
            legacy: LegacyFlags::default(),
            active: true,
        }
    }

    pub fn with_caps(mut self, caps: Value) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level.code().to_string());
        self
    }

    /// Store a level code verbatim, valid or not.
    pub fn with_raw_level(mut self, code: &str) -> Self {
        self.level = Some(code.to_string());
        self
    }

    pub fn with_legacy(mut self, legacy: LegacyFlags) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn build(self) -> StoredUser {
        StoredUser {
            id: self.id,
            username: self.username,
            caps: self.caps,
            permission_level: self.level,
            is_system: self.is_system,
            legacy: self.legacy,
            active: self.active,
        }
    }

    pub fn principal(self) -> Principal {
        self.build().to_principal()
    }
}

/// Principal with a raw payload and nothing else.
pub fn principal_with_payload(payload: RawPayload) -> Principal {
    Principal::new(100, "payload-user", payload, None, false)
}
