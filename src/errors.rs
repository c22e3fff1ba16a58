use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::AuthzError;
use crate::authz::types::Level;

/// Failures of the user store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error on users file `{path}`")]
    #[diagnostic(code(warden::store::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse users file `{path}`")]
    #[diagnostic(
        code(warden::store::parse),
        help("Expected a JSON object of the form {{\"users\": [...], \"elevation_history\": [...]}}")
    )]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    #[diagnostic(code(warden::store::serde))]
    Serde(#[from] serde_json::Error),

    #[error("User with id {0} does not exist")]
    #[diagnostic(code(warden::store::unknown_user))]
    UnknownUser(i64),

    #[error("User store lock poisoned")]
    #[diagnostic(code(warden::store::poisoned))]
    Poisoned,
}

/// Failures of the audit store. Never reach the caller of `record`.
#[derive(Debug, Error, Diagnostic)]
pub enum AuditStoreError {
    #[error("I/O error on audit log `{path}`")]
    #[diagnostic(code(warden::audit::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    #[diagnostic(code(warden::audit::serde))]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    #[diagnostic(code(warden::audit::csv))]
    Csv(#[from] csv::Error),

    #[error("Failed to write audit export")]
    #[diagnostic(code(warden::audit::export))]
    Export(#[source] std::io::Error),

    #[error("Audit store lock poisoned")]
    #[diagnostic(code(warden::audit::poisoned))]
    Poisoned,
}

/// Failures surfaced by elevation and demotion.
#[derive(Debug, Error, Diagnostic)]
pub enum ElevationError {
    #[error("Not authenticated")]
    #[diagnostic(code(warden::elevation::not_authenticated))]
    NotAuthenticated,

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidElevationTarget(AuthzError),

    #[error("{actor} may not elevate users to {target}")]
    #[diagnostic(
        code(warden::elevation::not_permitted),
        help("L1 may grant L1; L2 may grant up to L2; L3 up to L3; only S1 may grant S1")
    )]
    ElevationNotPermitted { actor: String, target: Level },

    #[error("{actor} may not modify a user at {target}")]
    #[diagnostic(
        code(warden::elevation::modification_not_permitted),
        help("Only users ranked strictly above the target may change its level")
    )]
    ModificationNotPermitted { actor: String, target: String },

    #[error("User `{0}` not found")]
    #[diagnostic(code(warden::elevation::unknown_user))]
    UnknownUser(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl ElevationError {
    /// Policy violations are shown to the user; everything else is internal.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            ElevationError::InvalidElevationTarget(_)
                | ElevationError::ElevationNotPermitted { .. }
                | ElevationError::ModificationNotPermitted { .. }
        )
    }
}

/// Top-level error of the `warden` binary.
#[derive(Debug, Error, Diagnostic)]
pub enum WardenError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(warden::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(warden::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(warden::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    AuditStore(#[from] AuditStoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Elevation(#[from] ElevationError),

    #[error("{0}")]
    #[diagnostic(code(warden::other))]
    Other(String),
}
