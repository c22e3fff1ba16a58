use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audit::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::errors::WardenError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub policy: Policy,
    pub users: Users,
    pub audit: Audit,
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Policy {
    /// Directory of `.kdl` policy files. When set, replaces the built-in
    /// hierarchy and route documents entirely.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Users {
    /// JSON users file. Default: data/users.json
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    /// JSON-lines audit log. Default: data/audit.jsonl
    pub path: PathBuf,
    /// Query limit when none is given
    pub default_limit: usize,
    /// Upper bound for any query; larger limits are clamped
    pub max_limit: usize,
    /// Record an `access_denied` entry whenever the route guard refuses a request
    #[serde(default)]
    pub record_denials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    /// `tracing_subscriber` filter directive used when RUST_LOG is unset
    pub filter: String,
}

impl Default for Users {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/users.json"),
        }
    }
}

impl Default for Audit {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/audit.jsonl"),
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            record_denials: false,
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

fn absolute(path: &mut PathBuf) -> Result<(), WardenError> {
    if path.is_relative() {
        *path = std::env::current_dir()?.join(&*path);
    }
    Ok(())
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, WardenError> {
        let mut builder = config::Config::builder()
            .set_default(
                "users.path",
                Users::default().path.to_string_lossy().to_string(),
            )?
            .set_default(
                "audit.path",
                Audit::default().path.to_string_lossy().to_string(),
            )?
            .set_default("audit.default_limit", DEFAULT_LIMIT as i64)?
            .set_default("audit.max_limit", MAX_LIMIT as i64)?
            .set_default("audit.record_denials", false)?
            .set_default("logging.filter", Logging::default().filter)?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARDEN__AUDIT__DEFAULT_LIMIT=50, etc.
        builder = builder.add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let cfg = builder.build()?;
        let mut s: Settings = cfg.try_deserialize()?;

        // Normalize paths to be relative to current dir
        absolute(&mut s.users.path)?;
        absolute(&mut s.audit.path)?;
        if let Some(dir) = s.policy.dir.as_mut() {
            absolute(dir)?;
        }

        Ok(s)
    }
}
