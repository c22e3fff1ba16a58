use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::authz::errors::AuthzError;
use crate::authz::resolver::{self, RawPayload};

/// A named point in the permission hierarchy.
///
/// Module levels (`M*`) gate a single business module; admin levels (`L*`)
/// and the system level (`S1`) bundle everything below them. The variant
/// order is the display order; comparisons between levels go through
/// [`crate::authz::Hierarchy::rank`], never through `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    M1,
    M2,
    M3A,
    M3B,
    M3C,
    L1,
    L2,
    L3,
    S1,
}

impl Level {
    pub const ALL: [Level; 9] = [
        Level::M1,
        Level::M2,
        Level::M3A,
        Level::M3B,
        Level::M3C,
        Level::L1,
        Level::L2,
        Level::L3,
        Level::S1,
    ];

    /// Levels that may be granted through elevation, lowest first.
    pub const ADMIN_TIER: [Level; 4] = [Level::L1, Level::L2, Level::L3, Level::S1];

    pub fn code(self) -> &'static str {
        match self {
            Level::M1 => "M1",
            Level::M2 => "M2",
            Level::M3A => "M3A",
            Level::M3B => "M3B",
            Level::M3C => "M3C",
            Level::L1 => "L1",
            Level::L2 => "L2",
            Level::L3 => "L3",
            Level::S1 => "S1",
        }
    }

    pub fn is_module(self) -> bool {
        matches!(
            self,
            Level::M1 | Level::M2 | Level::M3A | Level::M3B | Level::M3C
        )
    }

    pub fn is_admin(self) -> bool {
        !self.is_module()
    }

    /// Case-insensitive lookup of a level code; `None` for anything else.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.code().eq_ignore_ascii_case(code))
    }
}

impl FromStr for Level {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::parse(s).ok_or_else(|| AuthzError::InvalidElevationTarget(s.to_string()))
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.code())
    }
}

/// A canonical capability token: lower-case, trimmed, synonyms applied.
///
/// Only [`crate::authz::synonyms::canonicalize`] constructs these, so two
/// spellings of the same capability always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub(crate) fn from_canonical(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Deduplicated set of canonical capability tokens. Never absent: an
/// unreadable payload resolves to the empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        self.0.insert(cap)
    }

    pub fn contains(&self, cap: &Capability) -> bool {
        self.0.contains(cap)
    }

    /// Membership test for a raw token, canonicalized first.
    pub fn has(&self, token: &str) -> bool {
        crate::authz::synonyms::canonicalize(token).is_some_and(|c| self.0.contains(&c))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    /// Module-level codes carried as tokens by the list payload format.
    pub fn module_levels(&self) -> impl Iterator<Item = Level> + '_ {
        self.0
            .iter()
            .filter_map(|c| Level::parse(c.as_str()))
            .filter(|l| l.is_module())
    }

    pub(crate) fn inner_mut(&mut self) -> &mut BTreeSet<Capability> {
        &mut self.0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One element of a level closure: either a subsumed level or a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Grant {
    Level(Level),
    Capability(Capability),
}

impl std::fmt::Display for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::Level(l) => write!(f, "{l}"),
            Grant::Capability(c) => write!(f, "{c}"),
        }
    }
}

/// What a guarded operation asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Level(Level),
    Capability(Capability),
}

impl Requirement {
    /// Level codes become level requirements; everything else is a
    /// capability after canonicalization. Blank input yields `None`.
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(level) = Level::parse(token) {
            return Some(Requirement::Level(level));
        }
        crate::authz::synonyms::canonicalize(token).map(Requirement::Capability)
    }

    pub fn as_grant(&self) -> Grant {
        match self {
            Requirement::Level(l) => Grant::Level(*l),
            Requirement::Capability(c) => Grant::Capability(c.clone()),
        }
    }
}

/// The authenticated actor being evaluated.
///
/// Built once per request from a user record; the capability set is resolved
/// at construction so that every decision in the request sees the same data.
#[derive(Debug, Clone)]
pub struct Principal {
    id: i64,
    username: String,
    raw_payload: RawPayload,
    capabilities: CapabilitySet,
    assigned_level: Option<Level>,
    is_system: bool,
}

impl Principal {
    pub fn new(
        id: i64,
        username: impl Into<String>,
        raw_payload: RawPayload,
        assigned_level: Option<Level>,
        is_system: bool,
    ) -> Self {
        let capabilities = resolver::resolve(&raw_payload);
        Self {
            id,
            username: username.into(),
            raw_payload,
            capabilities,
            assigned_level,
            is_system,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn raw_payload(&self) -> &RawPayload {
        &self.raw_payload
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn assigned_level(&self) -> Option<Level> {
        self.assigned_level
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    /// The level used for elevation and audit purposes: `S1` for the system
    /// account, otherwise whatever level is assigned.
    pub fn effective_level(&self) -> Option<Level> {
        if self.is_system {
            Some(Level::S1)
        } else {
            self.assigned_level
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NotAuthenticated,
    MissingRequirement,
}

/// Outcome of an authorization check. `Denied` is a normal answer, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Denied(DenialReason::NotAuthenticated) => "not_authenticated",
            Decision::Denied(DenialReason::MissingRequirement) => "denied",
        }
    }
}

// ---------- Policy domain types ----------

/// A `level` node as written in a policy document.
#[derive(Debug, Clone)]
pub struct LevelDef {
    pub code: String,
    pub rank: i64,
    pub description: Option<String>,
    /// Level codes this level subsumes directly.
    pub includes: Vec<String>,
    /// Capability tokens as written; canonicalized at compile time.
    pub capabilities: Vec<String>,
}

/// Who may pass through a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    /// No principal needed.
    Public,
    /// Any authenticated principal.
    Login,
    /// A level code or capability token checked with the engine.
    Requires(String),
}

/// A `route` node: the requirement declared for one dispatch target.
#[derive(Debug, Clone)]
pub struct RouteDef {
    pub name: String,
    pub access: RouteAccess,
    /// Shown to the user on denial.
    pub message: Option<String>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub levels: Vec<LevelDef>,
    pub routes: Vec<RouteDef>,
}
