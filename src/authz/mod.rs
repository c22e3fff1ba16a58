pub mod engine;
pub mod errors;
pub mod guard;
pub mod loader;
pub mod policy;
pub mod resolver;
pub mod synonyms;
pub mod types;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use errors::AuthzError;
use types::{Grant, Level, RouteDef};

/// The compiled level table.
///
/// Built and validated once at startup by [`loader::compile_policies`];
/// immutable afterwards and shared by reference between requests.
#[derive(Debug)]
pub struct Hierarchy {
    pub(crate) ranks: HashMap<Level, i64>,
    pub(crate) descriptions: HashMap<Level, String>,
    /// Direct inclusions as written in the policy.
    pub(crate) includes: HashMap<Level, Vec<Level>>,
    /// level -> every level and capability it implies, itself included
    pub(crate) closures: HashMap<Level, BTreeSet<Grant>>,
}

impl Hierarchy {
    /// The level table compiled into the binary.
    pub fn builtin() -> Result<Arc<Hierarchy>, AuthzError> {
        Ok(loader::builtin_policies()?.hierarchy)
    }

    pub fn rank(&self, level: Level) -> i64 {
        self.ranks.get(&level).copied().unwrap_or(0)
    }

    /// Rank of an optional level; holding no level ranks below everything.
    pub fn rank_of(&self, level: Option<Level>) -> i64 {
        level.map(|l| self.rank(l)).unwrap_or(0)
    }

    pub fn describe(&self, level: Level) -> &str {
        self.descriptions
            .get(&level)
            .map(String::as_str)
            .unwrap_or("Unknown permission level")
    }

    pub fn direct_includes(&self, level: Level) -> &[Level] {
        self.includes
            .get(&level)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn closure(&self, level: Level) -> &BTreeSet<Grant> {
        static EMPTY: BTreeSet<Grant> = BTreeSet::new();
        self.closures.get(&level).unwrap_or(&EMPTY)
    }

    /// Closure of an arbitrary grant set: every level in it is replaced by
    /// its own closure, capabilities are kept as they are.
    pub fn closure_of_set(&self, grants: &BTreeSet<Grant>) -> BTreeSet<Grant> {
        let mut out = BTreeSet::new();
        for grant in grants {
            match grant {
                Grant::Level(l) => out.extend(self.closure(*l).iter().cloned()),
                Grant::Capability(_) => {
                    out.insert(grant.clone());
                }
            }
        }
        out
    }

    pub fn grants(&self, level: Level, grant: &Grant) -> bool {
        self.closure(level).contains(grant)
    }

    /// All levels, lowest rank first.
    pub fn levels(&self) -> Vec<Level> {
        let mut levels: Vec<Level> = self.ranks.keys().copied().collect();
        levels.sort_by_key(|l| (self.rank(*l), *l));
        levels
    }
}

/// Fully compiled authorization state, loaded from KDL policy files.
/// Immutable after construction. Policy changes require a restart.
#[derive(Debug)]
pub struct AuthzState {
    pub hierarchy: Arc<Hierarchy>,
    /// route name -> declared requirement
    pub routes: HashMap<String, RouteDef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Requirement;

    fn hierarchy() -> Arc<Hierarchy> {
        Hierarchy::builtin().unwrap()
    }

    fn cap(token: &str) -> Grant {
        Requirement::parse(token).unwrap().as_grant()
    }

    #[test]
    fn test_builtin_defines_every_level() {
        let h = hierarchy();
        assert_eq!(h.levels().len(), Level::ALL.len());
        assert_eq!(h.levels().last(), Some(&Level::S1));
    }

    #[test]
    fn test_ranks_follow_admin_chain() {
        let h = hierarchy();
        assert!(h.rank(Level::L1) < h.rank(Level::L2));
        assert!(h.rank(Level::L2) < h.rank(Level::L3));
        assert!(h.rank(Level::L3) < h.rank(Level::S1));
        assert!(h.rank(Level::M3C) < h.rank(Level::L1));
        assert_eq!(h.rank_of(None), 0);
    }

    #[test]
    fn test_closure_contains_self() {
        let h = hierarchy();
        for level in Level::ALL {
            assert!(h.grants(level, &Grant::Level(level)), "{level}");
        }
    }

    #[test]
    fn test_closure_is_idempotent() {
        let h = hierarchy();
        for level in Level::ALL {
            let once = h.closure(level).clone();
            assert_eq!(h.closure_of_set(&once), once, "{level}");
        }
    }

    #[test]
    fn test_system_closure_is_superset() {
        let h = hierarchy();
        let system = h.closure(Level::S1);
        for level in Level::ALL {
            assert!(h.closure(level).is_subset(system), "{level}");
        }
    }

    #[test]
    fn test_module_closures() {
        let h = hierarchy();
        assert!(h.grants(Level::M1, &cap("can_send")));
        assert!(!h.grants(Level::M1, &cap("can_asset")));
        assert!(h.grants(Level::M2, &cap("inventory")));
        assert!(h.grants(Level::M3C, &Grant::Level(Level::M3A)));
        assert!(h.grants(Level::M3C, &cap("fulfillment_any")));
        assert!(!h.grants(Level::M3B, &Grant::Level(Level::M3A)));
    }

    #[test]
    fn test_admin_closures() {
        let h = hierarchy();
        assert!(h.grants(Level::L1, &cap("users")));
        assert!(h.grants(Level::L1, &Grant::Level(Level::M3C)));
        assert!(!h.grants(Level::L1, &cap("audit")));
        assert!(h.grants(Level::L2, &cap("audit")));
        assert!(h.grants(Level::L3, &Grant::Level(Level::L1)));
        assert!(!h.grants(Level::L3, &Grant::Level(Level::S1)));
    }

    #[test]
    fn test_descriptions() {
        let h = hierarchy();
        assert!(h.describe(Level::L2).contains("Systems Administrator"));
        assert_eq!(h.direct_includes(Level::L2), &[Level::L1]);
    }
}
