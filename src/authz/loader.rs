use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::policy::parse_kdl_document;
use crate::authz::synonyms;
use crate::authz::types::*;
use crate::authz::{AuthzState, Hierarchy};

const BUILTIN_HIERARCHY: &str = include_str!("../../policies/hierarchy.kdl");
const BUILTIN_ROUTES: &str = include_str!("../../policies/routes.kdl");

/// Compile the policy documents shipped with the crate.
pub fn builtin_policies() -> Result<AuthzState, AuthzError> {
    let parsed = vec![
        parse_kdl_document(BUILTIN_HIERARCHY)?,
        parse_kdl_document(BUILTIN_ROUTES)?,
    ];
    compile_policies(parsed)
}

/// Use `dir` when configured, the built-in documents otherwise.
pub fn load(dir: Option<&Path>) -> Result<AuthzState, AuthzError> {
    match dir {
        Some(dir) => load_policies(dir),
        None => builtin_policies(),
    }
}

/// Load all `.kdl` policy files from the given directory and compile them
/// into a single immutable `AuthzState`.
pub fn load_policies(dir: &Path) -> Result<AuthzState, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::PolicyLoad {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents)?;
        all_parsed.push(parsed);
        file_count += 1;
    }

    let state = compile_policies(all_parsed)?;

    tracing::info!(
        files = file_count,
        levels = state.hierarchy.levels().len(),
        routes = state.routes.len(),
        "Loaded authorization policies"
    );

    Ok(state)
}

/// Merge, validate and compile parsed policies.
///
/// Any violation of the hierarchy invariants is an error; callers are
/// expected to refuse to start.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<AuthzState, AuthzError> {
    let mut defs: HashMap<Level, LevelDef> = HashMap::new();
    let mut routes: HashMap<String, RouteDef> = HashMap::new();

    for p in parsed {
        for def in p.levels {
            let level =
                Level::parse(&def.code).ok_or_else(|| AuthzError::UndefinedLevel(def.code.clone()))?;
            if defs.contains_key(&level) {
                return Err(AuthzError::DuplicateLevel(def.code));
            }
            defs.insert(level, def);
        }
        for route in p.routes {
            if let RouteAccess::Requires(token) = &route.access {
                if Requirement::parse(token).is_none() {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "route `{}` requires an empty token",
                        route.name
                    )));
                }
            }
            routes.insert(route.name.clone(), route);
        }
    }

    for level in Level::ALL {
        if !defs.contains_key(&level) {
            return Err(AuthzError::MissingLevel(level.to_string()));
        }
    }

    let mut includes: HashMap<Level, Vec<Level>> = HashMap::new();
    for (level, def) in &defs {
        let mut direct = Vec::with_capacity(def.includes.len());
        for code in &def.includes {
            let included =
                Level::parse(code).ok_or_else(|| AuthzError::UndefinedLevel(code.clone()))?;
            direct.push(included);
        }
        includes.insert(*level, direct);
    }

    check_inclusion_cycles(&includes)?;

    let ranks: HashMap<Level, i64> = defs.iter().map(|(l, d)| (*l, d.rank)).collect();
    check_ranks(&includes, &ranks)?;

    let closures = build_closures(&defs, &includes);
    check_admin_chain(&closures, &ranks)?;
    check_system_superset(&closures)?;

    let descriptions = defs
        .iter()
        .map(|(l, d)| {
            let text = d.description.clone().unwrap_or_else(|| l.to_string());
            (*l, text)
        })
        .collect();

    Ok(AuthzState {
        hierarchy: Arc::new(Hierarchy {
            ranks,
            descriptions,
            includes,
            closures,
        }),
        routes,
    })
}

/// Check for cycles in level inclusion using DFS.
fn check_inclusion_cycles(includes: &HashMap<Level, Vec<Level>>) -> Result<(), AuthzError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    for level in Level::ALL {
        if !visited.contains(&level) {
            dfs_cycle_check(level, includes, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    level: Level,
    includes: &HashMap<Level, Vec<Level>>,
    visited: &mut HashSet<Level>,
    in_stack: &mut HashSet<Level>,
) -> Result<(), AuthzError> {
    visited.insert(level);
    in_stack.insert(level);

    for included in includes.get(&level).into_iter().flatten() {
        if in_stack.contains(included) {
            return Err(AuthzError::CyclicInclusion(format!("{level} -> {included}")));
        }
        if !visited.contains(included) {
            dfs_cycle_check(*included, includes, visited, in_stack)?;
        }
    }

    in_stack.remove(&level);
    Ok(())
}

/// Every inclusion edge must point strictly down in rank.
fn check_ranks(
    includes: &HashMap<Level, Vec<Level>>,
    ranks: &HashMap<Level, i64>,
) -> Result<(), AuthzError> {
    for (upper, lowers) in includes {
        let upper_rank = ranks[upper];
        for lower in lowers {
            let lower_rank = ranks[lower];
            if upper_rank <= lower_rank {
                return Err(AuthzError::RankInversion {
                    upper: upper.to_string(),
                    upper_rank,
                    lower: lower.to_string(),
                    lower_rank,
                });
            }
        }
    }
    Ok(())
}

fn build_closures(
    defs: &HashMap<Level, LevelDef>,
    includes: &HashMap<Level, Vec<Level>>,
) -> HashMap<Level, BTreeSet<Grant>> {
    let mut closures = HashMap::new();
    for level in Level::ALL {
        let mut levels = BTreeSet::new();
        collect_levels(level, includes, &mut levels);

        let mut caps: BTreeSet<Capability> = levels
            .iter()
            .flat_map(|l| defs[l].capabilities.iter())
            .filter_map(|token| synonyms::canonicalize(token))
            .collect();
        synonyms::expand_derived(&mut caps);

        let closure: BTreeSet<Grant> = levels
            .into_iter()
            .map(Grant::Level)
            .chain(caps.into_iter().map(Grant::Capability))
            .collect();
        closures.insert(level, closure);
    }
    closures
}

/// Recursively collect a level and everything it includes. Only called
/// after the cycle check, so plain recursion terminates.
fn collect_levels(level: Level, includes: &HashMap<Level, Vec<Level>>, out: &mut BTreeSet<Level>) {
    if !out.insert(level) {
        return;
    }
    for included in includes.get(&level).into_iter().flatten() {
        collect_levels(*included, includes, out);
    }
}

fn check_admin_chain(
    closures: &HashMap<Level, BTreeSet<Grant>>,
    ranks: &HashMap<Level, i64>,
) -> Result<(), AuthzError> {
    for pair in Level::ADMIN_TIER.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        if !closures[&upper].contains(&Grant::Level(lower)) {
            return Err(AuthzError::AdminChainBroken(format!(
                "{upper} does not include {lower}"
            )));
        }
        if ranks[&upper] <= ranks[&lower] {
            return Err(AuthzError::AdminChainBroken(format!(
                "{upper} is not ranked above {lower}"
            )));
        }
    }
    Ok(())
}

fn check_system_superset(closures: &HashMap<Level, BTreeSet<Grant>>) -> Result<(), AuthzError> {
    let system = &closures[&Level::S1];
    for level in Level::ALL {
        if let Some(missing) = closures[&level].iter().find(|g| !system.contains(*g)) {
            return Err(AuthzError::SystemNotSuperset(format!("{missing} (from {level})")));
        }
    }
    Ok(())
}
