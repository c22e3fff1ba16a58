//! Fixed synonym table shared by the resolver and the policy compiler.

use std::collections::BTreeSet;

use crate::authz::types::Capability;

/// Alternate spellings and their canonical token. Lookups happen after
/// trimming, lower-casing and stripping a leading `can_`.
const SYNONYMS: &[(&str, &str)] = &[
    ("inventory", "asset"),
    ("user_admin", "users"),
    ("is_admin", "admin"),
    ("is_sysadmin", "sysadmin"),
    ("is_system", "system"),
    ("fulfillment", "fulfillment_any"),
    ("fulfillment_service", "fulfillment_staff"),
];

/// Derived aliases: holding any member implies the alias.
const DERIVED: &[(&str, &[&str])] = &[(
    "fulfillment_any",
    &["fulfillment_staff", "fulfillment_customer"],
)];

/// Canonical form of a single token, or `None` if nothing is left after trimming.
pub fn canonicalize(token: &str) -> Option<Capability> {
    let lowered = token.trim().to_lowercase();
    let stripped = lowered.strip_prefix("can_").unwrap_or(&lowered);
    if stripped.is_empty() {
        return None;
    }
    let canonical = SYNONYMS
        .iter()
        .find(|(from, _)| *from == stripped)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or_else(|| stripped.to_string());
    Some(Capability::from_canonical(canonical))
}

/// Adds every derived alias whose members intersect `set`.
pub fn expand_derived(set: &mut BTreeSet<Capability>) {
    for (alias, members) in DERIVED {
        let implied = members
            .iter()
            .any(|m| set.iter().any(|c| c.as_str() == *m));
        if implied {
            set.insert(Capability::from_canonical((*alias).to_string()));
        }
    }
}
