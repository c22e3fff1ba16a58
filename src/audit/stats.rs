use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::audit::AuditEntry;
use crate::authz::types::Level;

/// Actions counted as critical on the dashboard.
pub const CRITICAL_ACTIONS: &[&str] = &[
    "elevate_user",
    "demote_user",
    "delete_user",
    "approve_deletion",
    "create_user",
    "system_config_change",
];

const TOP_USERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditStatistics {
    pub days: i64,
    pub since: DateTime<Utc>,
    pub total_actions: usize,
    /// Most frequent first.
    pub by_module: Vec<(String, usize)>,
    /// Entries without an actor level are left out.
    pub by_level: Vec<(Level, usize)>,
    pub top_users: Vec<(String, usize)>,
    pub critical_actions: usize,
}

fn ranked<K: Ord + Clone>(counts: HashMap<K, usize>) -> Vec<(K, usize)> {
    let mut out: Vec<(K, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// Start of the window. Windows reaching past the earliest representable
/// time cover everything.
fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days.max(0))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Statistics over entries newer than `now - days`.
pub fn compute(entries: &[AuditEntry], now: DateTime<Utc>, days: i64) -> AuditStatistics {
    let since = window_start(now, days);
    let recent: Vec<&AuditEntry> = entries.iter().filter(|e| e.timestamp >= since).collect();

    let mut by_module: HashMap<String, usize> = HashMap::new();
    let mut by_level: HashMap<Level, usize> = HashMap::new();
    let mut by_user: HashMap<String, usize> = HashMap::new();
    let mut critical = 0;

    for entry in &recent {
        *by_module.entry(entry.module.clone()).or_default() += 1;
        if let Some(level) = entry.actor_level {
            *by_level.entry(level).or_default() += 1;
        }
        *by_user.entry(entry.username.clone()).or_default() += 1;
        if CRITICAL_ACTIONS.contains(&entry.action.as_str()) {
            critical += 1;
        }
    }

    let mut top_users = ranked(by_user);
    top_users.truncate(TOP_USERS);

    AuditStatistics {
        days,
        since,
        total_actions: recent.len(),
        by_module: ranked(by_module),
        by_level: ranked(by_level),
        top_users,
        critical_actions: critical,
    }
}
