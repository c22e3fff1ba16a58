//! Audit Recorder.
//!
//! Every mutating or security-relevant operation calls [`AuditRecorder::record`]
//! afterwards. Recording never fails from the caller's point of view: store
//! errors are logged and dropped. Entries are append-only; there is no update
//! or delete path.

pub mod export;
pub mod stats;
pub mod store;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

use crate::authz::types::{Level, Principal};
use crate::errors::AuditStoreError;
use crate::settings::Audit as AuditCfg;
use stats::AuditStatistics;
use store::AuditStore;

/// A stored audit entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Store-assigned sequence number, strictly increasing in append order.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub username: String,
    /// Effective level of the actor when the entry was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_level: Option<Level>,
    pub action: String,
    pub module: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

/// An entry about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub username: String,
    pub actor_level: Option<Level>,
    pub action: String,
    pub module: String,
    pub details: String,
    pub target_username: Option<String>,
    pub source_ip: Option<String>,
}

impl AuditEvent {
    pub fn new(
        username: impl Into<String>,
        action: impl Into<String>,
        module: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            actor_level: None,
            action: action.into(),
            module: module.into(),
            details: details.into(),
            target_username: None,
            source_ip: None,
        }
    }

    /// Event performed by `actor`, tagged with its effective level.
    pub fn by(
        actor: &Principal,
        action: impl Into<String>,
        module: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(actor.username(), action, module, details);
        event.actor_level = actor.effective_level();
        event
    }

    pub fn target(mut self, username: impl Into<String>) -> Self {
        self.target_username = Some(username.into());
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub(crate) fn into_entry(self, id: u64, timestamp: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            timestamp,
            username: self.username,
            actor_level: self.actor_level,
            action: self.action,
            module: self.module,
            details: self.details,
            target_username: self.target_username,
            source_ip: self.source_ip,
        }
    }
}

/// Conjunctive query filters. Unset and blank fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    /// Case-insensitive substring over username, action, module, details and target.
    pub text: Option<String>,
    pub username: Option<String>,
    pub action: Option<String>,
    pub module: Option<String>,
    pub target_username: Option<String>,
    pub actor_level: Option<Level>,
    /// Inclusive, UTC.
    pub date_from: Option<NaiveDate>,
    /// Inclusive, UTC.
    pub date_to: Option<NaiveDate>,
}

fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn same(wanted: Option<&str>, actual: &str) -> bool {
    wanted.map_or(true, |w| w.eq_ignore_ascii_case(actual))
}

impl AuditFilter {
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// The set fields as `key=value` pairs, or `none`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        let text_fields = [
            ("text", &self.text),
            ("username", &self.username),
            ("action", &self.action),
            ("module", &self.module),
            ("target", &self.target_username),
        ];
        for (key, value) in text_fields {
            if let Some(value) = given(value) {
                parts.push(format!("{key}={value}"));
            }
        }
        if let Some(level) = self.actor_level {
            parts.push(format!("level={level}"));
        }
        if let Some(from) = self.date_from {
            parts.push(format!("from={from}"));
        }
        if let Some(to) = self.date_to {
            parts.push(format!("to={to}"));
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if !same(given(&self.username), &entry.username)
            || !same(given(&self.action), &entry.action)
            || !same(given(&self.module), &entry.module)
        {
            return false;
        }

        if let Some(target) = given(&self.target_username) {
            match &entry.target_username {
                Some(t) if t.eq_ignore_ascii_case(target) => {}
                _ => return false,
            }
        }

        if self.actor_level.is_some() && self.actor_level != entry.actor_level {
            return false;
        }

        let day = entry.timestamp.date_naive();
        if self.date_from.is_some_and(|from| day < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| day > to) {
            return false;
        }

        if let Some(text) = given(&self.text) {
            let needle = text.to_lowercase();
            let hit = [
                entry.username.as_str(),
                entry.action.as_str(),
                entry.module.as_str(),
                entry.details.as_str(),
                entry.target_username.as_deref().unwrap_or(""),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        true
    }
}

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 10_000;

pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    default_limit: usize,
    max_limit: usize,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }

    pub fn from_settings(store: Arc<dyn AuditStore>, cfg: &AuditCfg) -> Self {
        Self {
            store,
            default_limit: cfg.default_limit,
            max_limit: cfg.max_limit.max(1),
        }
    }

    /// Append an entry stamped with the current time. Never fails.
    pub fn record(&self, event: AuditEvent) {
        self.record_at(event, Utc::now());
    }

    /// Append an entry with an explicit timestamp. Never fails.
    pub fn record_at(&self, event: AuditEvent, at: DateTime<Utc>) {
        let action = event.action.clone();
        let username = event.username.clone();
        match self.store.append(event, at) {
            Ok(entry) => {
                tracing::debug!(id = entry.id, %action, user = %username, "audit entry recorded");
            }
            Err(e) => {
                tracing::error!(error = %e, %action, user = %username, "failed to write audit entry");
            }
        }
    }

    /// Shorthand for `record(AuditEvent::by(actor, ..))` with an optional target.
    pub fn record_action(
        &self,
        actor: &Principal,
        action: &str,
        module: &str,
        details: &str,
        target: Option<&str>,
    ) {
        let mut event = AuditEvent::by(actor, action, module, details);
        if let Some(target) = target {
            event = event.target(target);
        }
        self.record(event);
    }

    /// Matching entries, newest first. `None` uses the default limit; larger
    /// limits are clamped to the configured maximum.
    pub fn query(
        &self,
        filter: &AuditFilter,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let limit = limit.unwrap_or(self.default_limit).min(self.max_limit);
        let mut entries: Vec<AuditEntry> = self
            .store
            .entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Write every matching entry, up to the configured maximum, as CSV
    /// newest first, then record the export as `export_audit_logs` by
    /// `actor`. Returns the number of rows written.
    pub fn export_csv<W: Write>(
        &self,
        actor: &Principal,
        filter: &AuditFilter,
        out: W,
    ) -> Result<usize, AuditStoreError> {
        let entries = self.query(filter, Some(self.max_limit))?;
        export::write_csv(&entries, out)?;
        self.record(AuditEvent::by(
            actor,
            "export_audit_logs",
            "admin",
            format!(
                "Exported {} audit entries with filters: {}",
                entries.len(),
                filter.describe()
            ),
        ));
        Ok(entries.len())
    }

    pub fn statistics(&self, days: i64) -> Result<AuditStatistics, AuditStoreError> {
        let entries = self.store.entries()?;
        Ok(stats::compute(&entries, Utc::now(), days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::resolver::RawPayload;
    use chrono::TimeZone;
    use store::MemoryAuditStore;

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn append(&self, _: AuditEvent, _: DateTime<Utc>) -> Result<AuditEntry, AuditStoreError> {
            Err(AuditStoreError::Poisoned)
        }

        fn entries(&self) -> Result<Vec<AuditEntry>, AuditStoreError> {
            Ok(Vec::new())
        }
    }

    fn recorder() -> AuditRecorder {
        AuditRecorder::new(Arc::new(MemoryAuditStore::new()))
    }

    fn actions(entries: &[AuditEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.action.as_str()).collect()
    }

    #[test]
    fn test_newest_first_even_with_equal_timestamps() {
        let rec = recorder();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        rec.record_at(AuditEvent::new("alice", "a", "send", ""), at);
        rec.record_at(AuditEvent::new("alice", "b", "send", ""), at);

        let got = rec.query(&AuditFilter::for_user("alice"), Some(10)).unwrap();
        assert_eq!(actions(&got), vec!["b", "a"]);
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let rec = recorder();
        rec.record(AuditEvent::new("alice", "create_user", "users", "Created bob").target("bob"));
        rec.record(AuditEvent::new("alice", "update_asset", "inventory", "Moved pallet"));
        rec.record(AuditEvent::new("carol", "create_user", "users", "Created dan").target("dan"));

        let filter = AuditFilter {
            username: Some("ALICE".into()),
            module: Some("users".into()),
            ..Default::default()
        };
        let got = rec.query(&filter, None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].target_username.as_deref(), Some("bob"));

        let by_target = AuditFilter {
            target_username: Some("dan".into()),
            ..Default::default()
        };
        assert_eq!(rec.query(&by_target, None).unwrap()[0].username, "carol");
    }

    #[test]
    fn test_text_filter_searches_details_and_target() {
        let rec = recorder();
        rec.record(AuditEvent::new("alice", "create_user", "users", "Created bob").target("bob"));
        rec.record(AuditEvent::new("alice", "update_asset", "inventory", "Moved PALLET 7"));

        let pallet = AuditFilter {
            text: Some("pallet".into()),
            ..Default::default()
        };
        assert_eq!(actions(&rec.query(&pallet, None).unwrap()), vec!["update_asset"]);

        let bob = AuditFilter {
            text: Some("BOB".into()),
            ..Default::default()
        };
        assert_eq!(actions(&rec.query(&bob, None).unwrap()), vec!["create_user"]);
    }

    #[test]
    fn test_blank_filters_match_everything() {
        let rec = recorder();
        rec.record(AuditEvent::new("alice", "a", "send", ""));
        let filter = AuditFilter {
            text: Some("  ".into()),
            username: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(rec.query(&filter, None).unwrap().len(), 1);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let rec = recorder();
        for day in 1..=5 {
            let at = Utc.with_ymd_and_hms(2024, 3, day, 23, 59, 0).unwrap();
            rec.record_at(AuditEvent::new("alice", format!("day{day}"), "send", ""), at);
        }
        let filter = AuditFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 3, 2),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 4),
            ..Default::default()
        };
        let got = rec.query(&filter, None).unwrap();
        assert_eq!(actions(&got), vec!["day4", "day3", "day2"]);
    }

    #[test]
    fn test_limit_defaults_and_clamp() {
        let store = Arc::new(MemoryAuditStore::new());
        let cfg = AuditCfg {
            default_limit: 2,
            max_limit: 3,
            ..Default::default()
        };
        let rec = AuditRecorder::from_settings(store, &cfg);
        for i in 0..5 {
            rec.record(AuditEvent::new("alice", format!("a{i}"), "send", ""));
        }
        assert_eq!(rec.query(&AuditFilter::default(), None).unwrap().len(), 2);
        assert_eq!(rec.query(&AuditFilter::default(), Some(50)).unwrap().len(), 3);
        assert!(rec.query(&AuditFilter::default(), Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_actor_level_is_captured() {
        let rec = recorder();
        let admin = Principal::new(1, "ann", RawPayload::Absent, Some(Level::L2), false);
        rec.record_action(&admin, "export_audit", "admin", "csv", None);

        let filter = AuditFilter {
            actor_level: Some(Level::L2),
            ..Default::default()
        };
        let got = rec.query(&filter, None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].actor_level, Some(Level::L2));
    }

    #[test]
    fn test_export_writes_rows_and_records_itself() {
        let rec = recorder();
        let admin = Principal::new(1, "ann", RawPayload::Absent, Some(Level::L2), false);
        rec.record(AuditEvent::new("bob", "update_asset", "inventory", "Counted bin 4"));
        rec.record(AuditEvent::new("carol", "login", "auth", ""));

        let filter = AuditFilter {
            module: Some("inventory".into()),
            ..Default::default()
        };
        let mut out = Vec::new();
        assert_eq!(rec.export_csv(&admin, &filter, &mut out).unwrap(), 1);
        let csv = String::from_utf8(out).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("Counted bin 4"));

        let latest = &rec.query(&AuditFilter::default(), Some(1)).unwrap()[0];
        assert_eq!(latest.action, "export_audit_logs");
        assert_eq!(latest.module, "admin");
        assert_eq!(latest.username, "ann");
        assert_eq!(latest.actor_level, Some(Level::L2));
        assert_eq!(
            latest.details,
            "Exported 1 audit entries with filters: module=inventory"
        );
    }

    #[test]
    fn test_describe_lists_set_filters() {
        assert_eq!(AuditFilter::default().describe(), "none");
        let filter = AuditFilter {
            username: Some("alice".into()),
            action: Some("  ".into()),
            actor_level: Some(Level::L1),
            date_from: NaiveDate::from_ymd_opt(2024, 3, 2),
            ..Default::default()
        };
        assert_eq!(filter.describe(), "username=alice, level=L1, from=2024-03-02");
    }

    #[test]
    fn test_record_swallows_store_failures() {
        let rec = AuditRecorder::new(Arc::new(FailingStore));
        rec.record(AuditEvent::new("alice", "a", "send", ""));
        assert!(rec.query(&AuditFilter::default(), None).unwrap().is_empty());
    }
}
