//! Elevation Policy and the service that applies it.

use chrono::Utc;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditRecorder};
use crate::authz::types::{Level, Principal};
use crate::authz::Hierarchy;
use crate::errors::ElevationError;
use crate::storage::{ElevationKind, ElevationRecord, LevelChange, StoredUser, UserStore};

/// Whether an actor holding `actor` may grant `target`.
///
/// Fixed table: each administrative level may grant itself and the
/// administrative levels below it. Module levels and no level grant nothing,
/// and module levels are never elevation targets.
pub fn can_elevate(actor: Option<Level>, target: Level) -> bool {
    let allowed: &[Level] = match actor {
        Some(Level::L1) => &[Level::L1],
        Some(Level::L2) => &[Level::L1, Level::L2],
        Some(Level::L3) => &[Level::L1, Level::L2, Level::L3],
        Some(Level::S1) => &[Level::L1, Level::L2, Level::L3, Level::S1],
        _ => &[],
    };
    allowed.contains(&target)
}

/// Whether `actor` outranks `target`. Strict, so never true for peers or
/// for the actor itself.
pub fn can_modify(hierarchy: &Hierarchy, actor: Option<Level>, target: Option<Level>) -> bool {
    hierarchy.rank_of(actor) > hierarchy.rank_of(target)
}

/// Levels `actor` may grant, lowest first.
pub fn elevation_options(actor: Option<Level>) -> Vec<Level> {
    Level::ADMIN_TIER
        .into_iter()
        .filter(|l| can_elevate(actor, *l))
        .collect()
}

fn level_name(level: Option<Level>) -> String {
    level.map_or_else(|| "no level".to_string(), |l| l.to_string())
}

/// One row of the elevation management screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationCandidate {
    pub user: StoredUser,
    pub current_level: Option<Level>,
    /// Levels the actor could move this user to.
    pub available: Vec<Level>,
    pub can_demote: bool,
}

pub struct ElevationService {
    hierarchy: Arc<Hierarchy>,
    users: Arc<dyn UserStore>,
    audit: Arc<AuditRecorder>,
}

impl ElevationService {
    pub fn new(
        hierarchy: Arc<Hierarchy>,
        users: Arc<dyn UserStore>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            hierarchy,
            users,
            audit,
        }
    }

    fn target(&self, username: &str) -> Result<(StoredUser, Option<Level>), ElevationError> {
        let user = self
            .users
            .find_by_username(username)?
            .ok_or_else(|| ElevationError::UnknownUser(username.to_string()))?;
        let current = user.to_principal().effective_level();
        Ok((user, current))
    }

    fn check_modify(
        &self,
        actor: &Principal,
        target: Option<Level>,
    ) -> Result<(), ElevationError> {
        if can_modify(&self.hierarchy, actor.effective_level(), target) {
            Ok(())
        } else {
            Err(ElevationError::ModificationNotPermitted {
                actor: level_name(actor.effective_level()),
                target: level_name(target),
            })
        }
    }

    /// Raise `target_username` to `new_level`.
    ///
    /// Every check runs before the store is touched; the level, the cleared
    /// module grants and the history record are committed together.
    pub fn elevate(
        &self,
        actor: Option<&Principal>,
        target_username: &str,
        new_level: &str,
        reason: &str,
    ) -> Result<StoredUser, ElevationError> {
        let actor = actor.ok_or(ElevationError::NotAuthenticated)?;
        let new_level: Level = new_level
            .parse()
            .map_err(ElevationError::InvalidElevationTarget)?;

        let actor_level = actor.effective_level();
        if !can_elevate(actor_level, new_level) {
            return Err(ElevationError::ElevationNotPermitted {
                actor: level_name(actor_level),
                target: new_level,
            });
        }

        let (user, current) = self.target(target_username)?;
        self.check_modify(actor, current)?;

        let updated = self.users.commit_level_change(LevelChange {
            user_id: user.id,
            new_level: Some(new_level),
            clear_module_grants: true,
            record: ElevationRecord {
                kind: ElevationKind::Elevation,
                target_user: user.username.clone(),
                old_level: current,
                new_level: Some(new_level),
                elevated_by: actor.username().to_string(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            },
        })?;

        tracing::info!(
            actor = actor.username(),
            user = %user.username,
            from = %level_name(current),
            to = %new_level,
            "user elevated"
        );

        let mut details = format!("Elevated {} to {}", user.username, new_level);
        if !reason.trim().is_empty() {
            details.push_str(&format!(" ({})", reason.trim()));
        }
        self.audit
            .record(AuditEvent::by(actor, "elevate_user", "users", details).target(&user.username));

        Ok(updated)
    }

    /// Clear the level of `target_username`. Module grants removed by an
    /// earlier elevation are not restored.
    pub fn demote(
        &self,
        actor: Option<&Principal>,
        target_username: &str,
        reason: &str,
    ) -> Result<StoredUser, ElevationError> {
        let actor = actor.ok_or(ElevationError::NotAuthenticated)?;
        let (user, current) = self.target(target_username)?;
        self.check_modify(actor, current)?;

        let updated = self.users.commit_level_change(LevelChange {
            user_id: user.id,
            new_level: None,
            clear_module_grants: false,
            record: ElevationRecord {
                kind: ElevationKind::Demotion,
                target_user: user.username.clone(),
                old_level: current,
                new_level: None,
                elevated_by: actor.username().to_string(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            },
        })?;

        tracing::info!(
            actor = actor.username(),
            user = %user.username,
            from = %level_name(current),
            "user demoted"
        );

        self.audit.record(
            AuditEvent::by(
                actor,
                "demote_user",
                "users",
                format!("Demoted {} from admin level", user.username),
            )
            .target(&user.username),
        );

        Ok(updated)
    }

    /// Every non-system user other than the actor, with what the actor may do to them.
    pub fn candidates(&self, actor: &Principal) -> Result<Vec<ElevationCandidate>, ElevationError> {
        let actor_level = actor.effective_level();
        let options = elevation_options(actor_level);
        let mut out = Vec::new();
        for user in self.users.list(false)? {
            if user.id == actor.id() {
                continue;
            }
            let current = user.to_principal().effective_level();
            let modifiable = can_modify(&self.hierarchy, actor_level, current);
            let available = if modifiable {
                options.iter().copied().filter(|l| Some(*l) != current).collect()
            } else {
                Vec::new()
            };
            out.push(ElevationCandidate {
                user,
                current_level: current,
                available,
                can_demote: modifiable && current.is_some(),
            });
        }
        Ok(out)
    }

    pub fn history(&self, limit: usize) -> Result<Vec<ElevationRecord>, ElevationError> {
        Ok(self.users.elevation_history(limit)?)
    }
}
