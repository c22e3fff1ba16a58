use crate::authz::types::{Decision, DenialReason, Grant, Principal, Requirement};
use crate::authz::Hierarchy;

/// Decide whether `principal` may perform an operation guarded by `required`
/// (a level code such as `"L2"` or a capability token such as `"can_users"`).
///
/// This is the only place bypass and hierarchy rules are evaluated. It reads
/// nothing but its arguments and never fails: a denial is a normal answer.
pub fn authorize(
    hierarchy: &Hierarchy,
    principal: Option<&Principal>,
    required: &str,
) -> Decision {
    // 1. No principal
    let Some(principal) = principal else {
        tracing::debug!(required, "denied: not authenticated");
        return Decision::Denied(DenialReason::NotAuthenticated);
    };

    // 2. System bypass
    if principal.is_system() {
        tracing::debug!(user = principal.username(), required, "allowed: system principal");
        return Decision::Allowed;
    }

    // A blank requirement names nothing and is never satisfied.
    let Some(requirement) = Requirement::parse(required) else {
        tracing::debug!(user = principal.username(), "denied: empty requirement");
        return Decision::Denied(DenialReason::MissingRequirement);
    };
    let wanted = requirement.as_grant();

    // 3. Closure of the assigned level
    if let Some(level) = principal.assigned_level() {
        if hierarchy.grants(level, &wanted) {
            tracing::debug!(
                user = principal.username(),
                required,
                assigned = %level,
                "allowed: granted by assigned level"
            );
            return Decision::Allowed;
        }
    }

    // 4. Resolved capabilities, plus any module-level codes they carry
    let caps = principal.capabilities();
    let granted = match &wanted {
        Grant::Capability(cap) if caps.contains(cap) => true,
        _ => caps
            .module_levels()
            .any(|level| hierarchy.grants(level, &wanted)),
    };

    if granted {
        tracing::debug!(user = principal.username(), required, "allowed: granted by capabilities");
        Decision::Allowed
    } else {
        tracing::debug!(user = principal.username(), required, "denied: requirement not held");
        Decision::Denied(DenialReason::MissingRequirement)
    }
}
