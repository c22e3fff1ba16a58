// Integration tests for capability resolution, the level hierarchy and the
// authorization decision, driven through stored user records.

mod helpers;

use helpers::builders::principal_with_payload;
use helpers::{TestWarden, UserBuilder};
use serde_json::json;
use warden::authz::guard::{GuardOutcome, RouteGuard};
use warden::authz::resolver::{self, LegacyFlags, RawPayload};
use warden::authz::types::{Decision, DenialReason, Level};
use warden::authz::{loader, Hierarchy};
use warden::authorize;

fn payloads() -> Vec<RawPayload> {
    vec![
        RawPayload::Absent,
        RawPayload::Text(String::new()),
        RawPayload::Text("{not valid json".into()),
        RawPayload::Text("[1, 2, 3]".into()),
        RawPayload::Text(r#"{"can_send": true, "can_asset": "no"}"#.into()),
        RawPayload::Text(r#"["M1", "inventory", "  USERS  "]"#.into()),
        RawPayload::Json(json!({"fulfillment": 1, "is_admin": false})),
        RawPayload::Json(json!(null)),
        RawPayload::Json(json!({"nested": {"deep": true}})),
        RawPayload::Legacy(LegacyFlags {
            can_fulfillment_staff: true,
            is_sysadmin: true,
            ..Default::default()
        }),
    ]
}

#[test]
fn test_resolve_is_total_and_deterministic() {
    for payload in payloads() {
        let first = resolver::resolve(&payload);
        let second = resolver::resolve(&payload);
        assert_eq!(first, second, "payload {payload:?}");
    }
}

#[test]
fn test_resolve_malformed_json_is_empty() {
    let caps = resolver::resolve(&RawPayload::Text("{not valid json".into()));
    assert!(caps.is_empty());
}

#[test]
fn test_resolve_canonicalizes_synonyms() {
    let caps = resolver::resolve(&RawPayload::Json(json!({
        "inventory": true,
        "fulfillment_service": true
    })));
    assert!(caps.has("asset"));
    assert!(caps.has("can_inventory"));
    assert!(caps.has("fulfillment_staff"));
    assert!(caps.has("fulfillment_any"));
    assert!(!caps.has("fulfillment_customer"));
}

#[test]
fn test_closure_idempotent_for_every_level() {
    let hierarchy = Hierarchy::builtin().expect("Built-in policies must compile");
    for level in Level::ALL {
        let closure = hierarchy.closure(level).clone();
        assert_eq!(hierarchy.closure_of_set(&closure), closure, "{level}");
    }
}

#[test]
fn test_system_closure_contains_every_closure() {
    let hierarchy = Hierarchy::builtin().expect("Built-in policies must compile");
    let system = hierarchy.closure(Level::S1);
    for level in Level::ALL {
        assert!(hierarchy.closure(level).is_subset(system), "{level}");
    }
}

#[test]
fn test_system_bypass_with_empty_capabilities() {
    let warden = TestWarden::new(vec![UserBuilder::new(1, "system").system().build()]);
    let system = warden.principal("system");
    assert!(system.capabilities().is_empty());
    assert_eq!(
        authorize(warden.hierarchy(), Some(&system), "can_users"),
        Decision::Allowed
    );
}

#[test]
fn test_system_flag_in_payload_bypasses() {
    let warden = TestWarden::new(vec![UserBuilder::new(1, "root")
        .with_caps(json!({"is_system": true}))
        .build()]);
    let root = warden.principal("root");
    assert!(authorize(warden.hierarchy(), Some(&root), "L3").is_allowed());
}

#[test]
fn test_module_level_grants_only_its_module() {
    let warden = TestWarden::new(vec![UserBuilder::new(2, "mia").with_level(Level::M1).build()]);
    let mia = warden.principal("mia");
    assert_eq!(
        authorize(warden.hierarchy(), Some(&mia), "can_send"),
        Decision::Allowed
    );
    assert_eq!(
        authorize(warden.hierarchy(), Some(&mia), "can_asset"),
        Decision::Denied(DenialReason::MissingRequirement)
    );
}

#[test]
fn test_unauthenticated_is_denied() {
    let hierarchy = Hierarchy::builtin().expect("Built-in policies must compile");
    assert_eq!(
        authorize(&hierarchy, None, "home"),
        Decision::Denied(DenialReason::NotAuthenticated)
    );
}

#[test]
fn test_legacy_columns_fall_back_to_levels() {
    let warden = TestWarden::new(vec![
        UserBuilder::new(3, "old-admin")
            .with_legacy(LegacyFlags {
                is_admin: true,
                ..Default::default()
            })
            .build(),
        UserBuilder::new(4, "old-sysadmin")
            .with_legacy(LegacyFlags {
                is_sysadmin: true,
                ..Default::default()
            })
            .build(),
    ]);
    let h = warden.hierarchy();

    let admin = warden.principal("old-admin");
    assert!(authorize(h, Some(&admin), "L1").is_allowed());
    assert!(authorize(h, Some(&admin), "users").is_allowed());
    assert!(authorize(h, Some(&admin), "audit").is_denied());

    let sysadmin = warden.principal("old-sysadmin");
    assert!(authorize(h, Some(&sysadmin), "L2").is_allowed());
    assert!(authorize(h, Some(&sysadmin), "L3").is_denied());
}

#[test]
fn test_garbage_stored_level_never_escalates() {
    let warden = TestWarden::new(vec![UserBuilder::new(5, "eve")
        .with_raw_level("ROOT")
        .with_caps(json!(["send"]))
        .build()]);
    let eve = warden.principal("eve");
    assert_eq!(eve.assigned_level(), None);
    assert!(authorize(warden.hierarchy(), Some(&eve), "send").is_allowed());
    assert!(authorize(warden.hierarchy(), Some(&eve), "L1").is_denied());
}

#[test]
fn test_payload_module_codes_grant_their_closure() {
    let p = principal_with_payload(RawPayload::Text(r#"["M2", "M3B"]"#.into()));
    let hierarchy = Hierarchy::builtin().expect("Built-in policies must compile");
    assert!(authorize(&hierarchy, Some(&p), "inventory").is_allowed());
    assert!(authorize(&hierarchy, Some(&p), "fulfillment_any").is_allowed());
    assert!(authorize(&hierarchy, Some(&p), "fulfillment_customer").is_denied());
    assert!(authorize(&hierarchy, Some(&p), "M3C").is_denied());
}

#[test]
fn test_route_guard_uses_declared_requirements() {
    let warden = TestWarden::new(vec![
        UserBuilder::new(1, "ann").with_level(Level::L2).build(),
        UserBuilder::new(2, "cust")
            .with_caps(json!({"fulfillment_customer": true}))
            .build(),
    ]);
    let guard = RouteGuard::new(&warden.authz);
    let ann = warden.principal("ann");
    let cust = warden.principal("cust");

    assert!(guard.intercept(Some(&ann), "admin.audit", "/admin/audit").is_proceed());
    assert!(guard.intercept(Some(&ann), "fulfillment.manage", "/f/manage").is_proceed());
    assert!(!guard.intercept(Some(&ann), "admin.system", "/admin/system").is_proceed());

    assert!(guard.intercept(Some(&cust), "fulfillment.request", "/f/new").is_proceed());
    assert!(guard.intercept(Some(&cust), "fulfillment.archive", "/f/archive").is_proceed());
    assert_eq!(
        guard.intercept(Some(&cust), "fulfillment.queue", "/f/queue"),
        GuardOutcome::Forbidden {
            message: "Fulfillment staff access required.".into()
        }
    );
    assert_eq!(
        guard.intercept(None, "fulfillment.queue", "/f/queue"),
        GuardOutcome::SignIn {
            next: "/f/queue".into()
        }
    );
}

#[test]
fn test_custom_policy_directory_replaces_builtin() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let levels = r#"
level "M1" rank=1 { capabilities { - "send" } }
level "M2" rank=1 { capabilities { - "asset" } }
level "M3A" rank=1 { capabilities { - "fulfillment_customer" } }
level "M3B" rank=1 { capabilities { - "fulfillment_staff" } }
level "M3C" rank=2 { includes { - "M3A"; - "M3B"; } }
level "L1" rank=10 { includes { - "M1"; - "M2"; - "M3C"; } capabilities { - "reports" } }
level "L2" rank=20 { includes { - "L1" } }
level "L3" rank=30 { includes { - "L2" } }
level "S1" rank=100 { includes { - "L3" } }
"#;
    std::fs::write(dir.path().join("levels.kdl"), levels).expect("Failed to write policy");
    std::fs::write(
        dir.path().join("routes.kdl"),
        r#"route "reports.index" requires="reports""#,
    )
    .expect("Failed to write policy");

    let state = loader::load(Some(dir.path())).expect("Custom policies must compile");
    assert_eq!(state.routes.len(), 1);

    let l1 = UserBuilder::new(1, "ann").with_level(Level::L1).principal();
    assert!(authorize(&state.hierarchy, Some(&l1), "reports").is_allowed());
    assert!(authorize(&state.hierarchy, Some(&l1), "users").is_denied());
}

#[test]
fn test_invalid_policy_directory_fails_fast() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(
        dir.path().join("levels.kdl"),
        r#"level "L1" rank=10 { includes { - "L1" } }"#,
    )
    .expect("Failed to write policy");
    assert!(loader::load(Some(dir.path())).is_err());
}
