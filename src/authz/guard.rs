//! Dispatch-layer interceptor.
//!
//! The dispatcher names the route it is about to run; the guard looks up the
//! requirement declared for it in the policy documents and asks the engine
//! before the handler is invoked. Handlers carry no authorization code.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditRecorder};
use crate::authz::engine;
use crate::authz::types::{Decision, DenialReason, Principal, RouteAccess, RouteDef};
use crate::authz::{AuthzState, Hierarchy};

const DEFAULT_DENIAL: &str = "You do not have permission to access this area.";

/// What the dispatcher should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Run the handler.
    Proceed,
    /// Send the user to sign in, then back to `next`.
    SignIn { next: String },
    /// Refuse with a user-facing message.
    Forbidden { message: String },
}

impl GuardOutcome {
    pub fn is_proceed(&self) -> bool {
        matches!(self, GuardOutcome::Proceed)
    }
}

pub struct RouteGuard {
    hierarchy: Arc<Hierarchy>,
    routes: HashMap<String, RouteDef>,
    denials: Option<Arc<AuditRecorder>>,
}

impl RouteGuard {
    pub fn new(state: &AuthzState) -> Self {
        Self {
            hierarchy: Arc::clone(&state.hierarchy),
            routes: state.routes.clone(),
            denials: None,
        }
    }

    /// Record an `access_denied` entry for every refused request.
    pub fn with_denial_audit(mut self, recorder: Arc<AuditRecorder>) -> Self {
        self.denials = Some(recorder);
        self
    }

    pub fn route(&self, name: &str) -> Option<&RouteDef> {
        self.routes.get(name)
    }

    /// Route names, sorted.
    pub fn route_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn intercept(
        &self,
        principal: Option<&Principal>,
        route: &str,
        path: &str,
    ) -> GuardOutcome {
        let Some(def) = self.routes.get(route) else {
            tracing::warn!(route, "request for undeclared route refused");
            return self.forbid(principal, route, "undeclared route", DEFAULT_DENIAL);
        };

        let message = def.message.as_deref().unwrap_or(DEFAULT_DENIAL);
        match &def.access {
            RouteAccess::Public => GuardOutcome::Proceed,
            RouteAccess::Login => match principal {
                Some(_) => GuardOutcome::Proceed,
                None => sign_in(path),
            },
            RouteAccess::Requires(token) => {
                match engine::authorize(&self.hierarchy, principal, token) {
                    Decision::Allowed => GuardOutcome::Proceed,
                    Decision::Denied(DenialReason::NotAuthenticated) => sign_in(path),
                    Decision::Denied(DenialReason::MissingRequirement) => {
                        self.forbid(principal, route, &format!("requires {token}"), message)
                    }
                }
            }
        }
    }

    fn forbid(
        &self,
        principal: Option<&Principal>,
        route: &str,
        why: &str,
        message: &str,
    ) -> GuardOutcome {
        if let (Some(recorder), Some(principal)) = (&self.denials, principal) {
            let module = route.split('.').next().unwrap_or(route);
            recorder.record(AuditEvent::by(
                principal,
                "access_denied",
                module,
                format!("Denied {route}: {why}"),
            ));
        }
        GuardOutcome::Forbidden {
            message: message.to_string(),
        }
    }
}

fn sign_in(path: &str) -> GuardOutcome {
    GuardOutcome::SignIn {
        next: path.to_string(),
    }
}
