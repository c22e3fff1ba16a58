use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use kdl::KdlDocument;

/// Parse a KDL document string into typed policy structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "level" => {
                let code = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "level node requires a string argument (e.g. level \"L1\" rank=10)".into(),
                    )
                })?;

                let rank = node
                    .get("rank")
                    .and_then(|v| v.as_integer())
                    .and_then(|r| i64::try_from(r).ok())
                    .ok_or_else(|| {
                        AuthzError::InvalidPolicy(format!(
                            "level `{code}` missing integer `rank` property (e.g. rank=10)"
                        ))
                    })?;

                let mut description = None;
                let mut includes = Vec::new();
                let mut capabilities = Vec::new();

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "description" => {
                                description = first_string_arg(child);
                            }
                            "includes" => {
                                includes = dash_list(child);
                            }
                            "capabilities" => {
                                capabilities = dash_list(child);
                            }
                            other => {
                                return Err(AuthzError::InvalidPolicy(format!(
                                    "unexpected child `{other}` in level `{code}` (expected `description`, `includes` or `capabilities`)"
                                )));
                            }
                        }
                    }
                }

                policy.levels.push(LevelDef {
                    code,
                    rank,
                    description,
                    includes,
                    capabilities,
                });
            }
            "route" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "route node requires a string argument (e.g. route \"admin.audit\" requires=\"L2\")"
                            .into(),
                    )
                })?;

                let requires = node.get("requires").and_then(|v| v.as_string());
                let access = node.get("access").and_then(|v| v.as_string());

                let access = match (requires, access) {
                    (Some(token), None) => RouteAccess::Requires(token.to_string()),
                    (None, Some("public")) => RouteAccess::Public,
                    (None, Some("login")) => RouteAccess::Login,
                    (None, Some(other)) => {
                        return Err(AuthzError::InvalidPolicy(format!(
                            "route `{name}` has unknown access `{other}` (expected \"public\" or \"login\")"
                        )));
                    }
                    (Some(_), Some(_)) => {
                        return Err(AuthzError::InvalidPolicy(format!(
                            "route `{name}` sets both `requires` and `access`"
                        )));
                    }
                    (None, None) => {
                        return Err(AuthzError::InvalidPolicy(format!(
                            "route `{name}` needs `requires=\"<token>\"` or `access=\"public\"|\"login\"`"
                        )));
                    }
                };

                let message = node
                    .get("message")
                    .and_then(|v| v.as_string())
                    .map(|s| s.to_string());

                policy.routes.push(RouteDef {
                    name,
                    access,
                    message,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// includes {
///     - "M3A"
///     - "M3B"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
