use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::Result;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use warden::audit::store::FileAuditStore;
use warden::audit::{AuditFilter, AuditRecorder};
use warden::authz::guard::{GuardOutcome, RouteGuard};
use warden::authz::types::{Grant, Level, Principal};
use warden::authz::{loader, AuthzState};
use warden::elevation::{elevation_options, ElevationService};
use warden::errors::WardenError;
use warden::settings::Settings;
use warden::storage::{FileUserStore, UserStore};

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Permission hierarchy, authorization checks and audit trail"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "warden.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the policy documents
    Validate,
    /// List permission levels by rank
    Levels,
    /// Show everything a level implies
    Closure { level: Level },
    /// Authorize a user against a level code or capability token
    Check { user: String, capability: String },
    /// Run the route guard for a route as a user (anonymous when omitted)
    Guard {
        route: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Raise a user to an administrative level
    Elevate {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        level: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Clear a user's level
    Demote {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Users an actor may elevate or demote
    Candidates {
        #[arg(long)]
        actor: String,
    },
    /// Elevation history, newest first
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Query the audit log, newest first
    Audit {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        limit: Option<usize>,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Export matching audit entries as CSV (requires L2)
    Export {
        #[arg(long)]
        actor: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Output file; stdout when omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Audit dashboard statistics
    Stats {
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Substring over user, action, module, details and target
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    module: Option<String>,
    #[arg(long)]
    target: Option<String>,
    #[arg(long)]
    level: Option<Level>,
    /// First day included (YYYY-MM-DD, UTC)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day included (YYYY-MM-DD, UTC)
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl From<FilterArgs> for AuditFilter {
    fn from(args: FilterArgs) -> Self {
        AuditFilter {
            text: args.text,
            username: args.user,
            action: args.action,
            module: args.module,
            target_username: args.target,
            actor_level: args.level,
            date_from: args.from,
            date_to: args.to,
        }
    }
}

/// Everything a command may need, opened from settings.
struct Context {
    settings: Settings,
    authz: AuthzState,
}

impl Context {
    fn users(&self) -> Result<Arc<FileUserStore>, WardenError> {
        Ok(Arc::new(FileUserStore::open(&self.settings.users.path)?))
    }

    fn recorder(&self) -> Result<Arc<AuditRecorder>, WardenError> {
        let store = Arc::new(FileAuditStore::open(&self.settings.audit.path)?);
        Ok(Arc::new(AuditRecorder::from_settings(
            store,
            &self.settings.audit,
        )))
    }

    fn elevation(
        &self,
        users: Arc<FileUserStore>,
        audit: Arc<AuditRecorder>,
    ) -> ElevationService {
        ElevationService::new(Arc::clone(&self.authz.hierarchy), users, audit)
    }
}

/// Active users only; anyone else is treated as not signed in.
fn principal(store: &dyn UserStore, username: &str) -> Result<Option<Principal>, WardenError> {
    match store.find_by_username(username)? {
        Some(user) if user.active => Ok(Some(user.to_principal())),
        Some(_) => {
            tracing::warn!(user = username, "user is inactive");
            Ok(None)
        }
        None => {
            tracing::warn!(user = username, "user not found");
            Ok(None)
        }
    }
}

fn level_or_dash(level: Option<Level>) -> String {
    level.map_or_else(|| "-".to_string(), |l| l.to_string())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;

    // logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    fmt().with_env_filter(env_filter).init();
    tracing::debug!(?settings, "Loaded configuration");

    // Invalid policies stop every command here.
    let authz = loader::load(settings.policy.dir.as_deref())?;
    let ctx = Context { settings, authz };

    let code = run(&ctx, cli.command)?;
    Ok(code)
}

fn run(ctx: &Context, command: Command) -> Result<ExitCode, WardenError> {
    let hierarchy = &ctx.authz.hierarchy;

    match command {
        Command::Validate => {
            println!(
                "ok: {} levels, {} routes",
                hierarchy.levels().len(),
                ctx.authz.routes.len()
            );
        }
        Command::Levels => {
            for level in hierarchy.levels() {
                let includes: Vec<String> = hierarchy
                    .direct_includes(level)
                    .iter()
                    .map(Level::to_string)
                    .collect();
                println!(
                    "{:<4} rank {:>3}  {}{}",
                    level.code(),
                    hierarchy.rank(level),
                    hierarchy.describe(level),
                    if includes.is_empty() {
                        String::new()
                    } else {
                        format!(" [includes {}]", includes.join(", "))
                    }
                );
            }
        }
        Command::Closure { level } => {
            let (levels, caps): (Vec<&Grant>, Vec<&Grant>) = hierarchy
                .closure(level)
                .iter()
                .partition(|g| matches!(g, Grant::Level(_)));
            let join = |grants: Vec<&Grant>| {
                grants
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            println!("levels:       {}", join(levels));
            println!("capabilities: {}", join(caps));
        }
        Command::Check { user, capability } => {
            let users = ctx.users()?;
            let principal = principal(&*users, &user)?;
            let decision = warden::authorize(hierarchy, principal.as_ref(), &capability);
            println!("{}", decision.status_str());
            if decision.is_denied() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Guard { route, user, path } => {
            let mut guard = RouteGuard::new(&ctx.authz);
            if ctx.settings.audit.record_denials {
                guard = guard.with_denial_audit(ctx.recorder()?);
            }
            let principal = match user {
                Some(name) => principal(&*ctx.users()?, &name)?,
                None => None,
            };
            match guard.intercept(principal.as_ref(), &route, &path) {
                GuardOutcome::Proceed => println!("proceed"),
                GuardOutcome::SignIn { next } => {
                    println!("sign in, then continue to {next}");
                    return Ok(ExitCode::FAILURE);
                }
                GuardOutcome::Forbidden { message } => {
                    println!("forbidden: {message}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Elevate {
            actor,
            target,
            level,
            reason,
        } => {
            let users = ctx.users()?;
            let audit = ctx.recorder()?;
            let actor = principal(&*users, &actor)?;
            let service = ctx.elevation(users, audit);
            match service.elevate(actor.as_ref(), &target, &level, &reason) {
                Ok(user) => println!(
                    "{} is now {}",
                    user.username,
                    level_or_dash(user.assigned_level())
                ),
                Err(e) if e.is_policy_violation() => {
                    println!("refused: {e}");
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Demote {
            actor,
            target,
            reason,
        } => {
            let users = ctx.users()?;
            let audit = ctx.recorder()?;
            let actor = principal(&*users, &actor)?;
            let service = ctx.elevation(users, audit);
            match service.demote(actor.as_ref(), &target, &reason) {
                Ok(user) => println!("{} demoted to module access only", user.username),
                Err(e) if e.is_policy_violation() => {
                    println!("refused: {e}");
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Candidates { actor } => {
            let users = ctx.users()?;
            let audit = ctx.recorder()?;
            let Some(actor) = principal(&*users, &actor)? else {
                println!("not authenticated");
                return Ok(ExitCode::FAILURE);
            };
            let grantable = elevation_options(actor.effective_level());
            if grantable.is_empty() {
                println!("{} may not elevate anyone", actor.username());
                return Ok(ExitCode::FAILURE);
            }
            let service = ctx.elevation(users, audit);
            for row in service.candidates(&actor)? {
                let options: Vec<String> = row.available.iter().map(Level::to_string).collect();
                println!(
                    "{:<20} {:<4} elevate to: {:<12} demote: {}",
                    row.user.username,
                    level_or_dash(row.current_level),
                    if options.is_empty() {
                        "-".to_string()
                    } else {
                        options.join(",")
                    },
                    if row.can_demote { "yes" } else { "no" }
                );
            }
        }
        Command::History { limit } => {
            let users = ctx.users()?;
            for record in users.elevation_history(limit)? {
                println!(
                    "{}  {:?}  {} {} -> {} by {}{}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.kind,
                    record.target_user,
                    level_or_dash(record.old_level),
                    level_or_dash(record.new_level),
                    record.elevated_by,
                    if record.reason.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", record.reason)
                    }
                );
            }
        }
        Command::Audit {
            filter,
            limit,
            json,
        } => {
            let filter = AuditFilter::from(filter);
            let audit = ctx.recorder()?;
            for entry in audit.query(&filter, limit)? {
                if json {
                    println!("{}", serde_json::to_string(&entry)?);
                } else {
                    println!(
                        "{:>6}  {}  {:<16} {:<4} {:<12} {:<20} {}{}",
                        entry.id,
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.username,
                        level_or_dash(entry.actor_level),
                        entry.module,
                        entry.action,
                        entry.details,
                        entry
                            .target_username
                            .as_deref()
                            .map(|t| format!(" -> {t}"))
                            .unwrap_or_default()
                    );
                }
            }
        }
        Command::Export {
            actor,
            filter,
            output,
        } => {
            let actor = principal(&*ctx.users()?, &actor)?;
            let audit = ctx.recorder()?;
            let guard = RouteGuard::new(&ctx.authz);
            let outcome =
                guard.intercept(actor.as_ref(), "admin.audit_export", "/admin/audit/export");
            let actor = match outcome {
                GuardOutcome::Proceed => actor,
                GuardOutcome::SignIn { .. } => None,
                GuardOutcome::Forbidden { message } => {
                    eprintln!("refused: {message}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            let Some(actor) = actor else {
                eprintln!("refused: actor is not signed in");
                return Ok(ExitCode::FAILURE);
            };

            let filter = AuditFilter::from(filter);
            let rows = match output {
                Some(path) => {
                    let file = File::create(&path)?;
                    let rows = audit.export_csv(&actor, &filter, BufWriter::new(file))?;
                    println!("exported {rows} entries to {}", path.display());
                    rows
                }
                None => audit.export_csv(&actor, &filter, std::io::stdout().lock())?,
            };
            tracing::info!(actor = actor.username(), rows, "audit log exported");
        }
        Command::Stats { days, json } => {
            let audit = ctx.recorder()?;
            let stats = audit.statistics(days)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "last {} days: {} actions, {} critical",
                    stats.days, stats.total_actions, stats.critical_actions
                );
                for (module, count) in &stats.by_module {
                    println!("  module {module:<14} {count}");
                }
                for (level, count) in &stats.by_level {
                    println!("  level  {level:<14} {count}");
                }
                for (user, count) in &stats.top_users {
                    println!("  user   {user:<14} {count}");
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
