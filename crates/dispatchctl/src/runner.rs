//! Loads configuration and state, runs one command, saves state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use service_coordination::config::parse_roles;
use service_coordination::{
    operation_schema, Actor, Clock, DispatchConfig, DispatchService, FixedClock,
    OperationContext, SharedMemoryStore, StoreSnapshot, TechnicianProfile,
};

use crate::cli::{Args, Command, TechnicianCommand};

const DEFAULT_STATE_FILE: &str = "dispatch-state.json";

/// Output of `technician import`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub tenant_id: String,
    pub imported: usize,
}

/// State file: `--state`, else `DISPATCH_STATE`, else `./dispatch-state.json`.
pub fn state_path(args: &Args) -> PathBuf {
    args.state.clone().unwrap_or_else(|| {
        PathBuf::from(
            std::env::var("DISPATCH_STATE").unwrap_or_else(|_| DEFAULT_STATE_FILE.to_string()),
        )
    })
}

pub fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    let config = match path {
        Some(path) => DispatchConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DispatchConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn context_for(args: &Args, config: &DispatchConfig) -> Result<OperationContext> {
    let roles = parse_roles(&args.role).map_err(anyhow::Error::msg)?;
    if roles.is_empty() {
        bail!("--role must name at least one role");
    }
    let mut actor = Actor::new(args.actor.trim(), roles);
    if let Some(email) = &args.email {
        actor = actor.with_email(email.trim());
    }

    let clock: Arc<dyn Clock> = match args.now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(config.clock()),
    };
    Ok(OperationContext::new(args.tenant.trim(), actor, clock))
}

/// Run one command and return its JSON output.
pub async fn run(args: Args) -> Result<serde_json::Value> {
    if matches!(args.command, Command::Schema) {
        return Ok(serde_json::to_value(operation_schema())?);
    }

    let config = load_config(args.config.as_deref())?;
    let ctx = context_for(&args, &config)?;
    let path = state_path(&args);

    let snapshot = StoreSnapshot::load(&path)
        .with_context(|| format!("loading state from {}", path.display()))?;
    let store = snapshot.into_store().shared();

    let output = match args.command {
        Command::Technician(cmd) => technician(&store, &ctx, cmd)?,
        command => {
            let op = command
                .operation()?
                .context("command has no service operation")?;
            let name = op.name();
            let service = DispatchService::in_memory(&store, config);
            service
                .execute(&ctx, op)
                .await
                .with_context(|| format!("{name} failed"))?
        }
    };

    StoreSnapshot::capture(&store)
        .and_then(|snapshot| snapshot.save(&path))
        .with_context(|| format!("saving state to {}", path.display()))?;
    debug!(path = %path.display(), "State saved");

    Ok(output)
}

fn technician(
    store: &SharedMemoryStore,
    ctx: &OperationContext,
    cmd: TechnicianCommand,
) -> Result<serde_json::Value> {
    let listing = matches!(cmd, TechnicianCommand::List);
    if !listing && !ctx.actor.is_privileged() {
        bail!("actor {} may not edit the technician directory", ctx.actor.id);
    }

    match cmd {
        TechnicianCommand::Add {
            id,
            name,
            email,
            specialization,
            skills,
            aliases,
            holidays,
        } => {
            let mut profile = TechnicianProfile::new(&ctx.tenant_id, id, name).with_skills(skills);
            if let Some(email) = email {
                profile = profile.with_email(email);
            }
            if let Some(specialization) = specialization {
                profile = profile.with_specialization(specialization);
            }
            for alias in aliases {
                profile = profile.with_alias(alias);
            }
            for day in holidays {
                profile = profile.with_holiday(day);
            }
            store.add_technician(profile.clone())?;
            info!(technician_id = %profile.id, tenant_id = %ctx.tenant_id, "Technician saved");
            Ok(serde_json::to_value(profile)?)
        }
        TechnicianCommand::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let profiles: Vec<TechnicianProfile> =
                serde_json::from_str(&raw).context("parsing technician list")?;
            let count = profiles.len();
            for mut profile in profiles {
                profile.tenant_id = ctx.tenant_id.clone();
                store.add_technician(profile)?;
            }
            info!(count, tenant_id = %ctx.tenant_id, "Technicians imported");
            Ok(serde_json::to_value(ImportSummary {
                tenant_id: ctx.tenant_id.clone(),
                imported: count,
            })?)
        }
        TechnicianCommand::List => {
            let mut profiles: Vec<TechnicianProfile> = store
                .technicians()?
                .into_iter()
                .filter(|t| t.tenant_id == ctx.tenant_id)
                .collect();
            profiles.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(serde_json::to_value(profiles)?)
        }
    }
}
