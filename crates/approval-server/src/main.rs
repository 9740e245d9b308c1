//! Approval workflow executable
//!
//! Opens the file store, seeds configured definitions and either runs the
//! escalation sweeper or performs a single administrative action.

mod admin;

use anyhow::Context;
use approval_engine::{
    ApprovalsConfig, DefinitionRegistry, DirectoryApproverResolver, EscalationSweeper, FileStore,
    StaticRoleDirectory, WebhookNotifier, WorkflowEngine,
};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("approval-server")
        .version("1.0.0")
        .about("Approval workflow engine")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .env("APPROVALS_CONFIG")
                .default_value("/app/config/approvals.json"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Override storage.data_dir from the configuration"),
        )
        .arg(
            Arg::new("actor")
                .long("actor")
                .value_name("EMAIL")
                .env("APPROVALS_ACTOR")
                .help("Identity recorded for start/approve/reject/cancel"),
        )
        .arg(
            Arg::new("comment")
                .long("comment")
                .value_name("TEXT")
                .help("Comment, rejection reason or start notes"),
        )
        .arg(
            Arg::new("definition")
                .long("definition")
                .value_name("ID")
                .help("Definition to use with --start instead of the entity type's default"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Seed configured definitions and list all definitions")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sweep-once")
                .long("sweep-once")
                .help("Run a single escalation sweep and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("monitor")
                .long("monitor")
                .help("Run the escalation sweeper until interrupted")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pending-for")
                .long("pending-for")
                .value_name("EMAIL")
                .help("List pending approval requests for an approver"),
        )
        .arg(
            Arg::new("show-entity")
                .long("show-entity")
                .num_args(2)
                .value_names(["TYPE", "ID"])
                .help("Show the latest workflow of an entity with its requests and history"),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .num_args(2)
                .value_names(["TYPE", "ID"])
                .help("Start a workflow for an entity"),
        )
        .arg(
            Arg::new("approve")
                .long("approve")
                .value_name("REQUEST_ID")
                .help("Approve a pending request"),
        )
        .arg(
            Arg::new("reject")
                .long("reject")
                .value_name("REQUEST_ID")
                .help("Reject a pending request (reason via --comment)"),
        )
        .arg(
            Arg::new("cancel")
                .long("cancel")
                .value_name("INSTANCE_ID")
                .help("Cancel an in-progress workflow instance"),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ApprovalsConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .context("--config is required")?;
    let mut config = ApprovalsConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.storage.data_dir = PathBuf::from(data_dir);
        config.validate()?;
    }

    log::info!("Loaded configuration from {}", config_path);
    Ok(config)
}

fn build_engine(config: &ApprovalsConfig, store: Arc<FileStore>) -> anyhow::Result<WorkflowEngine> {
    let roles = Arc::new(StaticRoleDirectory::new(config.roles.clone()));
    let resolver = Arc::new(DirectoryApproverResolver::new(roles));
    let mut engine = WorkflowEngine::new(store.clone(), store, resolver);

    if let Some(webhook) = &config.webhook {
        let notifier = WebhookNotifier::new(webhook)?;
        log::info!("Publishing workflow events to {}", notifier.url());
        engine = engine.with_observer(Arc::new(notifier));
    }

    Ok(engine)
}

fn pair(matches: &ArgMatches, id: &str) -> Option<(String, String)> {
    let mut values = matches.get_many::<String>(id)?;
    Some((values.next()?.clone(), values.next()?.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    let store = Arc::new(FileStore::new(&config.storage.data_dir)?);
    log::info!("Using data directory: {}", config.storage.data_dir.display());

    let registry = DefinitionRegistry::new(store.clone());
    registry.seed(&config.definitions).await?;

    let engine = Arc::new(build_engine(&config, store)?);
    let actor = matches.get_one::<String>("actor").cloned();
    let comment = matches.get_one::<String>("comment").cloned();

    if matches.get_flag("seed") {
        admin::list_definitions(&registry).await?;
    } else if let Some(email) = matches.get_one::<String>("pending-for") {
        admin::pending_for(&engine, email).await?;
    } else if let Some((entity_type, entity_id)) = pair(&matches, "show-entity") {
        admin::show_entity(&engine, &entity_type, &entity_id).await?;
    } else if let Some((entity_type, entity_id)) = pair(&matches, "start") {
        let definition = matches.get_one::<String>("definition").map(String::as_str);
        admin::start(&engine, &entity_type, &entity_id, admin::require_actor(actor)?, definition, comment).await?;
    } else if let Some(request_id) = matches.get_one::<String>("approve") {
        admin::approve(&engine, request_id, admin::require_actor(actor)?, comment).await?;
    } else if let Some(request_id) = matches.get_one::<String>("reject") {
        admin::reject(&engine, request_id, admin::require_actor(actor)?, comment).await?;
    } else if let Some(instance_id) = matches.get_one::<String>("cancel") {
        admin::cancel(&engine, instance_id, admin::require_actor(actor)?, comment).await?;
    } else if matches.get_flag("sweep-once") {
        let sweeper = EscalationSweeper::new(engine, &config.sweeper);
        let report = sweeper.sweep_once(chrono::Utc::now()).await?;
        log::info!(
            "Sweep finished: {} scanned, {} auto-approved, {} reminders, {} already processed, {} failed",
            report.scanned, report.auto_approved, report.reminders_sent, report.already_processed, report.failed
        );
    } else if matches.get_flag("monitor") {
        let sweeper = Arc::new(EscalationSweeper::new(engine, &config.sweeper));
        let sweeper_handle = tokio::spawn(async move { sweeper.start().await });

        tokio::select! {
            result = sweeper_handle => {
                match result {
                    Ok(()) => log::info!("Escalation sweeper exited normally"),
                    Err(e) => {
                        log::error!("Escalation sweeper task panicked: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
            }
        }
    } else {
        log::error!("No action specified. Use --help for options.");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_pairs() {
        let matches = cli()
            .try_get_matches_from(["approval-server", "--show-entity", "invoice", "42"])
            .unwrap();
        assert_eq!(pair(&matches, "show-entity"), Some(("invoice".to_string(), "42".to_string())));
        assert_eq!(pair(&matches, "start"), None);
    }

    #[test]
    fn test_data_dir_overrides_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        std::fs::write(&path, r#"{"storage": {"data_dir": "/var/lib/approvals"}}"#).unwrap();
        let config_arg = path.to_string_lossy().to_string();

        let matches = cli()
            .try_get_matches_from(["approval-server", "--config", config_arg.as_str(), "--data-dir", "/tmp/other"])
            .unwrap();
        let config = load_config(&matches).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/other"));
    }
}
