//! `fieldsync` - CLI for the offline-first capture and sync engine
//!
//! This binary records captures, drains the offline queue and inspects the
//! local store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fieldsync::cli::{
    CaptureCommand, Cli, Command, ConfigCommand, ConflictsCommand, PendingCommand,
    ReleaseCommand, SyncCommand,
};
use fieldsync::monitor::{HttpProbe, ReachabilityProbe};
use fieldsync::record::RecordKind;
use fieldsync::runtime::connect;
use fieldsync::store::{Collection, IndexQuery};
use fieldsync::sync::SubmitOutcome;
use fieldsync::{
    init_logging, Config, FieldSync, HttpTransport, StatusBus, StatusEvent, Store, Transport,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json).await,
        Command::Capture(capture_cmd) => handle_capture(&config, capture_cmd).await,
        Command::Sync(sync_cmd) => handle_sync(&config, &sync_cmd).await,
        Command::Pending(pending_cmd) => handle_pending(&config, &pending_cmd),
        Command::Conflicts(conflicts_cmd) => handle_conflicts(&config, &conflicts_cmd),
        Command::Release(release_cmd) => handle_release(&config, &release_cmd),
        Command::Purge => handle_purge(&config),
        Command::Run => handle_run(&config).await,
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn transport(config: &Config) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(HttpTransport::new(config)?))
}

fn open_store(config: &Config) -> Result<Store> {
    let path = config.database_path();
    Store::open(&path).with_context(|| format!("opening store at {}", path.display()))
}

async fn handle_status(config: &Config, json: bool) -> Result<()> {
    let probe = HttpProbe::new(transport(config)?, config.remote.health_path.clone());
    let reachable = probe.probe().await;
    let stats = Store::open(config.database_path()).and_then(|store| store.stats());

    if json {
        let status = match &stats {
            Ok(stats) => serde_json::json!({
                "online": reachable,
                "remote": config.remote.base_url,
                "database_path": config.database_path(),
                "offline_saving_enabled": true,
                "store": stats,
            }),
            Err(e) => serde_json::json!({
                "online": reachable,
                "remote": config.remote.base_url,
                "database_path": config.database_path(),
                "offline_saving_enabled": false,
                "error": e.to_string(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("fieldsync status");
    println!("----------------");
    println!("Remote:        {}", config.remote.base_url);
    println!(
        "Connectivity:  {}",
        if reachable { "online" } else { "offline" }
    );
    println!("Database:      {}", config.database_path().display());
    match stats {
        Ok(stats) => {
            println!();
            println!("Pending:");
            for collection in Collection::ALL {
                println!(
                    "  {:<20} {}",
                    collection.kind().to_string(),
                    stats.pending.get(collection)
                );
            }
            println!("Quarantined:   {}", stats.quarantined);
            println!("Synced:        {} (awaiting cleanup)", stats.synced);
            println!("Cached:        {} entities", stats.cached_entities);
            println!("Conflicts:     {}", stats.conflicts);
            println!("Size:          {} bytes", stats.db_size_bytes);
        }
        Err(e) => {
            println!();
            println!("Offline saving is disabled: {e}");
        }
    }
    Ok(())
}

async fn handle_capture(config: &Config, cmd: CaptureCommand) -> Result<()> {
    let engine = connect(config, transport(config)?, Arc::new(StatusBus::new())).await;
    let capture = cmd.into_capture();
    let kind = capture.kind();
    let offline_id = capture.offline_id;

    match engine.submit_or_queue(capture).await? {
        SubmitOutcome::Submitted { response } => {
            println!("Submitted {kind} {offline_id} (HTTP {})", response.status);
        }
        SubmitOutcome::StoredOffline { id } => {
            println!("Stored {kind} #{id} offline; it will sync when the platform is reachable.");
        }
    }
    Ok(())
}

async fn handle_sync(config: &Config, cmd: &SyncCommand) -> Result<()> {
    let engine = connect(config, transport(config)?, Arc::new(StatusBus::new())).await;
    let report = if cmd.evidence_only {
        engine.sync_evidence().await
    } else {
        engine.sync_all().await
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Outcome:       {:?}", report.outcome);
        println!("Attempted:     {}", report.attempted);
        println!("Synced:        {}", report.synced);
        println!("Failed:        {}", report.failed);
        println!("Quarantined:   {}", report.quarantined);
        println!("Conflicts:     {}", report.conflicts);
        println!("Purged:        {}", report.purged);
    }

    if let Some(err) = report.partial_failure() {
        return Err(err.into());
    }
    Ok(())
}

fn handle_pending(config: &Config, cmd: &PendingCommand) -> Result<()> {
    let store = open_store(config)?;
    let mut records = Vec::new();
    for collection in cmd.collections() {
        records.extend(store.query_by_index(collection, IndexQuery::Synced(false))?);
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }

    println!(
        "{:<18} {:>6}  {:<36}  {:<25}  {:>8}  STATE",
        "KIND", "ID", "OFFLINE ID", "CAPTURED", "ATTEMPTS"
    );
    for record in &records {
        let state = if record.quarantined {
            "quarantined"
        } else {
            "pending"
        };
        println!(
            "{:<18} {:>6}  {:<36}  {:<25}  {:>8}  {state}",
            record.kind().to_string(),
            record.id,
            record.capture.offline_id,
            record.capture.client_timestamp.to_rfc3339(),
            record.attempts,
        );
        if let Some(error) = &record.last_error {
            println!("{:>27} last error: {error}", "");
        }
    }
    Ok(())
}

fn handle_conflicts(config: &Config, cmd: &ConflictsCommand) -> Result<()> {
    let store = open_store(config)?;
    let conflicts = store.conflicts(cmd.limit)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts recorded.");
        return Ok(());
    }

    for conflict in &conflicts {
        println!(
            "{}  {}  record {}  ({})",
            conflict.recorded_at.to_rfc3339(),
            conflict.offline_id,
            conflict
                .record_id
                .map_or_else(|| "?".to_string(), |id| id.to_string()),
            conflict.resolution,
        );
        println!("    server: {}", conflict.remote_value);
        println!("    client: {}", conflict.client_value);
    }
    Ok(())
}

fn handle_release(config: &Config, cmd: &ReleaseCommand) -> Result<()> {
    let store = open_store(config)?;
    let kind = RecordKind::from(cmd.kind);
    if store.release(kind.collection(), cmd.id)? {
        println!("Released {kind} #{}; it will be retried on the next sync.", cmd.id);
    } else {
        println!("No quarantined {kind} #{}.", cmd.id);
    }
    Ok(())
}

fn handle_purge(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let retention = config.synced_retention();
    let mut purged = 0;
    for collection in Collection::ALL {
        purged += store.purge_synced(collection, retention)?;
    }
    println!("Purged {purged} synced records.");
    Ok(())
}

async fn handle_run(config: &Config) -> Result<()> {
    let app = FieldSync::start(config, transport(config)?).await?;
    let mut events = app.status().subscribe();
    info!(remote = %config.remote.base_url, "fieldsync running; press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Status events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    app.shutdown();
    Ok(())
}

fn log_event(event: &StatusEvent) {
    match event {
        StatusEvent::Connectivity { online } => info!(online, "Connectivity changed"),
        StatusEvent::PendingChanged(counts) => info!(pending = counts.total(), "Queue changed"),
        StatusEvent::SyncStarted => info!("Sync started"),
        StatusEvent::SyncFinished(report) => info!(
            outcome = ?report.outcome,
            synced = report.synced,
            failed = report.failed,
            "Sync finished"
        ),
        StatusEvent::StoredOffline { kind, id } => info!(%kind, id, "Stored offline"),
        StatusEvent::OfflineSavingDisabled { reason } => {
            warn!(%reason, "Offline saving disabled");
        }
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Store]");
                println!("  Database path:      {}", config.database_path().display());
                println!(
                    "  Synced retention:   {} hours",
                    config.store.synced_retention_hours
                );
                println!();
                println!("[Remote]");
                println!("  Base URL:           {}", config.remote.base_url);
                println!("  CSRF header:        {}", config.remote.csrf_header);
                println!(
                    "  CSRF token:         {}",
                    if config.remote.csrf_token.is_some() {
                        "set"
                    } else {
                        "not set"
                    }
                );
                println!("  Health path:        {}", config.remote.health_path);
                println!();
                println!("[Sync]");
                println!("  Interval (secs):    {}", config.sync.interval_secs);
                println!("  Probe (secs):       {}", config.sync.probe_interval_secs);
                println!("  Bulk assessments:   {}", config.sync.bulk_assessments);
                println!("  Delete on sync:     {}", config.sync.delete_on_sync);
                println!("  Max rejections:     {}", config.sync.max_rejections);
                println!();
                println!("[Intercept]");
                println!("  Cache version:      {}", config.intercept.cache_version);
                println!("  Offline page:       {}", config.intercept.offline_page_path);
                println!(
                    "  API prefixes:       {}",
                    config.intercept.api_prefixes.join(", ")
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
