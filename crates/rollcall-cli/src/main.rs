//! rollcall - command-line front end for the school data sync engine.
//!
//! Loads snapshots through the same cache the dashboard uses, so it doubles
//! as a way to inspect the cache and to watch cross-process invalidation.

use std::io;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rollcall_core::{CacheEntry, Credential, EngineConfig, SnapshotPatch, SyncEngine, SyncError};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Bearer token for the remote service
const TOKEN_ENV: &str = "ROLLCALL_TOKEN";

/// When set, logs are also written to a daily rolling file in this directory
const LOG_DIR_ENV: &str = "ROLLCALL_LOG_DIR";

const LOG_FILE_PREFIX: &str = "rollcall.log";

const USAGE: &str = "\
Usage: rollcall <command> [args]

Commands:
  load <scope> [--json]     Print the snapshot for a scope, fetching if needed
  refresh <scope> [--json]  Fetch the snapshot now
  watch <scope>             Print every snapshot change until Ctrl+C
  touch <scope>             Rewrite the classes partition to notify other processes
  clear                     Remove all cached snapshots

Environment:
  ROLLCALL_TOKEN     bearer token (required except for clear)
  ROLLCALL_API_URL   remote service base URL
  ROLLCALL_LOG_DIR   also write logs here
  RUST_LOG           log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file on drop and must outlive `main`'s work.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

enum Command {
    Load { scope: String, json: bool },
    Refresh { scope: String, json: bool },
    Watch { scope: String },
    Touch { scope: String },
    Clear,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let command = args.get(1).map(String::as_str);
    let scope = || {
        args.get(2)
            .filter(|s| !s.starts_with("--"))
            .cloned()
            .ok_or_else(|| anyhow!("missing <scope>\n\n{}", USAGE))
    };
    let json = args.iter().skip(2).any(|a| a == "--json");

    match command {
        Some("load") => Ok(Command::Load { scope: scope()?, json }),
        Some("refresh") => Ok(Command::Refresh { scope: scope()?, json }),
        Some("watch") => Ok(Command::Watch { scope: scope()? }),
        Some("touch") => Ok(Command::Touch { scope: scope()? }),
        Some("clear") => Ok(Command::Clear),
        Some(other) => Err(anyhow!("unknown command '{}'\n\n{}", other, USAGE)),
        None => Err(anyhow!("{}", USAGE)),
    }
}

fn credential() -> Result<Credential> {
    let token = std::env::var(TOKEN_ENV).with_context(|| format!("{} is not set", TOKEN_ENV))?;
    if token.trim().is_empty() {
        return Err(anyhow!("{} is empty", TOKEN_ENV));
    }
    Ok(Credential::new(token.trim()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    let _log_guard = init_tracing();
    info!("rollcall starting");

    let config = EngineConfig::load()?.with_env_overrides();
    let engine = SyncEngine::from_config(config.clone())?;

    let result = run(&engine, command, &config).await;
    engine.dispose();

    if let Err(e) = &result {
        if e.downcast_ref::<SyncError>()
            .is_some_and(SyncError::is_credential_problem)
        {
            eprintln!("The data service rejected the credential; check {}", TOKEN_ENV);
        }
    }
    result
}

async fn run(engine: &SyncEngine, command: Command, config: &EngineConfig) -> Result<()> {
    match command {
        Command::Load { scope, json } => {
            let entry = engine.load_data(&scope, &credential()?).await?;
            print_entry(&scope, &entry, json)
        }
        Command::Refresh { scope, json } => {
            let entry = engine.refresh_data(&scope, &credential()?).await?;
            print_entry(&scope, &entry, json)
        }
        Command::Watch { scope } => watch(engine, &scope, config).await,
        Command::Touch { scope } => touch(engine, &scope).await,
        Command::Clear => {
            engine.clear_cache();
            println!("Cache cleared");
            Ok(())
        }
    }
}

/// Print every snapshot stored for `scope` until Ctrl+C.
///
/// The cache is revalidated on the freshness interval; refreshes triggered by
/// other processes show up as they land.
async fn watch(engine: &SyncEngine, scope: &str, config: &EngineConfig) -> Result<()> {
    let credential = credential()?;
    engine.init();

    let entry = engine.load_data(scope, &credential).await?;
    print_entry(scope, &entry, false)?;

    let printed_scope = scope.to_string();
    let _subscription = engine.subscribe_key(scope, &credential, move |entry| {
        if let Err(e) = print_entry(&printed_scope, entry, false) {
            eprintln!("Failed to print snapshot: {}", e);
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(config.fresh_window_secs.max(1)));
    ticker.tick().await;
    println!("Watching {} (Ctrl+C to stop)", scope);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                if let Err(e) = engine.load_data(scope, &credential).await {
                    eprintln!("Refresh failed: {}", e);
                }
            }
        }
    }
    Ok(())
}

/// Rewrite the classes partition unchanged. Other processes watching the
/// same cache directory refresh in response.
async fn touch(engine: &SyncEngine, scope: &str) -> Result<()> {
    let credential = credential()?;
    let current = engine.load_data(scope, &credential).await?;

    let handle = engine.update_cache(
        scope,
        &credential,
        SnapshotPatch::groups(current.snapshot.groups.clone()),
        None,
    );
    println!("Optimistic update written ({})", handle.optimistic().content_hash);

    let reconciled = handle.wait().await?;
    print_entry(scope, &reconciled, false)
}

fn print_entry(scope: &str, entry: &CacheEntry, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entry)?);
        return Ok(());
    }

    let snapshot = &entry.snapshot;
    println!(
        "{}  hash {}  fetched {}",
        scope,
        entry.content_hash,
        entry.age_display()
    );
    println!(
        "  students {}  classes {}  attendance {}/{}  deliveries {}  events {}  menu {}",
        snapshot.members.len(),
        snapshot.groups.len(),
        snapshot.attendance_today.len(),
        snapshot.attendance_weekly.len(),
        snapshot.deliveries.len(),
        snapshot.calendar_events.len(),
        if snapshot.menu_of_day.is_some() { "yes" } else { "no" },
    );
    for group in &snapshot.groups {
        println!(
            "  {:<20} total {:>3}  M {:>3}  F {:>3}  allergies {:>3}",
            group
                .name
                .as_deref()
                .or(group.id.as_deref())
                .unwrap_or("(unnamed)"),
            group.total_members.unwrap_or(0),
            group.male.unwrap_or(0),
            group.female.unwrap_or(0),
            group.allergy_count.unwrap_or(0),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(
            parse_args(&args(&["rollcall", "load", "school-1", "--json"])),
            Ok(Command::Load { ref scope, json: true }) if scope == "school-1"
        ));
        assert!(matches!(
            parse_args(&args(&["rollcall", "watch", "school-1"])),
            Ok(Command::Watch { .. })
        ));
        assert!(matches!(parse_args(&args(&["rollcall", "clear"])), Ok(Command::Clear)));
    }

    #[test]
    fn test_parse_rejects_missing_scope_and_unknown_command() {
        assert!(parse_args(&args(&["rollcall", "load"])).is_err());
        assert!(parse_args(&args(&["rollcall", "load", "--json"])).is_err());
        assert!(parse_args(&args(&["rollcall", "frobnicate"])).is_err());
        assert!(parse_args(&args(&["rollcall"])).is_err());
    }
}
