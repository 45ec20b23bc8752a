use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use herbtrace::domain::{BatchId, BatchStatus, Principal, Role};
use herbtrace::lifecycle::LifecycleConfig;
use herbtrace::metrics::MetricsRegistry;
use herbtrace::projection::QueryService;
use herbtrace::service::{self, Config};
use herbtrace::telemetry::{init_telemetry, TelemetryConfig};
use herbtrace::BatchRepository;

fn print_help() {
    eprintln!(
        "\
herbtrace-admin

USAGE:
  herbtrace-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  show <id-or-qr>                 Print the merged batch view as JSON
  history <batch-id>              Print the transition journal of a batch
  list                            List batches visible to a principal
  sync-failures                   List batches whose ledger write failed
  stale-pending                   List batches stuck pending a ledger outcome

COMMON OPTIONS:
  --database-url <url>            (defaults to env DATABASE_URL; postgres:// or sqlite:)

show OPTIONS:
  --role <farmer|admin|manufacturer>  (optional) Render the participant view
  --principal <id>                    (required with --role)

list OPTIONS:
  --role <farmer|admin|manufacturer>  (required)
  --principal <id>                    (required)
  --status <status>                   (optional, repeatable) e.g. verified

sync-failures OPTIONS:
  --limit <n>                     (default: 100)

stale-pending OPTIONS:
  --older-than-secs <n>           (default: 300)
  --limit <n>                     (default: 100)

ENV (ledger, optional; enables on-chain enrichment in `show`):
  LEDGER_RPC_URL / LEDGER_CONTRACT_ADDRESS / LEDGER_PRIVATE_KEY / LEDGER_CHAIN_ID
"
    );
}

fn next_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn principal_from(
    role: Option<String>,
    principal: Option<String>,
) -> anyhow::Result<Option<Principal>> {
    match (role, principal) {
        (None, None) => Ok(None),
        (Some(role), Some(id)) => {
            let role: Role = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            Ok(Some(Principal::new(id, role)))
        }
        _ => anyhow::bail!("--role and --principal must be given together"),
    }
}

/// Store and query service for read commands. Never migrates.
async fn open(
    database_url: Option<String>,
) -> anyhow::Result<(Arc<dyn BatchRepository>, QueryService)> {
    let mut config = Config::from_env();
    if let Some(url) = database_url {
        config.database_url = url;
    }
    config.migrate_on_startup = false;
    let repository = service::connect_repository(&config, &MetricsRegistry::new()).await?;

    let lifecycle = LifecycleConfig::from_env()?;
    let ledger = service::ledger_from_env(&lifecycle)?;
    let queries = QueryService::new(repository.clone(), ledger, lifecycle.ledger_timeout);
    Ok((repository, queries))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig {
        log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
        ..TelemetryConfig::from_env()
    })?;

    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let mut database_url: Option<String> = None;
    let mut positional: Option<String> = None;
    let mut role: Option<String> = None;
    let mut principal: Option<String> = None;
    let mut statuses: Vec<BatchStatus> = Vec::new();
    let mut limit: u32 = 100;
    let mut older_than_secs: u64 = 300;

    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "--database-url" => database_url = Some(next_value(&mut args, "--database-url")?),
            "--role" => role = Some(next_value(&mut args, "--role")?),
            "--principal" => principal = Some(next_value(&mut args, "--principal")?),
            "--status" => {
                let raw = next_value(&mut args, "--status")?;
                statuses.push(raw.parse().map_err(|e: String| anyhow::anyhow!(e))?);
            }
            "--limit" => limit = next_value(&mut args, "--limit")?.parse()?,
            "--older-than-secs" => {
                older_than_secs = next_value(&mut args, "--older-than-secs")?.parse()?
            }
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            other if !other.starts_with("--") && positional.is_none() => {
                positional = Some(other.to_string())
            }
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    match command.as_str() {
        "migrate" => {
            let mut config = Config::from_env();
            if let Some(url) = database_url {
                config.database_url = url;
            }
            config.migrate_on_startup = true;
            service::connect_repository(&config, &MetricsRegistry::new()).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "show" => {
            let key = positional.ok_or_else(|| anyhow::anyhow!("show requires <id-or-qr>"))?;
            let (_, queries) = open(database_url).await?;
            let view = match principal_from(role, principal)? {
                Some(p) => queries.get_batch_view_as(&p, &key).await?,
                None => queries.get_batch_view(&key).await?,
            };
            print_json(&view)
        }
        "history" => {
            let id = positional.ok_or_else(|| anyhow::anyhow!("history requires <batch-id>"))?;
            let (repository, _) = open(database_url).await?;
            let journal = repository.history(&BatchId::new(id.clone())).await?;
            if journal.is_empty() {
                anyhow::bail!("no journal for batch {id}");
            }
            for record in journal {
                println!(
                    "{:>4}  {}  {:<28} {:>20} -> {:<20} {:<22} ledger={}{}",
                    record.revision,
                    record.at.to_rfc3339(),
                    record.transition,
                    record.from_status.map(|s| s.as_str()).unwrap_or("-"),
                    record.to_status,
                    record.actor,
                    record.ledger_state,
                    record
                        .tx_hash
                        .map(|h| format!(" tx={h}"))
                        .or(record.ledger_error.map(|e| format!(" error={e}")))
                        .unwrap_or_default(),
                );
            }
            Ok(())
        }
        "list" => {
            let principal = principal_from(role, principal)?
                .ok_or_else(|| anyhow::anyhow!("list requires --role and --principal"))?;
            let (_, queries) = open(database_url).await?;
            let statuses = (!statuses.is_empty()).then_some(statuses);
            print_json(&queries.list_by_role_and_status(&principal, statuses).await?)
        }
        "sync-failures" => {
            let (_, queries) = open(database_url).await?;
            print_json(&queries.list_sync_failures(limit).await?)
        }
        "stale-pending" => {
            let (_, queries) = open(database_url).await?;
            let older_than = Duration::from_secs(older_than_secs);
            print_json(&queries.list_stale_pending(older_than, limit).await?)
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
