mod rpc;
mod sink;
mod source;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mirror_common::error::{MirrorError, MirrorResult};
use mirror_config::{init_tracing, AppConfig, LockStrategy, LogFormat, SyncConfig};
use mirror_db::lock::AdvisoryLock;
use mirror_db::raw_records::pg_repository::PgRawRecordRepository;
use mirror_db::schema::ensure_schema;
use mirror_db::sync::pg_repository::PgSyncLedgerRepository;
use mirror_db::sync::repositories::SyncLedgerRepository;
use sqlx::PgPool;

use crate::rpc::client::{RpcClient, RpcClientConfig, RpcClientError};
use crate::sync::descriptor::EntityDescriptor;
use crate::sync::engine::SyncEngine;
use crate::sync::runner::run_pass;

const EXIT_OK: u8 = 0;
const EXIT_ENTITY_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "mirror-sync", version, about = "Incrementally mirror source records into Postgres")]
struct Cli {
    /// Sync configuration file. Overrides MIRROR_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one pass over the configured entities.
    Run {
        /// Restrict the pass to these entities. Repeatable.
        #[arg(long = "entity", value_name = "NAME")]
        entities: Vec<String>,
    },
    /// Print checkpoints and the most recent runs.
    Status {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Create the mirror tables if they do not exist.
    InitSchema,
}

#[derive(Debug, thiserror::Error)]
enum FatalError {
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Remote(#[from] RpcClientError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app = match AppConfig::from_env() {
        Ok(app) => app,
        Err(e) => {
            init_tracing("info", LogFormat::Text);
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    init_tracing(&app.log_level, app.log_format);
    tracing::info!(service = "mirror-sync", "starting");

    match execute(cli, app).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "mirror-sync aborted");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn execute(cli: Cli, app: AppConfig) -> Result<u8, FatalError> {
    let config_path = cli.config.unwrap_or(app.config_path);

    match cli.command {
        Command::Run { entities } => {
            let config = SyncConfig::load(&config_path)?;
            let descriptors = config
                .select_entities(&entities)?
                .into_iter()
                .map(EntityDescriptor::from_config)
                .collect::<MirrorResult<Vec<_>>>()?;
            let pool = mirror_db::create_pool(&app.database_url).await?;
            run(pool, &config, &descriptors).await
        }
        Command::Status { limit } => {
            let pool = mirror_db::create_pool(&app.database_url).await?;
            print_status(&PgSyncLedgerRepository::new(pool), i64::from(limit)).await?;
            Ok(EXIT_OK)
        }
        Command::InitSchema => {
            let pool = mirror_db::create_pool(&app.database_url).await?;
            ensure_schema(&pool).await?;
            tracing::info!("schema is up to date");
            Ok(EXIT_OK)
        }
    }
}

/// Take the single-runner lock, sync, and release the lock on every path.
async fn run(pool: PgPool, config: &SyncConfig, entities: &[EntityDescriptor]) -> Result<u8, FatalError> {
    let guard = match config.lock.strategy {
        LockStrategy::Advisory => {
            let lock = AdvisoryLock::new(pool.clone(), config.lock.key);
            match lock.try_acquire().await? {
                Some(guard) => Some(guard),
                None => {
                    tracing::info!(key = config.lock.key, "another sync holds the lock, exiting");
                    return Ok(EXIT_OK);
                }
            }
        }
        LockStrategy::Disabled => {
            tracing::warn!("advisory lock disabled; concurrent runs are not prevented");
            None
        }
    };

    let result = run_pass_with_client(pool, config, entities, guard.is_some()).await;

    if let Some(guard) = guard {
        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "failed to release advisory lock");
        }
    }

    result
}

async fn run_pass_with_client(
    pool: PgPool,
    config: &SyncConfig,
    entities: &[EntityDescriptor],
    locked: bool,
) -> Result<u8, FatalError> {
    let client = match RpcClient::connect(RpcClientConfig::from_sync_config(config)).await {
        Ok(client) => client,
        Err(e) => {
            if e.is_authentication() {
                tracing::error!(username = %config.source.username, "source rejected credentials");
            }
            return Err(e.into());
        }
    };
    tracing::info!(
        url = %client.config().base_url,
        database = %client.config().database,
        uid = client.uid(),
        "authenticated with source"
    );

    let engine = SyncEngine::new(
        client,
        pool.clone(),
        PgRawRecordRepository::new(pool.clone()),
        PgSyncLedgerRepository::new(pool),
    )
    .with_stale_run_reaping(locked);

    let report = run_pass(&engine, entities).await;

    for entity in report.failed() {
        tracing::error!(
            entity = %entity.entity,
            run_id = ?entity.run_id,
            error = entity.error.as_deref().unwrap_or_default(),
            "entity failed"
        );
    }

    Ok(if report.all_succeeded() {
        EXIT_OK
    } else {
        EXIT_ENTITY_FAILED
    })
}

async fn print_status(ledger: &PgSyncLedgerRepository, limit: i64) -> MirrorResult<()> {
    let checkpoints = ledger.list_checkpoints().await?;
    println!("{:<32} {:<14} {:<34} {:<36}", "ENTITY", "CURSOR FIELD", "POSITION", "LAST SUCCESSFUL RUN");
    for cp in &checkpoints {
        println!(
            "{:<32} {:<14} {:<34} {:<36}",
            cp.entity_name,
            cp.cursor_field,
            cp.position.map_or_else(|| "-".to_string(), |p| p.to_string()),
            cp.last_successful_run_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
        );
    }

    let runs = ledger.latest_runs(limit).await?;
    println!();
    println!(
        "{:<36} {:<32} {:<8} {:>8} {:>8} {:>6}  {}",
        "RUN", "ENTITY", "STATUS", "READ", "WRITTEN", "PAGES", "STARTED"
    );
    for run in &runs {
        println!(
            "{:<36} {:<32} {:<8} {:>8} {:>8} {:>6}  {}",
            run.run_id,
            run.entity_name,
            run.status.as_str(),
            run.records_read,
            run.records_upserted,
            run.pages_processed,
            run.started_at.to_rfc3339(),
        );
        if let Some(error) = &run.error_message {
            println!("    error: {error}");
        }
    }
    Ok(())
}
