mod alert_cmd;
mod cancel_cmd;
mod config;
mod dispatch_cmd;
mod listen_cmd;
mod recover_cmd;
mod runtime_stub;
#[cfg(test)]
mod test_util;
mod workflow_cmd;

use clap::{Parser, Subcommand};

use config::OrcConfig;
use orc_core::config::OrchestratorConfig;
use orc_db::pool;

#[derive(Parser)]
#[command(name = "orc", about = "Control-plane orchestrator for an agent-execution platform")]
struct Cli {
    /// Database URL (overrides ORC_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an orc config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/orc")]
        db_url: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database and run migrations
    DbInit,
    /// Run dispatch admission over queued runs
    Dispatch {
        #[command(subcommand)]
        command: DispatchCommands,
    },
    /// Reap orphaned runs and sweep for stale/zombie/overdue runs
    Recover,
    /// Drain runtime event streams into the control plane
    Listen {
        #[command(subcommand)]
        command: ListenCommands,
    },
    /// Evaluate every enabled alert rule once
    AlertCheck,
    /// Workflow execution management
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Cancel a queued or running run
    Cancel {
        /// Run ID to cancel
        run_id: String,
    },
}

#[derive(Subcommand)]
enum DispatchCommands {
    /// Run a single admission pass over queued runs
    Tick,
    /// Run admission passes on an interval until interrupted
    Loop {
        /// Seconds between passes
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum ListenCommands {
    /// Poll every worker once and drain whatever events it returns
    Tick,
    /// Poll on an interval until interrupted
    Loop {
        /// Seconds between passes
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Start a new execution of a workflow
    Start {
        /// Workflow ID to start
        workflow_id: String,
        /// Initial context as key=value pairs
        #[arg(long = "set")]
        context: Vec<String>,
    },
    /// Approve an execution awaiting a pending approval node
    Approve {
        /// Execution ID to approve
        execution_id: String,
        /// Identity recorded as the approver
        #[arg(long, default_value = "operator")]
        approved_by: String,
    },
    /// Reject an execution awaiting a pending approval node
    Reject {
        /// Execution ID to reject
        execution_id: String,
    },
}

/// Execute the `orc init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `orc db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `orc db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = OrcConfig::resolve(cli_db_url)?;

    println!("Initializing orc database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("orc db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { db_url, force } = &cli.command {
        cmd_init(db_url, *force)?;
        return Ok(());
    }
    if let Commands::DbInit = &cli.command {
        cmd_db_init(cli.database_url.as_deref()).await?;
        return Ok(());
    }

    let resolved = OrcConfig::resolve(cli.database_url.as_deref())?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let orchestrator_config = OrchestratorConfig::resolve();

    let result: anyhow::Result<()> = match cli.command {
        Commands::Init { .. } | Commands::DbInit => unreachable!("handled above"),
        Commands::Dispatch { command } => match command {
            DispatchCommands::Tick => {
                dispatch_cmd::run_tick(&db_pool, orchestrator_config.admission).await
            }
            DispatchCommands::Loop { interval } => {
                dispatch_cmd::run_loop(&db_pool, orchestrator_config.admission, interval).await
            }
        },
        Commands::Recover => {
            recover_cmd::run_once(&db_pool, orchestrator_config.dead_run_detection).await
        }
        Commands::Listen { command } => match command {
            ListenCommands::Tick => listen_cmd::run_tick(&db_pool, orchestrator_config.admission).await,
            ListenCommands::Loop { interval } => {
                listen_cmd::run_loop(&db_pool, orchestrator_config.admission, interval).await
            }
        },
        Commands::AlertCheck => alert_cmd::run(&db_pool).await,
        Commands::Workflow { command } => match command {
            WorkflowCommands::Start {
                workflow_id,
                context,
            } => {
                workflow_cmd::run_start(
                    &db_pool,
                    orchestrator_config.admission,
                    &workflow_id,
                    &context,
                )
                .await
            }
            WorkflowCommands::Approve {
                execution_id,
                approved_by,
            } => {
                workflow_cmd::run_approve(
                    &db_pool,
                    orchestrator_config.admission,
                    &execution_id,
                    &approved_by,
                )
                .await
            }
            WorkflowCommands::Reject { execution_id } => {
                workflow_cmd::run_reject(&db_pool, orchestrator_config.admission, &execution_id)
                    .await
            }
        },
        Commands::Cancel { run_id } => cancel_cmd::run(&db_pool, &run_id).await,
    };

    db_pool.close().await;
    result
}
