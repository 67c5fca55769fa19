//! MetaCI build scheduler CLI.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "metaci")]
#[command(about = "MetaCI build scheduler", long_about = None)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Register the repeatable scheduler job (idempotent)
    EnsureScheduledJob,
    /// Admit builds for a trigger event
    Trigger {
        /// Repository as owner/name
        repo: String,
        /// Branch (or tag) name
        #[arg(long)]
        branch: String,
        /// Commit SHA
        #[arg(long)]
        commit: String,
        /// Trigger kind: commit or tag
        #[arg(long, default_value = "commit")]
        kind: String,
        /// Commit message, consulted for skip markers
        #[arg(long)]
        message: Option<String>,
        /// Admit for this plan explicitly, skipping regex resolution
        #[arg(long)]
        plan: Option<String>,
    },
    /// Run a single scheduler pass
    Tick,
    /// Run the periodic scheduler until interrupted
    RunScheduler,
    /// Inspect builds
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Runner surface: claim dispatched builds and report results
    Work {
        #[command(subcommand)]
        command: WorkCommands,
    },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// List recent builds
    List {
        /// Maximum number of builds to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Show one build
    Show {
        /// Build ID
        id: String,
    },
    /// Cancel a non-terminal build
    Cancel {
        /// Build ID
        id: String,
    },
}

#[derive(Subcommand)]
enum WorkCommands {
    /// Claim the next dispatched build
    Claim {
        /// Identifier reported as the claimant
        #[arg(long)]
        worker_id: String,
    },
    /// Report a terminal state for a claimed build
    Complete {
        /// Queue entry ID printed by claim
        entry: String,
        /// Build ID
        build: String,
        /// Terminal status: success, failed, error, or cancelled
        #[arg(long)]
        status: String,
        /// Build log to store
        #[arg(long)]
        log: Option<String>,
    },
    /// Release a claimed entry back to pending
    Release {
        /// Queue entry ID
        entry: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let pool = metaci_db::create_pool(&cli.database_url).await?;

    match cli.command {
        Commands::Migrate => {
            commands::migrate(&pool).await?;
        }
        Commands::EnsureScheduledJob => {
            commands::ensure_scheduled_job(&pool).await?;
        }
        Commands::Trigger {
            repo,
            branch,
            commit,
            kind,
            message,
            plan,
        } => {
            commands::trigger(&pool, &repo, &branch, &commit, &kind, message, plan).await?;
        }
        Commands::Tick => {
            commands::tick(&pool).await?;
        }
        Commands::RunScheduler => {
            commands::run_scheduler(&pool).await?;
        }
        Commands::Builds { command } => match command {
            BuildCommands::List { limit } => {
                commands::builds::list(&pool, limit).await?;
            }
            BuildCommands::Show { id } => {
                commands::builds::show(&pool, &id).await?;
            }
            BuildCommands::Cancel { id } => {
                commands::builds::cancel(&pool, &id).await?;
            }
        },
        Commands::Work { command } => match command {
            WorkCommands::Claim { worker_id } => {
                commands::work::claim(&pool, &worker_id).await?;
            }
            WorkCommands::Complete {
                entry,
                build,
                status,
                log,
            } => {
                commands::work::complete(&pool, &entry, &build, &status, log).await?;
            }
            WorkCommands::Release { entry } => {
                commands::work::release(&pool, &entry).await?;
            }
        },
    }

    Ok(())
}
