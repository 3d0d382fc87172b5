use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(name = "vwr")]
#[command(about = "Virtual waiting room reconciliation CLI", long_about = None)]
struct Cli {
    /// Layered config YAML paths in merge order (base -> env -> overrides)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Inspect or seed the frontier counters of the configured event
    Frontiers {
        #[command(subcommand)]
        cmd: FrontiersCmd,
    },

    /// Run one Expiry Marker pass and print its summary as JSON
    Expire {
        /// Opaque trigger payload (JSON); logged, otherwise ignored
        #[arg(long)]
        payload: Option<String>,
    },

    /// Run one Serving Advancer pass and print its summary as JSON
    Advance {
        /// Opaque trigger payload (JSON); logged, otherwise ignored
        #[arg(long)]
        payload: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DbTarget {
    /// Position ledger database (VWR_DATABASE_URL / ledger.url)
    Ledger,
    /// Frontier counter database (VWR_CACHE_URL / cache.url)
    Cache,
}

#[derive(Subcommand)]
enum DbCmd {
    Status {
        #[arg(long, value_enum, default_value_t = DbTarget::Ledger)]
        target: DbTarget,
    },

    /// Apply SQL migrations.
    Migrate {
        #[arg(long, value_enum, default_value_t = DbTarget::Ledger)]
        target: DbTarget,
    },
}

#[derive(Subcommand)]
enum FrontiersCmd {
    /// Print the three counters
    Show,

    /// Seed the three counters. Guardrail: refuses to overwrite existing
    /// counters unless --yes is provided.
    Init {
        #[arg(long)]
        queue_counter: i64,

        #[arg(long)]
        serving_counter: i64,

        #[arg(long = "max-expired")]
        max_expired: i64,

        /// Acknowledge that live counters will be overwritten.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let paths: Vec<&str> = cli.config_paths.iter().map(|s| s.as_str()).collect();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status { target } => commands::db_status(&paths, target).await?,
            DbCmd::Migrate { target } => commands::db_migrate(&paths, target).await?,
        },

        Commands::Frontiers { cmd } => match cmd {
            FrontiersCmd::Show => commands::frontiers::show(&paths).await?,
            FrontiersCmd::Init {
                queue_counter,
                serving_counter,
                max_expired,
                yes,
            } => {
                let frontiers = vwr_reconcile::Frontiers {
                    queue_counter,
                    serving_counter,
                    max_expired,
                };
                commands::frontiers::init(&paths, frontiers, yes).await?
            }
        },

        Commands::Expire { payload } => {
            commands::reconcile::expire(&paths, payload.as_deref()).await?
        }

        Commands::Advance { payload } => {
            commands::reconcile::advance(&paths, payload.as_deref()).await?
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
