use clap::{Args, Parser, Subcommand};

use crate::domain::{Amount, EntryKind};
use crate::storage::{PoolConfig, TimeoutConfig};

/// Idempotent webhook ledger
#[derive(Parser, Debug)]
#[command(name = "ledger", version, about)]
pub struct Cli {
    /// Default log filter, used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install the schema (idempotent) and optionally seed accounts
    Migrate(MigrateArgs),

    /// Apply webhook deliveries from CSV, writing one outcome row per delivery to stdout
    Replay(ReplayArgs),

    /// Apply a single webhook event and print the outcome as JSON
    Process(ProcessArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DB_POOL_MIN", default_value_t = PoolConfig::DEFAULT_MIN_CONNECTIONS)]
    pub pool_min: u32,

    #[arg(long, env = "DB_POOL_MAX", default_value_t = PoolConfig::DEFAULT_MAX_CONNECTIONS)]
    pub pool_max: u32,

    /// How long to wait for a free pooled connection
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_MS", default_value_t = 5_000)]
    pub acquire_timeout_ms: u64,
}

impl DatabaseArgs {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            database_url: self.database_url.clone(),
            min_connections: self.pool_min,
            max_connections: self.pool_max.max(self.pool_min),
            acquire_timeout: std::time::Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct TimeoutArgs {
    /// Per-transaction statement timeout; 0 disables it
    #[arg(long, env = "STATEMENT_TIMEOUT_MS", default_value_t = TimeoutConfig::DEFAULT_STATEMENT_TIMEOUT_MS)]
    pub statement_timeout_ms: u64,

    /// Per-transaction lock wait timeout; 0 disables it
    #[arg(long, env = "LOCK_TIMEOUT_MS", default_value_t = TimeoutConfig::DEFAULT_LOCK_TIMEOUT_MS)]
    pub lock_timeout_ms: u64,
}

impl TimeoutArgs {
    pub fn to_config(self) -> TimeoutConfig {
        TimeoutConfig::from_millis(self.statement_timeout_ms, self.lock_timeout_ms)
    }
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Number of accounts to create after installing the schema
    #[arg(long, default_value_t = 0)]
    pub seed_accounts: u32,

    /// Opening balance for seeded accounts
    #[arg(long, default_value = "0.00")]
    pub opening_balance: Amount,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    #[command(flatten)]
    pub timeouts: TimeoutArgs,

    /// CSV file with columns account_id,provider_id,external_id,kind,amount; `-` reads stdin
    #[arg(default_value = "-")]
    pub input: String,

    /// Events processed concurrently
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Stop at the first unreadable record or storage failure
    #[arg(long)]
    pub abort_on_error: bool,
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    #[command(flatten)]
    pub timeouts: TimeoutArgs,

    #[arg(long)]
    pub account_id: i64,

    #[arg(long)]
    pub provider_id: String,

    #[arg(long)]
    pub external_id: String,

    /// `credit` or `debit`
    #[arg(long)]
    pub kind: EntryKind,

    /// Positive amount with at most two decimal places
    #[arg(long)]
    pub amount: Amount,
}
