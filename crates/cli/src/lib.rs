use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = "config/ledgerd.yaml";

#[derive(Parser, Debug)]
#[command(name = "ledgerd")]
#[command(about = "OpenExchange spot ledger - trade settlement and chain reconciliation")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Log output format; overrides `logging.format` in the configuration
    #[arg(long, global = true, value_enum, env = "LEDGERD_LOG_FORMAT")]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ledger worker and run until Ctrl+C
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "LEDGERD_CONFIG")]
        config: PathBuf,
    },

    /// Validate configuration without starting the ledger
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "LEDGERD_CONFIG")]
        config: PathBuf,
    },

    /// Write a development configuration with one BTC/USDT market
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "ledgerd.yaml")]
        output: PathBuf,

        /// Replace the file if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Apply the ledger schema to the configured PostgreSQL database
    Migrate {
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "LEDGERD_CONFIG")]
        config: PathBuf,
    },

    /// Print a user's balance of one asset
    Balance {
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "LEDGERD_CONFIG")]
        config: PathBuf,

        #[arg(long)]
        user: i64,

        #[arg(long)]
        symbol: String,
    },

    /// Print the total custodial reserve of a symbol on one platform/protocol
    Reserve {
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "LEDGERD_CONFIG")]
        config: PathBuf,

        #[arg(long)]
        symbol: String,

        /// bitcoin, ethereum or tron
        #[arg(long)]
        platform: String,

        /// mainnet, erc20, trc20 or bep20
        #[arg(long, default_value = "mainnet")]
        protocol: String,
    },

    /// Print one order as JSON
    Order {
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "LEDGERD_CONFIG")]
        config: PathBuf,

        #[arg(long)]
        id: i64,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Start { .. } => "start",
            Commands::Validate { .. } => "validate",
            Commands::Init { .. } => "init",
            Commands::Migrate { .. } => "migrate",
            Commands::Balance { .. } => "balance",
            Commands::Reserve { .. } => "reserve",
            Commands::Order { .. } => "order",
        }
    }

    /// Configuration file the command reads, if any
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Commands::Init { .. } => None,
            Commands::Start { config }
            | Commands::Validate { config }
            | Commands::Migrate { config }
            | Commands::Balance { config, .. }
            | Commands::Reserve { config, .. }
            | Commands::Order { config, .. } => Some(config),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable with colors
    Pretty,
    /// JSON lines for log aggregation
    Json,
    /// Single-line
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
