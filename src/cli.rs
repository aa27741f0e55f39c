use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "swingbot")]
#[command(author, version, about = "Leveraged-futures swing trading bot", long_about = None)]
pub struct Cli {
    /// Directory holding default.toml and environment overrides
    #[arg(short, long, global = true, default_value = "config", env = "SWINGBOT_CONFIG_DIR")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the trading loop (default)
    Run,
    /// Print the most recent ledger trades
    Trades {
        /// Number of trades to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: u32,
    },
    /// Print recent audit events
    Events {
        /// Only events of this type (e.g. cycle_error)
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
    /// Validate configuration and exit
    Check,
}

impl Cli {
    pub fn command(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&Commands::Run)
    }
}
