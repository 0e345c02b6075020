use clap::{Parser, Subcommand};

pub mod add_claims;
pub mod config;
pub mod logging;
pub mod run;
pub mod stats;
pub mod verify;
pub mod version;

#[derive(Parser)]
#[command(name = "tally")]
#[command(author = "Tally Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Tally referral reward bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot service on the console transport
    Run {
        /// Path to config file (default: ~/.local/share/tally/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Ledger data directory (overrides the config file)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Print ledger statistics and recent users
    Stats {
        /// Path to config file (default: ~/.local/share/tally/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Ledger data directory (overrides the config file)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Import verified claim keys with a common reward
    AddClaims {
        /// Claim keys (free-form text is scanned for keys)
        keys: Vec<String>,

        /// Read additional keys from this file
        #[arg(long)]
        file: Option<String>,

        /// Reward per claim, e.g. 2.50
        #[arg(long)]
        reward: String,

        /// Path to config file (default: ~/.local/share/tally/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Ledger data directory (overrides the config file)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Verify installation integrity
    Verify {
        /// Path to config file (default: ~/.local/share/tally/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Ledger data directory (overrides the config file)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config, data_dir } => run::execute(config, data_dir).await,
        Commands::Stats { config, data_dir } => stats::execute(config, data_dir),
        Commands::AddClaims {
            keys,
            file,
            reward,
            config,
            data_dir,
        } => add_claims::execute(keys, file, reward, config, data_dir),
        Commands::Verify { config, data_dir } => verify::execute(config, data_dir),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["tally", "run", "--config", "/etc/tally/config.toml"]);

        match cli.command {
            Commands::Run { config, data_dir } => {
                assert_eq!(config, Some("/etc/tally/config.toml".to_string()));
                assert_eq!(data_dir, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["tally", "run"]);

        match cli.command {
            Commands::Run { config, data_dir } => {
                assert_eq!(config, None);
                assert_eq!(data_dir, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_stats_with_data_dir() {
        let cli = Cli::parse_from(["tally", "stats", "--data-dir", "/srv/tally"]);

        match cli.command {
            Commands::Stats { config, data_dir } => {
                assert_eq!(config, None);
                assert_eq!(data_dir, Some("/srv/tally".to_string()));
            }
            _ => panic!("Expected Stats command"),
        }
    }

    #[test]
    fn test_cli_parse_add_claims() {
        let cli = Cli::parse_from([
            "tally",
            "add-claims",
            "REF123456",
            "REF654321",
            "--reward",
            "2.50",
            "--file",
            "/tmp/keys.txt",
        ]);

        match cli.command {
            Commands::AddClaims {
                keys, file, reward, ..
            } => {
                assert_eq!(keys, vec!["REF123456", "REF654321"]);
                assert_eq!(file, Some("/tmp/keys.txt".to_string()));
                assert_eq!(reward, "2.50");
            }
            _ => panic!("Expected AddClaims command"),
        }
    }

    #[test]
    fn test_cli_add_claims_requires_reward() {
        assert!(Cli::try_parse_from(["tally", "add-claims", "REF123456"]).is_err());
    }

    #[test]
    fn test_cli_parse_verify() {
        let cli = Cli::parse_from(["tally", "verify"]);
        assert!(matches!(cli.command, Commands::Verify { .. }));
    }

    #[test]
    fn test_cli_parse_version() {
        let cli = Cli::parse_from(["tally", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }
}
