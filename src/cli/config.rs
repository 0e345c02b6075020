//! Tally configuration file handling
//!
//! Provides default configuration generation and loading for the bot.
//! Configuration files are TOML and live next to the ledger data directory.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally::chat::{BotConfig, RetryPolicy, StaticGate};
use tally::claims::DEFAULT_MIN_CLAIM_KEY_LEN;
use tally::ledger::{Amount, AmountParseError, StoreOptions, UserId};
use tally::withdrawal::WithdrawalLimits;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid duration for {field}: {source}")]
    Duration {
        field: &'static str,
        source: humantime::DurationError,
    },

    #[error("Invalid amount for {field}: {source}")]
    Amount {
        field: &'static str,
        source: AmountParseError,
    },

    #[error("bot.moderator_id must be set")]
    MissingModerator,
}

/// Tally bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyConfig {
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub bot: BotSection,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub withdrawal: WithdrawalConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the collection files and their backups
    pub data_dir: PathBuf,

    #[serde(default = "default_true")]
    pub snapshot_on_write: bool,

    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSection {
    /// Chat user id of the moderator
    #[serde(default)]
    pub moderator_id: String,

    #[serde(default = "default_support_contact")]
    pub support_contact: String,

    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,

    #[serde(default = "default_min_claim_key_len")]
    pub min_claim_key_len: usize,

    /// How long one receive waits for inbound events
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    #[serde(default = "default_upi_min")]
    pub upi_min: String,

    #[serde(default = "default_wallet_min")]
    pub wallet_min: String,

    #[serde(default = "default_fxl_min")]
    pub fxl_min: String,

    /// Retries of the moderator notification before the request is refunded
    #[serde(default = "default_notify_retries")]
    pub notify_retries: u32,

    #[serde(default = "default_notify_backoff")]
    pub notify_backoff: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// When false every user passes the membership check
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub join_link: String,

    #[serde(default)]
    pub members: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_backup_retention() -> usize {
    tally::ledger::store::DEFAULT_BACKUP_RETENTION
}

fn default_support_contact() -> String {
    "@support".to_string()
}

fn default_currency_symbol() -> String {
    "₹".to_string()
}

fn default_min_claim_key_len() -> usize {
    DEFAULT_MIN_CLAIM_KEY_LEN
}

fn default_poll_interval() -> String {
    "250ms".to_string()
}

fn default_idle_timeout() -> String {
    "15m".to_string()
}

fn default_sweep_interval() -> String {
    "1m".to_string()
}

fn default_upi_min() -> String {
    "5.00".to_string()
}

fn default_wallet_min() -> String {
    "2.00".to_string()
}

fn default_fxl_min() -> String {
    "5.00".to_string()
}

fn default_notify_retries() -> u32 {
    3
}

fn default_notify_backoff() -> String {
    "500ms".to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            moderator_id: String::new(),
            support_contact: default_support_contact(),
            currency_symbol: default_currency_symbol(),
            min_claim_key_len: default_min_claim_key_len(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            upi_min: default_upi_min(),
            wallet_min: default_wallet_min(),
            fxl_min: default_fxl_min(),
            notify_retries: default_notify_retries(),
            notify_backoff: default_notify_backoff(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

fn duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::Duration { field, source })
}

fn amount(field: &'static str, value: &str) -> Result<Amount, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::Amount { field, source })
}

impl TallyConfig {
    /// Create a new configuration with the given data directory
    #[allow(dead_code)]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            ledger: LedgerConfig {
                data_dir,
                snapshot_on_write: true,
                backup_retention: default_backup_retention(),
            },
            bot: BotSection::default(),
            sessions: SessionsConfig::default(),
            withdrawal: WithdrawalConfig::default(),
            gate: GateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a TOML file
    #[allow(dead_code)]
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        write_file(path, &contents)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            snapshot_on_write: self.ledger.snapshot_on_write,
            backup_retention: self.ledger.backup_retention,
        }
    }

    pub fn limits(&self) -> Result<WithdrawalLimits, ConfigError> {
        Ok(WithdrawalLimits {
            upi_min: amount("withdrawal.upi_min", &self.withdrawal.upi_min)?,
            wallet_min: amount("withdrawal.wallet_min", &self.withdrawal.wallet_min)?,
            fxl_min: amount("withdrawal.fxl_min", &self.withdrawal.fxl_min)?,
        })
    }

    /// Validate every typed field and build the runtime bot configuration.
    pub fn bot_config(&self) -> Result<BotConfig, ConfigError> {
        let moderator = self.bot.moderator_id.trim();
        if moderator.is_empty() {
            return Err(ConfigError::MissingModerator);
        }

        let base_delay = duration("withdrawal.notify_backoff", &self.withdrawal.notify_backoff)?;
        Ok(BotConfig {
            moderator: UserId::new(moderator),
            support_contact: self.bot.support_contact.clone(),
            join_link: self.gate.join_link.clone(),
            currency_symbol: self.bot.currency_symbol.clone(),
            limits: self.limits()?,
            min_claim_key_len: self.bot.min_claim_key_len,
            idle_timeout: duration("sessions.idle_timeout", &self.sessions.idle_timeout)?,
            poll_interval: duration("bot.poll_interval", &self.bot.poll_interval)?,
            sweep_interval: duration("sessions.sweep_interval", &self.sessions.sweep_interval)?,
            notify_retry: RetryPolicy {
                max_retries: self.withdrawal.notify_retries,
                base_delay,
                max_delay: base_delay.saturating_mul(16),
            },
        })
    }

    pub fn gate(&self) -> StaticGate {
        if !self.gate.enabled {
            return StaticGate::open();
        }
        let members: HashSet<UserId> = self.gate.members.iter().map(UserId::new).collect();
        StaticGate::with_members(members)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(data_dir: &Path) -> String {
        format!(
            r#"# Tally Bot Configuration

[ledger]
# Directory holding accounts.json, claims.json, submissions.json,
# withdrawals.json and the backups/ snapshots
data_dir = "{data_dir}"

# Snapshot each collection after every committed write
snapshot_on_write = true

# Snapshots kept per collection (older ones are pruned)
backup_retention = 10

[bot]
# Chat user id of the moderator. REQUIRED before `tally run`.
moderator_id = ""

# Shown by the Support menu entry
support_contact = "@support"

# Prefix for displayed amounts
currency_symbol = "₹"

# Shortest token accepted as a claim key in bulk imports
min_claim_key_len = 6

# How long one receive waits for inbound events
poll_interval = "250ms"

[sessions]
# Abandoned conversations are discarded after this much inactivity
idle_timeout = "15m"

# How often idle sessions are swept
sweep_interval = "1m"

[withdrawal]
# Minimum amount per method (at most 2 decimal places)
upi_min = "5.00"
wallet_min = "2.00"
fxl_min = "5.00"

# Retries of the moderator notification before a new request is refunded
notify_retries = 3
notify_backoff = "500ms"

[gate]
# Require channel membership before proofs, balance and withdrawals
enabled = false
join_link = ""
# members = ["12345"]

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/tally/tally.log"
"#,
            data_dir = data_dir.display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path, data_dir: &Path) -> Result<(), ConfigError> {
        write_file(config_path, &Self::generate_default_toml(data_dir))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration resolved from command-line flags.
pub struct Resolved {
    pub config: TallyConfig,
    pub path: PathBuf,
    pub created: bool,
}

/// Locate, load (creating a default if absent) and apply flag overrides.
///
/// `--data-dir` wins over the file's `ledger.data_dir`.
pub fn resolve(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<Resolved, ConfigError> {
    let data_dir_flag = data_dir.map(PathBuf::from);
    let data_dir = data_dir_flag.clone().unwrap_or_else(default_data_dir);
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&data_dir));

    let created = !path.exists();
    if created {
        TallyConfig::create_default(&path, &data_dir)?;
    }

    let mut config = TallyConfig::load(&path)?;
    if let Some(dir) = data_dir_flag {
        config.ledger.data_dir = dir;
    }

    Ok(Resolved {
        config,
        path,
        created,
    })
}

/// Get the default config file path based on the data directory
///
/// - Data: ~/.local/share/tally/ledger/
/// - Config: ~/.local/share/tally/config.toml
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.parent().unwrap_or(data_dir).join("config.toml")
}

/// Get the default ledger data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("ledger")
}
