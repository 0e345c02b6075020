use super::config::resolve;
use super::logging;
use std::sync::Arc;
use tally::chat::{ConsoleClient, TallyBot};
use tally::ledger::{CollectionId, LedgerStore, LoadSource};
use tracing::{error, info, warn};

/// Run the bot service
///
/// Loads the configuration (creating a default file on first run), opens
/// the ledger, and serves the console transport until stdin closes.
///
/// ## Configuration Loading
///
/// 1. `--config` flag if provided
/// 2. `config.toml` next to `--data-dir` if provided
/// 3. Default config at `~/.local/share/tally/config.toml`
pub async fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolved = resolve(config_path, data_dir)?;
    logging::init(&resolved.config.logging)?;

    println!("🚀 Starting Tally bot...");
    println!("Config: {}", resolved.path.display());
    println!("Data: {}", resolved.config.ledger.data_dir.display());
    if resolved.created {
        println!("📝 No config file found. Created a default one; set bot.moderator_id before running.");
    }

    let bot_config = resolved.config.bot_config()?;
    let store = LedgerStore::open(
        &resolved.config.ledger.data_dir,
        resolved.config.store_options(),
    )?;

    for id in CollectionId::ALL {
        match store.inspect(id) {
            LoadSource::Missing | LoadSource::Primary => {}
            LoadSource::Backup(path) => {
                warn!(collection = id.name(), backup = %path.display(), "collection will load from backup")
            }
            LoadSource::Reset => {
                error!(collection = id.name(), "collection unreadable and no usable backup; starting empty")
            }
        }
    }

    let client = ConsoleClient::new(bot_config.poll_interval);
    let gate = resolved.config.gate();
    let bot = TallyBot::new(client, gate, Arc::new(store), bot_config);

    println!("Type `<user-id> <text>` or `<user-id> !<callback>`; Ctrl-D to stop.");
    info!("console transport ready");
    bot.run().await?;

    println!("👋 Bot stopped");
    Ok(())
}
