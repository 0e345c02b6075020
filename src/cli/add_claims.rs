use super::config::resolve;
use super::logging;
use std::path::Path;
use tally::chat::messages::Money;
use tally::claims::{add_claims, parse_claim_keys};
use tally::ledger::{Amount, LedgerStore};

/// Import verified claim keys from the command line
///
/// Keys come from positional arguments and, optionally, a text file; both
/// are scanned the same way the moderator's chat paste is. Run this while
/// the bot is stopped: the ledger lock is per-process.
pub fn execute(
    keys: Vec<String>,
    file: Option<String>,
    reward: String,
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolved = resolve(config_path, data_dir)?;
    logging::init(&resolved.config.logging)?;

    let reward: Amount = reward
        .parse()
        .map_err(|e| format!("Invalid reward '{}': {}", reward, e))?;

    let mut text = keys.join("\n");
    if let Some(file) = file {
        let contents = read_keys_file(Path::new(&file))?;
        text.push('\n');
        text.push_str(&contents);
    }

    let keys = parse_claim_keys(&text, resolved.config.bot.min_claim_key_len);
    if keys.is_empty() {
        return Err("No claim keys found in input".into());
    }

    let store = LedgerStore::open(
        &resolved.config.ledger.data_dir,
        resolved.config.store_options(),
    )?;
    let import = add_claims(&store, &keys, reward)?;

    let money = Money::new(resolved.config.bot.currency_symbol.clone());
    println!(
        "✅ Imported claims at {} each: {} added, {} updated",
        money.show(reward),
        import.added,
        import.updated
    );
    println!("   Open claims: {}", import.open_total);
    Ok(())
}

fn read_keys_file(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e).into())
}
