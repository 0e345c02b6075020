use super::config::resolve;
use super::logging;
use tally::chat::messages::Money;
use tally::ledger::{recent_users, report::RECENT_USERS_LIMIT, statistics, LedgerStore};

/// Print ledger statistics and the most recent users
pub fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolved = resolve(config_path, data_dir)?;
    logging::init(&resolved.config.logging)?;

    let store = LedgerStore::open(
        &resolved.config.ledger.data_dir,
        resolved.config.store_options(),
    )?;
    let money = Money::new(resolved.config.bot.currency_symbol.clone());
    let stats = statistics(&store);

    println!("📊 Tally Statistics");
    println!();
    println!("  Users:               {}", stats.total_users);
    println!("  Total balance:       {}", money.show(stats.total_balance));
    println!("  Verified proofs:     {}", stats.total_proofs);
    println!(
        "  Open claims:         {} ({})",
        stats.open_claims,
        money.show(stats.open_claim_rewards)
    );
    println!(
        "  Pending withdrawals: {} ({})",
        stats.pending_withdrawals,
        money.show(stats.escrowed)
    );

    let users = recent_users(&store, RECENT_USERS_LIMIT);
    if !users.is_empty() {
        println!();
        println!("Recent users:");
        for account in users {
            println!(
                "  {} ({})  balance {}  proofs {}",
                account.label(),
                account.user_id,
                money.show(account.balance),
                account.proof_count
            );
        }
    }

    Ok(())
}
