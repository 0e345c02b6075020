use super::config::{default_config_path, default_data_dir, TallyConfig};
use std::path::PathBuf;
use tally::ledger::{CollectionId, LedgerStore, LoadSource};

/// Verify installation integrity
///
/// This command checks that the Tally installation is usable:
/// - Binary location
/// - Configuration file validity
/// - Ledger collections readable (from primary or a backup)
///
/// Unlike `run`, it never creates a default config file.
pub fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Verifying Tally installation...");
    println!();

    let mut all_ok = true;

    // Check binary
    print!("  Binary: ");
    let binary_path = std::env::current_exe()?;
    if binary_path.exists() {
        println!("✅ Found at {}", binary_path.display());
    } else {
        println!("❌ Not found");
        all_ok = false;
    }

    // Check version
    print!("  Version: ");
    println!("✅ {}", env!("CARGO_PKG_VERSION"));

    // Check config
    let data_dir_flag = data_dir.map(PathBuf::from);
    let default_dir = data_dir_flag.clone().unwrap_or_else(default_data_dir);
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&default_dir));

    print!("  Config: ");
    let config = if config_path.exists() {
        match TallyConfig::load(&config_path) {
            Ok(config) => match config.bot_config() {
                Ok(_) => {
                    println!("✅ {}", config_path.display());
                    Some(config)
                }
                Err(e) => {
                    println!("❌ {}", e);
                    all_ok = false;
                    Some(config)
                }
            },
            Err(e) => {
                println!("❌ {}", e);
                all_ok = false;
                None
            }
        }
    } else {
        println!("⚠️  Not found at {} (run will create it)", config_path.display());
        None
    };

    let ledger_dir = data_dir_flag
        .or_else(|| config.as_ref().map(|c| c.ledger.data_dir.clone()))
        .unwrap_or(default_dir);
    let options = config
        .as_ref()
        .map(TallyConfig::store_options)
        .unwrap_or_default();

    // Check ledger collections
    println!("  Ledger: {}", ledger_dir.display());
    if ledger_dir.exists() {
        let store = LedgerStore::open(&ledger_dir, options)?;
        for id in CollectionId::ALL {
            print!("    {}: ", id.name());
            match store.inspect(id) {
                LoadSource::Missing => println!("⚪ Not created yet"),
                LoadSource::Primary => println!("✅ OK"),
                LoadSource::Backup(path) => {
                    println!("⚠️  Primary unreadable; will recover from {}", path.display())
                }
                LoadSource::Reset => {
                    println!("❌ Unreadable and no usable backup");
                    all_ok = false;
                }
            }
        }
    } else {
        println!("    ⚪ Not created yet");
    }

    println!();
    if all_ok {
        println!("✅ All checks passed");
        Ok(())
    } else {
        Err("Verification failed".into())
    }
}
