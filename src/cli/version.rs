/// Display version information
pub fn execute() {
    println!("tally {}", env!("CARGO_PKG_VERSION"));
    println!("Referral reward ledger bot");
}
