//! Economy contract tests against the in-memory store.
//!
//! Run with: cargo test --test economy_memory

mod economy;

use reward_ledger::config::Config;

#[tokio::test]
async fn test_memory_economy_contract() {
    println!("=== Memory Economy Contract ===");
    let economy = economy::build(Config::for_test()).await;

    run_economy_contract!(&economy);

    println!("=== All memory contract tests PASSED ===");
}
