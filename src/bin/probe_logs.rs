//! Probe: explorer getLogs for the Roll event
//!
//! Queries every configured contract through the same client the feed uses
//! and documents:
//! - Latency and record counts for a full-history query
//! - Decode success/failure per record
//! - Transaction hash uniqueness (the dedup key)
//! - Incremental query from the high-water-mark
//! - A sample decoded event

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use anyhow::Result;

use roll_feed::abi::{self, ROLL_TOPIC};
use roll_feed::api::{ExplorerClient, LogQuery, LogSource};
use roll_feed::config::{AppConfig, CONFIG_PATH};
use roll_feed::decoder::decode_batch;
use roll_feed::reporter;
use roll_feed::store::ReconciliationStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::resolve(Path::new(CONFIG_PATH))?;
    let client = ExplorerClient::new(&config.explorer)?;

    println!("=== Probe: Roll logs ===");
    println!("API: {}", config.explorer.api_url);
    println!("Signature: {}", abi::ROLL_SIGNATURE);
    println!("topic0: {}", ROLL_TOPIC);
    println!("Topic hash verified: {}", abi::verify_topic_hash());
    println!();

    let mut store = ReconciliationStore::new();

    for contract in &config.contracts {
        println!("--- {} ({}) {} ---", contract.name, contract.game, contract.address);

        let query = LogQuery {
            contract: contract.address,
            topic0: ROLL_TOPIC,
            from_block: 0,
        };
        let start = Instant::now();
        let raws = match client.fetch_logs(&query).await {
            Ok(raws) => raws,
            Err(e) => {
                println!("Fetch failed after {:?}: {}", start.elapsed(), e);
                println!();
                continue;
            }
        };
        println!("Raw logs: {} (latency: {:?})", raws.len(), start.elapsed());

        let batch = decode_batch(&raws, contract.address, contract.game);
        println!("Decoded: {}  Failed: {}", batch.events.len(), batch.failures.len());
        for failure in batch.failures.iter().take(5) {
            println!("  {} -> {}", failure.transaction_hash, failure.error);
        }

        let hashes: HashSet<_> = batch.events.iter().map(|e| e.transaction_hash).collect();
        println!(
            "Unique tx hashes: {} of {} ({})",
            hashes.len(),
            batch.events.len(),
            if hashes.len() == batch.events.len() { "unique" } else { "DUPLICATES" }
        );

        let outcome = store.merge(contract.address, batch.events);
        println!("High-water-mark: {:?}", outcome.high_water_mark);

        if let Some(event) = outcome.added.first() {
            println!("\nMost recent decoded event:");
            println!("{}", serde_json::to_string_pretty(event)?);
            println!("{}", reporter::describe(event));
        }

        // Incremental query should return nothing new (or only fresh blocks).
        let incremental = LogQuery {
            from_block: store.next_from_block(contract.address),
            ..query
        };
        let start = Instant::now();
        match client.fetch_logs(&incremental).await {
            Ok(raws) => println!(
                "\nIncremental from block {}: {} log(s) (latency: {:?})",
                incremental.from_block,
                raws.len(),
                start.elapsed()
            ),
            Err(e) => println!("\nIncremental from block {} failed: {}", incremental.from_block, e),
        }
        println!();
    }

    println!("=== Summary ===");
    println!("Total events across contracts: {}", store.len());
    for contract in &config.contracts {
        println!(
            "  {}: high-water-mark {:?}",
            contract.name,
            store.high_water_mark(contract.address)
        );
    }

    Ok(())
}
