use crate::cli::{open_store, StatusArgs};
use crate::config::Config;
use crate::metrics::get_metrics_string;
use anyhow::Result;
use std::time::Instant;

pub async fn execute(config: &Config, args: &StatusArgs) -> Result<()> {
    println!("=== flashguard status ===\n");

    let started = Instant::now();
    let reachable = match open_store(config).await {
        Ok(store) => store.ping().await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    match &reachable {
        Ok(()) => println!(
            "Store:   ✅ REACHABLE ({:?}, {} ms)",
            config.store.mode,
            started.elapsed().as_millis()
        ),
        Err(e) => println!("Store:   ❌ UNREACHABLE ({})", e),
    }

    let cache = &config.cache;
    println!("Null TTL:          {}s", cache.null_ttl_secs);
    println!(
        "Rebuild lock:      {}<key> ttl={}s",
        cache.lock_key_prefix, cache.lock_ttl_secs
    );
    println!(
        "Mutex retries:     {} x {}ms",
        cache.max_lock_retries, cache.retry_backoff_ms
    );
    println!("TTL jitter ratio:  {}", cache.ttl_jitter_ratio);
    println!(
        "Rebuild pool:      {} workers, queue {}",
        cache.rebuild_workers, cache.rebuild_queue_capacity
    );
    println!(
        "Id epoch:          {} (prefix {})",
        config.id_generator.epoch_secs, config.id_generator.key_prefix
    );
    println!(
        "Order lock:        {}<user> ttl={}s",
        config.order.lock_key_prefix, config.order.lock_ttl_secs
    );
    println!(
        "Database:          {}",
        if config.database.is_some() {
            "configured"
        } else {
            "none"
        }
    );

    if args.verbose {
        println!("\n{}", get_metrics_string());
    }

    reachable
}
