use crate::cli::{open_store, NextIdArgs};
use crate::config::Config;
use crate::id_worker::{sequence_of, timestamp_of, IdGenerator};
use anyhow::{bail, Result};

pub async fn execute(config: &Config, args: &NextIdArgs) -> Result<()> {
    if args.count == 0 {
        bail!("--count must be at least 1");
    }
    let ids = IdGenerator::new(open_store(config).await?, &config.id_generator);

    for _ in 0..args.count {
        let id = ids.next(&args.tag).await?;
        println!(
            "{}\t(ts={}, seq={})",
            id,
            timestamp_of(id) + config.id_generator.epoch_secs,
            sequence_of(id)
        );
    }
    Ok(())
}
