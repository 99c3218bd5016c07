use crate::cli::{open_store, KeyArgs};
use crate::config::Config;
use anyhow::Result;

pub async fn execute(config: &Config, args: &KeyArgs) -> Result<()> {
    let store = open_store(config).await?;
    if store.delete(&args.key).await? {
        println!("Deleted {}", args.key);
    } else {
        println!("{} was not cached", args.key);
    }
    Ok(())
}
