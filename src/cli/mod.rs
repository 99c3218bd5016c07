//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::backend::{KeyValueStore, RedisStore};
use crate::config::Config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "flashguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Path to the TOML config file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "status", about = "Ping the store and print the effective config")]
    Status(StatusArgs),

    #[command(name = "next-id", about = "Generate ids for a business tag")]
    NextId(NextIdArgs),

    #[command(name = "invalidate", about = "Delete a cache key")]
    Invalidate(KeyArgs),

    #[command(name = "inspect", about = "Show what a cache key currently holds")]
    Inspect(KeyArgs),
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[arg(short, long, help = "Also print process metrics")]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub struct NextIdArgs {
    #[arg(short, long, help = "Business tag, e.g. order")]
    pub tag: String,

    #[arg(short = 'n', long, default_value_t = 1, help = "Number of ids to generate")]
    pub count: u32,
}

#[derive(Parser, Debug)]
pub struct KeyArgs {
    #[arg(short, long, help = "Full cache key, e.g. cache:shop:1")]
    pub key: String,
}

mod inspect;
mod invalidate;
mod next_id;
mod status;

pub use inspect::{describe_payload, PayloadKind};

/// 加载配置，未指定文件时使用默认配置
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let store = RedisStore::new(&config.store)
        .await
        .context("Failed to connect to the key-value store")?;
    Ok(Arc::new(store))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match &cli.command {
        Commands::Status(args) => status::execute(&config, args).await,
        Commands::NextId(args) => next_id::execute(&config, args).await,
        Commands::Invalidate(args) => invalidate::execute(&config, args).await,
        Commands::Inspect(args) => inspect::execute(&config, args).await,
    }
}
