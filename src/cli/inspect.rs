use crate::cli::{open_store, KeyArgs};
use crate::client::NULL_MARKER;
use crate::config::Config;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// 缓存载荷的类型
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKind {
    /// 空值标记
    NullMarker,
    /// 逻辑过期包装
    Logical {
        expire_time: DateTime<Utc>,
        expired: bool,
    },
    /// 普通记录
    Record,
}

/// 判断载荷是空值标记、逻辑过期包装还是普通记录
pub fn describe_payload(payload: &str, now: DateTime<Utc>) -> PayloadKind {
    if payload == NULL_MARKER {
        return PayloadKind::NullMarker;
    }
    let expire_time = serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| {
            v.get("expireTime")
                .and_then(|t| t.as_str())
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        })
        .map(|t| t.with_timezone(&Utc));
    match expire_time {
        Some(expire_time) => PayloadKind::Logical {
            expire_time,
            expired: expire_time <= now,
        },
        None => PayloadKind::Record,
    }
}

pub async fn execute(config: &Config, args: &KeyArgs) -> Result<()> {
    let store = open_store(config).await?;
    let Some(payload) = store.get(&args.key).await? else {
        println!("{}: not cached", args.key);
        return Ok(());
    };
    let ttl = store.ttl(&args.key).await?;

    println!("Key:     {}", args.key);
    match ttl {
        Some(ttl) => println!("TTL:     {}ms", ttl.as_millis()),
        None => println!("TTL:     none"),
    }
    match describe_payload(&payload, Utc::now()) {
        PayloadKind::NullMarker => println!("Kind:    null marker (confirmed absent)"),
        PayloadKind::Logical {
            expire_time,
            expired,
        } => {
            println!(
                "Kind:    logical entry, {} (expireTime {})",
                if expired { "STALE" } else { "fresh" },
                expire_time.to_rfc3339()
            );
            println!("Payload: {}", payload);
        }
        PayloadKind::Record => {
            println!("Kind:    record");
            println!("Payload: {}", payload);
        }
    }
    Ok(())
}
