//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了逻辑过期重建使用的固定大小后台线程池。

use crate::error::{CacheError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

/// 缓存重建线程池
///
/// 固定数量的 worker 共享一个有界队列，限制同时回源数据库的重建数量。
/// 重建任务与发现过期的请求完全解耦。
#[derive(Clone)]
pub struct RebuildPool {
    sender: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    workers: usize,
}

impl std::fmt::Debug for RebuildPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildPool")
            .field("workers", &self.workers)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl RebuildPool {
    /// 创建并启动线程池，必须在 tokio 运行时内调用
    ///
    /// # 参数
    ///
    /// * `workers` - worker 数量
    /// * `capacity` - 等待队列容量
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();

        for worker_id in 0..workers.max(1) {
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        job = async { receiver.lock().await.recv().await } => job,
                    };
                    let Some(job) = job else { break };
                    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                        error!("Rebuild worker {} caught a panicking job", worker_id);
                    }
                }
                debug!("Rebuild worker {} stopped", worker_id);
            });
        }

        Self {
            sender,
            shutdown,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 提交重建任务，不等待其执行
    ///
    /// 队列已满或线程池已关闭时返回 [`CacheError::RebuildRejected`]，任务被丢弃。
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::RebuildRejected(
                "rebuild pool is shut down".to_string(),
            ));
        }
        self.sender.try_send(job.boxed()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CacheError::RebuildRejected("rebuild queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                CacheError::RebuildRejected("rebuild queue is closed".to_string())
            }
        })
    }

    /// 停止所有 worker
    ///
    /// 队列中尚未开始的任务被丢弃，正在执行的任务会运行到结束
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
