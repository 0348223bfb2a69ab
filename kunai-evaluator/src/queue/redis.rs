use super::{JobHandle, JobQueue, ProgressSink, TestcaseEvent};
use crate::config;

use kunai_protocol::{JobReport, ProgressUpdate, QueuedJob, TestcaseConfig, TestcaseResult};

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use mobc_redis::mobc;
use mobc_redis::redis;
use mobc_redis::RedisConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::{task, time};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub type Connection = mobc::Connection<RedisConnectionManager>;

/// Connection pool and key layout.
///
/// - `<prefix>:queue:testcase` pending testcase jobs
/// - `<prefix>:queue:evaluation` pending evaluation jobs
/// - `<prefix>:result:<id>` testcase reports for evaluation `<id>`
/// - `<prefix>:report:<id>` final report of evaluation `<id>` without a reply queue
/// - `<prefix>:progress:<id>` latest progress of evaluation `<id>`
pub struct RedisModule {
    pool: mobc::Pool<RedisConnectionManager>,
    key_prefix: String,
    block_timeout: u64,
}

impl RedisModule {
    pub fn new(config: &config::Redis) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("invalid redis url: {}", config.url))?;
        let mgr = RedisConnectionManager::new(client);
        let pool = mobc::Pool::builder().max_open(config.max_open).build(mgr);
        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            block_timeout: config.block_timeout,
        })
    }

    pub async fn get_connection(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    pub fn testcase_queue_key(&self) -> String {
        self.key("queue:testcase")
    }

    pub fn evaluation_queue_key(&self) -> String {
        self.key("queue:evaluation")
    }

    pub fn result_key(&self, id: Uuid) -> String {
        self.key(&format!("result:{}", id))
    }

    pub fn report_key(&self, id: Uuid) -> String {
        self.key(&format!("report:{}", id))
    }

    pub fn progress_key(&self, id: Uuid) -> String {
        self.key(&format!("progress:{}", id))
    }

    pub async fn push<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.get_connection().await?;
        redis::cmd("RPUSH")
            .arg(key)
            .arg(payload)
            .query_async::<_, i64>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Blocks for at most `block_timeout` seconds.
    pub async fn pop<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_connection().await?;
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(self.block_timeout)
            .query_async(&mut *conn)
            .await?;
        match reply {
            None => Ok(None),
            Some((_, payload)) => {
                let value = serde_json::from_str(&payload)
                    .with_context(|| format!("malformed message on {}: {}", key, payload))?;
                Ok(Some(value))
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.get_connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Testcase queue of one evaluation. Reports come back on the evaluation's
/// own result list and are routed to the waiting handle by job id.
pub struct RedisQueue {
    inner: Arc<Inner>,
}

struct Inner {
    redis: Arc<RedisModule>,
    reply_key: String,
    callbacks: Mutex<HashMap<Uuid, oneshot::Sender<TestcaseEvent>>>,
}

impl RedisQueue {
    pub fn new(redis: Arc<RedisModule>, evaluation_id: Uuid) -> Self {
        let inner = Arc::new(Inner {
            reply_key: redis.result_key(evaluation_id),
            redis,
            callbacks: Mutex::new(HashMap::new()),
        });
        task::spawn(listen(Arc::downgrade(&inner)));
        Self { inner }
    }
}

/// Runs until the queue is dropped.
async fn listen(inner: Weak<Inner>) {
    while let Some(this) = inner.upgrade() {
        let received = this
            .redis
            .pop::<JobReport<TestcaseResult>>(&this.reply_key)
            .await;
        match received {
            Ok(Some(report)) => {
                let callback = this.callbacks.lock().await.remove(&report.job_id);
                match callback {
                    None => warn!(job = %report.job_id, "no such callback"),
                    Some(cb) => {
                        if cb.send(report.event).is_err() {
                            warn!(job = %report.job_id, "the job handle is dropped");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(reply_key = %this.reply_key, "failed to receive job report: {:?}", err);
                drop(this);
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    debug!("redis listener stopped");
}

impl JobQueue for RedisQueue {
    fn enqueue(&self, config: TestcaseConfig) -> BoxFuture<'_, Result<JobHandle>> {
        Box::pin(async move {
            let inner = &*self.inner;
            let job = QueuedJob::new(config, Some(inner.reply_key.clone()));
            let id = job.id;

            let (tx, rx) = oneshot::channel();
            inner.callbacks.lock().await.insert(id, tx);

            let key = inner.redis.testcase_queue_key();
            if let Err(err) = inner.redis.push(&key, &job).await {
                inner.callbacks.lock().await.remove(&id);
                return Err(err);
            }
            debug!(job = %id, %key, "enqueue");
            Ok(JobHandle::new(rx))
        })
    }
}

/// Stores the latest progress of an evaluation.
pub struct RedisProgress {
    redis: Arc<RedisModule>,
    key: String,
}

impl RedisProgress {
    pub fn new(redis: Arc<RedisModule>, evaluation_id: Uuid) -> Self {
        let key = redis.progress_key(evaluation_id);
        Self { redis, key }
    }
}

impl ProgressSink for RedisProgress {
    fn progress(&self, current: usize, total: usize, payload: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let update = ProgressUpdate {
                current,
                total,
                payload,
                time: Utc::now(),
            };
            self.redis.set(&self.key, &update).await
        })
    }
}
