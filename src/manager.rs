use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use getset::Getters;
use pgqueue_schema::{
    normalize_identifier, validate_namespace, ListRequest, Queue, QueueList, QueueMeta,
    QueueStatus, Task, TaskList, TaskListRequest, TaskMeta, Ticker, TickerList, TickerMeta,
    CLEANUP_NAMESPACE, TICKER_PERIOD,
};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::{PgQueueError, Result};
use crate::notify::{task_signal_stream, TaskSignal};
use crate::sql::{queue as queue_sql, task as task_sql, ticker as ticker_sql};
use crate::ticker_loop::ticker_loop;

/// Interval of the cleanup ticker of a queue without TTL
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Name of the ticker cleaning `queue` of namespace `ns`, in the cleanup namespace
pub fn cleanup_ticker_name(ns: &str, queue: &str) -> String {
    format!("{ns}.{queue}")
}

/// Splits a cleanup ticker name back into its namespace and queue
pub fn parse_cleanup_ticker_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
        .filter(|(ns, queue)| !ns.is_empty() && !queue.is_empty())
}

/// Entry point of every queue, task and ticker operation of one namespace.
///
/// A `Manager` is cheap to clone: it only holds the connection pool and names.
/// Build one with [`ManagerOptions`](crate::ManagerOptions).
#[derive(Clone, Getters, Debug)]
#[getset(get = "pub")]
pub struct Manager {
    /// Database connection pool
    pg_pool: PgPool,
    /// Schema holding the pgqueue tables, already escaped
    escaped_schema: String,
    /// Namespace all operations are scoped to
    namespace: String,
    /// Worker name used by [`Manager::retain_task`]
    worker: String,
}

impl Manager {
    pub(crate) fn new(
        pg_pool: PgPool,
        escaped_schema: String,
        namespace: String,
        worker: String,
    ) -> Self {
        Manager {
            pg_pool,
            escaped_schema,
            namespace,
            worker,
        }
    }

    /// Returns a manager sharing this one's pool, scoped to another namespace.
    pub fn with_namespace(&self, namespace: &str) -> Result<Manager> {
        let namespace = validate_namespace("namespace", namespace)?;
        Ok(self.scoped(namespace))
    }

    /// Manager of the namespace holding the cleanup tickers
    pub(crate) fn cleanup(&self) -> Manager {
        self.scoped(CLEANUP_NAMESPACE.to_string())
    }

    pub(crate) fn scoped(&self, namespace: String) -> Manager {
        Manager {
            namespace,
            ..self.clone()
        }
    }

    // Queues

    /// Creates the queue, or updates the attributes set in `meta` when it
    /// already exists. The cleanup ticker of the queue follows its TTL.
    pub async fn register_queue(&self, meta: QueueMeta) -> Result<Queue> {
        let name = validate_namespace("queue", &meta.queue)?;
        let patch = QueueMeta {
            queue: String::new(),
            ..meta
        };

        let mut tx = self.pg_pool.begin().await?;
        let created =
            queue_sql::insert_queue(&mut *tx, &self.escaped_schema, &self.namespace, &name).await?;

        let queue = if patch.is_empty_patch() {
            queue_sql::get_queue(&mut *tx, &self.escaped_schema, &self.namespace, &name).await?
        } else {
            queue_sql::patch_queue(&mut *tx, &self.escaped_schema, &self.namespace, &name, &patch)
                .await?
        }
        .ok_or_else(|| PgQueueError::NotFound(format!("queue {name}")))?;

        self.register_cleanup_ticker(&mut tx, &queue).await?;
        tx.commit().await?;

        info!(ns = %self.namespace, queue = %name, created, "Queue registered");
        Ok(queue)
    }

    pub async fn get_queue(&self, name: &str) -> Result<Queue> {
        let name = normalize_identifier("queue", name)?;
        queue_sql::get_queue(&self.pg_pool, &self.escaped_schema, &self.namespace, &name)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("queue {name}")))
    }

    pub async fn list_queues(&self, request: ListRequest) -> Result<QueueList> {
        let mut tx = self.pg_pool.begin().await?;
        let count = queue_sql::count_queues(&mut *tx, &self.escaped_schema, &self.namespace).await?;
        let body =
            queue_sql::list_queues(&mut *tx, &self.escaped_schema, &self.namespace, request).await?;
        tx.commit().await?;

        Ok(queue_sql::queue_list(count, body))
    }

    /// Patches the queue `name`. A non-empty `meta.queue` renames it, tasks
    /// follow the rename.
    pub async fn update_queue(&self, name: &str, meta: QueueMeta) -> Result<Queue> {
        let name = normalize_identifier("queue", name)?;
        let rename = match meta.queue.trim() {
            "" => String::new(),
            rename => validate_namespace("queue", rename)?,
        };
        if meta.is_empty_patch() && rename.is_empty() {
            return Err(PgQueueError::BadRequest(format!(
                "Nothing to update on queue {name}"
            )));
        }
        let patch = QueueMeta {
            queue: rename,
            ..meta
        };

        let mut tx = self.pg_pool.begin().await?;
        let queue =
            queue_sql::patch_queue(&mut *tx, &self.escaped_schema, &self.namespace, &name, &patch)
                .await?
                .ok_or_else(|| PgQueueError::NotFound(format!("queue {name}")))?;

        if queue.queue() != &name {
            self.delete_cleanup_ticker(&mut tx, &name).await?;
        }
        self.register_cleanup_ticker(&mut tx, &queue).await?;
        tx.commit().await?;

        debug!(ns = %self.namespace, queue = %queue.queue(), "Queue updated");
        Ok(queue)
    }

    /// Deletes the queue along with all its tasks
    pub async fn delete_queue(&self, name: &str) -> Result<Queue> {
        let name = normalize_identifier("queue", name)?;

        let mut tx = self.pg_pool.begin().await?;
        let queue = queue_sql::delete_queue(&mut *tx, &self.escaped_schema, &self.namespace, &name)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("queue {name}")))?;
        self.delete_cleanup_ticker(&mut tx, &name).await?;
        tx.commit().await?;

        info!(ns = %self.namespace, queue = %name, "Queue deleted");
        Ok(queue)
    }

    /// Task counts per status, for `queue` or for every queue of the namespace
    pub async fn queue_status(&self, queue: Option<&str>) -> Result<Vec<QueueStatus>> {
        let queue = queue
            .map(|queue| normalize_identifier("queue", queue))
            .transpose()?;
        queue_sql::queue_status(
            &self.pg_pool,
            &self.escaped_schema,
            &self.namespace,
            queue.as_deref(),
        )
        .await
    }

    /// Deletes one batch of expired, released or failed tasks of `queue`.
    ///
    /// Call again until it returns an empty list to sweep the whole queue.
    pub async fn clean_queue(&self, queue: &str) -> Result<Vec<Task>> {
        let queue = normalize_identifier("queue", queue)?;
        let tasks =
            queue_sql::clean_queue(&self.pg_pool, &self.escaped_schema, &self.namespace, &queue)
                .await?;

        trace!(ns = %self.namespace, queue = %queue, deleted = tasks.len(), "Queue cleaned");
        Ok(tasks)
    }

    /// Cleanup tickers of the queues of this namespace
    pub async fn cleanup_tickers(&self) -> Result<TickerList> {
        let prefix = cleanup_ticker_name(&self.namespace, "");
        let tickers = self
            .cleanup()
            .list_tickers(ListRequest::default().limit(u64::MAX))
            .await?;

        let body: Vec<Ticker> = tickers
            .body
            .into_iter()
            .filter(|ticker| ticker.ticker().starts_with(&prefix))
            .collect();
        Ok(TickerList {
            count: body.len() as u64,
            body,
        })
    }

    async fn register_cleanup_ticker(&self, conn: &mut PgConnection, queue: &Queue) -> Result<()> {
        let name = cleanup_ticker_name(queue.ns(), queue.queue());
        let interval = queue.ttl().unwrap_or(DEFAULT_CLEANUP_INTERVAL);

        ticker_sql::insert_ticker(&mut *conn, &self.escaped_schema, CLEANUP_NAMESPACE, &name)
            .await?;
        ticker_sql::patch_ticker(
            &mut *conn,
            &self.escaped_schema,
            CLEANUP_NAMESPACE,
            &name,
            Some(interval),
        )
        .await?;

        Ok(())
    }

    async fn delete_cleanup_ticker(&self, conn: &mut PgConnection, queue: &str) -> Result<()> {
        let name = cleanup_ticker_name(&self.namespace, queue);
        ticker_sql::delete_ticker(&mut *conn, &self.escaped_schema, CLEANUP_NAMESPACE, &name)
            .await?;
        Ok(())
    }

    // Tasks

    /// Adds a task to `queue`.
    ///
    /// Fails with [`PgQueueError::NotFound`] when the queue does not exist and
    /// [`PgQueueError::BadRequest`] when `delayed_at` is in the past.
    pub async fn create_task(&self, queue: &str, meta: TaskMeta) -> Result<Task> {
        let queue = normalize_identifier("queue", queue)?;
        if let Some(delayed_at) = meta.delayed_at {
            if delayed_at < Utc::now() {
                return Err(PgQueueError::BadRequest(format!(
                    "Task delayed to {delayed_at}, which is in the past"
                )));
            }
        }

        let mut tx = self.pg_pool.begin().await?;
        let id = task_sql::insert_task(
            &mut *tx,
            &self.escaped_schema,
            &self.namespace,
            &queue,
            &meta.payload,
            meta.delayed_at,
        )
        .await?
        .ok_or_else(|| PgQueueError::NotFound(format!("queue {queue}")))?;

        let task = task_sql::get_task(&mut *tx, &self.escaped_schema, &self.namespace, id)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("task {id}")))?;
        tx.commit().await?;

        debug!(ns = %self.namespace, queue = %queue, task_id = id, "Task created");
        Ok(task)
    }

    /// Claims the oldest eligible task of the namespace, `None` when there is none
    pub async fn retain_task(&self) -> Result<Option<Task>> {
        self.retain_task_as(&self.worker).await
    }

    /// Like [`Manager::retain_task`], claiming the task for `worker`
    pub async fn retain_task_as(&self, worker: &str) -> Result<Option<Task>> {
        if worker.trim().is_empty() {
            return Err(PgQueueError::BadRequest("Missing worker name".into()));
        }

        let mut tx = self.pg_pool.begin().await?;
        let Some(id) =
            task_sql::lock_task(&mut *tx, &self.escaped_schema, &self.namespace, worker).await?
        else {
            return Ok(None);
        };

        let task = task_sql::get_task(&mut *tx, &self.escaped_schema, &self.namespace, id).await?;
        tx.commit().await?;

        trace!(ns = %self.namespace, worker, task_id = id, "Task retained");
        Ok(task)
    }

    /// Completes a retained task with `result`.
    ///
    /// Fails with [`PgQueueError::NotFound`] when the task is not retained,
    /// for example because it expired or was already released.
    pub async fn release_task(&self, id: i64, result: Value) -> Result<Task> {
        let mut tx = self.pg_pool.begin().await?;
        task_sql::unlock_task(&mut *tx, &self.escaped_schema, &self.namespace, id, &result)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("retained task {id}")))?;

        let task = task_sql::get_task(&mut *tx, &self.escaped_schema, &self.namespace, id)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("task {id}")))?;
        tx.commit().await?;

        trace!(ns = %self.namespace, task_id = id, "Task released");
        Ok(task)
    }

    /// Fails a retained task with `result`, scheduling its next attempt if it
    /// has retries left.
    pub async fn fail_task(&self, id: i64, result: Value) -> Result<Task> {
        let mut tx = self.pg_pool.begin().await?;
        task_sql::fail_task(&mut *tx, &self.escaped_schema, &self.namespace, id, &result)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("retained task {id}")))?;

        let task = task_sql::get_task(&mut *tx, &self.escaped_schema, &self.namespace, id)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("task {id}")))?;
        tx.commit().await?;

        debug!(
            ns = %self.namespace,
            task_id = id,
            retries = task.retries(),
            delayed_at = ?task.delayed_at(),
            "Task failed"
        );
        Ok(task)
    }

    /// Gives back a task retained by this manager's worker that never ran.
    ///
    /// The task becomes eligible again with its attempts and delay untouched.
    /// Fails with [`PgQueueError::NotFound`] when the worker does not hold it.
    pub async fn return_task(&self, id: i64) -> Result<Task> {
        let mut tx = self.pg_pool.begin().await?;
        task_sql::return_task(
            &mut *tx,
            &self.escaped_schema,
            &self.namespace,
            id,
            &self.worker,
        )
        .await?
        .ok_or_else(|| PgQueueError::NotFound(format!("retained task {id}")))?;

        let task = task_sql::get_task(&mut *tx, &self.escaped_schema, &self.namespace, id)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("task {id}")))?;
        tx.commit().await?;

        debug!(ns = %self.namespace, task_id = id, "Task returned");
        Ok(task)
    }

    pub async fn get_task(&self, id: i64) -> Result<Task> {
        task_sql::get_task(&self.pg_pool, &self.escaped_schema, &self.namespace, id)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("task {id}")))
    }

    /// Tasks of the namespace, or of `queue` only, oldest first
    pub async fn list_tasks(
        &self,
        queue: Option<&str>,
        request: TaskListRequest,
    ) -> Result<TaskList> {
        let queue = queue
            .map(|queue| normalize_identifier("queue", queue))
            .transpose()?;

        let mut tx = self.pg_pool.begin().await?;
        let count = task_sql::count_tasks(
            &mut *tx,
            &self.escaped_schema,
            &self.namespace,
            queue.as_deref(),
            &request,
        )
        .await?;
        let body = task_sql::list_tasks(
            &mut *tx,
            &self.escaped_schema,
            &self.namespace,
            queue.as_deref(),
            &request,
        )
        .await?;
        tx.commit().await?;

        Ok(TaskList {
            count: u64::try_from(count).unwrap_or_default(),
            body,
        })
    }

    // Tickers

    /// Creates the ticker, or updates its interval when given. Registration
    /// always clears the last fire so the ticker fires on the next poll.
    pub async fn register_ticker(&self, meta: TickerMeta) -> Result<Ticker> {
        let name = normalize_identifier("ticker", &meta.ticker)?;

        let mut tx = self.pg_pool.begin().await?;
        let created =
            ticker_sql::insert_ticker(&mut *tx, &self.escaped_schema, &self.namespace, &name)
                .await?;
        let ticker = ticker_sql::patch_ticker(
            &mut *tx,
            &self.escaped_schema,
            &self.namespace,
            &name,
            meta.interval,
        )
        .await?
        .ok_or_else(|| PgQueueError::NotFound(format!("ticker {name}")))?;
        tx.commit().await?;

        info!(ns = %self.namespace, ticker = %name, created, "Ticker registered");
        Ok(ticker)
    }

    pub async fn get_ticker(&self, name: &str) -> Result<Ticker> {
        let name = normalize_identifier("ticker", name)?;
        ticker_sql::get_ticker(&self.pg_pool, &self.escaped_schema, &self.namespace, &name)
            .await?
            .ok_or_else(|| PgQueueError::NotFound(format!("ticker {name}")))
    }

    pub async fn list_tickers(&self, request: ListRequest) -> Result<TickerList> {
        let mut tx = self.pg_pool.begin().await?;
        let count =
            ticker_sql::count_tickers(&mut *tx, &self.escaped_schema, &self.namespace).await?;
        let body =
            ticker_sql::list_tickers(&mut *tx, &self.escaped_schema, &self.namespace, request)
                .await?;
        tx.commit().await?;

        Ok(TickerList {
            count: u64::try_from(count).unwrap_or_default(),
            body,
        })
    }

    /// Changes the interval of an existing ticker, which then fires on the next poll
    pub async fn update_ticker(&self, name: &str, meta: TickerMeta) -> Result<Ticker> {
        let name = normalize_identifier("ticker", name)?;
        if meta.interval.is_none() {
            return Err(PgQueueError::BadRequest(format!(
                "Nothing to update on ticker {name}"
            )));
        }

        ticker_sql::patch_ticker(
            &self.pg_pool,
            &self.escaped_schema,
            &self.namespace,
            &name,
            meta.interval,
        )
        .await?
        .ok_or_else(|| PgQueueError::NotFound(format!("ticker {name}")))
    }

    pub async fn delete_ticker(&self, name: &str) -> Result<Ticker> {
        let name = normalize_identifier("ticker", name)?;
        let ticker =
            ticker_sql::delete_ticker(&self.pg_pool, &self.escaped_schema, &self.namespace, &name)
                .await?
                .ok_or_else(|| PgQueueError::NotFound(format!("ticker {name}")))?;

        info!(ns = %self.namespace, ticker = %name, "Ticker deleted");
        Ok(ticker)
    }

    /// Claims the earliest matured ticker of the namespace, `None` when none is due
    pub async fn next_ticker(&self) -> Result<Option<Ticker>> {
        ticker_sql::next_ticker(&self.pg_pool, &self.escaped_schema, &self.namespace).await
    }

    // Loops

    /// Sends every ticker of the namespace to `sender` as it matures.
    ///
    /// Returns `Ok(())` once `cancellation_token` is cancelled or the receiver
    /// is dropped, and an error on storage failures.
    pub async fn run_ticker_loop(
        &self,
        cancellation_token: &CancellationToken,
        sender: mpsc::Sender<Ticker>,
    ) -> Result<()> {
        self.run_ticker_loop_with_period(cancellation_token, TICKER_PERIOD, sender)
            .await
    }

    /// Like [`Manager::run_ticker_loop`] with an explicit initial poll period
    pub async fn run_ticker_loop_with_period(
        &self,
        cancellation_token: &CancellationToken,
        period: Duration,
        sender: mpsc::Sender<Ticker>,
    ) -> Result<()> {
        debug!(ns = %self.namespace, ?period, "Ticker loop started");
        let res = ticker_loop(cancellation_token, period, || self.next_ticker(), sender).await;
        debug!(ns = %self.namespace, success = res.is_ok(), "Ticker loop stopped");
        res
    }

    /// Retains tasks of the namespace and sends them to `sender`.
    ///
    /// Tasks are looked for on every insert notification of the namespace and
    /// every `poll_interval`, until no task is eligible.
    pub async fn run_task_loop(
        &self,
        cancellation_token: &CancellationToken,
        poll_interval: Duration,
        sender: mpsc::Sender<Task>,
    ) -> Result<()> {
        let signals = task_signal_stream(
            &self.pg_pool,
            &self.namespace,
            poll_interval,
            cancellation_token.clone(),
        )
        .await?;
        tokio::pin!(signals);

        debug!(ns = %self.namespace, ?poll_interval, "Task loop started");
        while let Some(signal) = signals.next().await {
            if let TaskSignal::Notification(queue) = &signal {
                trace!(ns = %self.namespace, queue = %queue, "Task inserted");
            }

            while let Some(task) = self.retain_task().await? {
                let task_id = *task.id();
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => {
                        self.give_back(task_id).await;
                        return Ok(());
                    }
                    sent = sender.send(task) => {
                        if sent.is_err() {
                            debug!(ns = %self.namespace, "Task receiver dropped, stopping task loop");
                            self.give_back(task_id).await;
                            return Ok(());
                        }
                    }
                }
            }
        }

        debug!(ns = %self.namespace, "Task loop stopped");
        Ok(())
    }

    async fn give_back(&self, task_id: i64) {
        if let Err(e) = self.return_task(task_id).await {
            warn!(ns = %self.namespace, task_id, error = %e, "Failed to return undelivered task");
        }
    }
}
