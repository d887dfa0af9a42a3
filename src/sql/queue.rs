use indoc::formatdoc;
use pgqueue_schema::{
    duration_to_interval, ListRequest, Queue, QueueList, QueueMeta, QueueStatus, Task,
    CLEAN_BATCH_SIZE,
};
use sqlx::{query, query_as, query_scalar, PgExecutor};

use super::task_select;
use crate::errors::{PgQueueError, Result};

const QUEUE_COLUMNS: &str = "ns, queue, ttl, retries, retry_delay";

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn get_queue<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: &str,
) -> Result<Option<Queue>> {
    let sql = formatdoc!(
        r#"
            select {QUEUE_COLUMNS}
            from {escaped_schema}.queue
            where ns = $1 and queue = $2;
        "#
    );

    let queue = query_as::<_, Queue>(&sql)
        .bind(ns)
        .bind(queue)
        .fetch_optional(executor)
        .await?;

    Ok(queue)
}

/// Inserts a queue with default attributes, returns false when it already existed
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn insert_queue<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: &str,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.queue (ns, queue)
            values ($1, $2)
            on conflict (ns, queue) do nothing;
        "#
    );

    let inserted = query(&sql)
        .bind(ns)
        .bind(queue)
        .execute(executor)
        .await?
        .rows_affected();

    Ok(inserted > 0)
}

/// Updates the attributes set in `meta`, renaming the queue when `meta.queue`
/// is not empty.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn patch_queue<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: &str,
    meta: &QueueMeta,
) -> Result<Option<Queue>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.queue set
                queue = coalesce($3::text, queue),
                ttl = case when $7::boolean then $4::interval else ttl end,
                retries = coalesce($5::integer, retries),
                retry_delay = coalesce($6::interval, retry_delay)
            where ns = $1 and queue = $2
            returning {QUEUE_COLUMNS};
        "#
    );

    let rename = Some(meta.queue.as_str()).filter(|name| !name.is_empty());
    let set_ttl = meta.ttl.is_some();
    let ttl = meta.ttl.flatten().map(duration_to_interval).transpose()?;
    let retries = meta
        .retries
        .map(|r| {
            i32::try_from(r).map_err(|_| {
                PgQueueError::BadRequest(format!("Queue retries {r} exceed {}", i32::MAX))
            })
        })
        .transpose()?;
    let retry_delay = meta.retry_delay.map(duration_to_interval).transpose()?;

    let queue = query_as::<_, Queue>(&sql)
        .bind(ns)
        .bind(queue)
        .bind(rename)
        .bind(ttl)
        .bind(retries)
        .bind(retry_delay)
        .bind(set_ttl)
        .fetch_optional(executor)
        .await?;

    Ok(queue)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn delete_queue<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: &str,
) -> Result<Option<Queue>> {
    let sql = formatdoc!(
        r#"
            delete from {escaped_schema}.queue
            where ns = $1 and queue = $2
            returning {QUEUE_COLUMNS};
        "#
    );

    let queue = query_as::<_, Queue>(&sql)
        .bind(ns)
        .bind(queue)
        .fetch_optional(executor)
        .await?;

    Ok(queue)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn count_queues<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
) -> Result<i64> {
    let sql = format!("select count(*) from {escaped_schema}.queue where ns = $1;");
    let count = query_scalar::<_, i64>(&sql)
        .bind(ns)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn list_queues<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    request: ListRequest,
) -> Result<Vec<Queue>> {
    let sql = formatdoc!(
        r#"
            select {QUEUE_COLUMNS}
            from {escaped_schema}.queue
            where ns = $1
            order by queue
            offset $2 limit $3;
        "#
    );

    let (offset, limit) = request.bounds();
    let queues = query_as::<_, Queue>(&sql)
        .bind(ns)
        .bind(offset)
        .bind(limit)
        .fetch_all(executor)
        .await?;

    Ok(queues)
}

/// Builds a [`QueueList`] from the total count and one page
pub(crate) fn queue_list(count: i64, body: Vec<Queue>) -> QueueList {
    QueueList {
        count: u64::try_from(count).unwrap_or_default(),
        body,
    }
}

/// Number of tasks per status, for one queue or every queue of the namespace
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn queue_status<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: Option<&str>,
) -> Result<Vec<QueueStatus>> {
    let sql = formatdoc!(
        r#"
            select queue, status::text as status, count
            from {escaped_schema}.queue_status
            where ns = $1 and ($2::text is null or queue = $2::text)
            order by queue, status;
        "#
    );

    let status = query_as::<_, QueueStatus>(&sql)
        .bind(ns)
        .bind(queue)
        .fetch_all(executor)
        .await?;

    Ok(status)
}

/// Deletes one batch of expired, released or failed tasks, oldest first
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn clean_queue<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: &str,
) -> Result<Vec<Task>> {
    let sql = formatdoc!(
        r#"
            select {columns}
            from {escaped_schema}.queue_clean($1, $2, $3) t
            order by t.created_at, t.id;
        "#,
        columns = task_select(escaped_schema),
    );

    let tasks = query_as::<_, Task>(&sql)
        .bind(ns)
        .bind(queue)
        .bind(CLEAN_BATCH_SIZE)
        .fetch_all(executor)
        .await?;

    Ok(tasks)
}
