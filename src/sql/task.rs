use chrono::{DateTime, Utc};
use indoc::formatdoc;
use pgqueue_schema::{Task, TaskListRequest};
use serde_json::Value;
use sqlx::{query_as, query_scalar, PgExecutor};

use super::task_select;
use crate::errors::Result;

/// Inserts a task, returns `None` when the queue does not exist
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn insert_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: &str,
    payload: &Value,
    delayed_at: Option<DateTime<Utc>>,
) -> Result<Option<i64>> {
    let sql = format!("select {escaped_schema}.queue_insert($1, $2, $3, $4);");

    let id = query_scalar::<_, Option<i64>>(&sql)
        .bind(ns)
        .bind(queue)
        .bind(payload)
        .bind(delayed_at)
        .fetch_one(executor)
        .await?;

    Ok(id)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn get_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    id: i64,
) -> Result<Option<Task>> {
    let sql = formatdoc!(
        r#"
            select {columns}
            from {escaped_schema}.task t
            where t.ns = $1 and t.id = $2;
        "#,
        columns = task_select(escaped_schema),
    );

    let task = query_as::<_, Task>(&sql)
        .bind(ns)
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(task)
}

/// Claims the oldest eligible task of the namespace for `worker`
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn lock_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    worker: &str,
) -> Result<Option<i64>> {
    let sql = format!("select {escaped_schema}.queue_lock($1, $2);");

    let id = query_scalar::<_, Option<i64>>(&sql)
        .bind(ns)
        .bind(worker)
        .fetch_one(executor)
        .await?;

    Ok(id)
}

/// Completes a retained task, `None` when the task is not retained
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn unlock_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    id: i64,
    result: &Value,
) -> Result<Option<i64>> {
    let sql = format!("select {escaped_schema}.queue_unlock($1, $2, $3);");

    let id = query_scalar::<_, Option<i64>>(&sql)
        .bind(ns)
        .bind(id)
        .bind(result)
        .fetch_one(executor)
        .await?;

    Ok(id)
}

/// Fails a retained task and schedules its retry, `None` when the task is not retained
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn fail_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    id: i64,
    result: &Value,
) -> Result<Option<i64>> {
    let sql = format!("select {escaped_schema}.queue_fail($1, $2, $3);");

    let id = query_scalar::<_, Option<i64>>(&sql)
        .bind(ns)
        .bind(id)
        .bind(result)
        .fetch_one(executor)
        .await?;

    Ok(id)
}

/// Gives a retained task back without using an attempt, `None` when `worker`
/// does not hold it
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn return_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    id: i64,
    worker: &str,
) -> Result<Option<i64>> {
    let sql = format!("select {escaped_schema}.queue_return($1, $2, $3);");

    let id = query_scalar::<_, Option<i64>>(&sql)
        .bind(ns)
        .bind(id)
        .bind(worker)
        .fetch_one(executor)
        .await?;

    Ok(id)
}

fn task_list_sql(escaped_schema: &str, projection: &str, page: bool) -> String {
    formatdoc!(
        r#"
            with q as (
                select {columns}
                from {escaped_schema}.task t
                where t.ns = $1 and ($2::text is null or t.queue = $2::text)
            )
            select {projection}
            from q
            where ($3::text is null or q.status = $3::text)
            {page}
        "#,
        columns = task_select(escaped_schema),
        page = if page {
            "order by q.created_at, q.id offset $4 limit $5"
        } else {
            ""
        },
    )
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn count_tasks<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: Option<&str>,
    request: &TaskListRequest,
) -> Result<i64> {
    let sql = task_list_sql(escaped_schema, "count(*)", false);

    let count = query_scalar::<_, i64>(&sql)
        .bind(ns)
        .bind(queue)
        .bind(request.status.map(|status| status.as_str()))
        .fetch_one(executor)
        .await?;

    Ok(count)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn list_tasks<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    queue: Option<&str>,
    request: &TaskListRequest,
) -> Result<Vec<Task>> {
    let sql = task_list_sql(escaped_schema, "q.*", true);
    let (offset, limit) = request.page.bounds();

    let tasks = query_as::<_, Task>(&sql)
        .bind(ns)
        .bind(queue)
        .bind(request.status.map(|status| status.as_str()))
        .bind(offset)
        .bind(limit)
        .fetch_all(executor)
        .await?;

    Ok(tasks)
}
