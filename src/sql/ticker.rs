use indoc::formatdoc;
use pgqueue_schema::{duration_to_interval, ListRequest, Ticker};
use sqlx::{query, query_as, query_scalar, PgExecutor};
use std::time::Duration;

use crate::errors::Result;

const TICKER_COLUMNS: &str = r#"ns, ticker, "interval", ts"#;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn get_ticker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    ticker: &str,
) -> Result<Option<Ticker>> {
    let sql = formatdoc!(
        r#"
            select {TICKER_COLUMNS}
            from {escaped_schema}.ticker
            where ns = $1 and ticker = $2;
        "#
    );

    let ticker = query_as::<_, Ticker>(&sql)
        .bind(ns)
        .bind(ticker)
        .fetch_optional(executor)
        .await?;

    Ok(ticker)
}

/// Inserts a ticker with the default interval, returns false when it already existed
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn insert_ticker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    ticker: &str,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.ticker (ns, ticker)
            values ($1, $2)
            on conflict (ns, ticker) do nothing;
        "#
    );

    let inserted = query(&sql)
        .bind(ns)
        .bind(ticker)
        .execute(executor)
        .await?
        .rows_affected();

    Ok(inserted > 0)
}

/// Updates the interval when given and always clears the last tick, so the
/// ticker fires on the next poll.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn patch_ticker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    ticker: &str,
    interval: Option<Duration>,
) -> Result<Option<Ticker>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.ticker set
                "interval" = coalesce($3::interval, "interval"),
                ts = null
            where ns = $1 and ticker = $2
            returning {TICKER_COLUMNS};
        "#
    );

    let interval = interval.map(duration_to_interval).transpose()?;
    let ticker = query_as::<_, Ticker>(&sql)
        .bind(ns)
        .bind(ticker)
        .bind(interval)
        .fetch_optional(executor)
        .await?;

    Ok(ticker)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn delete_ticker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    ticker: &str,
) -> Result<Option<Ticker>> {
    let sql = formatdoc!(
        r#"
            delete from {escaped_schema}.ticker
            where ns = $1 and ticker = $2
            returning {TICKER_COLUMNS};
        "#
    );

    let ticker = query_as::<_, Ticker>(&sql)
        .bind(ns)
        .bind(ticker)
        .fetch_optional(executor)
        .await?;

    Ok(ticker)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn count_tickers<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
) -> Result<i64> {
    let sql = format!("select count(*) from {escaped_schema}.ticker where ns = $1;");
    let count = query_scalar::<_, i64>(&sql)
        .bind(ns)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn list_tickers<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
    request: ListRequest,
) -> Result<Vec<Ticker>> {
    let sql = formatdoc!(
        r#"
            select {TICKER_COLUMNS}
            from {escaped_schema}.ticker
            where ns = $1
            order by ticker
            offset $2 limit $3;
        "#
    );

    let (offset, limit) = request.bounds();
    let tickers = query_as::<_, Ticker>(&sql)
        .bind(ns)
        .bind(offset)
        .bind(limit)
        .fetch_all(executor)
        .await?;

    Ok(tickers)
}

/// Claims the earliest matured ticker of the namespace and marks it fired
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn next_ticker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ns: &str,
) -> Result<Option<Ticker>> {
    let sql = format!(r#"select {TICKER_COLUMNS} from {escaped_schema}.ticker_next($1);"#);

    let ticker = query_as::<_, Ticker>(&sql)
        .bind(ns)
        .fetch_optional(executor)
        .await?;

    Ok(ticker)
}
