use std::time::Duration;

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::interval::interval_to_duration;

/// A named periodic trigger, identified by `(ns, ticker)`.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct Ticker {
    ns: String,
    ticker: String,
    /// Period between two fires
    interval: Option<Duration>,
    /// Last fire, `None` if the ticker never fired since its last registration
    ts: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for Ticker {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let interval: Option<PgInterval> = row.try_get("interval")?;

        Ok(Ticker {
            ns: row.try_get("ns")?,
            ticker: row.try_get("ticker")?,
            interval: interval.as_ref().map(interval_to_duration),
            ts: row.try_get("ts")?,
        })
    }
}

impl Ticker {
    pub fn new(ns: impl Into<String>, ticker: impl Into<String>, interval: Option<Duration>) -> Self {
        Ticker {
            ns: ns.into(),
            ticker: ticker.into(),
            interval,
            ts: None,
        }
    }
}

/// Fields used to register or patch a ticker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMeta {
    pub ticker: String,
    pub interval: Option<Duration>,
}

impl TickerMeta {
    pub fn new(ticker: impl Into<String>) -> Self {
        TickerMeta {
            ticker: ticker.into(),
            interval: None,
        }
    }

    pub fn interval(mut self, value: Duration) -> Self {
        self.interval = Some(value);
        self
    }
}
