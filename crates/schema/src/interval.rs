use std::time::Duration;

use sqlx::postgres::types::PgInterval;
use thiserror::Error;

const MICROS_PER_DAY: i64 = 86_400_000_000;
const DAYS_PER_MONTH: i64 = 30;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Duration of {0:?} does not fit in a postgres interval")]
pub struct IntervalError(pub Duration);

/// Converts a postgres interval to a duration, counting a month as 30 days.
///
/// Negative intervals clamp to zero.
pub fn interval_to_duration(interval: &PgInterval) -> Duration {
    let PgInterval {
        months,
        days,
        microseconds,
    } = *interval;
    let micros = (months as i64 * DAYS_PER_MONTH + days as i64)
        .saturating_mul(MICROS_PER_DAY)
        .saturating_add(microseconds);
    Duration::from_micros(micros.max(0) as u64)
}

/// Converts a duration to an interval made of microseconds only.
pub fn duration_to_interval(duration: Duration) -> Result<PgInterval, IntervalError> {
    let microseconds = i64::try_from(duration.as_micros()).map_err(|_| IntervalError(duration))?;
    Ok(PgInterval {
        months: 0,
        days: 0,
        microseconds,
    })
}
