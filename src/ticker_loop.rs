use std::future::Future;
use std::time::Duration;

use pgqueue_schema::Ticker;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::Result;

/// Delay before the first poll, a random jitter of up to the same amount is added
pub const TICKER_START_DELAY: Duration = Duration::from_millis(100);

/// Tickers with a shorter interval do not shrink the poll period
const MIN_TICKER_INTERVAL: Duration = Duration::from_secs(1);

/// Lower bound of the poll period
const MIN_DELTA: Duration = Duration::from_millis(100);

/// Adapts the poll period after a ticker fired.
///
/// A ticker with an interval of at least one second and shorter than `delta`
/// shrinks `delta` to that interval. `delta` then moves halfway toward
/// `since`, the time elapsed since the previous fire.
pub fn adjust_delta(delta: Duration, interval: Option<Duration>, since: Duration) -> Duration {
    let mut delta = delta;
    if let Some(interval) = interval {
        if interval >= MIN_TICKER_INTERVAL && interval < delta {
            delta = interval;
        }
    }

    if since > delta {
        delta += (since - delta) / 2;
    } else if since < delta {
        delta -= (delta - since) / 2;
    }

    delta.max(MIN_DELTA)
}

fn start_delay() -> Duration {
    let jitter = rand::rng().random_range(0..=TICKER_START_DELAY.as_millis() as u64);
    TICKER_START_DELAY + Duration::from_millis(jitter)
}

/// Polls `next` and hands every fired ticker to `sender`.
///
/// Returns `Ok(())` on cancellation or when the receiver is dropped, and an
/// error only when `next` fails. A call to `next` in progress when the token
/// is cancelled runs to completion and its ticker is still offered to `sender`.
pub(crate) async fn ticker_loop<F, Fut>(
    cancellation_token: &CancellationToken,
    period: Duration,
    mut next: F,
    sender: mpsc::Sender<Ticker>,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Ticker>>>,
{
    let mut delta = period;
    let mut prev = Instant::now();
    let sleep = tokio::time::sleep(start_delay());
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => return Ok(()),
            _ = &mut sleep => {}
        }

        // A claimed ticker is already marked fired, the query is never dropped midway
        let fired = next().await?;

        if let Some(ticker) = fired {
            let interval = *ticker.interval();
            let name = ticker.ticker().clone();
            trace!(ticker = %name, ns = ticker.ns(), "Ticker fired");

            tokio::select! {
                biased;
                sent = sender.send(ticker) => {
                    if sent.is_err() {
                        debug!("Ticker receiver dropped, stopping ticker loop");
                        return Ok(());
                    }
                }
                _ = cancellation_token.cancelled() => {
                    debug!(ticker = %name, "Ticker loop cancelled before the ticker was delivered");
                    return Ok(());
                }
            }

            let now = Instant::now();
            delta = adjust_delta(delta, interval, now - prev);
            prev = now;
        }

        sleep.as_mut().reset(Instant::now() + delta);
    }
}
