use std::time::Duration;

use futures::{stream, Stream};
use pgqueue_schema::queue_insert_topic;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::errors::Result;

/// Why idle workers should look for tasks again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSignal {
    /// The poll interval elapsed
    Polling,
    /// A task was inserted in the named queue
    Notification(String),
}

struct TaskSignalStreamData {
    interval: tokio::time::Interval,
    pg_listener: PgListener,
    cancellation_token: CancellationToken,
}

/// Returns a stream that yields on `NOTIFY {namespace}_queue_insert` and on
/// every `poll_interval`, the first poll being immediate. The stream ends when
/// the token is cancelled.
pub async fn task_signal_stream(
    pg_pool: &PgPool,
    namespace: &str,
    poll_interval: Duration,
    cancellation_token: CancellationToken,
) -> Result<impl Stream<Item = TaskSignal>> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let topic = queue_insert_topic(namespace);
    let mut pg_listener = PgListener::connect_with(pg_pool).await?;
    pg_listener.listen(&topic).await?;
    trace!(topic, "Listening for task notifications");

    let stream_data = TaskSignalStreamData {
        interval,
        pg_listener,
        cancellation_token,
    };
    let stream = stream::unfold(stream_data, |mut f| async {
        tokio::select! {
            biased;
            _ = f.cancellation_token.cancelled() => None,
            notification = f.pg_listener.recv() => match notification {
                Ok(notification) => {
                    let queue = notification.payload().to_string();
                    Some((TaskSignal::Notification(queue), f))
                }
                Err(e) => {
                    warn!(error = %e, "Task notification listener failed, falling back to polling");
                    f.interval.tick().await;
                    Some((TaskSignal::Polling, f))
                }
            },
            _ = f.interval.tick() => Some((TaskSignal::Polling, f)),
        }
    });

    Ok(stream)
}
