use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use pgqueue_ctx::{Subject, WorkerContext};
use pgqueue_schema::{Task, Ticker};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::handler::TaskHandler;
use crate::task_result::{PoolError, RunTaskError, TaskFailure};

type ResultCallback = Box<dyn FnOnce(Result<(), RunTaskError>) + Send>;

/// A unit of work waiting for a free worker
struct Work {
    label: String,
    cancellation_token: CancellationToken,
    deadline: Option<Duration>,
    run: BoxFuture<'static, Result<(), TaskFailure>>,
    on_result: ResultCallback,
}

/// Fixed-size pool of workers fed through a bounded channel.
///
/// Submitting waits while all workers are busy and the channel is full.
pub struct TaskPool {
    size: usize,
    sender: Mutex<Option<mpsc::Sender<Work>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    /// Starts `size` workers, at least one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Work>(size);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|worker_index| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let work = { receiver.lock().await.recv().await };
                        let Some(work) = work else {
                            break;
                        };
                        execute(worker_index, work).await;
                    }
                    trace!(worker_index, "Pool worker stopped");
                })
            })
            .collect();

        TaskPool {
            size,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `handler` with the task payload decoded as `Payload`.
    ///
    /// The deadline is the time left before the task expires. `on_result` is
    /// called exactly once when the submission was accepted.
    pub async fn run_task<Payload, H, R>(
        &self,
        parent: &CancellationToken,
        worker: &str,
        task: Task,
        handler: &H,
        on_result: R,
    ) -> Result<(), PoolError>
    where
        Payload: DeserializeOwned + Send + 'static,
        H: TaskHandler<Payload>,
        R: FnOnce(Result<(), RunTaskError>) + Send + 'static,
    {
        let deadline = task.time_to_live(Utc::now());
        let label = format!("task {} ({})", task.id(), task.queue());
        let payload = serde_json::from_value::<Payload>(task.payload().clone());
        let cancellation_token = parent.child_token();
        let ctx = WorkerContext::new(
            worker,
            Subject::Task(task),
            cancellation_token.clone(),
            non_zero(deadline),
        );

        let run = match payload {
            Ok(payload) => callback_future(handler.run(ctx, payload)),
            Err(e) => future::ready(Err(TaskFailure::InvalidPayload(e.to_string()))).boxed(),
        };

        self.submit(
            parent,
            Work {
                label,
                cancellation_token,
                deadline: non_zero(deadline),
                run,
                on_result: Box::new(on_result),
            },
        )
        .await
    }

    /// Runs `handler` for a fired ticker, the deadline is the ticker interval.
    pub async fn run_ticker<H, R>(
        &self,
        parent: &CancellationToken,
        worker: &str,
        ticker: Ticker,
        handler: &H,
        on_result: R,
    ) -> Result<(), PoolError>
    where
        H: TaskHandler<Ticker>,
        R: FnOnce(Result<(), RunTaskError>) + Send + 'static,
    {
        let deadline = non_zero(*ticker.interval());
        let label = format!("ticker {}", ticker.ticker());
        let cancellation_token = parent.child_token();
        let ctx = WorkerContext::new(
            worker,
            Subject::Ticker(ticker.clone()),
            cancellation_token.clone(),
            deadline,
        );

        self.submit(
            parent,
            Work {
                label,
                cancellation_token,
                deadline,
                run: callback_future(handler.run(ctx, ticker)),
                on_result: Box::new(on_result),
            },
        )
        .await
    }

    async fn submit(&self, parent: &CancellationToken, work: Work) -> Result<(), PoolError> {
        let Some(sender) = self.sender.lock().await.clone() else {
            return Err(PoolError::Closed);
        };

        tokio::select! {
            biased;
            _ = parent.cancelled() => Err(PoolError::Cancelled),
            res = sender.send(work) => res.map_err(|_| PoolError::Closed),
        }
    }

    /// Stops accepting work and waits until every accepted submission ran.
    pub async fn close(&self) {
        if self.sender.lock().await.take().is_none() {
            trace!("Worker pool already closed");
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Pool worker terminated abnormally");
            }
        }
        debug!(size = self.size, "Worker pool closed");
    }
}

fn non_zero(duration: Option<Duration>) -> Option<Duration> {
    duration.filter(|d| !d.is_zero())
}

fn callback_future<F>(fut: F) -> BoxFuture<'static, Result<(), TaskFailure>>
where
    F: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    fut.map(|res| res.map_err(TaskFailure::Callback)).boxed()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn join_failure(e: JoinError) -> TaskFailure {
    if e.is_panic() {
        TaskFailure::Panic(panic_message(e.into_panic()))
    } else {
        TaskFailure::Aborted
    }
}

async fn execute(worker_index: usize, work: Work) {
    let Work {
        label,
        cancellation_token,
        deadline,
        run,
        on_result,
    } = work;

    let start = Instant::now();
    let mut failures = Vec::new();
    let mut handle = tokio::spawn(run);

    let joined = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(label = %label, ?deadline, "Deadline exceeded, cancelling callback");
                failures.push(TaskFailure::DeadlineExceeded(deadline));
                cancellation_token.cancel();
                handle.await
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(())) => {}
        Ok(Err(failure)) => failures.insert(0, failure),
        Err(e) => failures.insert(0, join_failure(e)),
    }

    let result = match RunTaskError::from_failures(failures) {
        Some(e) => Err(e),
        None => Ok(()),
    };
    trace!(
        worker_index,
        label = %label,
        duration = ?start.elapsed(),
        success = result.is_ok(),
        "Callback finished"
    );

    if std::panic::catch_unwind(AssertUnwindSafe(move || on_result(result))).is_err() {
        error!(worker_index, label = %label, "Result callback panicked");
    }
}
