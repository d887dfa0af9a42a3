use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use pgqueue_ctx::WorkerContext;

/// A callback run by the pool for a task or a ticker.
pub trait TaskHandler<Payload>: Send + Sync + 'static
where
    Payload: Send + 'static,
{
    fn run(
        &self,
        ctx: WorkerContext,
        payload: Payload,
    ) -> impl Future<Output = Result<(), String>> + Send + 'static;

    fn identifier(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<Payload, Error, F, Fut> TaskHandler<Payload> for F
where
    Payload: Send + 'static,
    Error: Debug + Send,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
    F: Fn(WorkerContext, Payload) -> Fut + Send + Sync + 'static,
{
    fn run(
        &self,
        ctx: WorkerContext,
        payload: Payload,
    ) -> impl Future<Output = Result<(), String>> + Send + 'static {
        let res = (self)(ctx, payload);
        async move { res.await.map_err(|e| format!("{:?}", e)) }
    }
}

type BoxedRun<Payload> =
    dyn Fn(WorkerContext, Payload) -> BoxFuture<'static, Result<(), String>> + Send + Sync;

/// Type-erased handler, used to keep handlers of different types in one map.
pub struct BoxTaskHandler<Payload> {
    identifier: String,
    run: Arc<BoxedRun<Payload>>,
}

impl<Payload: Send + 'static> BoxTaskHandler<Payload> {
    pub fn new<H: TaskHandler<Payload>>(handler: H) -> Self {
        BoxTaskHandler {
            identifier: handler.identifier().to_string(),
            run: Arc::new(move |ctx, payload| handler.run(ctx, payload).boxed()),
        }
    }
}

impl<Payload> Clone for BoxTaskHandler<Payload> {
    fn clone(&self) -> Self {
        BoxTaskHandler {
            identifier: self.identifier.clone(),
            run: self.run.clone(),
        }
    }
}

impl<Payload: Send + 'static> TaskHandler<Payload> for BoxTaskHandler<Payload> {
    fn run(
        &self,
        ctx: WorkerContext,
        payload: Payload,
    ) -> impl Future<Output = Result<(), String>> + Send + 'static {
        (self.run)(ctx, payload)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
