use std::time::Duration;

use helpers::with_test_db;
use pgqueue::{
    Manager, QueueMeta, Task, TaskListRequest, TaskMeta, TaskStatus, Ticker, TickerMeta,
    WorkerContext,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod helpers;

#[derive(Deserialize, Debug)]
struct Email {
    to: String,
}

async fn wait_for_status(manager: &Manager, id: i64, status: TaskStatus) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = manager.get_task(id).await.unwrap();
        if *task.status() == status {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Task {id} stuck in status {}",
            task.status()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn worker_releases_successful_tasks_and_fails_others() {
    with_test_db(|test_db| async move {
        helpers::enable_logs().await;
        let manager = test_db.create_manager().await;
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();

        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .cancellation_token(token.clone())
            .define_queue(QueueMeta::new("emails"), move |_ctx: WorkerContext, email: Email| {
                let sent_tx = sent_tx.clone();
                async move { sent_tx.send(email.to).map_err(|e| e.to_string()) }
            })
            .define_queue(QueueMeta::new("broken"), |_ctx: WorkerContext, _payload: serde_json::Value| async {
                Err::<(), _>("smtp down")
            })
            .init(&manager)
            .await
            .expect("Failed to init worker");

        let mut queues = worker.queues();
        queues.sort();
        assert_eq!(queues, vec!["broken", "emails"]);

        let handle = tokio::task::spawn_local(async move { worker.run().await });

        let email = manager
            .create_task("emails", TaskMeta::new(json!({"to": "a@b.com"})))
            .await
            .unwrap();
        let broken = manager
            .create_task("broken", TaskMeta::new(json!({})))
            .await
            .unwrap();

        let to = tokio::time::timeout(Duration::from_secs(5), sent_rx.recv())
            .await
            .expect("Email task did not run")
            .unwrap();
        assert_eq!(to, "a@b.com");

        let email = wait_for_status(&manager, *email.id(), TaskStatus::Released).await;
        assert_eq!(email.result(), &json!(null));

        let broken = wait_for_status(&manager, *broken.id(), TaskStatus::Retry).await;
        assert_eq!(*broken.retries(), 2);
        assert!(broken.result().as_str().unwrap().contains("smtp down"));

        token.cancel();
        handle.await.unwrap().expect("Worker failed");
    })
    .await;
}

#[tokio::test]
async fn worker_fails_tasks_with_invalid_payload() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .cancellation_token(token.clone())
            .define_queue(QueueMeta::new("emails"), |_ctx: WorkerContext, _email: Email| async {
                Ok::<(), String>(())
            })
            .init(&manager)
            .await
            .unwrap();
        let handle = tokio::task::spawn_local(async move { worker.run().await });

        let task = manager
            .create_task("emails", TaskMeta::new(json!({"from": "a@b.com"})))
            .await
            .unwrap();

        let task = wait_for_status(&manager, *task.id(), TaskStatus::Retry).await;
        assert!(task.result().as_str().unwrap().contains("Invalid payload"));

        token.cancel();
        handle.await.unwrap().unwrap();
    })
    .await;
}

#[tokio::test]
async fn worker_fails_tasks_of_undefined_queues() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        manager.register_queue(QueueMeta::new("orphan")).await.unwrap();

        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .cancellation_token(token.clone())
            .define_queue(QueueMeta::new("emails"), |_ctx: WorkerContext, _email: Email| async {
                Ok::<(), String>(())
            })
            .init(&manager)
            .await
            .unwrap();
        let handle = tokio::task::spawn_local(async move { worker.run().await });

        let task = manager
            .create_task("orphan", TaskMeta::new(json!({})))
            .await
            .unwrap();
        let task = wait_for_status(&manager, *task.id(), TaskStatus::Retry).await;
        assert!(task.result().as_str().unwrap().contains("No handler"));

        token.cancel();
        handle.await.unwrap().unwrap();
    })
    .await;
}

#[tokio::test]
async fn worker_fires_tickers() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();

        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .ticker_period(Duration::from_millis(200))
            .cancellation_token(token.clone())
            .define_ticker(
                TickerMeta::new("heartbeat").interval(Duration::from_secs(1)),
                move |ctx: WorkerContext, ticker: Ticker| {
                    let fired_tx = fired_tx.clone();
                    async move {
                        assert_eq!(ctx.ticker(), Some(&ticker));
                        fired_tx.send(ticker.ticker().clone()).map_err(|e| e.to_string())
                    }
                },
            )
            .init(&manager)
            .await
            .unwrap();
        assert_eq!(worker.tickers(), vec!["heartbeat"]);
        let handle = tokio::task::spawn_local(async move { worker.run().await });

        for _ in 0..2 {
            let fired = tokio::time::timeout(Duration::from_secs(5), fired_rx.recv())
                .await
                .expect("Ticker did not fire")
                .unwrap();
            assert_eq!(fired, "heartbeat");
        }

        token.cancel();
        handle.await.unwrap().unwrap();
    })
    .await;
}

#[tokio::test]
async fn worker_cleans_expired_tasks() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .ticker_period(Duration::from_millis(200))
            .cancellation_token(token.clone())
            .define_queue(
                QueueMeta::new("short").ttl(Duration::from_millis(1)),
                |_ctx: WorkerContext, _payload: serde_json::Value| async { Ok::<(), String>(()) },
            )
            .init(&manager)
            .await
            .unwrap();

        for _ in 0..3 {
            manager
                .create_task("short", TaskMeta::new(json!({})))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = tokio::task::spawn_local(async move { worker.run().await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let tasks = manager
                .list_tasks(Some("short"), TaskListRequest::default())
                .await
                .unwrap();
            if tasks.count == 0 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "Tasks not cleaned");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        token.cancel();
        handle.await.unwrap().unwrap();
    })
    .await;
}

#[tokio::test]
async fn worker_waits_for_running_callbacks_on_shutdown() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .cancellation_token(token.clone())
            .define_queue(QueueMeta::new("slow"), move |ctx: WorkerContext, _payload: serde_json::Value| {
                let started_tx = started_tx.clone();
                async move {
                    started_tx.send(()).map_err(|e| e.to_string())?;
                    ctx.cancelled().await;
                    Ok::<(), String>(())
                }
            })
            .init(&manager)
            .await
            .unwrap();
        let handle = tokio::task::spawn_local(async move { worker.run().await });

        let task = manager
            .create_task("slow", TaskMeta::new(json!({})))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("Slow task did not start");

        token.cancel();
        handle.await.unwrap().unwrap();

        let task = manager.get_task(*task.id()).await.unwrap();
        assert_eq!(*task.status(), TaskStatus::Released);
    })
    .await;
}

#[tokio::test]
async fn worker_gives_back_tasks_it_could_not_start_on_shutdown() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        let token = CancellationToken::new();
        let worker = test_db
            .worker_options()
            .concurrency(1)
            .cancellation_token(token.clone())
            .define_queue(QueueMeta::new("slow"), move |ctx: WorkerContext, _payload: serde_json::Value| {
                let started_tx = started_tx.clone();
                async move {
                    started_tx.send(()).map_err(|e| e.to_string())?;
                    ctx.cancelled().await;
                    Ok::<(), String>(())
                }
            })
            .init(&manager)
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 0..3 {
            let task = manager
                .create_task("slow", TaskMeta::new(json!({ "i": i })))
                .await
                .unwrap();
            ids.push(*task.id());
        }
        let handle = tokio::task::spawn_local(async move { worker.run().await });

        tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("Slow task did not start");
        let retained = TaskListRequest::default().status(TaskStatus::Retained);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while manager.list_tasks(Some("slow"), retained).await.unwrap().count < 3 {
            assert!(tokio::time::Instant::now() < deadline, "Tasks not retained");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        token.cancel();
        handle.await.unwrap().unwrap();

        let first = manager.get_task(ids[0]).await.unwrap();
        assert_eq!(*first.status(), TaskStatus::Released);

        let last = manager.get_task(ids[2]).await.unwrap();
        assert_eq!(*last.status(), TaskStatus::New);
        assert!(last.delayed_at().is_none());

        // no attempt was used by the shutdown
        let tasks = manager
            .list_tasks(Some("slow"), TaskListRequest::default())
            .await
            .unwrap();
        assert!(tasks.body.iter().all(|t| *t.retries() == 3), "{tasks:?}");
    })
    .await;
}
