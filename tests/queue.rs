use std::time::Duration;

use helpers::with_test_db;
use pgqueue::{ListRequest, QueueMeta, TaskListRequest, TaskMeta, TaskStatus, CLEAN_BATCH_SIZE};
use serde_json::json;

mod helpers;

#[tokio::test]
async fn register_queue_uses_defaults_and_patches_existing() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;

        let queue = manager
            .register_queue(QueueMeta::new(" Emails "))
            .await
            .unwrap();
        assert_eq!(queue.ns(), "default");
        assert_eq!(queue.queue(), "emails");
        assert_eq!(*queue.ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(*queue.retries(), 3);
        assert_eq!(*queue.retry_delay(), Duration::from_secs(120));

        let queue = manager
            .register_queue(QueueMeta::new("emails").retries(5))
            .await
            .unwrap();
        assert_eq!(*queue.retries(), 5);
        assert_eq!(*queue.ttl(), Some(Duration::from_secs(3600)));

        let queue = manager.register_queue(QueueMeta::new("emails")).await.unwrap();
        assert_eq!(*queue.retries(), 5);
    })
    .await;
}

#[tokio::test]
async fn register_queue_rejects_invalid_names() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;

        for name in ["", "1abc", "a-b", "cleanup", "default"] {
            let err = manager
                .register_queue(QueueMeta::new(name))
                .await
                .unwrap_err();
            assert!(err.is_bad_request(), "{name}: {err}");
        }
    })
    .await;
}

#[tokio::test]
async fn list_queues_is_paginated() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        for name in ["c", "a", "b"] {
            manager.register_queue(QueueMeta::new(name)).await.unwrap();
        }

        let list = manager.list_queues(ListRequest::default()).await.unwrap();
        assert_eq!(list.count, 3);
        let names: Vec<_> = list.body.iter().map(|q| q.queue().as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let list = manager
            .list_queues(ListRequest::default().offset(1).limit(1))
            .await
            .unwrap();
        assert_eq!(list.count, 3);
        assert_eq!(list.body.len(), 1);
        assert_eq!(list.body[0].queue(), "b");

        let other = manager.with_namespace("other").unwrap();
        assert_eq!(
            other.list_queues(ListRequest::default()).await.unwrap().count,
            0
        );
    })
    .await;
}

#[tokio::test]
async fn update_queue_patches_and_renames() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        test_db.emails_queue(&manager).await;
        manager
            .create_task("emails", TaskMeta::new(json!({"to": "a@b.com"})))
            .await
            .unwrap();

        let err = manager
            .update_queue("emails", QueueMeta::default())
            .await
            .unwrap_err();
        assert!(err.is_bad_request());

        let queue = manager
            .update_queue("emails", QueueMeta::default().retry_delay(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(*queue.retry_delay(), Duration::from_secs(1));
        assert_eq!(*queue.retries(), 3);

        let queue = manager
            .update_queue("emails", QueueMeta::new("mails"))
            .await
            .unwrap();
        assert_eq!(queue.queue(), "mails");
        assert!(manager.get_queue("emails").await.unwrap_err().is_not_found());

        let tasks = manager
            .list_tasks(Some("mails"), TaskListRequest::default())
            .await
            .unwrap();
        assert_eq!(tasks.count, 1);

        let err = manager
            .update_queue("missing", QueueMeta::default().retries(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    })
    .await;
}

#[tokio::test]
async fn rename_to_existing_queue_is_a_conflict() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        manager.register_queue(QueueMeta::new("a")).await.unwrap();
        manager.register_queue(QueueMeta::new("b")).await.unwrap();

        let err = manager
            .update_queue("a", QueueMeta::new("b"))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err}");
    })
    .await;
}

#[tokio::test]
async fn delete_queue_cascades_to_tasks() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        test_db.emails_queue(&manager).await;
        let task = manager
            .create_task("emails", TaskMeta::new(json!({})))
            .await
            .unwrap();

        let queue = manager.delete_queue("emails").await.unwrap();
        assert_eq!(queue.queue(), "emails");
        assert!(manager.get_task(*task.id()).await.unwrap_err().is_not_found());
        assert!(manager.delete_queue("emails").await.unwrap_err().is_not_found());
    })
    .await;
}

#[tokio::test]
async fn queue_status_counts_tasks_per_status() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        test_db.emails_queue(&manager).await;
        for _ in 0..2 {
            manager
                .create_task("emails", TaskMeta::new(json!({})))
                .await
                .unwrap();
        }
        manager.retain_task().await.unwrap().unwrap();

        let status = manager.queue_status(Some("emails")).await.unwrap();
        assert_eq!(status.len(), TaskStatus::ALL.len());

        let count = |wanted: TaskStatus| {
            status
                .iter()
                .find(|s| *s.status() == wanted)
                .map(|s| *s.count())
                .unwrap()
        };
        assert_eq!(count(TaskStatus::New), 1);
        assert_eq!(count(TaskStatus::Retained), 1);
        assert_eq!(count(TaskStatus::Released), 0);
    })
    .await;
}

#[tokio::test]
async fn clean_queue_deletes_finished_tasks_in_batches() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        test_db.emails_queue(&manager).await;

        for i in 0..3 {
            manager
                .create_task("emails", TaskMeta::new(json!({ "i": i })))
                .await
                .unwrap();
        }
        for _ in 0..2 {
            let task = manager.retain_task().await.unwrap().unwrap();
            manager.release_task(*task.id(), json!(null)).await.unwrap();
        }

        let deleted = manager.clean_queue("emails").await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(deleted.iter().all(|t| *t.status() == TaskStatus::Released));
        assert!(deleted[0].created_at() <= deleted[1].created_at());

        assert!(manager.clean_queue("emails").await.unwrap().is_empty());
        let remaining = manager
            .list_tasks(Some("emails"), TaskListRequest::default())
            .await
            .unwrap();
        assert_eq!(remaining.count, 1);
        assert_eq!(*remaining.body[0].status(), TaskStatus::New);
    })
    .await;
}

#[tokio::test]
async fn clean_queue_deletes_expired_tasks() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        manager
            .register_queue(QueueMeta::new("short").ttl(Duration::from_millis(1)))
            .await
            .unwrap();
        manager
            .create_task("short", TaskMeta::new(json!({})))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let deleted = manager.clean_queue("short").await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(*deleted[0].status(), TaskStatus::Expired);
    })
    .await;
}

#[tokio::test]
async fn clean_queue_stops_at_batch_size() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        manager
            .register_queue(QueueMeta::new("short").ttl(Duration::from_millis(1)))
            .await
            .unwrap();
        for i in 0..(CLEAN_BATCH_SIZE + 5) {
            manager
                .create_task("short", TaskMeta::new(json!({ "i": i })))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        let deleted = manager.clean_queue("short").await.unwrap();
        assert_eq!(deleted.len() as i64, CLEAN_BATCH_SIZE);
        assert_eq!(deleted[0].payload(), &json!({ "i": 0 }));

        let deleted = manager.clean_queue("short").await.unwrap();
        assert_eq!(deleted.len(), 5);
        assert!(manager.clean_queue("short").await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn queue_ttl_can_be_removed() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;
        let queue = manager
            .register_queue(QueueMeta::new("forever").no_ttl())
            .await
            .unwrap();
        assert_eq!(*queue.ttl(), None);

        let task = manager
            .create_task("forever", TaskMeta::new(json!({})))
            .await
            .unwrap();
        assert!(task.dies_at().is_none());
        assert_eq!(*task.status(), TaskStatus::New);

        let task = manager.retain_task().await.unwrap().unwrap();
        let failed = manager.fail_task(*task.id(), json!("retry me")).await.unwrap();
        assert_eq!(*failed.status(), TaskStatus::Retry);
        test_db.make_task_due(*task.id()).await;

        let task = manager.retain_task().await.unwrap().unwrap();
        let released = manager.release_task(*task.id(), json!(null)).await.unwrap();
        assert_eq!(*released.status(), TaskStatus::Released);

        test_db.emails_queue(&manager).await;
        let queue = manager
            .update_queue("emails", QueueMeta::default().no_ttl())
            .await
            .unwrap();
        assert_eq!(*queue.ttl(), None);
        assert_eq!(*queue.retries(), 3);

        let queue = manager
            .update_queue("emails", QueueMeta::default().ttl(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(*queue.ttl(), Some(Duration::from_secs(60)));
    })
    .await;
}

#[tokio::test]
async fn register_queue_rejects_out_of_range_retries() {
    with_test_db(|test_db| async move {
        let manager = test_db.create_manager().await;

        let err = manager
            .register_queue(QueueMeta::new("emails").retries(u32::MAX))
            .await
            .unwrap_err();
        assert!(err.is_bad_request(), "{err}");
        assert!(manager.get_queue("emails").await.unwrap_err().is_not_found());
    })
    .await;
}
