#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use pgqueue::{Manager, ManagerOptions, QueueMeta, WorkerOptions};
use sqlx::postgres::PgConnectOptions;
use sqlx::{FromRow, PgPool};
use tokio::sync::OnceCell;
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "pgqueue";

#[derive(FromRow, Debug)]
pub struct Migration {
    pub id: i32,
    pub ts: DateTime<Utc>,
    pub breaking: bool,
}

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions::default()
            .pg_pool(self.test_pool.clone())
            .schema(SCHEMA)
    }

    pub async fn create_manager(&self) -> Manager {
        self.manager_options()
            .worker("test_worker")
            .init()
            .await
            .expect("Failed to create manager")
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions::default()
            .concurrency(4)
            .poll_interval(Duration::from_millis(100))
    }

    /// Queue "emails" with ttl=1h, retries=3 and retry_delay=2m
    pub async fn emails_queue(&self, manager: &Manager) {
        manager
            .register_queue(
                QueueMeta::new("emails")
                    .ttl(Duration::from_secs(3600))
                    .retries(3)
                    .retry_delay(Duration::from_secs(120)),
            )
            .await
            .expect("Failed to register queue");
    }

    pub async fn get_migrations(&self) -> Vec<Migration> {
        sqlx::query_as(&format!("select * from {SCHEMA}.migrations order by id"))
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get migrations")
    }

    /// Moves the delay of a task to now, as if its backoff elapsed
    pub async fn make_task_due(&self, id: i64) {
        sqlx::query(&format!(
            "update {SCHEMA}.task set delayed_at = now() where id = $1"
        ))
        .bind(id)
        .execute(&self.test_pool)
        .await
        .expect("Failed to update task");
    }
}

pub async fn create_test_database() -> TestDatabase {
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_pgqueue");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = uuid::Uuid::now_v7();
    let db_name = format!("__test_pgqueue_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect_with(test_options)
        .await
        .expect("Failed to connect to test database");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database().await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
