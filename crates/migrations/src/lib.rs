pub mod pg_version;
pub mod sql;

use indoc::formatdoc;
use pg_version::fetch_and_check_postgres_version;
use sql::PGQUEUE_MIGRATIONS;
use sqlx::{query, query_as, Acquire, FromRow, PgConnection, Postgres};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Error occured while parsing postgres version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("pgqueue requires PostgreSQL v12.0 or greater (detected `server_version_num` = {0})")]
    IncompatibleVersion(u32),
    #[error("Database is using pgqueue schema revision {} which includes breaking migration {}, but this version only supports up to revision {}", .latest_migration, .latest_breaking_migration, .highest_migration)]
    IncompatibleRevision {
        latest_migration: i32,
        latest_breaking_migration: i32,
        highest_migration: u32,
    },
    #[error("Error occured while migrate: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Creates the schema and its migrations table when missing.
async fn install_schema(conn: &mut PgConnection, escaped_schema: &str) -> Result<(), MigrateError> {
    let create_schema_query = formatdoc!(
        r#"
            create schema if not exists {escaped_schema};
        "#
    );

    let create_migration_table_query = formatdoc!(
        r#"
            create table if not exists {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz default now() not null,
                breaking boolean not null default false
            );
        "#
    );

    query(&create_schema_query).execute(&mut *conn).await?;
    query(&create_migration_table_query)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[derive(FromRow, Default, Debug)]
struct LastMigration {
    id: Option<i32>,
    biggest_breaking_id: Option<i32>,
}

impl LastMigration {
    fn is_before_number(&self, migration_number: u32) -> bool {
        let migration_id = self.id.and_then(|id| u32::try_from(id).ok());
        migration_number > migration_id.unwrap_or(0)
    }
}

async fn get_last_migration(
    conn: &mut PgConnection,
    escaped_schema: &str,
) -> Result<LastMigration, MigrateError> {
    let migrations_status_query = formatdoc!(
        r#"
            select
                (select id from {escaped_schema}.migrations order by id desc limit 1) as id,
                (select id from {escaped_schema}.migrations where breaking is true order by id desc limit 1) as biggest_breaking_id;
        "#
    );

    let last_migration = query_as::<_, LastMigration>(&migrations_status_query)
        .fetch_one(conn)
        .await?;

    Ok(last_migration)
}

/// Bootstraps the pgqueue schema, running every pending migration.
///
/// The whole bootstrap runs in one transaction holding an advisory lock on the
/// schema name, so concurrent processes starting together migrate only once.
pub async fn migrate<'e, A>(executor: A, escaped_schema: &str) -> Result<(), MigrateError>
where
    A: Acquire<'e, Database = Postgres>,
{
    let mut tx = executor.begin().await?;

    query("select pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("pgqueue_migrate:{escaped_schema}"))
        .execute(tx.as_mut())
        .await?;

    let version = fetch_and_check_postgres_version(tx.as_mut()).await?;
    debug!(pg_version = version, schema = escaped_schema, "Checking pgqueue schema");

    install_schema(tx.as_mut(), escaped_schema).await?;
    let last_migration = get_last_migration(tx.as_mut(), escaped_schema).await?;

    let mut highest_migration = 0;
    let mut migrated = false;
    for migration in PGQUEUE_MIGRATIONS.iter() {
        let migration_number = migration.migration_number();
        highest_migration = highest_migration.max(migration_number);

        if !last_migration.is_before_number(migration_number) {
            continue;
        }

        migrated = true;
        info!(
            migration_number,
            migration_name = migration.name(),
            is_breaking_migration = migration.is_breaking(),
            "Running {} migration {}",
            if migration.is_breaking() {
                "breaking"
            } else {
                "backwards-compatible"
            },
            migration.name(),
        );
        migration.execute(&mut tx, escaped_schema).await?;

        let sql = format!("insert into {escaped_schema}.migrations (id, breaking) values ($1, $2)");
        query(&sql)
            .bind(migration_number as i32)
            .bind(migration.is_breaking())
            .execute(tx.as_mut())
            .await?;
    }

    if let Some(latest_breaking_migration) = last_migration.biggest_breaking_id {
        if highest_migration < latest_breaking_migration as u32 {
            return Err(MigrateError::IncompatibleRevision {
                latest_migration: last_migration.id.unwrap_or(0),
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    if let Some(latest_migration) = last_migration.id {
        if highest_migration < latest_migration as u32 {
            warn!(
                latest_migration,
                highest_migration,
                "Database is using pgqueue schema revision {}, but this version only supports up to revision {}. Attempting to continue regardless.",
                latest_migration,
                highest_migration,
            );
        }
    }

    tx.commit().await?;

    if migrated {
        info!(schema = escaped_schema, "Migrations complete");
    }

    Ok(())
}
