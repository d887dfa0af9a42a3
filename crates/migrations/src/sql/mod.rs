use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;

/// Placeholder replaced by the escaped schema name in every statement
pub const SCHEMA_PLACEHOLDER: &str = ":PGQUEUE_SCHEMA";

pub struct PgQueueMigration {
    name: &'static str,
    is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl PgQueueMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    /// Migration number parsed from its name, `m000002` is 2
    pub fn migration_number(&self) -> u32 {
        self.name
            .trim_start_matches('m')
            .parse()
            .unwrap_or_default()
    }

    /// Statements of the migration for the given schema
    pub fn statements<'a>(&'a self, escaped_schema: &'a str) -> impl Iterator<Item = String> + 'a {
        self.stmts
            .iter()
            .map(move |stmt| stmt.replace(SCHEMA_PLACEHOLDER, escaped_schema))
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.statements(escaped_schema) {
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const PGQUEUE_MIGRATIONS: &[PgQueueMigration] =
    &[m000001::M000001_MIGRATION, m000002::M000002_MIGRATION];
