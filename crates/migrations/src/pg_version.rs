use indoc::formatdoc;
use sqlx::{query, PgExecutor, Row};

use crate::MigrateError;

/// Fetches the postgres version and checks if it is supported by pgqueue
pub async fn fetch_and_check_postgres_version<'e, E>(executor: E) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e>,
{
    let sql = formatdoc!(
        r#"
            select current_setting('server_version_num') as server_version_num
        "#
    );

    let row = query(&sql).fetch_one(executor).await?;
    let version_string: String = row.try_get("server_version_num")?;

    check_postgres_version(&version_string)
}

/// Checks if the given postgres version is supported by pgqueue
pub fn check_postgres_version(version_string: &str) -> Result<u32, MigrateError> {
    let version = version_string.parse::<u32>()?;

    if version < 120000 {
        return Err(MigrateError::IncompatibleVersion(version));
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_postgres_version() {
        for version in [120000, 120999, 130001, 160004, 170000] {
            assert_eq!(check_postgres_version(&version.to_string()).unwrap(), version);
        }
    }

    #[test]
    fn test_check_postgres_version_error() {
        assert!(matches!(
            check_postgres_version("119999"),
            Err(MigrateError::IncompatibleVersion(119999))
        ));
        assert!(matches!(
            check_postgres_version("96000"),
            Err(MigrateError::IncompatibleVersion(96000))
        ));
        assert!(matches!(
            check_postgres_version("sixteen"),
            Err(MigrateError::ParseVersionError(_))
        ));
    }
}
