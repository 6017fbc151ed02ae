use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DbConfig;

/// Connection options built field by field, so passwords need no URL escaping.
pub fn connect_options(db: &DbConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .username(&db.user)
        .password(&db.password)
        .database(&db.name)
}

/// Open a pool and prove it works by acquiring and releasing one connection.
#[tracing::instrument(level = "info", skip(db), fields(host = %db.host, port = db.port, db = %db.name))]
pub async fn connect(db: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(connect_options(db))
        .await
        .with_context(|| {
            format!(
                "connecting to PostgreSQL database {} at {}:{}",
                db.name, db.host, db.port
            )
        })?;

    let conn = pool
        .acquire()
        .await
        .context("acquiring a connection from the pool")?;
    drop(conn);

    info!("connection to the PostgreSQL database was successful");
    Ok(pool)
}

/// SQLSTATE 42P01: relation does not exist.
pub fn is_undefined_table_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("42P01")
        )
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_config_fields() {
        let db = DbConfig {
            name: "gis".into(),
            user: "loader".into(),
            password: "p@ss:w/rd".into(),
            host: "db.internal".into(),
            port: 6543,
        };
        let opts = connect_options(&db);
        assert_eq!(opts.get_host(), "db.internal");
        assert_eq!(opts.get_port(), 6543);
        assert_eq!(opts.get_username(), "loader");
        assert_eq!(opts.get_database(), Some("gis"));
    }

    #[test]
    fn non_database_errors_are_not_undefined_table() {
        let err = anyhow::Error::new(sqlx::Error::RowNotFound).context("querying");
        assert!(!is_undefined_table_error(&err));
    }

    #[tokio::test]
    #[ignore]
    async fn connect_to_test_database() -> Result<()> {
        let pool = test_support::test_pool().await?;
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await?;
        assert_eq!(one, 1);
        pool.close().await;
        Ok(())
    }
}
