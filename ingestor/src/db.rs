use crate::errors::Result;
use crate::model::NewMeasurement;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Append-only destination for admitted readings.
pub trait MeasurementSink: Send + Sync {
    fn insert(&self, row: &NewMeasurement) -> impl Future<Output = Result<()>> + Send;
}

/// Opens the pool, sets every session to `timezone`, and applies the schema.
///
/// Connection and migration errors are fatal to the worker. A session that
/// rejects the timezone is kept, since `waktu` is bound with its own offset.
pub async fn make_pool(database_url: &str, timezone: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let set_timezone = set_timezone_statement(timezone);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .after_connect(move |conn, _meta| {
            let statement = set_timezone.clone();
            Box::pin(async move {
                let result = conn.execute(statement.as_str()).await;
                session_timezone_applied(result, &statement);
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    let session_tz: String = sqlx::query_scalar("SELECT current_setting('TimeZone')")
        .fetch_one(&pool)
        .await?;
    info!("Database connection established, session timezone: {}", session_tz);
    if session_tz != timezone {
        warn!(
            "Session timezone is {} instead of {}, timestamps keep their +07:00 offset",
            session_tz, timezone
        );
    }

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

fn set_timezone_statement(timezone: &str) -> String {
    format!("SET TIME ZONE '{}'", timezone.replace('\'', "''"))
}

fn session_timezone_applied<T>(
    result: std::result::Result<T, sqlx::Error>,
    statement: &str,
) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("{} failed, keeping server default: {}", statement, e);
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MeasurementSink for PgSink {
    async fn insert(&self, row: &NewMeasurement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kelembapan_tanah (nilai, persen, mode, waktu)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(row.nilai)
        .bind(row.persen)
        .bind(row.mode.as_str())
        .bind(row.waktu)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
