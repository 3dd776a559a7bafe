//! Disposable PostgreSQL databases for integration tests.

use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use testcontainers::{GenericImage, ImageExt, core::WaitFor};
use testcontainers_modules::testcontainers::{
    ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TestDatabaseError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("container error: {0}")]
    Container(#[from] TestcontainersError),
}

/// A fresh database inside a throwaway pgvector container.
pub struct TestDatabase {
    pool: PgPool,
    database_url: String,
    _container: ContainerAsync<GenericImage>,
}

impl TestDatabase {
    pub async fn new() -> Result<Self, TestDatabaseError> {
        let container = GenericImage::new("pgvector/pgvector", "pg16")
            .with_wait_for(WaitFor::message_on_stdout(
                "database system is ready to accept connections",
            ))
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_DB", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;
        let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let admin_options: PgConnectOptions = admin_url.parse()?;
        let admin_options = admin_options.log_statements(LevelFilter::Off);
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(admin_options.clone())
            .await?;

        let database_name = format!("embeddings_{}", Uuid::new_v4().simple());
        let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", database_name);
        sqlx::query(&create_sql).execute(&admin_pool).await?;
        admin_pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(admin_options.database(&database_name))
            .await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            database_url: format!(
                "postgres://postgres:postgres@{}:{}/{}",
                host, port, database_name
            ),
            _container: container,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Create `table (word text primary key, embedding vector(dimensions))`.
    pub async fn create_words_table(
        &self,
        table: &str,
        dimensions: usize,
    ) -> Result<(), TestDatabaseError> {
        let sql = format!(
            "CREATE TABLE {} (word TEXT PRIMARY KEY, embedding vector({}) NOT NULL)",
            table, dimensions
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64, TestDatabaseError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
