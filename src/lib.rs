//! Bulk loader for plain-text word embeddings.
//!
//! Streams a GloVe-style file (`word v1 v2 ... vD` per line) into a
//! PostgreSQL table in fixed-size batches, optionally through an SSH tunnel.
//! Each batch is one `INSERT ... ON CONFLICT DO NOTHING` in its own
//! transaction, so an interrupted run leaves every earlier batch committed
//! and a re-run only adds the missing rows.

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod record;
pub mod sink;
pub mod test_support;
pub mod tunnel;

pub use batch::{LoadStats, LoaderState};
pub use config::{LoaderConfig, TargetConfig, TunnelConfig};
pub use error::{ConnectError, LoadError, LookupError};
pub use loader::BatchLoader;
pub use record::Record;

use crate::db::Session;
use crate::sink::PgSink;
use sqlx::PgConnection;

/// Options that change what happens around the load, not the load itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run `ANALYZE` on the target table after a successful load.
    pub analyze: bool,
}

/// Open the tunnel and connection, load `config.source`, then release both.
pub async fn load(config: &LoaderConfig, options: RunOptions) -> Result<LoadStats, LoadError> {
    config.validate()?;

    let mut session = Session::open(&config.target, config.tunnel.as_ref()).await?;
    let result = load_with_connection(config, options, session.connection()).await;
    session.close().await;
    result
}

async fn load_with_connection(
    config: &LoaderConfig,
    options: RunOptions,
    conn: &mut PgConnection,
) -> Result<LoadStats, LoadError> {
    let stats = {
        let mut loader = BatchLoader::new(config, PgSink::new(&mut *conn, &config.target));
        match loader.load_file(&config.source).await {
            Ok(stats) => stats,
            Err(err) => {
                let stats = loader.stats();
                log::error!(
                    "run aborted after {} lines: {} rows committed in {} batches, {} malformed",
                    stats.lines_read,
                    stats.inserted,
                    stats.batches,
                    stats.malformed
                );
                return Err(err);
            }
        }
    };

    if options.analyze {
        db::analyze_table(conn, &config.target.table).await?;
    }

    Ok(stats)
}

/// Fetch the stored vector for `word`.
pub async fn lookup(
    target: &TargetConfig,
    tunnel: Option<&TunnelConfig>,
    word: &str,
) -> Result<Vec<f32>, LookupError> {
    target.validate()?;
    if let Some(tunnel) = tunnel {
        tunnel.validate()?;
    }

    let mut session = Session::open(target, tunnel).await?;
    let result = db::lookup_embedding(session.connection(), target, word).await;
    session.close().await;
    result
}
