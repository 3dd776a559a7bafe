use crate::config::{TargetConfig, TunnelConfig};
use crate::error::{ConnectError, LookupError};
use crate::record::parse_pgvector;
use crate::tunnel::SshTunnel;
use log::LevelFilter;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};

/// Connect options for `target`, rerouted to the tunnel's local end when one is open.
pub fn connect_options(
    target: &TargetConfig,
    tunnel: Option<&SshTunnel>,
) -> Result<PgConnectOptions, ConnectError> {
    let options: PgConnectOptions = target.database_url.parse()?;
    let options = match tunnel {
        Some(tunnel) => options.host(tunnel.local_host()).port(tunnel.local_port()),
        None => options,
    };
    Ok(options.log_statements(LevelFilter::Off))
}

/// A database connection and the tunnel it runs through.
///
/// Field order matters: the connection is dropped before the tunnel.
pub struct Session {
    conn: PgConnection,
    tunnel: Option<SshTunnel>,
}

impl Session {
    pub async fn open(
        target: &TargetConfig,
        tunnel: Option<&TunnelConfig>,
    ) -> Result<Self, ConnectError> {
        let tunnel = match tunnel {
            Some(config) => Some(SshTunnel::open(config).await?),
            None => None,
        };

        let options = connect_options(target, tunnel.as_ref())?;
        let conn = options.connect().await?;
        log::info!(
            "connected to database {}",
            options.get_database().unwrap_or("(default)")
        );

        Ok(Self { conn, tunnel })
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Close the connection, then the tunnel. Failures here are logged only.
    pub async fn close(self) {
        if let Err(err) = self.conn.close().await {
            log::warn!("failed to close database connection cleanly: {}", err);
        }
        if let Some(tunnel) = self.tunnel {
            if let Err(err) = tunnel.close().await {
                log::warn!("failed to close tunnel cleanly: {}", err);
            }
        }
    }
}

/// Refresh planner statistics after a bulk load.
pub async fn analyze_table(conn: &mut PgConnection, table: &str) -> Result<(), sqlx::Error> {
    log::info!("running ANALYZE on table: {}", table);
    let query = format!("ANALYZE {}", table);
    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

/// Fetch the stored vector for `key`.
pub async fn lookup_embedding(
    conn: &mut PgConnection,
    target: &TargetConfig,
    key: &str,
) -> Result<Vec<f32>, LookupError> {
    let query = format!(
        "SELECT {vector}::text FROM {table} WHERE {key_column} = $1 LIMIT 1",
        vector = target.vector_column,
        table = target.table,
        key_column = target.key_column,
    );

    let row: Option<(String,)> = sqlx::query_as(&query)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some((text,)) => parse_pgvector(&text),
        None => Err(LookupError::NotFound(format!("word {key:?}"))),
    }
}
