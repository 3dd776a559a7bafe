use crate::error::ConfigError;
use regex::Regex;
use std::env;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Bare or schema-qualified SQL identifier. Names are interpolated into the
/// insert statement, so nothing else is accepted.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern compiles")
});

/// Column types additionally allow a type modifier and an array marker,
/// e.g. `vector(300)` or `real[]`.
static TYPE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?(\(\d+\))?(\[\])?$")
        .expect("type pattern compiles")
});

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key)
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_u64(key, default_millis))
}

/// Where records end up: the database and the shape of the target table.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub database_url: String,
    pub table: String,
    pub key_column: String,
    pub vector_column: String,
    /// Type the bracketed vector text is cast to on insert (`vector` for pgvector).
    pub vector_type: String,
}

impl TargetConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL", "postgres://postgres@localhost:5432/postgres"),
            table: env_string("EMBEDDINGS_TABLE", "words"),
            key_column: env_string("EMBEDDINGS_KEY_COLUMN", "word"),
            vector_column: env_string("EMBEDDINGS_VECTOR_COLUMN", "embedding"),
            vector_type: env_string("EMBEDDINGS_VECTOR_TYPE", "vector"),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("database url"));
        }
        for (field, value) in [
            ("table", &self.table),
            ("key column", &self.key_column),
            ("vector column", &self.vector_column),
        ] {
            if !IDENTIFIER.is_match(value) {
                return Err(ConfigError::InvalidIdentifier {
                    field,
                    value: value.clone(),
                });
            }
        }
        if !TYPE_NAME.is_match(&self.vector_type) {
            return Err(ConfigError::InvalidIdentifier {
                field: "vector type",
                value: self.vector_type.clone(),
            });
        }
        Ok(())
    }
}

/// SSH local port forward to the database host.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_key: Option<PathBuf>,
    /// Address the database listens on, as seen from the SSH host.
    pub remote_host: String,
    pub remote_port: u16,
    pub local_host: String,
    /// `0` picks a free port at open time.
    pub local_port: u16,
    pub ready_timeout: Duration,
}

impl TunnelConfig {
    /// Returns `None` when `SSH_HOST` is unset, meaning the database is reached directly.
    pub fn from_env() -> Option<Self> {
        let ssh_host = env_opt("SSH_HOST")?;
        Some(Self {
            ssh_host,
            ssh_port: env_u16("SSH_PORT", 22),
            ssh_user: env_string("SSH_USER", "ec2-user"),
            ssh_key: env_opt("SSH_KEY").map(PathBuf::from),
            remote_host: env_string("SSH_REMOTE_HOST", "127.0.0.1"),
            remote_port: env_u16("SSH_REMOTE_PORT", 5432),
            local_host: env_string("SSH_LOCAL_HOST", "localhost"),
            local_port: env_u16("SSH_LOCAL_PORT", 6543),
            ready_timeout: env_duration_millis("SSH_READY_TIMEOUT_MS", 15_000),
        })
    }

    pub fn with_host(ssh_host: impl Into<String>) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            ssh_port: 22,
            ssh_user: "ec2-user".to_string(),
            ssh_key: None,
            remote_host: "127.0.0.1".to_string(),
            remote_port: 5432,
            local_host: "localhost".to_string(),
            local_port: 6543,
            ready_timeout: Duration::from_secs(15),
        }
    }

    /// `user@host` destination argument for the ssh client.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.ssh_user, self.ssh_host)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh_host.trim().is_empty() {
            return Err(ConfigError::Missing("ssh host"));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(ConfigError::Missing("ssh user"));
        }
        if self.remote_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote port",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything one loader run needs. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub source: PathBuf,
    /// Expected vector dimensionality; a valid line has exactly `dimensions + 1` tokens.
    pub dimensions: usize,
    /// Lines per flush boundary.
    pub batch_size: usize,
    /// Index assigned to the first line of the source.
    pub skip_rows: u64,
    pub target: TargetConfig,
    pub tunnel: Option<TunnelConfig>,
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self {
            source: PathBuf::from(env_string("EMBEDDINGS_FILE", "glove.840B.300d.txt")),
            dimensions: env_usize("EMBEDDINGS_DIM", 300),
            batch_size: env_usize("EMBEDDINGS_BATCH_SIZE", 10_000),
            skip_rows: env_u64("EMBEDDINGS_SKIP_ROWS", 1),
            target: TargetConfig::from_env(),
            tunnel: TunnelConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dimensions",
                reason: "must be at least 1".to_string(),
            });
        }
        // A line needs dimensions + 1 tokens.
        if self.dimensions == usize::MAX {
            return Err(ConfigError::InvalidValue {
                field: "dimensions",
                reason: "too large".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.source.as_os_str().is_empty() {
            return Err(ConfigError::Missing("source path"));
        }
        self.target.validate()?;
        if let Some(tunnel) = &self.tunnel {
            tunnel.validate()?;
        }
        Ok(())
    }
}
