use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;

use embeddings_loader::{LoaderConfig, RunOptions, TunnelConfig};

#[derive(Parser, Debug)]
#[command(
    name = "load_embeddings",
    about = "Bulk-load a plain-text word embedding file into PostgreSQL"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream an embedding file into the target table
    Load(LoadArgs),
    /// Print the stored vector for one word
    Lookup(LookupArgs),
}

/// Connection settings shared by every subcommand. Unset flags fall back to
/// the environment (`DATABASE_URL`, `SSH_HOST`, ...).
#[derive(Args, Debug)]
struct ConnectionArgs {
    /// PostgreSQL connection URL; host and port are replaced by the tunnel endpoint
    #[arg(long)]
    database_url: Option<String>,
    /// Target table
    #[arg(long)]
    table: Option<String>,
    /// Unique key column
    #[arg(long)]
    key_column: Option<String>,
    /// Vector column
    #[arg(long)]
    vector_column: Option<String>,
    /// Type the vector literal is cast to on insert
    #[arg(long)]
    vector_type: Option<String>,
    /// SSH host to tunnel through
    #[arg(long)]
    ssh_host: Option<String>,
    /// SSH port
    #[arg(long)]
    ssh_port: Option<u16>,
    /// SSH user
    #[arg(long)]
    ssh_user: Option<String>,
    /// Private key used for SSH authentication
    #[arg(long)]
    ssh_key: Option<PathBuf>,
    /// Database host as seen from the SSH host
    #[arg(long)]
    remote_host: Option<String>,
    /// Database port as seen from the SSH host
    #[arg(long)]
    remote_port: Option<u16>,
    /// Local port for the forward (0 picks a free one)
    #[arg(long)]
    local_port: Option<u16>,
    /// Connect directly even if SSH_HOST is set
    #[arg(long)]
    no_tunnel: bool,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Embedding file, one `word v1 ... vD` record per line
    #[arg(long)]
    file: Option<PathBuf>,
    /// Vector dimensionality D
    #[arg(long)]
    dimensions: Option<usize>,
    /// Lines per committed batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Index given to the first line
    #[arg(long)]
    skip_rows: Option<u64>,
    /// Run ANALYZE on the table after loading
    #[arg(long)]
    analyze: bool,
    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args, Debug)]
struct LookupArgs {
    /// Word to look up
    word: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

impl ConnectionArgs {
    fn apply(self, config: &mut LoaderConfig) {
        let target = &mut config.target;
        if let Some(url) = self.database_url {
            target.database_url = url;
        }
        if let Some(table) = self.table {
            target.table = table;
        }
        if let Some(column) = self.key_column {
            target.key_column = column;
        }
        if let Some(column) = self.vector_column {
            target.vector_column = column;
        }
        if let Some(vector_type) = self.vector_type {
            target.vector_type = vector_type;
        }

        if self.no_tunnel {
            config.tunnel = None;
            return;
        }

        let mut tunnel = match (config.tunnel.take(), self.ssh_host) {
            (Some(mut tunnel), Some(host)) => {
                tunnel.ssh_host = host;
                tunnel
            }
            (Some(tunnel), None) => tunnel,
            (None, Some(host)) => TunnelConfig::with_host(host),
            (None, None) => return,
        };
        if let Some(port) = self.ssh_port {
            tunnel.ssh_port = port;
        }
        if let Some(user) = self.ssh_user {
            tunnel.ssh_user = user;
        }
        if let Some(key) = self.ssh_key {
            tunnel.ssh_key = Some(key);
        }
        if let Some(host) = self.remote_host {
            tunnel.remote_host = host;
        }
        if let Some(port) = self.remote_port {
            tunnel.remote_port = port;
        }
        if let Some(port) = self.local_port {
            tunnel.local_port = port;
        }
        config.tunnel = Some(tunnel);
    }
}

impl LoadArgs {
    fn into_config(self) -> (LoaderConfig, RunOptions) {
        let mut config = LoaderConfig::from_env();
        if let Some(file) = self.file {
            config.source = file;
        }
        if let Some(dimensions) = self.dimensions {
            config.dimensions = dimensions;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(skip_rows) = self.skip_rows {
            config.skip_rows = skip_rows;
        }
        self.connection.apply(&mut config);

        let options = RunOptions {
            analyze: self.analyze,
        };
        (config, options)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Load(args) => {
            let json = args.json;
            let (config, options) = args.into_config();
            let started = Instant::now();

            match embeddings_loader::load(&config, options).await {
                Ok(stats) => {
                    log::info!("load finished in {:.1?}", started.elapsed());
                    if json {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    } else {
                        println!("{stats}");
                    }
                    println!("All done!");
                }
                Err(err) => {
                    writeln!(io::stderr(), "error: {err}")?;
                    std::process::exit(1);
                }
            }
        }
        Command::Lookup(args) => {
            let mut config = LoaderConfig::from_env();
            args.connection.apply(&mut config);

            match embeddings_loader::lookup(&config.target, config.tunnel.as_ref(), &args.word)
                .await
            {
                Ok(vector) => {
                    println!("{} ({} dimensions)", args.word, vector.len());
                    println!("{vector:?}");
                }
                Err(err) => {
                    writeln!(io::stderr(), "error: {err}")?;
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
