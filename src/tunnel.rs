//! SSH local port forwarding.
//!
//! The tunnel is the system OpenSSH client running `ssh -N -L ...` as a child
//! process. Opening waits until the local end accepts TCP connections, so the
//! database connect that follows goes straight through. The child is killed
//! on [`SshTunnel::close`] and, failing that, when the handle is dropped.

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};

const SSH_PROGRAM: &str = "ssh";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// An open port forward. Keep it alive for as long as the database connection is in use.
#[derive(Debug)]
pub struct SshTunnel {
    child: Child,
    local_host: String,
    local_port: u16,
}

impl SshTunnel {
    pub async fn open(config: &TunnelConfig) -> Result<Self, TunnelError> {
        Self::open_with_program(SSH_PROGRAM, config).await
    }

    async fn open_with_program(program: &str, config: &TunnelConfig) -> Result<Self, TunnelError> {
        let local_port = match config.local_port {
            0 => reserve_local_port(&config.local_host)?,
            port => {
                ensure_port_free(&config.local_host, port)?;
                port
            }
        };

        log::info!(
            "opening tunnel {}:{} -> {}:{} via {}:{}",
            config.local_host,
            local_port,
            config.remote_host,
            config.remote_port,
            config.ssh_host,
            config.ssh_port
        );

        let mut child = Command::new(program)
            .args(ssh_args(config, local_port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::Spawn)?;

        wait_until_ready(&mut child, &config.local_host, local_port, config.ready_timeout).await?;

        log::info!("tunnel open: {}:{}", config.local_host, local_port);
        Ok(Self {
            child,
            local_host: config.local_host.clone(),
            local_port,
        })
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop the ssh client and wait for it to exit.
    pub async fn close(mut self) -> Result<(), TunnelError> {
        if self.child.try_wait().map_err(TunnelError::Process)?.is_none() {
            self.child.kill().await.map_err(TunnelError::Process)?;
        }
        log::info!("tunnel closed");
        Ok(())
    }
}

/// Arguments for a forward-only ssh session that fails instead of prompting.
pub fn ssh_args(config: &TunnelConfig, local_port: u16) -> Vec<String> {
    let mut args = vec![
        "-N".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=30".to_string(),
        "-p".to_string(),
        config.ssh_port.to_string(),
    ];

    if let Some(key) = &config.ssh_key {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }

    args.push("-L".to_string());
    args.push(format!(
        "{}:{}:{}:{}",
        config.local_host, local_port, config.remote_host, config.remote_port
    ));
    args.push(config.destination());
    args
}

/// Fail early when something else already listens on the fixed local port,
/// otherwise the readiness check would succeed against that listener.
fn ensure_port_free(host: &str, port: u16) -> Result<(), TunnelError> {
    TcpListener::bind((host, port)).map_err(TunnelError::LocalPort)?;
    Ok(())
}

/// Ask the OS for a free port on `host`. The listener is released before ssh binds it.
fn reserve_local_port(host: &str) -> Result<u16, TunnelError> {
    let listener = TcpListener::bind((host, 0)).map_err(TunnelError::LocalPort)?;
    let port = listener
        .local_addr()
        .map_err(TunnelError::LocalPort)?
        .port();
    Ok(port)
}

async fn wait_until_ready(
    child: &mut Child,
    host: &str,
    port: u16,
    ready_timeout: Duration,
) -> Result<(), TunnelError> {
    let deadline = Instant::now() + ready_timeout;

    loop {
        if let Some(status) = child.try_wait().map_err(TunnelError::Process)? {
            let stderr = read_stderr(child).await;
            return Err(TunnelError::Exited { status, stderr });
        }

        if let Ok(Ok(_)) = timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect((host, port))).await {
            // ssh may have given up on the forward while the connect was in flight.
            if let Some(status) = child.try_wait().map_err(TunnelError::Process)? {
                let stderr = read_stderr(child).await;
                return Err(TunnelError::Exited { status, stderr });
            }
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(TunnelError::NotReady {
                endpoint: format!("{host}:{port}"),
                timeout: ready_timeout,
            });
        }

        sleep(READY_POLL_INTERVAL).await;
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut output = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        if let Err(err) = stderr.read_to_string(&mut output).await {
            log::debug!("could not read ssh stderr: {}", err);
        }
    }
    output.trim().to_string()
}
