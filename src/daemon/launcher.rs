use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Result, TelegramMcpError};
use crate::ipc::client::IpcClient;

/// Polling interval while waiting for the daemon socket to appear.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Maximum time to wait for a cold daemon start.
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe whether a daemon is accepting connections on `socket_path`.
///
/// A connect-then-disconnect; any connection failure means "not running".
/// Never errors out to the caller.
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    match IpcClient::connect(socket_path).await {
        Ok(client) => {
            client.disconnect();
            true
        }
        Err(_) => false,
    }
}

/// Spawn the daemon as a detached background process, then wait for its
/// socket to appear.
pub async fn launch_daemon(socket_path: &Path, project_root: &Path) -> Result<()> {
    let exe = std::env::current_exe()?;
    tracing::info!(daemon = %exe.display(), "spawning daemon process");

    let mut command = Command::new(exe);
    command
        .arg("daemon")
        .arg("--project-root")
        .arg(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    detach(&mut command);

    let child = command.spawn().map_err(|e| TelegramMcpError::DaemonSpawn {
        reason: e.to_string(),
    })?;
    tracing::info!(pid = child.id(), "daemon spawned");
    // Not waited on: the daemon outlives this process.
    drop(child);

    wait_for_socket(socket_path).await
}

/// Ensure a daemon is listening: probe first, spawn only if absent, so
/// repeated adapter startups are idempotent and cheap when warm.
pub async fn ensure_daemon(socket_path: &Path, project_root: &Path) -> Result<()> {
    if is_daemon_running(socket_path).await {
        tracing::debug!("daemon already running");
        return Ok(());
    }
    tracing::info!("daemon not running, launching");
    launch_daemon(socket_path, project_root).await?;
    tracing::info!("daemon ready");
    Ok(())
}

/// Poll for the socket file, bounded by the startup timeout. The daemon
/// binds the socket as its last startup step, so existence means ready.
async fn wait_for_socket(socket_path: &Path) -> Result<()> {
    let start = std::time::Instant::now();
    while start.elapsed() < START_TIMEOUT {
        if socket_path.exists() {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(TelegramMcpError::DaemonStartTimeout {
        path: socket_path.to_path_buf(),
        waited_ms: START_TIMEOUT.as_millis() as u64,
    })
}

/// Put the child in its own process group so it survives the adapter's
/// terminal closing.
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}
