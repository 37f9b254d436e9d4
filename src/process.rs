use crate::settings::Settings;
use serde::Serialize;
use std::time::Duration;

/// Grace period between stopping the server and starting it again, so the OS
/// can reclaim the process and its listen sockets.
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of the server process. Never cached; every query
/// re-reads the process table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Status {
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{0} is already running")]
    AlreadyRunning(String),
    #[error("{0} is not running")]
    NotRunning(String),
    #[error("{0} is running but its PID could not be determined")]
    PidUnknown(String),
    #[error("failed to signal pid {pid}: {detail}")]
    Signal { pid: u32, detail: String },
    #[error("'{command}' failed: {detail}")]
    Subprocess { command: String, detail: String },
}

// ---------------------------------------------------------------------------
// Process-table queries
// ---------------------------------------------------------------------------

fn first_pid(pgrep_stdout: &str) -> Option<u32> {
    pgrep_stdout.lines().next()?.trim().parse().ok()
}

/// Look the server up in the process table. `-x` matches the process name
/// exactly, so this tool's own process can never shadow the server.
pub async fn status(settings: &Settings) -> Status {
    let output = match tokio::process::Command::new("pgrep")
        .args(["-x", &settings.process_name])
        .output()
        .await
    {
        Ok(output) => output,
        Err(_) => return Status::default(),
    };

    if !output.status.success() {
        return Status::default();
    }

    let pid = first_pid(&String::from_utf8_lossy(&output.stdout));
    let uptime = match pid {
        Some(pid) => read_uptime(pid).await,
        None => None,
    };

    Status {
        is_running: true,
        pid,
        uptime,
    }
}

/// Elapsed time of a PID via `ps -o etime=`. Best-effort; `None` on any
/// failure.
async fn read_uptime(pid: u32) -> Option<String> {
    let output = tokio::process::Command::new("ps")
        .args(["-o", "etime=", "-p", &pid.to_string()])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let uptime = text.trim();
    if uptime.is_empty() {
        None
    } else {
        Some(uptime.to_string())
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn guard_not_running(status: &Status, name: &str) -> Result<(), ControlError> {
    if status.is_running {
        Err(ControlError::AlreadyRunning(name.to_string()))
    } else {
        Ok(())
    }
}

fn stoppable_pid(status: &Status, name: &str) -> Result<u32, ControlError> {
    if !status.is_running {
        return Err(ControlError::NotRunning(name.to_string()));
    }
    status
        .pid
        .ok_or_else(|| ControlError::PidUnknown(name.to_string()))
}

// ---------------------------------------------------------------------------
// Lifecycle operations
// ---------------------------------------------------------------------------

/// Launch the server, pointing it at the saved configuration when that file
/// exists. The returned message says which of the two happened.
pub async fn start(settings: &Settings) -> Result<String, ControlError> {
    guard_not_running(&status(settings).await, &settings.process_name)?;

    let bin = settings.resolve_binary();
    let with_config = settings.config_file.exists();

    let mut cmd = tokio::process::Command::new(&bin);
    cmd.arg("start");
    if with_config {
        cmd.arg("--config").arg(&settings.config_file);
    }

    run_checked(cmd, &format!("{} start", bin.display())).await?;

    if with_config {
        Ok(format!("{} started with saved config", settings.process_name))
    } else {
        Ok(format!("{} started (no config found)", settings.process_name))
    }
}

/// Stop the server with SIGTERM to its PID. The admin API is assumed disabled,
/// so signal delivery is the only stop path.
pub async fn stop(settings: &Settings) -> Result<String, ControlError> {
    let pid = stoppable_pid(&status(settings).await, &settings.process_name)?;

    send_terminate(pid).map_err(|e| ControlError::Signal {
        pid,
        detail: e.to_string(),
    })?;

    Ok(format!("{} stopped (pid {pid})", settings.process_name))
}

/// Stop, give the OS a moment, then start again so the server re-reads its
/// configuration. A server that is not running is simply started. The first
/// failing step aborts the sequence.
pub async fn restart(settings: &Settings) -> Result<String, ControlError> {
    if !status(settings).await.is_running {
        return start(settings).await;
    }

    stop(settings).await?;
    tokio::time::sleep(RESTART_DELAY).await;
    start(settings).await?;

    Ok(format!("{} restarted", settings.process_name))
}

async fn run_checked(
    mut cmd: tokio::process::Command,
    command: &str,
) -> Result<(), ControlError> {
    let output = cmd.output().await.map_err(|e| ControlError::Subprocess {
        command: command.to_string(),
        detail: e.to_string(),
    })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = match stderr.trim() {
        "" => format!("exited with {}", output.status),
        msg => msg.to_string(),
    };
    Err(ControlError::Subprocess {
        command: command.to_string(),
        detail,
    })
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> std::io::Result<()> {
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGTERM,
    )
    .map_err(std::io::Error::other)
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::other(
        "signal-based stop is only supported on unix",
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
