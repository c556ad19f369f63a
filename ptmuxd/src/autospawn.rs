//! Client-side helper that forks a detached daemon when the control socket
//! has nobody listening on it. It re-execs the caller's own binary with a
//! `daemon` subcommand and a sentinel env var, then polls the socket with
//! exponential backoff.

use std::{
    ffi::OsStr,
    os::unix::net::UnixStream,
    path::Path,
    process, thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use tracing::info;

use crate::consts;

/// Check whether a daemon is already listening on `socket_path`, and if
/// not, fork `front_end_bin daemon --socket <path> --log-file <path>` as a
/// detached background process and wait up to `timeout` for the socket to
/// come up.
pub fn maybe_fork_daemon<B: AsRef<OsStr>>(
    front_end_bin: B,
    socket_path: &Path,
    timeout: Duration,
) -> anyhow::Result<()> {
    if UnixStream::connect(socket_path).is_ok() {
        info!(?socket_path, "daemon already running, no need to autospawn");
        return Ok(());
    }
    info!(?socket_path, "no daemon listening, autospawning");

    let log_file = socket_path.with_file_name("ptmuxd.log");
    process::Command::new(front_end_bin)
        .arg("--socket")
        .arg(socket_path.as_os_str())
        .arg("--log-file")
        .arg(&log_file)
        .arg("daemon")
        .env(consts::AUTODAEMONIZE_VAR, "true")
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .spawn()
        .context("launching background daemon")?;
    info!("launched background daemon, waiting for control socket");

    let deadline = Instant::now() + timeout;
    let mut sleep_ms = 10;
    loop {
        if UnixStream::connect(socket_path).is_ok() {
            info!("connected to freshly launched background daemon");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "daemonizing: launched daemon, but control socket never came up within {:?}",
                timeout
            ));
        }
        thread::sleep(Duration::from_millis(sleep_ms));
        sleep_ms = (sleep_ms * 2).min(500);
    }
}
