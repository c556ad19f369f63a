// Shared helpers for the integration tests below. Each test file pulls
// this in with `mod support;`; not every test uses every helper.
#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use ptmuxd::client::Client;
use tempfile::TempDir;

pub fn ptmux_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ptmux"))
}

/// A `ptmux daemon` subprocess bound to a throwaway socket in a temp dir.
/// Killed on drop.
pub struct DaemonProc {
    proc: Child,
    _tmp_dir: TempDir,
    pub socket_path: PathBuf,
    pub log_file: PathBuf,
}

impl DaemonProc {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(None)
    }

    pub fn with_config(config_file: Option<&Path>) -> anyhow::Result<Self> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("ptmux-test")
            .rand_bytes(16)
            .tempdir()
            .context("creating tmp dir")?;
        let socket_path = tmp_dir.path().join("mux.sock");
        let log_file = tmp_dir.path().join("daemon.log");

        let mut cmd = Command::new(ptmux_bin());
        cmd.arg("--socket")
            .arg(&socket_path)
            .arg("--log-file")
            .arg(&log_file)
            .arg("-v");
        if let Some(cfg) = config_file {
            cmd.arg("--config-file").arg(cfg);
        }
        cmd.arg("daemon");
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let proc = cmd.spawn().context("spawning daemon process")?;

        wait_for_socket(&socket_path).context("waiting for daemon control socket")?;

        Ok(DaemonProc { proc, _tmp_dir: tmp_dir, socket_path, log_file })
    }

    /// Open a fresh client library connection to this daemon. Never
    /// auto-spawns; fails if the daemon has already gone away.
    pub fn client(&self) -> anyhow::Result<Client> {
        Client::connect_existing(&self.socket_path)
    }
}

impl Drop for DaemonProc {
    fn drop(&mut self) {
        let _ = self.proc.kill();
        let _ = self.proc.wait();
    }
}

fn wait_for_socket(path: &Path) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut sleep_ms = 5;
    loop {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("daemon never bound its control socket at {:?}", path));
        }
        std::thread::sleep(Duration::from_millis(sleep_ms));
        sleep_ms = (sleep_ms * 2).min(200);
    }
}

/// Poll `f` until it returns `Some`, panicking if `timeout` elapses first.
/// Used in place of a fixed sleep wherever a test needs to wait on an
/// asynchronous effect (PTY output reaching the Ring History, a session
/// transitioning to exited, etc).
pub fn wait_for<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = f() {
            return v;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for condition");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Low-level protocol helpers for tests that need to drive the wire format
/// directly rather than through the client library -- e.g. to exercise a
/// disconnect without the library's own reconnect logic kicking in, or to
/// send a deliberately malformed frame.
pub mod raw {
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    use anyhow::Context;
    use ptmuxd::protocol::{codec, Request, RequestOp, Response, DEFAULT_MAX_FRAME_BYTES};

    pub fn connect(socket_path: &Path) -> anyhow::Result<UnixStream> {
        UnixStream::connect(socket_path).context("connecting raw control stream")
    }

    pub fn request(
        stream: &mut UnixStream,
        request_id: u64,
        op: RequestOp,
    ) -> anyhow::Result<Response> {
        let req = Request { request_id, op, timeout_ms: None };
        codec::write_control(stream, &req)?;
        let header = codec::read_frame_header(stream, DEFAULT_MAX_FRAME_BYTES)?;
        codec::read_control_body(stream, header)
    }

    pub fn read_binary(stream: &mut UnixStream, expected_len: u32) -> anyhow::Result<Vec<u8>> {
        let header = codec::read_frame_header(stream, DEFAULT_MAX_FRAME_BYTES)?;
        anyhow::ensure!(header.payload_len == expected_len, "unexpected binary frame length");
        codec::read_binary_body(stream, header)
    }
}
