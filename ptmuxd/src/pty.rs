//! PTY Child: an OS process bound to a pseudo-terminal, with a background
//! reader loop and a watcher thread that reports its exit.

use std::{ffi::OsString, os::unix::process::CommandExt, path::PathBuf, process, thread};

use anyhow::{anyhow, Context};
use crossbeam_channel::{Receiver, Sender};
use tracing::{info, instrument, warn};

use crate::{consts, exit_notify::ExitNotifier};

nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

/// Parameters needed to spawn a PTY-bound child process.
pub struct SpawnParams {
    pub argv: Vec<String>,
    pub env: Vec<(OsString, OsString)>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

/// A running (or just-exited) PTY-bound child process.
///
/// `fork` is the sole owner of the pty master fd for close-on-drop
/// purposes; `master_fd` is a plain copy of the same fd used for the raw
/// reads/writes/ioctls below, since `shpool_pty::fork::Fork` does not let
/// multiple owners borrow its `Master` concurrently across threads.
pub struct PtyChild {
    #[allow(dead_code)]
    fork: shpool_pty::fork::Fork,
    master_fd: libc::c_int,
    child_pid: libc::pid_t,
    pub exit_notifier: std::sync::Arc<ExitNotifier>,
    pub output_rx: Receiver<Vec<u8>>,
}

// Safety: master_fd is a plain kernel fd; `read`/`write`/ioctl on it from
// multiple threads is exactly what the kernel pty driver is built to
// support, and `fork` is only ever touched by the owning PtyChild to
// close it on drop.
unsafe impl Send for PtyChild {}
unsafe impl Sync for PtyChild {}

impl PtyChild {
    /// Fork a child bound to a fresh PTY and exec `argv[0]` in it. Returns
    /// once the child has been forked and the reader/watcher threads have
    /// started; a failed exec surfaces as an early, abnormal exit rather
    /// than a synchronous error, since the child has already diverged from
    /// the parent by the time `execvp` is attempted.
    #[instrument(skip(params), fields(argv0 = %params.argv.first().map(String::as_str).unwrap_or("")))]
    pub fn spawn(params: SpawnParams) -> anyhow::Result<Self> {
        let SpawnParams { argv, env, cwd, cols, rows } = params;
        let argv0 = argv.first().cloned().ok_or_else(|| anyhow!("empty argv"))?;

        let mut cmd = process::Command::new(&argv0);
        cmd.args(&argv[1..])
            .current_dir(&cwd)
            .stdin(process::Stdio::inherit())
            .stdout(process::Stdio::inherit())
            .stderr(process::Stdio::inherit())
            .env_clear()
            .envs(env);

        let fork = shpool_pty::fork::Fork::from_ptmx().context("forking pty")?;
        if fork.is_child().is_ok() {
            let open_max = nix::unistd::sysconf(nix::unistd::SysconfVar::OPEN_MAX)
                .ok()
                .flatten()
                .unwrap_or(1024) as i32;
            for fd in 3..open_max {
                let _ = nix::unistd::close(fd);
            }
            let err = cmd.exec();
            eprintln!("exec failed: {err:?}");
            process::exit(127);
        }

        let child_pid = fork.child_pid().ok_or_else(|| anyhow!("missing child pid"))?;
        let master_fd = master_fd_of(&fork)?;

        set_winsize(master_fd, cols, rows).context("setting initial pty size")?;

        let exit_notifier = std::sync::Arc::new(ExitNotifier::new());
        spawn_waitpid_thread(child_pid, std::sync::Arc::clone(&exit_notifier));

        let (output_tx, output_rx) = crossbeam_channel::bounded(256);
        spawn_reader_thread(master_fd, output_tx, std::sync::Arc::clone(&exit_notifier));

        Ok(PtyChild { fork, master_fd, child_pid, exit_notifier, output_rx })
    }

    pub fn child_pid(&self) -> libc::pid_t {
        self.child_pid
    }

    /// Write bytes to the child's stdin. Blocks only if the kernel's pty
    /// buffer is full.
    pub fn write(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut off = 0;
        while off < bytes.len() {
            // Safety: master_fd is open for the lifetime of this PtyChild.
            let n = unsafe {
                libc::write(
                    self.master_fd,
                    bytes[off..].as_ptr() as *const libc::c_void,
                    bytes.len() - off,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(anyhow::Error::from(err)).context("writing to pty master");
            }
            off += n as usize;
        }
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        set_winsize(self.master_fd, cols, rows)
    }

    /// Send `signal` (default SIGHUP) to the child, escalating to SIGKILL
    /// after `SESSION_KILL_GRACE` if it hasn't exited by then.
    pub fn kill(&self, signal: Option<libc::c_int>) -> anyhow::Result<()> {
        let sig = signal.unwrap_or(libc::SIGHUP);
        send_signal(self.child_pid, sig)?;
        let notifier = std::sync::Arc::clone(&self.exit_notifier);
        let pid = self.child_pid;
        thread::spawn(move || {
            if notifier.wait(Some(consts::SESSION_KILL_GRACE)).is_none() {
                warn!("pid {} did not exit after grace period, sending SIGKILL", pid);
                if let Err(e) = send_signal(pid, libc::SIGKILL) {
                    warn!("error sending SIGKILL to {}: {:?}", pid, e);
                }
            }
        });
        Ok(())
    }
}

fn master_fd_of(fork: &shpool_pty::fork::Fork) -> anyhow::Result<libc::c_int> {
    match fork {
        shpool_pty::fork::Fork::Parent(_, master) => {
            master.raw_fd().ok_or_else(|| anyhow!("pty master has no fd"))
        }
        shpool_pty::fork::Fork::Child(_) => Err(anyhow!("no master fd on the child side")),
    }
}

fn send_signal(pid: libc::pid_t, sig: libc::c_int) -> anyhow::Result<()> {
    // Safety: pid is a process we forked ourselves, and sig is a valid signal number.
    let ret = unsafe { libc::kill(pid, sig) };
    if ret == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(()); // already gone
        }
        return Err(anyhow::Error::from(err)).context("sending signal to child");
    }
    Ok(())
}

fn set_winsize(fd: libc::c_int, cols: u16, rows: u16) -> anyhow::Result<()> {
    let winsz = libc::winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
    // Safety: winsz is stack allocated and fd is a live pty master.
    unsafe {
        tiocswinsz(fd, &winsz).context("TIOCSWINSZ")?;
    }
    Ok(())
}

fn spawn_waitpid_thread(pid: libc::pid_t, notifier: std::sync::Arc<ExitNotifier>) {
    thread::spawn(move || {
        let mut status: libc::c_int = 0;
        loop {
            // Safety: pid is valid until this call returns for it.
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            match ret {
                0 => continue,
                -1 => {
                    notifier.notify_exit(1);
                    break;
                }
                _ => {
                    // Safety: status was just populated by waitpid above.
                    let code = unsafe {
                        if libc::WIFEXITED(status) {
                            libc::WEXITSTATUS(status)
                        } else if libc::WIFSIGNALED(status) {
                            128 + libc::WTERMSIG(status)
                        } else {
                            1
                        }
                    };
                    info!("pid {} exited with code {}", pid, code);
                    notifier.notify_exit(code);
                    break;
                }
            }
        }
    });
}

fn spawn_reader_thread(
    fd: libc::c_int,
    output_tx: Sender<Vec<u8>>,
    exit_notifier: std::sync::Arc<ExitNotifier>,
) {
    thread::spawn(move || {
        let mut buf = vec![0u8; consts::PTY_READ_BUF_SIZE];
        loop {
            // Safety: fd outlives this thread; the owning PtyChild only
            // closes it after this thread has observed an exit or EOF.
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            match n {
                0 => break,
                n if n < 0 => {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    break;
                }
                n => {
                    if output_tx.send(buf[..n as usize].to_vec()).is_err() {
                        break;
                    }
                    if exit_notifier.poll().is_some() {
                        break;
                    }
                }
            }
        }
    });
}
