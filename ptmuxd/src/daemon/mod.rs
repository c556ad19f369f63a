//! Daemon entry point: reads tuning config, binds the control transport,
//! installs the shutdown signal handler, and runs the accept loop.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::{info, instrument};

use crate::{config, registry::Registry, transport, user};

mod server;
mod signals;

pub use server::Server;

/// Exit codes the daemon process uses on startup failure, per the
/// documented contract: 0 normal, 2 endpoint already in use, 3 permission
/// denied, 4 unrecoverable I/O error.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const ADDR_IN_USE: i32 = 2;
    pub const PERMISSION_DENIED: i32 = 3;
    pub const IO_ERROR: i32 = 4;
}

/// Run the daemon in the foreground. If `PTMUX__INTERNAL__AUTODAEMONIZE` is
/// set (by a client's auto-spawn path), this forks into the background
/// first via `daemonize` before doing anything else.
#[instrument(skip_all)]
pub fn run(config_manager: config::Manager, socket_path: PathBuf) -> anyhow::Result<()> {
    if let Ok(flag) = std::env::var(crate::consts::AUTODAEMONIZE_VAR) {
        if flag == "true" {
            // Avoid looping if the daemonized child re-reads its own env.
            std::env::remove_var(crate::consts::AUTODAEMONIZE_VAR);
            let pid_file = socket_path.with_file_name("ptmuxd.pid");
            info!(?pid_file, "daemonizing");
            daemonize::Daemonize::new().pid_file(pid_file).start().context("daemonizing")?;
        }
    }

    info!("\n\n======================== STARTING PTMUXD ============================\n\n");

    let user_info = user::info().context("resolving invoking user")?;
    let registry = Arc::new(Registry::new(
        config_manager.get().history_bytes(),
        config_manager.get().queue_depth(),
        config_manager.get().slow_consumer_window(),
        user_info.default_shell,
    ));

    let listener = match transport::bind(&socket_path) {
        Ok(l) => l,
        Err(e) => {
            if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                match io_err.kind() {
                    std::io::ErrorKind::AddrInUse => std::process::exit(exit_code::ADDR_IN_USE),
                    std::io::ErrorKind::PermissionDenied => {
                        std::process::exit(exit_code::PERMISSION_DENIED)
                    }
                    _ => {}
                }
            }
            return Err(e).context("binding control socket");
        }
    };

    signals::Handler::new(Arc::clone(&registry), socket_path.clone()).spawn()?;

    let server = Arc::new(Server::new(registry, config_manager));
    let result = server.serve(listener);

    let _ = std::fs::remove_file(&socket_path);
    result
}
