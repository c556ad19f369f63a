//! Shutdown signal handling. On SIGTERM/SIGINT/SIGQUIT/SIGHUP the daemon
//! stops accepting new work, asks every live Session to exit (escalating
//! to SIGKILL after a grace period if a child is slow to die), unlinks the
//! control socket, and exits. Sessions broadcast their own exit event to
//! subscribers as part of their normal exit handling, so no separate
//! broadcast step is needed here.

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, iterator::Signals};
use tracing::{info, warn};

use crate::{consts, registry::Registry};

pub struct Handler {
    registry: Arc<Registry>,
    socket_path: PathBuf,
}

impl Handler {
    pub fn new(registry: Arc<Registry>, socket_path: PathBuf) -> Self {
        Handler { registry, socket_path }
    }

    pub fn spawn(self) -> anyhow::Result<()> {
        let mut signals = Signals::new(TERM_SIGNALS).context("creating signal iterator")?;
        thread::spawn(move || {
            // Only the first signal triggers a graceful shutdown; a second
            // one during the grace window would otherwise just requeue on
            // this same iterator and never make progress.
            if let Some(signal) = (&mut signals).into_iter().next() {
                info!(signal, "received shutdown signal");
                self.shutdown();
            }
        });
        Ok(())
    }

    fn shutdown(&self) {
        let sessions = self.registry.all();
        info!(session_count = sessions.len(), "signalling live sessions to exit");
        for session in &sessions {
            session.kill(Some("TERM"));
        }

        let deadline = Instant::now() + consts::SHUTDOWN_KILL_GRACE;
        while Instant::now() < deadline && sessions.iter().any(|s| s.is_alive()) {
            thread::sleep(Duration::from_millis(50));
        }

        for session in &sessions {
            if session.is_alive() {
                warn!(session_id = %session.id, "session still alive after shutdown grace period, sending SIGKILL");
                session.kill(Some("KILL"));
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("error removing control socket on shutdown: {:?}", e);
            }
        }

        info!("shutdown complete");
        std::process::exit(super::exit_code::OK);
    }
}
