use std::{
    io::{self, Read, Write},
    sync::mpsc,
    thread,
};

use anyhow::Context;
use ptmuxd::client::Client;
use tracing::{info, warn};

use crate::tty;

enum Ended {
    Exited(i32),
    Detached,
}

pub fn run(client: Client, id: String) -> anyhow::Result<()> {
    info!(session_id = %id, "attaching");

    let outcome = client.attach(&id)?;
    io::stdout().write_all(&outcome.history)?;
    io::stdout().flush()?;

    if !outcome.alive {
        eprintln!("ptmux: session '{}' has already exited", id);
        return Ok(());
    }

    let local_size = tty::Size::from_fd(0).unwrap_or(tty::Size { rows: outcome.rows, cols: outcome.cols });
    if local_size.cols != outcome.cols || local_size.rows != outcome.rows {
        client.resize(&id, local_size.cols, local_size.rows)?;
    }

    let _flags_guard = tty::set_attach_flags().context("setting raw terminal mode")?;

    let (done_tx, done_rx) = mpsc::channel::<Ended>();

    {
        let done_tx = done_tx.clone();
        client.on_exit(&id, move |exit_code| {
            let _ = done_tx.send(Ended::Exited(exit_code));
        });
    }
    client.on_output(&id, |bytes| {
        let mut stdout = io::stdout();
        if stdout.write_all(bytes).is_ok() {
            let _ = stdout.flush();
        }
    });
    client.on_bell(&id, || {
        let _ = io::stdout().write_all(b"\x07");
        let _ = io::stdout().flush();
    });

    SigwinchHandler::new(client.clone(), id.clone()).spawn()?;

    {
        let client = client.clone();
        let id = id.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match io::stdin().read(&mut buf) {
                    Ok(0) => {
                        let _ = done_tx.send(Ended::Detached);
                        return;
                    }
                    Ok(n) => {
                        if client.write_input(&id, &buf[..n]).is_err() {
                            let _ = done_tx.send(Ended::Detached);
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("error reading stdin: {:?}", e);
                        let _ = done_tx.send(Ended::Detached);
                        return;
                    }
                }
            }
        });
    }

    match done_rx.recv() {
        Ok(Ended::Exited(exit_code)) => {
            drop(_flags_guard);
            eprintln!("ptmux: session '{}' exited with status {}", id, exit_code);
        }
        Ok(Ended::Detached) | Err(_) => {
            drop(_flags_guard);
            let _ = client.detach(&id);
            eprintln!("ptmux: detached from '{}'", id);
        }
    }

    Ok(())
}

/// Forwards SIGWINCH (terminal resize) to the daemon for the attached
/// session, keeping the remote pty's size in sync with the local
/// terminal.
struct SigwinchHandler {
    client: Client,
    session_id: String,
}

impl SigwinchHandler {
    fn new(client: Client, session_id: String) -> Self {
        SigwinchHandler { client, session_id }
    }

    fn spawn(self) -> anyhow::Result<()> {
        use signal_hook::{consts::SIGWINCH, iterator::Signals};

        let mut signals = Signals::new([SIGWINCH]).context("creating signal iterator")?;
        thread::spawn(move || {
            for _ in &mut signals {
                if let Ok(size) = tty::Size::from_fd(0) {
                    if let Err(e) = self.client.resize(&self.session_id, size.cols, size.rows) {
                        warn!("error forwarding resize: {:?}", e);
                    }
                }
            }
        });
        Ok(())
    }
}
