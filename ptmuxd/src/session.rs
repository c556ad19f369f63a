//! A Session owns one PTY Child, its Ring History, and the set of clients
//! currently attached to it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ptmux_protocol::ErrorKind;
use tracing::{info, instrument, warn};

use crate::{
    pty::{PtyChild, SpawnParams},
    ring::Ring,
};

const BELL_BYTE: u8 = 0x07;

/// A message destined for one subscriber's outbound queue. The Daemon's
/// per-client writer loop turns these into wire frames/events.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    Output(Vec<u8>),
    Bell,
    Exit { exit_code: i32 },
    Resync { dropped_bytes: u64, snapshot: Vec<u8> },
}

struct DeliveryState {
    tx: Sender<SessionMessage>,
    full_since: Option<Instant>,
    dropping: bool,
    dropped_bytes: u64,
}

/// A client currently attached to a Session.
struct Subscriber {
    state: Mutex<DeliveryState>,
}

pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub alive: bool,
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub created_at: i64,
    pub exit_code: Option<i32>,
}

struct SessionState {
    name: String,
    pty: PtyChild,
    ring: Ring,
    cols: u16,
    rows: u16,
    cwd: String,
    alive: bool,
    exit_code: Option<i32>,
    created_at: i64,
    subscribers: HashMap<u64, Arc<Subscriber>>,
    next_subscriber_id: u64,
}

pub struct Session {
    pub id: String,
    queue_depth: usize,
    slow_consumer_window: Duration,
    inner: Mutex<SessionState>,
}

impl Session {
    pub fn spawn(
        id: String,
        name: String,
        params: SpawnParams,
        history_bytes: usize,
        queue_depth: usize,
        slow_consumer_window: Duration,
        created_at: i64,
    ) -> anyhow::Result<Arc<Self>> {
        let cols = params.cols;
        let rows = params.rows;
        let cwd = params.cwd.display().to_string();
        let pty = PtyChild::spawn(params).map_err(|e| anyhow::anyhow!("spawn_failed: {e:#}"))?;

        let state = SessionState {
            name,
            pty,
            ring: Ring::new(history_bytes),
            cols,
            rows,
            cwd,
            alive: true,
            exit_code: None,
            created_at,
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        };

        let session =
            Arc::new(Session { id, queue_depth, slow_consumer_window, inner: Mutex::new(state) });
        Session::start_reader_loop(Arc::clone(&session));
        Ok(session)
    }

    #[instrument(skip(session), fields(session_id = %session.id))]
    fn start_reader_loop(session: Arc<Session>) {
        thread::spawn(move || {
            // The channel is obtained once; no lock is held across this
            // blocking recv, satisfying the no-I/O-under-lock rule.
            let output_rx = {
                let state = session.inner.lock().unwrap();
                state.pty.output_rx.clone()
            };
            let exit_notifier = {
                let state = session.inner.lock().unwrap();
                Arc::clone(&state.pty.exit_notifier)
            };

            loop {
                match output_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(chunk) => session.on_pty_output(&chunk),
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if exit_notifier.poll().is_some() && output_rx.is_empty() {
                            break;
                        }
                        continue;
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }

            let code = exit_notifier.wait(Some(Duration::from_secs(5))).unwrap_or(1);
            session.on_exit(code);
        });
    }

    fn on_pty_output(&self, chunk: &[u8]) {
        let subscribers: Vec<Arc<Subscriber>> = {
            let mut state = self.inner.lock().unwrap();
            state.ring.append(chunk);
            state.subscribers.values().cloned().collect()
        };

        let has_bell = chunk.contains(&BELL_BYTE);
        for sub in &subscribers {
            self.deliver(sub, SessionMessage::Output(chunk.to_vec()));
            if has_bell {
                self.deliver(sub, SessionMessage::Bell);
            }
        }
    }

    fn on_exit(&self, code: i32) {
        let subscribers: Vec<Arc<Subscriber>> = {
            let mut state = self.inner.lock().unwrap();
            state.alive = false;
            state.exit_code = Some(code);
            state.subscribers.values().cloned().collect()
        };
        info!(session_id = %self.id, exit_code = code, "session exited");
        for sub in &subscribers {
            let mut ds = sub.state.lock().unwrap();
            // Exit is delivered best-effort but is allowed to wait out a
            // full queue once, since it is the last message this
            // subscriber will ever receive from this Session.
            let _ = ds.tx.send_timeout(SessionMessage::Exit { exit_code: code }, self.slow_consumer_window);
        }
    }

    /// Route one message to `sub`, applying the slow-consumer policy:
    /// drop-then-resync once a subscriber's queue has stayed full for
    /// longer than `slow_consumer_window`.
    fn deliver(&self, sub: &Arc<Subscriber>, msg: SessionMessage) {
        let mut ds = sub.state.lock().unwrap();

        if ds.dropping {
            let snapshot = self.inner.lock().unwrap().ring.snapshot();
            match ds.tx.try_send(SessionMessage::Resync { dropped_bytes: ds.dropped_bytes, snapshot })
            {
                Ok(()) => {
                    ds.dropping = false;
                    ds.dropped_bytes = 0;
                    ds.full_since = None;
                }
                Err(TrySendError::Full(_)) => {
                    if let SessionMessage::Output(data) = &msg {
                        ds.dropped_bytes += data.len() as u64;
                    }
                    return;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }

        match ds.tx.try_send(msg.clone()) {
            Ok(()) => ds.full_since = None,
            Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                let now = Instant::now();
                let since = *ds.full_since.get_or_insert(now);
                let elapsed = now.duration_since(since);
                if elapsed >= self.slow_consumer_window {
                    ds.dropping = true;
                    if let SessionMessage::Output(data) = &msg {
                        ds.dropped_bytes = data.len() as u64;
                    }
                } else {
                    let remaining = self.slow_consumer_window - elapsed;
                    match ds.tx.send_timeout(msg.clone(), remaining) {
                        Ok(()) => ds.full_since = None,
                        Err(_) => {
                            ds.dropping = true;
                            if let SessionMessage::Output(data) = &msg {
                                ds.dropped_bytes = data.len() as u64;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Register a new subscriber, returning its id, its message receiver,
    /// and the attach snapshot.
    pub fn attach(&self) -> (u64, Receiver<SessionMessage>, bool, Vec<u8>, u16, u16) {
        let mut state = self.inner.lock().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(self.queue_depth);
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.insert(
            id,
            Arc::new(Subscriber {
                state: Mutex::new(DeliveryState {
                    tx,
                    full_since: None,
                    dropping: false,
                    dropped_bytes: 0,
                }),
            }),
        );
        (id, rx, state.alive, state.ring.snapshot(), state.cols, state.rows)
    }

    /// Idempotent: detaching an id that is not (or no longer) registered
    /// is not an error.
    pub fn detach(&self, subscriber_id: u64) {
        self.inner.lock().unwrap().subscribers.remove(&subscriber_id);
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), ErrorKind> {
        let state = self.inner.lock().unwrap();
        if !state.alive {
            return Err(ErrorKind::SessionExited);
        }
        state.pty.write(bytes).map_err(|_| ErrorKind::IoError)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), ErrorKind> {
        if cols == 0 || rows == 0 {
            return Err(ErrorKind::InvalidDimensions);
        }
        let mut state = self.inner.lock().unwrap();
        if !state.alive {
            return Err(ErrorKind::SessionExited);
        }
        state.pty.resize(cols, rows).map_err(|_| ErrorKind::IoError)?;
        state.cols = cols;
        state.rows = rows;
        Ok(())
    }

    /// Send `signal` to the underlying PTY Child. Always succeeds at the
    /// protocol level; actual termination is observed asynchronously via
    /// the exit event.
    pub fn kill(&self, signal: Option<&str>) {
        let state = self.inner.lock().unwrap();
        if !state.alive {
            return;
        }
        let sig = signal.and_then(parse_signal_name);
        if let Err(e) = state.pty.kill(sig) {
            warn!(session_id = %self.id, "error signalling session: {:?}", e);
        }
    }

    pub fn history(&self) -> Vec<u8> {
        self.inner.lock().unwrap().ring.snapshot()
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.inner.lock().unwrap();
        SessionInfo {
            id: self.id.clone(),
            name: state.name.clone(),
            alive: state.alive,
            cols: state.cols,
            rows: state.rows,
            cwd: state.cwd.clone(),
            created_at: state.created_at,
            exit_code: state.exit_code,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.lock().unwrap().alive
    }
}

fn parse_signal_name(name: &str) -> Option<libc::c_int> {
    match name.to_ascii_uppercase().trim_start_matches("SIG") {
        "HUP" => Some(libc::SIGHUP),
        "TERM" => Some(libc::SIGTERM),
        "KILL" => Some(libc::SIGKILL),
        "INT" => Some(libc::SIGINT),
        "QUIT" => Some(libc::SIGQUIT),
        "USR1" => Some(libc::SIGUSR1),
        "USR2" => Some(libc::SIGUSR2),
        _ => None,
    }
}
