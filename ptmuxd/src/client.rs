//! In-process façade used by collaborators to drive ptmuxd: it opens the
//! control transport (auto-spawning the daemon if nobody is listening),
//! serialises requests, correlates responses by `request_id`, and
//! dispatches event frames to callbacks registered per session.

use std::{
    collections::HashMap,
    ffi::OsStr,
    io::{BufReader, BufWriter, Write as _},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use ptmux_protocol::{
    codec, AttachResult, CreateResult, ErrorKind, Event, HistoryResult, ListResult, Request,
    RequestOp, Response, SessionDescriptor,
};
use tracing::warn;

use crate::{autospawn, consts};

/// Parameters for `Client::create_session`, mirroring the wire `create` op.
#[derive(Clone, Debug, Default)]
pub struct CreateSessionParams {
    pub name: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<String>,
    pub argv: Option<Vec<String>>,
    pub env: Option<Vec<(String, String)>>,
}

/// The result of a successful `attach`: whether the session is still
/// alive, its current size, and the scrollback snapshot.
#[derive(Clone, Debug)]
pub struct AttachOutcome {
    pub alive: bool,
    pub cols: u16,
    pub rows: u16,
    pub history: Vec<u8>,
}

type OutputCb = Arc<dyn Fn(&[u8]) + Send + Sync>;
type BellCb = Arc<dyn Fn() + Send + Sync>;
type ExitCb = Arc<dyn Fn(i32) + Send + Sync>;
type ResyncCb = Arc<dyn Fn(u64) + Send + Sync>;
type ReconnectCb = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    output: HashMap<String, Vec<OutputCb>>,
    bell: HashMap<String, Vec<BellCb>>,
    exit: HashMap<String, Vec<ExitCb>>,
    resync: HashMap<String, Vec<ResyncCb>>,
    reconnected: Vec<ReconnectCb>,
}

enum PendingKind {
    Plain,
    WithBinary,
}

type PendingTx = mpsc::Sender<(Response, Option<Vec<u8>>)>;

struct Shared {
    writer: Mutex<BufWriter<UnixStream>>,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, (PendingKind, PendingTx)>>,
    callbacks: Mutex<Callbacks>,
    attached: Mutex<Vec<String>>,
    socket_path: PathBuf,
    request_timeout: Duration,
}

/// The in-process client façade. Cheap to clone; all clones share the same
/// underlying connection and callback registry.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Connect to the daemon at `socket_path`, auto-spawning it (by
    /// re-execing `front_end_bin daemon ...`) if nothing is listening yet.
    pub fn connect<B: AsRef<OsStr>>(
        front_end_bin: B,
        socket_path: impl AsRef<Path>,
        autospawn_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = match UnixStream::connect(&socket_path) {
            Ok(s) => s,
            Err(_) => {
                autospawn::maybe_fork_daemon(front_end_bin, &socket_path, autospawn_timeout)?;
                UnixStream::connect(&socket_path).context("connecting to daemon after autospawn")?
            }
        };
        Self::from_stream(stream, socket_path)
    }

    /// Connect without ever attempting to auto-spawn; fails if nobody is
    /// listening.
    pub fn connect_existing(socket_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream =
            UnixStream::connect(&socket_path).context("connecting to existing daemon")?;
        Self::from_stream(stream, socket_path)
    }

    fn from_stream(stream: UnixStream, socket_path: PathBuf) -> anyhow::Result<Self> {
        let reader_stream = stream.try_clone().context("cloning control stream for reader")?;
        let shared = Arc::new(Shared {
            writer: Mutex::new(BufWriter::new(stream)),
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Callbacks::default()),
            attached: Mutex::new(Vec::new()),
            socket_path,
            request_timeout: Duration::from_secs(30),
        });
        spawn_reader(Arc::clone(&shared), reader_stream);
        Ok(Client { shared })
    }

    pub fn create_session(&self, params: CreateSessionParams) -> anyhow::Result<CreateResult> {
        let op = RequestOp::Create {
            name: params.name,
            cols: params.cols,
            rows: params.rows,
            cwd: params.cwd,
            argv: params.argv,
            env: params.env,
        };
        let (resp, _) = self.call(op, false, None)?;
        resp.into_result()
    }

    pub fn list_sessions(&self) -> anyhow::Result<Vec<SessionDescriptor>> {
        let (resp, _) = self.call(RequestOp::List, false, None)?;
        let result: ListResult = resp.into_result()?;
        Ok(result.sessions)
    }

    pub fn attach(&self, id: &str) -> anyhow::Result<AttachOutcome> {
        let (resp, binary) = self.call(RequestOp::Attach { id: id.to_string() }, true, None)?;
        let result: AttachResult = resp.into_result()?;
        {
            let mut attached = self.shared.attached.lock().unwrap();
            attached.retain(|s| s != id);
            attached.push(id.to_string());
        }
        Ok(AttachOutcome {
            alive: result.alive,
            cols: result.cols,
            rows: result.rows,
            history: binary.unwrap_or_default(),
        })
    }

    pub fn detach(&self, id: &str) -> anyhow::Result<()> {
        let (resp, _) = self.call(RequestOp::Detach { id: id.to_string() }, false, None)?;
        resp.into_result::<serde_json::Map<String, serde_json::Value>>()?;
        self.shared.attached.lock().unwrap().retain(|s| s != id);
        Ok(())
    }

    pub fn write_input(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let op = RequestOp::Write { id: id.to_string(), len: bytes.len() as u32 };
        let (resp, _) = self.call(op, false, Some(bytes))?;
        resp.into_result::<serde_json::Map<String, serde_json::Value>>()?;
        Ok(())
    }

    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        let op = RequestOp::Resize { id: id.to_string(), cols, rows };
        let (resp, _) = self.call(op, false, None)?;
        resp.into_result::<serde_json::Map<String, serde_json::Value>>()?;
        Ok(())
    }

    pub fn kill_session(&self, id: &str, signal: Option<String>) -> anyhow::Result<()> {
        let op = RequestOp::Kill { id: id.to_string(), signal };
        let (resp, _) = self.call(op, false, None)?;
        resp.into_result::<serde_json::Map<String, serde_json::Value>>()?;
        self.shared.attached.lock().unwrap().retain(|s| s != id);
        Ok(())
    }

    pub fn history(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        let (resp, binary) = self.call(RequestOp::History { id: id.to_string() }, true, None)?;
        let _result: HistoryResult = resp.into_result()?;
        Ok(binary.unwrap_or_default())
    }

    /// Register a callback invoked (on the reader thread) with each output
    /// chunk delivered for `session_id`, in the order the daemon forwarded
    /// them.
    pub fn on_output<F: Fn(&[u8]) + Send + Sync + 'static>(&self, session_id: &str, cb: F) {
        self.shared
            .callbacks
            .lock()
            .unwrap()
            .output
            .entry(session_id.to_string())
            .or_default()
            .push(Arc::new(cb));
    }

    pub fn on_bell<F: Fn() + Send + Sync + 'static>(&self, session_id: &str, cb: F) {
        self.shared
            .callbacks
            .lock()
            .unwrap()
            .bell
            .entry(session_id.to_string())
            .or_default()
            .push(Arc::new(cb));
    }

    pub fn on_exit<F: Fn(i32) + Send + Sync + 'static>(&self, session_id: &str, cb: F) {
        self.shared
            .callbacks
            .lock()
            .unwrap()
            .exit
            .entry(session_id.to_string())
            .or_default()
            .push(Arc::new(cb));
    }

    pub fn on_resync<F: Fn(u64) + Send + Sync + 'static>(&self, session_id: &str, cb: F) {
        self.shared
            .callbacks
            .lock()
            .unwrap()
            .resync
            .entry(session_id.to_string())
            .or_default()
            .push(Arc::new(cb));
    }

    /// Register a callback fired once the client has reconnected after a
    /// disconnect and re-attached all previously attached sessions.
    pub fn on_reconnect<F: Fn() + Send + Sync + 'static>(&self, cb: F) {
        self.shared.callbacks.lock().unwrap().reconnected.push(Arc::new(cb));
    }

    fn call(
        &self,
        op: RequestOp,
        expects_binary: bool,
        body: Option<&[u8]>,
    ) -> anyhow::Result<(Response, Option<Vec<u8>>)> {
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        let kind = if expects_binary { PendingKind::WithBinary } else { PendingKind::Plain };
        self.shared.pending.lock().unwrap().insert(request_id, (kind, tx));

        let request = Request { request_id, op, timeout_ms: None };
        {
            let mut writer = self.shared.writer.lock().unwrap();
            codec::write_control(&mut *writer, &request).context("writing request frame")?;
            if let Some(bytes) = body {
                codec::write_binary(&mut *writer, bytes).context("writing request binary body")?;
            }
            writer.flush().context("flushing request")?;
        }

        rx.recv_timeout(self.shared.request_timeout)
            .map_err(|_| anyhow!("timed out waiting for response to request {}", request_id))
    }
}

fn spawn_reader(shared: Arc<Shared>, stream: UnixStream) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        loop {
            match read_one_control_frame(&shared, &mut reader) {
                Ok(()) => continue,
                Err(e) => {
                    if !codec::is_clean_eof(&e) {
                        warn!("control connection error: {:?}", e);
                    }
                    break;
                }
            }
        }
        shared.fail_all_pending();
        reconnect(shared);
    });
}

fn read_one_control_frame(shared: &Arc<Shared>, reader: &mut BufReader<UnixStream>) -> anyhow::Result<()> {
    let header = codec::read_frame_header(reader, ptmux_protocol::DEFAULT_MAX_FRAME_BYTES)?;
    if header.kind != ptmux_protocol::FrameKind::Control {
        anyhow::bail!("protocol_violation: expected control frame at top level, got {:?}", header.kind);
    }
    let value: serde_json::Value = codec::read_control_body(reader, header)?;

    if value.get("event").is_some() {
        let event: Event = serde_json::from_value(value).context("decoding event frame")?;
        handle_event(shared, reader, event)
    } else {
        let resp: Response = serde_json::from_value(value).context("decoding response frame")?;
        handle_response(shared, reader, resp)
    }
}

fn handle_event(shared: &Arc<Shared>, reader: &mut BufReader<UnixStream>, event: Event) -> anyhow::Result<()> {
    match event {
        Event::Output { session_id, len } => {
            let data = read_expected_binary(reader, len)?;
            shared.dispatch_output(&session_id, &data);
        }
        Event::Bell { session_id } => shared.dispatch_bell(&session_id),
        Event::Exit { session_id, exit_code } => shared.dispatch_exit(&session_id, exit_code),
        Event::Resync { session_id, dropped_bytes } => {
            // The daemon sends the resync snapshot as this event's binary
            // body; deliver it as output first so the client's own buffer
            // catches up, then fire the resync marker.
            let header = codec::read_frame_header(reader, ptmux_protocol::DEFAULT_MAX_FRAME_BYTES)?;
            let snapshot = codec::read_binary_body(reader, header)?;
            shared.dispatch_output(&session_id, &snapshot);
            shared.dispatch_resync(&session_id, dropped_bytes);
        }
    }
    Ok(())
}

fn read_expected_binary(reader: &mut BufReader<UnixStream>, expected_len: u32) -> anyhow::Result<Vec<u8>> {
    let header = codec::read_frame_header(reader, ptmux_protocol::DEFAULT_MAX_FRAME_BYTES)?;
    if header.kind != ptmux_protocol::FrameKind::Binary || header.payload_len != expected_len {
        anyhow::bail!("protocol_violation: expected {expected_len}-byte binary frame");
    }
    codec::read_binary_body(reader, header)
}

fn handle_response(shared: &Arc<Shared>, reader: &mut BufReader<UnixStream>, resp: Response) -> anyhow::Result<()> {
    let entry = shared.pending.lock().unwrap().remove(&resp.request_id);
    let binary = match &entry {
        Some((PendingKind::WithBinary, _)) if resp.ok => {
            let header = codec::read_frame_header(reader, ptmux_protocol::DEFAULT_MAX_FRAME_BYTES)?;
            Some(codec::read_binary_body(reader, header)?)
        }
        _ => None,
    };
    if let Some((_, tx)) = entry {
        let _ = tx.send((resp, binary));
    }
    Ok(())
}

impl Shared {
    fn fail_all_pending(&self) {
        let drained: Vec<_> = self.pending.lock().unwrap().drain().collect();
        for (request_id, (_, tx)) in drained {
            let _ = tx.send((
                Response::err(request_id, ErrorKind::IoError, "disconnected from daemon"),
                None,
            ));
        }
    }

    fn dispatch_output(&self, session_id: &str, data: &[u8]) {
        let cbs = {
            let callbacks = self.callbacks.lock().unwrap();
            callbacks.output.get(session_id).cloned().unwrap_or_default()
        };
        for cb in cbs {
            cb(data);
        }
    }

    fn dispatch_bell(&self, session_id: &str) {
        let cbs = {
            let callbacks = self.callbacks.lock().unwrap();
            callbacks.bell.get(session_id).cloned().unwrap_or_default()
        };
        for cb in cbs {
            cb();
        }
    }

    fn dispatch_exit(&self, session_id: &str, exit_code: i32) {
        let cbs = {
            let callbacks = self.callbacks.lock().unwrap();
            callbacks.exit.get(session_id).cloned().unwrap_or_default()
        };
        for cb in cbs {
            cb(exit_code);
        }
    }

    fn dispatch_resync(&self, session_id: &str, dropped_bytes: u64) {
        let cbs = {
            let callbacks = self.callbacks.lock().unwrap();
            callbacks.resync.get(session_id).cloned().unwrap_or_default()
        };
        for cb in cbs {
            cb(dropped_bytes);
        }
    }

    fn dispatch_reconnected(&self) {
        let cbs = self.callbacks.lock().unwrap().reconnected.clone();
        for cb in cbs {
            cb();
        }
    }
}

/// Reconnect with exponential backoff, then re-attach every session this
/// client was attached to before the disconnect, per the client library's
/// documented reconnect contract.
fn reconnect(shared: Arc<Shared>) {
    let mut sleep_ms = 50;
    loop {
        match UnixStream::connect(&shared.socket_path) {
            Ok(stream) => {
                let reader_stream = match stream.try_clone() {
                    Ok(s) => s,
                    Err(_) => {
                        thread::sleep(Duration::from_millis(sleep_ms));
                        continue;
                    }
                };
                *shared.writer.lock().unwrap() = BufWriter::new(stream);
                spawn_reader(Arc::clone(&shared), reader_stream);

                let to_reattach: Vec<String> = shared.attached.lock().unwrap().clone();
                let client = Client { shared: Arc::clone(&shared) };
                for id in to_reattach {
                    if let Err(e) = client.attach(&id) {
                        warn!(session_id = %id, "failed to reattach after reconnect: {:?}", e);
                    }
                }
                shared.dispatch_reconnected();
                return;
            }
            Err(_) => {
                thread::sleep(Duration::from_millis(sleep_ms));
                sleep_ms = (sleep_ms * 2).min(consts::AUTOSPAWN_TIMEOUT.as_millis() as u64);
            }
        }
    }
}
