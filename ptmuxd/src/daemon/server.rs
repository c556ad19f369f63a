//! Accepts clients, decodes their control frames, and routes them to the
//! Registry/Session operations described in the component design.

use std::{
    collections::HashMap,
    io::{BufReader, BufWriter},
    os::unix::net::{UnixListener, UnixStream},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender};
use ptmux_protocol::{
    codec, AttachResult, CreateResult, ErrorKind, Event, HistoryResult, ListResult, Request,
    RequestOp, Response, SessionDescriptor,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config,
    registry::{CreateParams, Registry},
    session::SessionMessage,
};

pub struct Server {
    pub registry: Arc<Registry>,
    pub config: config::Manager,
}

impl Server {
    pub fn new(registry: Arc<Registry>, config: config::Manager) -> Self {
        Server { registry, config }
    }

    /// Accept loop: one thread per accepted client connection.
    #[instrument(skip_all)]
    pub fn serve(self: Arc<Self>, listener: UnixListener) -> anyhow::Result<()> {
        let next_conn_id = AtomicU64::new(0);
        for incoming in listener.incoming() {
            let stream = match incoming {
                Ok(s) => s,
                Err(e) => {
                    warn!("error accepting connection: {:?}", e);
                    continue;
                }
            };
            let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
            let server = Arc::clone(&self);
            thread::spawn(move || {
                if let Err(e) = server.handle_conn(conn_id, stream) {
                    debug!(conn_id, "connection closed: {:?}", e);
                }
            });
        }
        Ok(())
    }

    #[instrument(skip(self, stream), fields(conn_id))]
    fn handle_conn(&self, conn_id: u64, stream: UnixStream) -> anyhow::Result<()> {
        let reader_stream = stream.try_clone()?;
        let mut reader = BufReader::new(reader_stream);
        let writer = BufWriter::new(stream);

        let (outbound_tx, outbound_rx) = crossbeam_channel::bounded::<OutboundItem>(
            self.config.get().queue_depth().max(64),
        );
        let writer_handle = thread::spawn(move || writer_loop(writer, outbound_rx));

        let mut client = ClientConn {
            attachments: HashMap::new(),
            outbound_tx: outbound_tx.clone(),
            max_frame_bytes: self.config.get().max_frame_bytes(),
        };

        let result = self.reader_loop(&mut reader, &mut client);

        for (_, attachment) in client.attachments.drain() {
            attachment.session.detach(attachment.subscriber_id);
        }
        drop(outbound_tx);
        let _ = writer_handle.join();
        result
    }

    fn reader_loop<R: std::io::Read>(
        &self,
        reader: &mut R,
        client: &mut ClientConn,
    ) -> anyhow::Result<()> {
        loop {
            let header = match codec::read_frame_header(reader, client.max_frame_bytes) {
                Ok(h) => h,
                Err(e) => {
                    if codec::is_clean_eof(&e) {
                        return Ok(());
                    }
                    return Err(e);
                }
            };
            if header.kind != ptmux_protocol::FrameKind::Control {
                anyhow::bail!("expected control frame, got {:?}", header.kind);
            }
            let value: serde_json::Value = codec::read_control_body(reader, header)?;

            let request: Request = match serde_json::from_value(value.clone()) {
                Ok(r) => r,
                Err(e) => {
                    if let Some(request_id) = value.get("request_id").and_then(|v| v.as_u64()) {
                        let resp = Response::err(request_id, ErrorKind::UnknownOp, e.to_string());
                        client.send_response(resp);
                        continue;
                    }
                    anyhow::bail!("protocol_violation: malformed request frame: {e}");
                }
            };

            self.dispatch(reader, client, request)?;
        }
    }

    fn dispatch<R: std::io::Read>(
        &self,
        reader: &mut R,
        client: &mut ClientConn,
        request: Request,
    ) -> anyhow::Result<()> {
        let request_id = request.request_id;
        match request.op {
            RequestOp::Create { name, cols, rows, cwd, argv, env } => {
                let resp = match self.registry.create(CreateParams { name, cols, rows, cwd, argv, env })
                {
                    Ok(session) => {
                        let info = session.info();
                        ok_response(request_id, CreateResult {
                            id: info.id,
                            cols: info.cols,
                            rows: info.rows,
                            cwd: info.cwd,
                            created_at: info.created_at,
                        })
                    }
                    Err(e) => Response::err(request_id, ErrorKind::SpawnFailed, e.to_string()),
                };
                client.send_response(resp);
            }

            RequestOp::List => {
                let sessions = self
                    .registry
                    .list()
                    .into_iter()
                    .map(|info| SessionDescriptor {
                        id: info.id,
                        name: info.name,
                        alive: info.alive,
                        cols: info.cols,
                        rows: info.rows,
                        cwd: info.cwd,
                        created_at: info.created_at,
                        exit_code: info.exit_code,
                    })
                    .collect();
                client.send_response(ok_response(request_id, ListResult { sessions }));
            }

            RequestOp::Attach { id } => match self.registry.lookup(&id) {
                Ok(session) => {
                    let (subscriber_id, rx, alive, snapshot, cols, rows) = session.attach();
                    client.attachments.insert(
                        id.clone(),
                        Attachment { session: Arc::clone(&session), subscriber_id },
                    );
                    let history_len = snapshot.len() as u32;
                    // Enqueue the attach response before starting the forwarder: the
                    // client isn't listening for events until it has this response in
                    // hand, so any output/exit frame the forwarder queues first would
                    // land ahead of the snapshot it's supposed to follow.
                    client.send_response_with_binary(
                        ok_response(request_id, AttachResult { alive, cols, rows, history_len }),
                        snapshot,
                    );
                    spawn_forwarder(id.clone(), rx, client.outbound_tx.clone());
                }
                Err(e) => client.send_response(Response::err(request_id, e, "no such session")),
            },

            RequestOp::Detach { id } => {
                if let Some(attachment) = client.attachments.remove(&id) {
                    attachment.session.detach(attachment.subscriber_id);
                }
                client.send_response(ok_response(request_id, serde_json::Map::new()));
            }

            RequestOp::Write { id, len } => {
                let body_header = codec::read_frame_header(reader, client.max_frame_bytes)?;
                if body_header.kind != ptmux_protocol::FrameKind::Binary
                    || body_header.payload_len != len
                {
                    anyhow::bail!("protocol_violation: expected {len}-byte binary frame for write");
                }
                let bytes = codec::read_binary_body(reader, body_header)?;
                let resp = match self.registry.lookup(&id).and_then(|s| s.write(&bytes)) {
                    Ok(()) => ok_response(request_id, serde_json::Map::new()),
                    Err(e) => Response::err(request_id, e, e.to_string()),
                };
                client.send_response(resp);
            }

            RequestOp::Resize { id, cols, rows } => {
                let resp = match self.registry.lookup(&id).and_then(|s| s.resize(cols, rows)) {
                    Ok(()) => ok_response(request_id, serde_json::Map::new()),
                    Err(e) => Response::err(request_id, e, e.to_string()),
                };
                client.send_response(resp);
            }

            RequestOp::Kill { id, signal } => {
                let resp = match self.registry.remove(&id, signal.as_deref()) {
                    Ok(()) => ok_response(request_id, serde_json::Map::new()),
                    Err(e) => Response::err(request_id, e, "no such session"),
                };
                client.send_response(resp);
            }

            RequestOp::History { id } => match self.registry.lookup(&id) {
                Ok(session) => {
                    let snapshot = session.history();
                    let len = snapshot.len() as u32;
                    client.send_response_with_binary(
                        ok_response(request_id, HistoryResult { len }),
                        snapshot,
                    );
                }
                Err(e) => client.send_response(Response::err(request_id, e, "no such session")),
            },
        }
        Ok(())
    }
}

fn ok_response<T: serde::Serialize>(request_id: u64, fields: T) -> Response {
    let value = serde_json::to_value(fields).expect("result types always serialize to objects");
    let fields = match value {
        serde_json::Value::Object(m) => m,
        _ => serde_json::Map::new(),
    };
    Response::ok(request_id, fields)
}

struct Attachment {
    session: Arc<crate::session::Session>,
    subscriber_id: u64,
}

struct ClientConn {
    attachments: HashMap<String, Attachment>,
    outbound_tx: Sender<OutboundItem>,
    max_frame_bytes: u32,
}

impl ClientConn {
    fn send_response(&self, response: Response) {
        let _ = self.outbound_tx.send(OutboundItem { control: ControlPayload::Response(response), binary: None });
    }

    fn send_response_with_binary(&self, response: Response, binary: Vec<u8>) {
        let _ = self
            .outbound_tx
            .send(OutboundItem { control: ControlPayload::Response(response), binary: Some(binary) });
    }
}

enum ControlPayload {
    Response(Response),
    Event(Event),
}

struct OutboundItem {
    control: ControlPayload,
    binary: Option<Vec<u8>>,
}

/// Drains a client's outbound queue, writing each item's control frame
/// (and trailing binary frame, if any) to the socket.
fn writer_loop<W: std::io::Write>(mut writer: W, outbound_rx: Receiver<OutboundItem>) {
    for item in outbound_rx.iter() {
        let write_result = match &item.control {
            ControlPayload::Response(r) => codec::write_control(&mut writer, r),
            ControlPayload::Event(e) => codec::write_control(&mut writer, e),
        };
        if write_result.is_err() {
            break;
        }
        if let Some(binary) = &item.binary {
            if codec::write_binary(&mut writer, binary).is_err() {
                break;
            }
        }
        if writer.flush().is_err() {
            break;
        }
    }
}

/// Forwards one Session's messages to a client's outbound queue as Event
/// frames, until the subscriber is detached (at which point the Session
/// drops its sender and this loop ends).
fn spawn_forwarder(session_id: String, rx: Receiver<SessionMessage>, outbound_tx: Sender<OutboundItem>) {
    thread::spawn(move || {
        for msg in rx.iter() {
            let item = match msg {
                SessionMessage::Output(data) => OutboundItem {
                    control: ControlPayload::Event(Event::Output {
                        session_id: session_id.clone(),
                        len: data.len() as u32,
                    }),
                    binary: Some(data),
                },
                SessionMessage::Bell => OutboundItem {
                    control: ControlPayload::Event(Event::Bell { session_id: session_id.clone() }),
                    binary: None,
                },
                SessionMessage::Exit { exit_code } => OutboundItem {
                    control: ControlPayload::Event(Event::Exit {
                        session_id: session_id.clone(),
                        exit_code,
                    }),
                    binary: None,
                },
                SessionMessage::Resync { dropped_bytes, snapshot } => OutboundItem {
                    control: ControlPayload::Event(Event::Resync {
                        session_id: session_id.clone(),
                        dropped_bytes,
                    }),
                    binary: Some(snapshot),
                },
            };
            if outbound_tx.send(item).is_err() {
                break;
            }
        }
    });
}
