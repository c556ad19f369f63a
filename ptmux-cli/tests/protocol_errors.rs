use std::io::{Read, Write};

use ptmuxd::protocol::{codec, RequestOp, DEFAULT_MAX_FRAME_BYTES};

mod support;

/// An unrecognized `op` is a structured error response, not a closed
/// connection: the client can keep issuing requests on the same socket.
#[test]
fn unknown_op_does_not_close_the_connection() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let mut stream = support::raw::connect(&daemon.socket_path)?;

    let body = serde_json::json!({"op": "teleport", "request_id": 1});
    codec::write_control(&mut stream, &body)?;

    let header = codec::read_frame_header(&mut stream, DEFAULT_MAX_FRAME_BYTES)?;
    let resp: serde_json::Value = codec::read_control_body(&mut stream, header)?;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["request_id"], 1);

    // the connection is still usable for well-formed requests
    let resp = support::raw::request(&mut stream, 2, RequestOp::List)?;
    assert!(resp.ok);
    Ok(())
}

/// A frame whose declared length exceeds the configured maximum is fatal
/// to the connection.
#[test]
fn oversized_frame_closes_the_connection() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let mut stream = support::raw::connect(&daemon.socket_path)?;

    stream.write_all(&(64u32 * 1024 * 1024).to_be_bytes())?;
    stream.write_all(&[0x01])?;
    stream.flush()?;

    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "expected connection to be closed after an oversized frame");
    Ok(())
}

/// A binary frame arriving where a control frame is expected at the top
/// level is a protocol violation, not a quietly-ignored byte stream.
#[test]
fn unexpected_binary_frame_at_top_level_closes_the_connection() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let mut stream = support::raw::connect(&daemon.socket_path)?;

    codec::write_binary(&mut stream, b"not a control frame")?;

    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "expected connection to be closed after an out-of-place binary frame");
    Ok(())
}
