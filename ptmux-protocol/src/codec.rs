//! The centralized encode/decode functions that should be used for all
//! frame traffic on the control transport. Mirrors the shape of a
//! length-prefixed chunk protocol: callers should never hand-roll their own
//! length prefix or frame-kind byte.

use std::io::{self, Read, Write};

use anyhow::{anyhow, Context};
use byteorder::{BigEndian, ReadBytesExt as _, WriteBytesExt as _};
use serde::{de::DeserializeOwned, Serialize};

use crate::{ErrorKind, FrameKind};

/// Header read off the front of every frame: the frame's kind and the
/// number of payload bytes that follow.
#[derive(Copy, Clone, Debug)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub payload_len: u32,
}

/// Read a frame header, enforcing `max_frame_bytes`. A length overrun is
/// reported as `ErrorKind::FrameTooLarge`, which is fatal to the connection
/// per the protocol's framing-error policy.
pub fn read_frame_header<R: Read>(r: &mut R, max_frame_bytes: u32) -> anyhow::Result<FrameHeader> {
    let total_len = r.read_u32::<BigEndian>().context("reading frame length prefix")?;
    if total_len == 0 {
        return Err(anyhow!("empty frame: length prefix must include a kind byte"));
    }
    if total_len > max_frame_bytes {
        return Err(ErrorKind::FrameTooLarge).context(format!(
            "frame of {total_len} bytes exceeds limit of {max_frame_bytes} bytes"
        ));
    }
    let kind_byte = r.read_u8().context("reading frame kind")?;
    let kind = FrameKind::try_from(kind_byte)?;
    Ok(FrameHeader { kind, payload_len: total_len - 1 })
}

/// Read exactly `header.payload_len` bytes of a binary frame's body into a
/// freshly allocated buffer. Callers that already validated the header's
/// kind as `Binary` should use this.
pub fn read_binary_body<R: Read>(r: &mut R, header: FrameHeader) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; header.payload_len as usize];
    r.read_exact(&mut buf).context("reading binary frame body")?;
    Ok(buf)
}

/// Read and JSON-decode a control frame's body. Callers should already have
/// validated the header's kind as `Control`.
pub fn read_control_body<R: Read, T: DeserializeOwned>(
    r: &mut R,
    header: FrameHeader,
) -> anyhow::Result<T> {
    let mut buf = vec![0u8; header.payload_len as usize];
    r.read_exact(&mut buf).context("reading control frame body")?;
    serde_json::from_slice(&buf).context("decoding control frame JSON")
}

/// Encode and write a JSON control frame.
pub fn write_control<W: Write, T: Serialize>(w: &mut W, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(value).context("encoding control frame JSON")?;
    write_frame(w, FrameKind::Control, &body)
}

/// Encode and write a binary data frame.
pub fn write_binary<W: Write>(w: &mut W, body: &[u8]) -> anyhow::Result<()> {
    write_frame(w, FrameKind::Binary, body)
}

fn write_frame<W: Write>(w: &mut W, kind: FrameKind, body: &[u8]) -> anyhow::Result<()> {
    let total_len: u32 = (body.len() + 1)
        .try_into()
        .map_err(|_| anyhow!("frame body of {} bytes does not fit in a u32 length", body.len()))?;
    w.write_u32::<BigEndian>(total_len).context("writing frame length prefix")?;
    w.write_u8(kind as u8).context("writing frame kind")?;
    w.write_all(body).context("writing frame body")?;
    Ok(())
}

/// True if `err` (as produced by this module) represents a clean EOF with
/// no bytes read at all — i.e. the peer hung up between frames rather than
/// mid-frame. Useful for read loops that should exit quietly on a tidy
/// disconnect but treat a partial frame as `protocol_violation`.
pub fn is_clean_eof(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>().map(|e| e.kind() == io::ErrorKind::UnexpectedEof).unwrap_or(false)
}
