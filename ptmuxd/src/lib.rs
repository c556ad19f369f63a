//! ptmuxd implements the PTY supervisor daemon: spawning and tracking
//! PTY-bound child processes, keeping their scrollback, and routing the
//! framed control protocol between clients and sessions.
//!
//! This crate is used two ways. The `daemon` module is the long-running
//! multiplexer process; the `client` module is the in-process façade that
//! collaborator processes (including `ptmux-cli`, the thin reference
//! front-end built on top of it) embed to drive that daemon.

pub mod autospawn;
pub mod client;
pub mod config;
pub mod consts;
pub mod daemon;
mod exit_notify;
mod pty;
mod registry;
mod ring;
mod session;
pub mod transport;
mod user;

pub use ptmux_protocol as protocol;
