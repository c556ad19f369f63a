use std::time::Duration;

/// Default Ring History capacity per session, in bytes.
pub const DEFAULT_HISTORY_BYTES: usize = 64 * 1024;

/// Default bound on a subscriber's outbound frame queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Default window a subscriber's queue may stay full before the
/// slow-consumer policy kicks in and starts dropping output for it.
pub const DEFAULT_SLOW_CONSUMER_WINDOW: Duration = Duration::from_secs(2);

/// Default cap on a single frame's declared length.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = ptmux_protocol::DEFAULT_MAX_FRAME_BYTES;

/// How long the signal handler gives live sessions to exit on SIGTERM
/// before escalating to SIGKILL.
pub const SHUTDOWN_KILL_GRACE: Duration = Duration::from_secs(3);

/// Grace period between a session-level SIGTERM/SIGHUP kill request and
/// the SIGKILL escalation if the child hasn't exited yet.
pub const SESSION_KILL_GRACE: Duration = Duration::from_millis(500);

/// How long a client's auto-spawned daemon gets to bring its socket up.
pub const AUTOSPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of the read buffer used by each PTY Child's reader loop.
pub const PTY_READ_BUF_SIZE: usize = 16 * 1024;

/// Env var set on an autodaemonized child so it knows it was forked rather
/// than invoked directly.
pub const AUTODAEMONIZE_VAR: &str = "PTMUX__INTERNAL__AUTODAEMONIZE";
