//! The core's platform seam: one connection-oriented stream endpoint per
//! client. This workspace ships a single UNIX domain socket
//! implementation; a named-pipe implementation for the Windows-style
//! alternative is not included (see DESIGN.md).

use std::{
    env,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::Context;

/// Resolve the daemon's socket path the same way for both the daemon
/// (bind) and clients (connect/auto-spawn): `$XDG_RUNTIME_DIR/ptmux/mux.sock`,
/// falling back to `~/.ptmux/mux.sock` when `XDG_RUNTIME_DIR` is unset. An
/// explicit `override_path` always wins.
pub fn resolve_socket_path(override_path: Option<&str>) -> anyhow::Result<PathBuf> {
    if let Some(p) = override_path {
        return Ok(PathBuf::from(p));
    }

    let dir = match env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join("ptmux"),
        None => {
            let home = env::var("HOME").context("no XDG_RUNTIME_DIR or HOME in environment")?;
            PathBuf::from(home).join(".ptmux")
        }
    };
    Ok(dir.join("mux.sock"))
}

/// Bind a UNIX listener at `path`, creating parent directories as needed
/// and restricting the socket to owner-only access.
pub fn bind(path: &Path) -> anyhow::Result<std::os::unix::net::UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("creating socket directory")?;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
            .context("setting socket directory permissions")?;
    }
    if path.exists() {
        std::fs::remove_file(path).context("removing stale socket")?;
    }
    let listener = std::os::unix::net::UnixListener::bind(path).context("binding socket")?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("setting socket permissions")?;
    Ok(listener)
}
