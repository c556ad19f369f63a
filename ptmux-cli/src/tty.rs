//! Terminal-mode helpers for the interactive `attach` subcommand.

use std::{
    io,
    os::unix::io::{AsRawFd, RawFd},
};

use anyhow::Context;
use nix::{
    sys::termios,
    sys::termios::{ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg},
    unistd::isatty,
};
use tracing::error;

// see `man ioctl_tty` for info on these ioctl commands
nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);

#[derive(Debug, Clone, Copy)]
pub struct Size {
    pub rows: u16,
    pub cols: u16,
}

impl Size {
    pub fn from_fd(fd: RawFd) -> anyhow::Result<Size> {
        let mut term_size = libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
        unsafe {
            // Safety: term_size is stack allocated and lives for the whole call.
            tiocgwinsz(fd, &mut term_size).context("fetching term size")?;
        }
        Ok(Size { rows: term_size.ws_row, cols: term_size.ws_col })
    }
}

/// Put stdin/stdout/stderr into raw mode for the duration of an attach
/// session, restoring the previous settings on drop. A no-op (with `old:
/// None`) when any of the three is not actually a tty.
pub fn set_attach_flags() -> anyhow::Result<AttachFlagsGuard> {
    let fd = 0;

    if !isatty(io::stdin().as_raw_fd())?
        || !isatty(io::stdout().as_raw_fd())?
        || !isatty(io::stderr().as_raw_fd())?
    {
        return Ok(AttachFlagsGuard { fd, old: None });
    }

    let old = termios::tcgetattr(fd).context("grabbing term flags")?;

    let mut new = old.clone();
    new.input_flags &= !(InputFlags::IGNBRK
        | InputFlags::BRKINT
        | InputFlags::PARMRK
        | InputFlags::ISTRIP
        | InputFlags::INLCR
        | InputFlags::IGNCR
        | InputFlags::ICRNL
        | InputFlags::IXON);
    new.output_flags &= !OutputFlags::OPOST;
    new.local_flags &= !(LocalFlags::ECHO
        | LocalFlags::ECHONL
        | LocalFlags::ICANON
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN);
    new.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
    new.control_flags |= ControlFlags::CS8;
    termios::tcsetattr(fd, SetArg::TCSANOW, &new)?;

    Ok(AttachFlagsGuard { fd, old: Some(old) })
}

pub struct AttachFlagsGuard {
    fd: RawFd,
    old: Option<termios::Termios>,
}

impl Drop for AttachFlagsGuard {
    fn drop(&mut self) {
        if let Some(old) = &self.old {
            if let Err(e) = termios::tcsetattr(self.fd, SetArg::TCSANOW, old) {
                error!("error restoring terminal settings: {:?}", e);
            }
        }
    }
}
