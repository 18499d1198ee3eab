// SPDX-License-Identifier: MIT OR Apache-2.0
//! Descriptor plumbing: CLOEXEC pipes, duplication, pty pairs, and the
//! async endpoints the parent keeps.
//!
//! Everything goes through `nix`. Unsafe code is limited to the `pre_exec`
//! registration, the `TIOCSCTTY` ioctl it runs in the child, and adopting
//! the descriptor returned by `F_DUPFD_CLOEXEC`.

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::pty::openpty;
use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};
use nix::unistd;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::unix::pipe;

#[allow(unsafe_code)]
mod ioctl {
    nix::ioctl_write_int_bad!(tiocsctty, nix::libc::TIOCSCTTY);
}

/// A pipe with both ends close-on-exec. Returns `(read, write)`.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    Ok(unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// A pipe with both ends close-on-exec. Returns `(read, write)`.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = unistd::pipe()?;
    set_cloexec(read.as_raw_fd(), true)?;
    set_cloexec(write.as_raw_fd(), true)?;
    Ok((read, write))
}

/// Set or clear `FD_CLOEXEC`. Async-signal-safe, so usable in `pre_exec`.
fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    let mut flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    flags.set(FdFlag::FD_CLOEXEC, on);
    fcntl(fd, FcntlArg::F_SETFD(flags))?;
    Ok(())
}

/// Duplicate a descriptor the caller does not own, close-on-exec.
#[allow(unsafe_code)]
pub(crate) fn dup_raw(fd: RawFd) -> io::Result<OwnedFd> {
    let new = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(0))?;
    // SAFETY: `new` is a fresh descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(new) })
}

/// Make the calling process a session leader whose controlling terminal is
/// `slave`. Async-signal-safe; runs in `pre_exec`.
#[allow(unsafe_code)]
fn become_terminal_leader(slave: RawFd) -> io::Result<()> {
    unistd::setsid()?;
    // SAFETY: TIOCSCTTY takes an integer argument, no memory.
    unsafe {
        ioctl::tiocsctty(slave, 0)?;
    }
    Ok(())
}

/// Arrange for the child to keep `inherit` open across exec and, when
/// `terminal` is set, to take that pty slave as its controlling terminal.
#[allow(unsafe_code)]
pub(crate) fn prepare_child(
    command: &mut tokio::process::Command,
    inherit: Vec<RawFd>,
    terminal: Option<RawFd>,
) {
    if inherit.is_empty() && terminal.is_none() {
        return;
    }
    // SAFETY: the closure only calls async-signal-safe functions and does
    // not allocate.
    unsafe {
        command.pre_exec(move || {
            for &fd in &inherit {
                set_cloexec(fd, false)?;
            }
            if let Some(slave) = terminal {
                become_terminal_leader(slave)?;
            }
            Ok(())
        });
    }
}

/// Open a pty pair, both ends close-on-exec. Echo is disabled on the slave
/// when `echo` is false.
pub(crate) fn open_pty(echo: bool) -> io::Result<(OwnedFd, OwnedFd)> {
    let pty = openpty(None, None)?;
    set_cloexec(pty.master.as_raw_fd(), true)?;
    set_cloexec(pty.slave.as_raw_fd(), true)?;
    if !echo {
        let mut termios = tcgetattr(&pty.slave)?;
        termios.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(&pty.slave, SetArg::TCSANOW, &termios)?;
    }
    Ok((pty.master, pty.slave))
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Non-blocking pty master registered with the tokio reactor. `EIO` after
/// the slave side closes reads as end-of-file.
#[derive(Debug)]
pub struct PtyMaster {
    fd: AsyncFd<OwnedFd>,
}

impl PtyMaster {
    pub(crate) fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }
}

impl AsyncRead for PtyMaster {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let mut guard = ready!(this.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            let result = guard.try_io(|inner| Ok(unistd::read(inner.as_raw_fd(), unfilled)?));
            match result {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if e.raw_os_error() == Some(Errno::EIO as i32) => return Poll::Ready(Ok(())),
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for PtyMaster {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let mut guard = ready!(this.fd.poll_write_ready(cx))?;
            let result = guard.try_io(|inner| Ok(unistd::write(inner.get_ref(), data)?));
            match result {
                Ok(outcome) => return Poll::Ready(outcome),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Parent-side reader for a captured stdout: a pipe, or the pty master.
#[derive(Debug)]
pub enum StdoutReader {
    /// Pipe read end.
    Pipe(pipe::Receiver),
    /// Pty master.
    Pty(PtyMaster),
}

impl StdoutReader {
    pub(crate) fn pipe(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self::Pipe(pipe::Receiver::from_owned_fd(fd)?))
    }
}

impl AsyncRead for StdoutReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Pipe(r) => Pin::new(r).poll_read(cx, buf),
            Self::Pty(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

/// Parent-side writer for a captured stdin: a pipe, or the pty master.
#[derive(Debug)]
pub enum StdinWriter {
    /// Pipe write end.
    Pipe(pipe::Sender),
    /// Pty master.
    Pty(PtyMaster),
}

impl StdinWriter {
    pub(crate) fn pipe(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self::Pipe(pipe::Sender::from_owned_fd(fd)?))
    }

    /// Returns `true` for a pty, where closing means sending `VEOF`.
    pub fn is_pty(&self) -> bool {
        matches!(self, Self::Pty(_))
    }
}

impl AsyncWrite for StdinWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Pipe(w) => Pin::new(w).poll_write(cx, data),
            Self::Pty(w) => Pin::new(w).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Pipe(w) => Pin::new(w).poll_flush(cx),
            Self::Pty(w) => Pin::new(w).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Pipe(w) => Pin::new(w).poll_shutdown(cx),
            Self::Pty(w) => Pin::new(w).poll_shutdown(cx),
        }
    }
}
