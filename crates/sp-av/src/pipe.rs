//! OS pipe between the feeder and an external decoder.
//!
//! Both ends are close-on-exec: a decoder process only ever holds the read
//! end it receives as stdin, so closing [`PipeWriteEnd`] is guaranteed to
//! deliver EOF. The kernel buffer is enlarged where the platform allows it;
//! failing to do so is logged and otherwise ignored.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use sp_core::{Error, Result};

/// Used when the page size cannot be queried.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// The platform's memory page size.
pub fn page_size() -> usize {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// A freshly created pipe pair.
///
/// Pipes are single use: once either end is closed a new bridge is needed.
#[derive(Debug)]
pub struct PipeBridge {
    write: PipeWriteEnd,
    read: PipeReadEnd,
    capacity: Option<usize>,
}

impl PipeBridge {
    /// Create a pipe and request a kernel buffer of `buffer_pages` pages.
    ///
    /// `buffer_pages == 0` keeps the platform default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipeCreation`] if the pipe cannot be created.
    pub fn open(buffer_pages: usize) -> Result<Self> {
        let (read, write) = create_pipe().map_err(Error::pipe_creation)?;

        let capacity = if buffer_pages > 0 {
            // Both descriptors share one kernel buffer.
            resize_buffer(&write, buffer_pages.saturating_mul(page_size()))
        } else {
            None
        };

        Ok(Self {
            write: PipeWriteEnd(File::from(write)),
            read: PipeReadEnd(read),
            capacity,
        })
    }

    /// Kernel buffer size actually granted, when resizing succeeded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Split into the feeder's write end and the decoder's read end.
    pub fn split(self) -> (PipeWriteEnd, PipeReadEnd) {
        (self.write, self.read)
    }
}

/// Write end, exclusively owned by the feeder. Dropping it signals EOF.
#[derive(Debug)]
pub struct PipeWriteEnd(File);

impl PipeWriteEnd {
    pub fn into_file(self) -> File {
        self.0
    }
}

impl Write for PipeWriteEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Read end, handed to the decoder when it starts.
#[derive(Debug)]
pub struct PipeReadEnd(OwnedFd);

impl PipeReadEnd {
    /// For in-process decoders reading with blocking I/O.
    pub fn into_file(self) -> File {
        File::from(self.0)
    }
}

impl From<PipeReadEnd> for Stdio {
    fn from(end: PipeReadEnd) -> Self {
        Stdio::from(end.0)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn create_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (read, write) = nix::unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn resize_buffer(fd: &OwnedFd, size: usize) -> Option<usize> {
    use nix::fcntl::{fcntl, FcntlArg};

    let Ok(requested) = nix::libc::c_int::try_from(size) else {
        tracing::info!(size, "Requested pipe buffer size is out of range; keeping default");
        return None;
    };

    match fcntl(fd.as_raw_fd(), FcntlArg::F_SETPIPE_SZ(requested)) {
        Ok(granted) => {
            tracing::debug!(requested = size, granted, "Pipe buffer resized");
            usize::try_from(granted).ok()
        }
        Err(errno) => {
            tracing::info!(size, %errno, "Changing pipe buffer size failed; keeping default");
            None
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn resize_buffer(_fd: &OwnedFd, size: usize) -> Option<usize> {
    tracing::debug!(size, "Pipe buffer resizing is not supported on this platform");
    None
}
