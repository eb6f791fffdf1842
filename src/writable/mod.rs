//! Scoped buffered writing to durable storage.
//!
//! A [`Writable`] is written start to finish and then either finished
//! (flushed, synced, closed) or aborted. Consuming `self` in `finish` and
//! `abort` makes the terminal state irrevocable at the type level.

use std::fs::File;
use std::io::{self, BufWriter, Write};

/// A scoped handle for writing an object to durable storage.
pub trait Writable {
    /// Appends `data`. A short write is an error.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flushes buffered data, syncs it to durable storage, and closes the
    /// handle, returning the first error encountered.
    fn finish(self) -> io::Result<()>;

    /// Abandons the object, closing the handle best-effort.
    fn abort(self);
}

/// A [`Writable`] backed by a buffered file.
#[derive(Debug)]
pub struct FileWritable {
    bw: BufWriter<File>,
}

impl FileWritable {
    /// Wraps `file` in a buffered writable.
    pub fn new(file: File) -> Self {
        Self {
            bw: BufWriter::new(file),
        }
    }
}

impl Writable for FileWritable {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.bw.write_all(data)
    }

    fn finish(mut self) -> io::Result<()> {
        let mut res = self.bw.flush();
        if res.is_ok() {
            res = self.bw.get_ref().sync_all();
        }
        // Close runs regardless of earlier failures; the first error wins.
        let (file, _buffered) = self.bw.into_parts();
        first_error(res, close_file(file))
    }

    fn abort(self) {
        // Take the file out of the writer so buffered data is discarded
        // rather than flushed on drop; the close is best-effort.
        let (file, _buffered) = self.bw.into_parts();
        let _ = close_file(file);
    }
}

fn first_error(err0: io::Result<()>, err1: io::Result<()>) -> io::Result<()> {
    if err0.is_err() { err0 } else { err1 }
}

/// Closes `file`, reporting the close-time error `Drop` would swallow.
/// Some filesystems surface deferred write-back failures only at close.
#[cfg(unix)]
fn close_file(file: File) -> io::Result<()> {
    use std::os::fd::IntoRawFd;

    let fd = file.into_raw_fd();
    // SAFETY: `into_raw_fd` transferred ownership of `fd` to us; it is
    // closed exactly once here and never used afterwards.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn close_file(file: File) -> io::Result<()> {
    drop(file);
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
