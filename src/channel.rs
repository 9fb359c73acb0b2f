use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{MAX_BACKOFF, POLL_INTERVAL};
use crate::error::{Error, Result, SyncObject};
use crate::identity::NamedObjects;

/// Direction of a channel, seen from the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Driver writes, engine reads (engine stdin)
    Input,
    /// Engine writes, driver reads (engine stdout)
    Output,
}

/// Byte transport to the engine, as the protocol codec needs it
pub trait Transport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for bytes to become readable
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Read whatever is available, at most `buf.len()` bytes
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// The two half-duplex streams connecting the driver to the engine
#[derive(Debug)]
pub struct ChannelHandles {
    input: File,
    output: File,
    input_path: PathBuf,
    output_path: PathBuf,
}

impl ChannelHandles {
    pub fn new(input: File, output: File, input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            input,
            output,
            input_path,
            output_path,
        }
    }

    /// Create both named channels, replacing leftovers, and open them
    pub fn create(objects: &NamedObjects) -> Result<Self> {
        for path in [&objects.input, &objects.output] {
            remove_if_present(path)?;
            make_fifo(path)?;
        }
        Ok(Self {
            input: open_fifo(&objects.input)?,
            output: open_fifo(&objects.output)?,
            input_path: objects.input.clone(),
            output_path: objects.output.clone(),
        })
    }

    /// Open the named channels of a running engine
    pub fn open(objects: &NamedObjects, timeout: Duration) -> Result<Self> {
        Ok(Self {
            input: acquire_channel(&objects.input, ChannelRole::Input, timeout)?,
            output: acquire_channel(&objects.output, ChannelRole::Output, timeout)?,
            input_path: objects.input.clone(),
            output_path: objects.output.clone(),
        })
    }

    pub fn input(&self) -> &File {
        &self.input
    }

    pub fn output(&self) -> &File {
        &self.output
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Give up the paths and keep the two endpoints: input, output
    pub fn into_files(self) -> (File, File) {
        (self.input, self.output)
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            input: self.input.try_clone()?,
            output: self.output.try_clone()?,
            input_path: self.input_path.clone(),
            output_path: self.output_path.clone(),
        })
    }
}

impl Transport for ChannelHandles {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.input
            .write_all(bytes)
            .and_then(|()| self.input.flush())
            .map_err(|source| Error::Channel {
                path: self.input_path.clone(),
                source,
            })
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.output.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        loop {
            // SAFETY: one valid pollfd for a descriptor owned by `self.output`.
            let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
            if rc >= 0 {
                return Ok(rc > 0 && pollfd.revents & libc::POLLIN != 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(Error::Channel {
                    path: self.output_path.clone(),
                    source: err,
                });
            }
        }
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.output.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::Channel {
                        path: self.output_path.clone(),
                        source,
                    })
                }
            }
        }
    }
}

/// Open one named channel of a running engine. The channel appears
/// asynchronously, so opening is retried with backoff up to `timeout`.
pub fn acquire_channel(path: &Path, role: ChannelRole, timeout: Duration) -> Result<File> {
    let start = Instant::now();
    let mut backoff = POLL_INTERVAL;
    loop {
        match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                log::trace!("opening {:?} channel {}", role, path.display());
                return open_fifo(path);
            }
            Ok(_) => {
                return Err(Error::Channel {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "not a named pipe"),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::Channel {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        if start.elapsed() >= timeout {
            return Err(Error::Timeout {
                object: SyncObject::Channel,
                path: path.to_path_buf(),
                waited: start.elapsed(),
            });
        }
        thread::sleep(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

// Read-write opens of a FIFO never block, whether or not the peer end is
// open yet.
fn open_fifo(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| Error::Channel {
            path: path.to_path_buf(),
            source,
        })
}

fn make_fifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::Channel {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
    })?;
    // SAFETY: `c_path` is a valid NUL-terminated string.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(Error::Channel {
            path: path.to_path_buf(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

pub(crate) fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::process("failed to remove named object", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn objects(dir: &Path) -> NamedObjects {
        NamedObjects {
            segment: dir.join("t.shm"),
            session_lock: dir.join("t.lock"),
            query_lock: dir.join("t.qlock"),
            input: dir.join("t.in"),
            output: dir.join("t.out"),
        }
    }

    #[test]
    fn created_channels_are_fifos() {
        let dir = TempDir::new().unwrap();
        let objects = objects(dir.path());
        let _handles = ChannelHandles::create(&objects).unwrap();

        for path in [&objects.input, &objects.output] {
            let meta = std::fs::metadata(path).unwrap();
            assert!(meta.file_type().is_fifo());
        }
    }

    #[test]
    fn bytes_written_to_output_fifo_are_readable() {
        let dir = TempDir::new().unwrap();
        let objects = objects(dir.path());
        let mut handles = ChannelHandles::create(&objects).unwrap();

        assert!(!handles.wait_readable(Duration::from_millis(10)).unwrap());

        let mut engine_side = ChannelHandles::open(&objects, Duration::from_millis(100)).unwrap();
        engine_side.output.write_all(b"answer\n").unwrap();

        assert!(handles.wait_readable(Duration::from_millis(500)).unwrap());
        let mut buf = [0u8; 64];
        let n = handles.read_chunk(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"answer\n");
    }

    #[test]
    fn missing_channel_times_out() {
        let dir = TempDir::new().unwrap();
        let err = acquire_channel(
            &dir.path().join("absent.in"),
            ChannelRole::Input,
            Duration::from_millis(40),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                object: SyncObject::Channel,
                ..
            }
        ));
    }

    #[test]
    fn regular_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.in");
        std::fs::write(&path, b"").unwrap();
        let err = acquire_channel(&path, ChannelRole::Input, Duration::from_millis(40)).unwrap_err();
        assert!(matches!(err, Error::Channel { .. }));
    }
}
