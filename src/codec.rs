//! Framing of engine commands and reading of their unframed responses.
//!
//! The engine writes plain text with no length prefix, so the end of a
//! response has to be guessed. Ordinary commands are complete on the first
//! read that comes back shorter than the read buffer. Batch and schema
//! commands pause mid-output, so for them only a known sentinel anywhere
//! in the accumulated text ends the response. Either way, a wait with no
//! bytes at all also ends it.

use std::time::{Duration, Instant};

use crate::channel::Transport;
use crate::config::Timeouts;
use crate::constants::{
    COMPLETION_SENTINELS, PROCESS_COMMAND, QUIT_COMMAND, SCHEMA_COMMAND, TAPI_PREFIX,
};
use crate::error::Result;

/// What a command is, which decides its framing, completion rule and
/// response grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// SQL query or DML in TAPI mode
    Query,
    /// Schema enumeration, argument is an optional relation name
    Schema,
    /// Batch/script execution, argument is a file path
    Batch,
    /// Plain engine command sent verbatim (`/show_dbs`, `/use_db x`, ...)
    Plain,
    /// Terminate the engine
    Quit,
}

impl CommandKind {
    /// Render `text` as the line written to the engine
    pub fn frame(self, text: &str) -> String {
        let text = text.trim();
        match self {
            CommandKind::Query => format!("{} {}\n", TAPI_PREFIX, text),
            CommandKind::Schema if text.is_empty() => format!("{} {}\n", TAPI_PREFIX, SCHEMA_COMMAND),
            CommandKind::Schema => format!("{} {} {}\n", TAPI_PREFIX, SCHEMA_COMMAND, text),
            CommandKind::Batch => format!("{} {}\n", PROCESS_COMMAND, text),
            CommandKind::Plain => format!("{}\n", text),
            CommandKind::Quit => format!("{}\n", QUIT_COMMAND),
        }
    }

    /// Whether completion is decided by sentinels instead of short reads
    pub fn uses_sentinels(self) -> bool {
        matches!(self, CommandKind::Batch | CommandKind::Schema)
    }
}

/// Writes framed commands and reads responses
#[derive(Debug, Clone)]
pub struct ProtocolCodec {
    read_buffer_size: usize,
    read_idle: Duration,
    long_read_idle: Duration,
}

impl ProtocolCodec {
    pub fn new(read_buffer_size: usize, timeouts: &Timeouts) -> Self {
        Self {
            read_buffer_size: read_buffer_size.max(1),
            read_idle: timeouts.read_idle,
            long_read_idle: timeouts.long_read_idle,
        }
    }

    /// Send one command and return the raw response text. The quit command
    /// returns an empty string without reading.
    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        kind: CommandKind,
        text: &str,
    ) -> Result<String> {
        let framed = kind.frame(text);
        log::debug!("engine <- {}", framed.trim_end());
        transport.write_all(framed.as_bytes())?;

        if kind == CommandKind::Quit {
            return Ok(String::new());
        }

        let idle = if kind.uses_sentinels() {
            self.long_read_idle
        } else {
            self.read_idle
        };
        let response = self.read_response(transport, kind.uses_sentinels(), idle)?;
        log::trace!("engine -> {} bytes", response.len());
        Ok(response)
    }

    fn read_response<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        sentinels: bool,
        idle: Duration,
    ) -> Result<String> {
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut accumulated: Vec<u8> = Vec::new();

        loop {
            if !transport.wait_readable(idle)? {
                break;
            }
            let n = transport.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            let searched_from = accumulated.len();
            accumulated.extend_from_slice(&buf[..n]);

            if sentinels {
                if contains_sentinel(&accumulated, searched_from) {
                    break;
                }
            } else if n < buf.len() {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&accumulated).into_owned())
    }

    /// Drain output until `marker` appears. Returns `None` when `timeout`
    /// passes first.
    pub fn read_until_marker<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        marker: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let start = Instant::now();
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut accumulated: Vec<u8> = Vec::new();

        while start.elapsed() < timeout {
            let remaining = timeout.saturating_sub(start.elapsed());
            if !transport.wait_readable(remaining)? {
                continue;
            }
            let n = transport.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            accumulated.extend_from_slice(&buf[..n]);
            if find(&accumulated, marker.as_bytes(), 0).is_some() {
                return Ok(Some(String::from_utf8_lossy(&accumulated).into_owned()));
            }
        }
        Ok(None)
    }
}

fn contains_sentinel(accumulated: &[u8], searched_from: usize) -> bool {
    COMPLETION_SENTINELS.iter().any(|sentinel| {
        // Re-check the tail of what was already searched in case the
        // sentinel straddles two reads.
        let from = searched_from.saturating_sub(sentinel.len());
        find(accumulated, sentinel.as_bytes(), from).is_some()
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Transport replaying canned chunks, one chunk per read
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub chunks: VecDeque<Vec<u8>>,
        pub written: Vec<u8>,
    }

    impl ScriptedTransport {
        pub fn with_chunks(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn wait_readable(&mut self, _timeout: Duration) -> Result<bool> {
            Ok(!self.chunks.is_empty())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            if chunk.len() > buf.len() {
                let rest = chunk.split_off(buf.len());
                self.chunks.push_front(rest);
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn codec(buffer: usize) -> ProtocolCodec {
        ProtocolCodec::new(buffer, &Timeouts::default())
    }

    #[test]
    fn framing_per_kind() {
        assert_eq!(CommandKind::Query.frame("select * from t"), "/tapi select * from t\n");
        assert_eq!(CommandKind::Schema.frame(""), "/tapi /dbschema\n");
        assert_eq!(CommandKind::Schema.frame("emp"), "/tapi /dbschema emp\n");
        assert_eq!(CommandKind::Batch.frame("load.sql"), "/process load.sql\n");
        assert_eq!(CommandKind::Plain.frame("/show_dbs"), "/show_dbs\n");
        assert_eq!(CommandKind::Quit.frame("ignored"), "/q\n");
    }

    #[test]
    fn quit_does_not_read() {
        let mut transport = ScriptedTransport::with_chunks(&[b"bye\n"]);
        let out = codec(16).send(&mut transport, CommandKind::Quit, "").unwrap();
        assert!(out.is_empty());
        assert_eq!(transport.written, b"/q\n");
        assert_eq!(transport.chunks.len(), 1);
    }

    #[test]
    fn short_read_completes_ordinary_command() {
        let full = [b'x'; 16];
        let mut transport = ScriptedTransport::with_chunks(&[&full, b"tail\n", b"later\n"]);
        let out = codec(16).send(&mut transport, CommandKind::Query, "select 1").unwrap();

        assert_eq!(out.len(), 16 + 5);
        assert!(out.ends_with("tail\n"));
        assert_eq!(transport.chunks.len(), 1);
    }

    #[test]
    fn batch_ignores_short_reads_until_sentinel() {
        let mut transport =
            ScriptedTransport::with_chunks(&[b"line 1\n", b"line 2\n", b"done\n"]);
        let out = codec(64).send(&mut transport, CommandKind::Batch, "f.sql").unwrap();
        // No sentinel: reads continue until nothing is left.
        assert_eq!(out, "line 1\nline 2\ndone\n");
    }

    #[test]
    fn batch_completes_at_sentinel_despite_full_read_after_it() {
        let buffer = 64;
        let trailing = vec![b'z'; buffer];
        let mut transport = ScriptedTransport::with_chunks(&[
            b"Info: Processing...\n",
            b"Info: Batch file processed.\n",
            &trailing,
        ]);
        let out = codec(buffer)
            .send(&mut transport, CommandKind::Batch, "script.sql")
            .unwrap();

        assert!(out.ends_with("Info: Batch file processed.\n"));
        assert_eq!(transport.chunks.len(), 1);
        assert_eq!(transport.chunks[0], trailing);
    }

    #[test]
    fn sentinel_split_across_reads_is_found() {
        let mut transport = ScriptedTransport::with_chunks(&[b"$table\nt\n$", b"eot\n", b"more"]);
        let out = codec(64).send(&mut transport, CommandKind::Schema, "t").unwrap();
        assert!(out.ends_with("$eot\n"));
        assert_eq!(transport.chunks.len(), 1);
    }

    #[test]
    fn banner_drained_until_marker() {
        let mut transport =
            ScriptedTransport::with_chunks(&[b"Welcome\nversion 6\n", b"DES> ", b"extra"]);
        let banner = codec(64)
            .read_until_marker(&mut transport, "DES>", Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert!(banner.contains("Welcome"));
        assert_eq!(transport.chunks.len(), 1);
    }

    #[test]
    fn banner_without_marker_returns_none() {
        let mut transport = ScriptedTransport::with_chunks(&[b"Welcome\n"]);
        let banner = codec(64)
            .read_until_marker(&mut transport, "DES>", Duration::from_millis(30))
            .unwrap();
        assert!(banner.is_none());
    }
}
