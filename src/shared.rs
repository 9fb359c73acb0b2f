use std::fs::OpenOptions;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};

use crate::constants::{ExchangeFlags, SessionFlags, MAX_CLIENTS, SESSION_MAGIC, SESSION_VERSION};
use crate::error::{Error, Result};

/// Size of the shared segment
pub const RECORD_SIZE: usize = mem::size_of::<SessionRecord>();

/// One registered client, matching a registry slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSlot {
    /// Client id, 0 when the slot is free
    pub id: u32,
    /// Process hosting the client
    pub pid: u32,
}

/// Transient request/response record for handing channel endpoints to a
/// new client. Read by responders without holding the session mutex, so
/// every field is atomic.
#[repr(C)]
#[derive(Debug)]
pub struct ExchangeRecord {
    pub state: AtomicU32,
    pub requester_id: AtomicU32,
    pub requester_pid: AtomicU32,
    pub responder_id: AtomicU32,
    /// Endpoint values as duplicated into the requester: input, output
    pub handles: [AtomicU64; 2],
    /// Bumped by the requester after publishing a request
    pub request_event: AtomicU32,
    /// Bumped by the responder after publishing handles
    pub reply_event: AtomicU32,
}

/// Session record matching the layout of the shared segment
#[repr(C)]
#[derive(Debug)]
pub struct SessionRecord {
    magic: u32,
    version: u32,
    flags: u32,
    engine_pid: u32,
    exec_hash: u64,
    client_count: u32,
    next_client_id: u32,
    clients: [ClientSlot; MAX_CLIENTS],
    exchange: ExchangeRecord,
}

impl SessionRecord {
    fn init(&mut self) {
        self.magic = SESSION_MAGIC;
        self.version = SESSION_VERSION;
        self.flags = SessionFlags::empty().bits();
        self.engine_pid = 0;
        self.exec_hash = 0;
        self.client_count = 0;
        self.next_client_id = 1;
        self.clients = [ClientSlot::default(); MAX_CLIENTS];
        self.exchange.clear();
    }

    pub fn flags(&self) -> SessionFlags {
        SessionFlags::from_bits_truncate(self.flags)
    }

    pub fn is_launched(&self) -> bool {
        self.flags().contains(SessionFlags::LAUNCHED)
    }

    /// Set by a teardown that has not finished removing the segment
    pub fn is_tearing_down(&self) -> bool {
        self.flags().contains(SessionFlags::TEARING_DOWN)
    }

    pub fn engine_pid(&self) -> u32 {
        self.engine_pid
    }

    pub fn exec_hash(&self) -> u64 {
        self.exec_hash
    }

    pub fn client_count(&self) -> u32 {
        self.client_count
    }

    /// Record a freshly spawned engine; it is not usable until `mark_launched`
    pub fn set_engine(&mut self, pid: u32, exec_hash: u64) {
        self.engine_pid = pid;
        self.exec_hash = exec_hash;
    }

    pub fn mark_launched(&mut self) {
        self.flags = (self.flags() | SessionFlags::LAUNCHED).bits();
    }

    pub fn mark_tearing_down(&mut self) {
        self.flags = (self.flags() | SessionFlags::TEARING_DOWN).bits();
    }

    /// Forget a failed launch so the next client spawns again
    pub fn clear_engine(&mut self) {
        self.engine_pid = 0;
        self.exec_hash = 0;
        self.flags = (self.flags() - SessionFlags::LAUNCHED).bits();
    }

    /// Drop every engine and client trace, as on a fresh segment
    pub fn reset(&mut self) {
        self.init();
    }

    /// Add a client to the registry and return its id
    pub fn register_client(&mut self, pid: u32) -> Result<u32> {
        let slot = self
            .clients
            .iter_mut()
            .find(|slot| slot.id == 0)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("more than {} clients on one engine", MAX_CLIENTS))
            })?;

        let id = self.next_client_id.max(1);
        self.next_client_id = id.wrapping_add(1).max(1);
        *slot = ClientSlot { id, pid };
        self.client_count += 1;
        Ok(id)
    }

    /// Remove a client; returns false when it was not registered
    pub fn deregister_client(&mut self, id: u32) -> bool {
        match self.clients.iter_mut().find(|slot| slot.id == id && id != 0) {
            Some(slot) => {
                *slot = ClientSlot::default();
                self.client_count = self.client_count.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientSlot> {
        self.clients.iter().filter(|slot| slot.id != 0)
    }

    pub fn exchange(&self) -> &ExchangeRecord {
        &self.exchange
    }
}

impl ExchangeRecord {
    pub fn state(&self) -> ExchangeFlags {
        ExchangeFlags::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ExchangeFlags) {
        self.state.store(state.bits(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.set_state(ExchangeFlags::empty());
        self.requester_id.store(0, Ordering::Release);
        self.requester_pid.store(0, Ordering::Release);
        self.responder_id.store(0, Ordering::Release);
        for handle in &self.handles {
            handle.store(0, Ordering::Release);
        }
    }
}

/// Memory-mapped shared session segment
#[derive(Debug)]
pub struct SharedSession {
    map: MmapMut,
    path: PathBuf,
}

impl SharedSession {
    /// Map the segment at `path`, creating and initializing it when needed.
    /// Callers hold the session mutex.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::process("failed to open shared segment", e))?;

        let len = file.metadata()?.len();
        if len < RECORD_SIZE as u64 {
            file.set_len(RECORD_SIZE as u64)
                .map_err(|e| Error::process("failed to size shared segment", e))?;
        }

        // SAFETY: the file stays at least RECORD_SIZE long while mapped;
        // only driver clients write it, under the session mutex.
        let map = unsafe {
            MmapOptions::new()
                .len(RECORD_SIZE)
                .map_mut(&file)
                .map_err(|e| Error::process("failed to map shared segment", e))?
        };

        let mut session = SharedSession {
            map,
            path: path.to_path_buf(),
        };

        let record = session.record_mut();
        if record.magic != SESSION_MAGIC || record.version != SESSION_VERSION {
            log::debug!("initializing shared segment {}", path.display());
            record.init();
        }
        Ok(session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &SessionRecord {
        // SAFETY: the map is page aligned, RECORD_SIZE long, and every bit
        // pattern is a valid SessionRecord.
        unsafe { &*(self.map.as_ptr() as *const SessionRecord) }
    }

    pub fn record_mut(&mut self) -> &mut SessionRecord {
        // SAFETY: see `record`; `&mut self` keeps this mapping exclusive
        // within the process.
        unsafe { &mut *(self.map.as_mut_ptr() as *mut SessionRecord) }
    }

    pub fn flush(&self) -> Result<()> {
        self.map
            .flush()
            .map_err(|e| Error::process("failed to flush shared segment", e))
    }

    /// Unmap and delete the segment
    pub fn destroy(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.map);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::process("failed to remove shared segment", e)),
        }
    }
}
