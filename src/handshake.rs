//! Handle exchange between clients of one engine.
//!
//! A client that cannot open the engine channels by name asks a connected
//! peer for them. The requester publishes its pid and the chosen peer in
//! the shared exchange record and bumps `request_event`. The peer's
//! responder thread duplicates its endpoints into the requester, stores
//! the resulting values and bumps `reply_event`. A peer that does not
//! answer within the handshake timeout is evicted from the registry and
//! the next member is asked.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::ChannelHandles;
use crate::constants::ExchangeFlags;
use crate::error::{Error, Result, SyncObject};
use crate::identity::NamedObjects;
use crate::shared::{ClientSlot, ExchangeRecord, SharedSession};
use crate::sync::{signal, wait_for_change};

/// How often the responder re-checks its stop flag
const RESPONDER_SLICE: Duration = Duration::from_millis(50);

/// Platform step of the exchange: duplicating endpoints into another
/// process and taking ownership of endpoints received from a peer
pub trait ChannelTransfer: Send + Sync {
    /// Duplicate `handles` into `target_pid`. Returns the endpoint values
    /// as they are valid inside the target: input, output.
    fn duplicate_into(&self, target_pid: u32, handles: &ChannelHandles) -> Result<[u64; 2]>;

    /// Take ownership of endpoint values duplicated into this process
    fn adopt(&self, values: [u64; 2], objects: &NamedObjects) -> Result<ChannelHandles>;
}

/// Descriptor transfer between clients living in one process
#[derive(Debug, Default, Clone, Copy)]
pub struct SameProcessTransfer;

impl ChannelTransfer for SameProcessTransfer {
    fn duplicate_into(&self, target_pid: u32, handles: &ChannelHandles) -> Result<[u64; 2]> {
        if target_pid != std::process::id() {
            return Err(Error::Handshake(format!(
                "cannot duplicate descriptors into process {}",
                target_pid
            )));
        }
        let (input, output) = handles.try_clone()?.into_files();
        Ok([input.into_raw_fd() as u64, output.into_raw_fd() as u64])
    }

    fn adopt(&self, values: [u64; 2], objects: &NamedObjects) -> Result<ChannelHandles> {
        let [input, output] = values;
        if input == 0 || output == 0 {
            return Err(Error::Handshake("peer sent empty endpoints".to_string()));
        }
        // SAFETY: both descriptors were duplicated for this process by
        // `duplicate_into` and nothing else owns them.
        let (input, output) = unsafe {
            (
                File::from_raw_fd(input as RawFd),
                File::from_raw_fd(output as RawFd),
            )
        };
        Ok(ChannelHandles::new(
            input,
            output,
            objects.input.clone(),
            objects.output.clone(),
        ))
    }
}

/// Obtain channel endpoints from a registered peer.
///
/// The caller holds the session mutex for the whole exchange and is
/// already registered as `requester`. Unresponsive peers are evicted.
pub fn request_handles(
    segment: &mut SharedSession,
    transfer: &dyn ChannelTransfer,
    requester: ClientSlot,
    objects: &NamedObjects,
    timeout: Duration,
) -> Result<ChannelHandles> {
    let start = Instant::now();
    let mut asked: Vec<u32> = vec![requester.id];

    loop {
        let peer = segment
            .record()
            .clients()
            .find(|slot| !asked.contains(&slot.id))
            .copied();
        let Some(peer) = peer else {
            return Err(Error::Timeout {
                object: SyncObject::Handshake,
                path: segment.path().to_path_buf(),
                waited: start.elapsed(),
            });
        };
        asked.push(peer.id);

        let exchange = segment.record().exchange();
        let reply = publish_and_wait(exchange, requester, peer, timeout);
        let values = [
            exchange.handles[0].load(Ordering::Acquire),
            exchange.handles[1].load(Ordering::Acquire),
        ];
        exchange.clear();

        match reply {
            Some(state) if state.contains(ExchangeFlags::HANDLES_SENT) => {
                log::debug!("client {} received channels from client {}", requester.id, peer.id);
                return transfer.adopt(values, objects);
            }
            Some(_) => {
                return Err(Error::Handshake(format!(
                    "client {} (pid {}) could not duplicate its channels",
                    peer.id, peer.pid
                )));
            }
            None => {
                log::warn!(
                    "evicting unresponsive client {} (pid {}) after {:?}",
                    peer.id,
                    peer.pid,
                    timeout
                );
                segment.record_mut().deregister_client(peer.id);
            }
        }
    }
}

// Returns the reply state, or None when the peer stayed silent
fn publish_and_wait(
    exchange: &ExchangeRecord,
    requester: ClientSlot,
    peer: ClientSlot,
    timeout: Duration,
) -> Option<ExchangeFlags> {
    exchange.clear();
    exchange.requester_id.store(requester.id, Ordering::Release);
    exchange.requester_pid.store(requester.pid, Ordering::Release);
    exchange.responder_id.store(peer.id, Ordering::Release);
    let seen = exchange.reply_event.load(Ordering::Acquire);
    exchange.set_state(ExchangeFlags::REQUESTED);
    signal(&exchange.request_event);

    wait_for_change(&exchange.reply_event, seen, timeout)?;
    let state = exchange.state();
    state
        .intersects(ExchangeFlags::HANDLES_SENT | ExchangeFlags::FAILED)
        .then_some(state)
}

type Served = Arc<Mutex<HashMap<u32, ChannelHandles>>>;

/// Background thread answering exchange requests addressed to any client
/// of this process
pub struct HandshakeResponder {
    served: Served,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HandshakeResponder {
    /// Start answering requests published in `segment`
    pub fn spawn(segment: SharedSession, transfer: Arc<dyn ChannelTransfer>) -> Result<Self> {
        let served: Served = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = thread::Builder::new()
            .name("tapi-handshake".to_string())
            .spawn({
                let served = Arc::clone(&served);
                let stop = Arc::clone(&stop);
                move || respond_loop(segment, transfer, served, stop)
            })
            .map_err(|e| Error::process("failed to start handshake responder", e))?;

        Ok(Self {
            served,
            stop,
            thread: Some(thread),
        })
    }

    /// Answer requests addressed to `client_id` with `handles`
    pub fn serve(&self, client_id: u32, handles: ChannelHandles) {
        self.lock().insert(client_id, handles);
    }

    /// Stop answering for `client_id`; returns true when no client is left
    pub fn withdraw(&self, client_id: u32) -> bool {
        let mut served = self.lock();
        served.remove(&client_id);
        served.is_empty()
    }

    pub fn is_serving(&self, client_id: u32) -> bool {
        self.lock().contains_key(&client_id)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("handshake responder panicked");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ChannelHandles>> {
        self.served.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HandshakeResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn respond_loop(
    segment: SharedSession,
    transfer: Arc<dyn ChannelTransfer>,
    served: Served,
    stop: Arc<AtomicBool>,
) {
    let exchange = segment.record().exchange();
    let mut seen = exchange.request_event.load(Ordering::Acquire);

    while !stop.load(Ordering::Acquire) {
        let Some(current) = wait_for_change(&exchange.request_event, seen, RESPONDER_SLICE) else {
            continue;
        };
        seen = current;
        if !exchange.state().contains(ExchangeFlags::REQUESTED) {
            continue;
        }

        let responder_id = exchange.responder_id.load(Ordering::Acquire);
        let served = served.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handles) = served.get(&responder_id) else {
            continue;
        };

        let target = exchange.requester_pid.load(Ordering::Acquire);
        match transfer.duplicate_into(target, handles) {
            Ok([input, output]) => {
                exchange.handles[0].store(input, Ordering::Release);
                exchange.handles[1].store(output, Ordering::Release);
                exchange.set_state(ExchangeFlags::HANDLES_SENT);
                log::debug!("client {} sent channels to pid {}", responder_id, target);
            }
            Err(e) => {
                log::warn!("client {} failed to send channels to pid {}: {}", responder_id, target, e);
                exchange.set_state(ExchangeFlags::FAILED);
            }
        }
        signal(&exchange.reply_event);
    }
}
