//! Process-wide registry of live sessions, spawned engines and handshake
//! responders.
//!
//! Sessions register on connect and are dropped from the registry when
//! they go away. Spawned engine children are kept here so the client that
//! tears an engine down can reap it when it is ours. `shutdown()`
//! disconnects whatever is left, never kills an engine other processes
//! still use, and should be called before the process
//! exits; nothing runs it implicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::channel::ChannelHandles;
use crate::constants::POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::handshake::{ChannelTransfer, HandshakeResponder};
use crate::session::SessionInner;
use crate::shared::SharedSession;

#[derive(Default)]
struct Registry {
    /// Engines spawned by this process, by pid
    children: Mutex<HashMap<u32, Child>>,
    /// Sessions opened by this process
    sessions: Mutex<Vec<Weak<SessionInner>>>,
    /// One responder per shared segment this process serves
    responders: Mutex<HashMap<PathBuf, HandshakeResponder>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

// Registry data stays consistent across a panic elsewhere
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn register_session(session: &Arc<SessionInner>) {
    let mut sessions = lock(&REGISTRY.sessions);
    sessions.retain(|weak| weak.strong_count() > 0);
    sessions.push(Arc::downgrade(session));
}

/// Sessions of this process that are still alive
pub fn live_sessions() -> usize {
    lock(&REGISTRY.sessions)
        .iter()
        .filter(|weak| weak.strong_count() > 0)
        .count()
}

pub(crate) fn adopt_child(child: Child) {
    lock(&REGISTRY.children).insert(child.id(), child);
}

/// Pids of spawned engines not reaped yet
pub fn engine_children() -> Vec<u32> {
    lock(&REGISTRY.children).keys().copied().collect()
}

/// Reap children that have already exited
pub(crate) fn reap_exited() {
    lock(&REGISTRY.children).retain(|pid, child| match child.try_wait() {
        Ok(Some(status)) => {
            log::debug!("engine {} exited with {}", pid, status);
            false
        }
        Ok(None) => true,
        Err(e) => {
            log::warn!("failed to poll engine {}: {}", pid, e);
            false
        }
    });
}

/// Wait for our child `pid` to exit. `None` when `pid` is not a child
/// spawned by this process.
pub(crate) fn wait_child(pid: u32, timeout: Duration) -> Result<Option<bool>> {
    let Some(mut child) = lock(&REGISTRY.children).remove(&pid) else {
        return Ok(None);
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("engine {} exited with {}", pid, status);
                return Ok(Some(true));
            }
            Ok(None) if start.elapsed() < timeout => thread::sleep(POLL_INTERVAL),
            Ok(None) => {
                lock(&REGISTRY.children).insert(pid, child);
                return Ok(Some(false));
            }
            Err(e) => return Err(Error::process("failed to wait for engine", e)),
        }
    }
}

/// Answer handle-exchange requests for `client_id` from now on
pub(crate) fn serve_handles(
    segment: &Path,
    transfer: Arc<dyn ChannelTransfer>,
    client_id: u32,
    handles: ChannelHandles,
) -> Result<()> {
    let mut responders = lock(&REGISTRY.responders);
    if !responders.contains_key(segment) {
        let responder = HandshakeResponder::spawn(SharedSession::open(segment)?, transfer)?;
        responders.insert(segment.to_path_buf(), responder);
    }
    if let Some(responder) = responders.get(segment) {
        responder.serve(client_id, handles);
    }
    Ok(())
}

/// Stop answering for `client_id`; the responder stops with its last client
pub(crate) fn withdraw_handles(segment: &Path, client_id: u32) {
    let idle = {
        let mut responders = lock(&REGISTRY.responders);
        let now_idle = responders
            .get(segment)
            .is_some_and(|responder| responder.withdraw(client_id));
        if now_idle {
            responders.remove(segment)
        } else {
            None
        }
    };
    // Joined outside the lock
    drop(idle);
}

/// Disconnect every live session of this process and forget spawned
/// engines. Engines with clients left elsewhere keep running.
pub fn shutdown() -> Result<()> {
    let sessions: Vec<_> = lock(&REGISTRY.sessions).drain(..).collect();
    let mut first_error = None;

    for session in sessions.iter().filter_map(Weak::upgrade) {
        if let Err(e) = session.disconnect() {
            log::warn!("shutdown: {}", e);
            first_error.get_or_insert(e);
        }
    }

    let responders: Vec<_> = lock(&REGISTRY.responders).drain().collect();
    drop(responders);

    // A child still running here belongs to an engine other processes are
    // attached to; its last client stops it.
    let children: Vec<_> = lock(&REGISTRY.children).drain().collect();
    for (pid, mut child) in children {
        match child.try_wait() {
            Ok(Some(status)) => log::debug!("engine {} exited with {}", pid, status),
            Ok(None) => log::info!("shutdown: leaving engine {} to its remaining clients", pid),
            Err(e) => log::warn!("shutdown: engine {}: {}", pid, e),
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn unknown_pid_is_not_our_child() {
        assert_eq!(wait_child(u32::MAX, Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn exited_child_is_reaped() {
        let child = Command::new("/bin/sh").arg("-c").arg("exit 0").spawn().unwrap();
        let pid = child.id();
        adopt_child(child);
        assert_eq!(wait_child(pid, Duration::from_secs(5)).unwrap(), Some(true));
        assert!(!engine_children().contains(&pid));
    }

    #[test]
    fn running_child_is_kept_after_timeout() {
        let child = Command::new("/bin/sh").arg("-c").arg("sleep 5").spawn().unwrap();
        let pid = child.id();
        adopt_child(child);
        assert_eq!(wait_child(pid, Duration::from_millis(20)).unwrap(), Some(false));
        assert!(engine_children().contains(&pid));

        let mut child = lock(&REGISTRY.children).remove(&pid).unwrap();
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
