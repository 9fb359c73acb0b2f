//! Engine lifecycle: launch on first connect, attach afterwards, tear down
//! when the last client leaves.

use std::fs;
use std::io;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::{remove_if_present, ChannelHandles};
use crate::codec::{CommandKind, ProtocolCodec};
use crate::config::{AttachMode, DriverConfig};
use crate::constants::POLL_INTERVAL;
use crate::error::{Error, Result, SyncObject};
use crate::handshake::{request_handles, ChannelTransfer};
use crate::identity::{EngineIdentity, NamedObjects};
use crate::registry;
use crate::shared::{ClientSlot, SharedSession};
use crate::sync::NamedMutex;

/// Grace period after SIGKILL before giving up on the engine
const KILL_GRACE: Duration = Duration::from_secs(1);

/// A client's membership in a running engine
#[derive(Debug)]
pub struct Attachment {
    pub client_id: u32,
    pub engine_pid: u32,
    /// Whether this client spawned the engine
    pub launched: bool,
    pub handles: ChannelHandles,
}

/// Launches, attaches to and tears down the engine of one identity
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: DriverConfig,
    identity: EngineIdentity,
    objects: NamedObjects,
    codec: ProtocolCodec,
}

impl ProcessSupervisor {
    pub fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let identity = EngineIdentity::new(&config.working_dir, &config.executable)?;
        let objects = identity.objects(&config.runtime_dir);
        let codec = ProtocolCodec::new(config.read_buffer_size, &config.timeouts);
        Ok(Self {
            config,
            identity,
            objects,
            codec,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    pub fn objects(&self) -> &NamedObjects {
        &self.objects
    }

    pub fn codec(&self) -> &ProtocolCodec {
        &self.codec
    }

    fn session_lock(&self) -> NamedMutex {
        NamedMutex::new(&self.objects.session_lock, SyncObject::SessionLock)
    }

    /// Primitive serializing engine round trips across every client
    pub fn query_lock(&self) -> NamedMutex {
        NamedMutex::new(&self.objects.query_lock, SyncObject::QueryLock)
    }

    /// Number of clients currently registered against the engine
    pub fn client_count(&self) -> Result<u32> {
        let _guard = self.session_lock().acquire(self.config.timeouts.session_lock)?;
        if !self.objects.segment.exists() {
            return Ok(0);
        }
        let segment = SharedSession::open(&self.objects.segment)?;
        Ok(segment.record().client_count())
    }

    /// Make sure the engine runs and join it as a new client
    pub fn ensure_engine(&self) -> Result<Attachment> {
        registry::reap_exited();

        let _guard = self.session_lock().acquire(self.config.timeouts.session_lock)?;
        let mut segment = SharedSession::open(&self.objects.segment)?;
        if segment.record().is_tearing_down() {
            self.finish_teardown(&mut segment)?;
        }

        let attachment = if segment.record().is_launched() {
            self.attach(&mut segment)?
        } else {
            self.launch(&mut segment)?
        };

        if let AttachMode::HandleExchange(transfer) = &self.config.attach_mode {
            if let Err(e) = self.serve(transfer, &attachment) {
                segment.record_mut().deregister_client(attachment.client_id);
                return Err(e);
            }
        }

        segment.flush()?;
        log::info!(
            "client {} joined engine {} in {} ({} clients)",
            attachment.client_id,
            attachment.engine_pid,
            self.identity.working_dir().display(),
            segment.record().client_count()
        );
        Ok(attachment)
    }

    fn launch(&self, segment: &mut SharedSession) -> Result<Attachment> {
        let mut handles = ChannelHandles::create(&self.objects)?;
        let stdin = handles.input().try_clone()?;
        let stdout = handles.output().try_clone()?;

        log::info!(
            "launching {} in {}",
            self.identity.executable().display(),
            self.identity.working_dir().display()
        );
        let spawned = Command::new(self.identity.executable())
            .current_dir(self.identity.working_dir())
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::null())
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                segment.record_mut().clear_engine();
                self.remove_channels();
                return Err(Error::Spawn {
                    executable: self.identity.executable().to_path_buf(),
                    source,
                });
            }
        };

        let pid = child.id();
        registry::adopt_child(child);
        segment.record_mut().set_engine(pid, self.identity.exec_hash());

        let banner = self.codec.read_until_marker(
            &mut handles,
            &self.config.banner_marker,
            self.config.timeouts.channel_open,
        );
        match banner {
            Ok(Some(text)) => log::trace!("engine banner: {} bytes", text.len()),
            Ok(None) => {
                self.abort_launch(segment, pid);
                return Err(Error::Timeout {
                    object: SyncObject::Banner,
                    path: self.objects.output.clone(),
                    waited: self.config.timeouts.channel_open,
                });
            }
            Err(e) => {
                self.abort_launch(segment, pid);
                return Err(e);
            }
        }

        segment.record_mut().mark_launched();
        let client_id = segment.record_mut().register_client(std::process::id())?;
        Ok(Attachment {
            client_id,
            engine_pid: pid,
            launched: true,
            handles,
        })
    }

    fn abort_launch(&self, segment: &mut SharedSession, pid: u32) {
        log::warn!("engine {} never finished its banner, killing it", pid);
        kill(pid);
        if let Err(e) = wait_for_exit(pid, KILL_GRACE) {
            log::warn!("{}", e);
        }
        segment.record_mut().clear_engine();
        self.remove_channels();
    }

    fn attach(&self, segment: &mut SharedSession) -> Result<Attachment> {
        let record = segment.record();
        if record.exec_hash() != self.identity.exec_hash() {
            return Err(Error::IdentityMismatch {
                working_dir: self.identity.working_dir().to_path_buf(),
                running: format!("executable hash {:016x}", record.exec_hash()),
                requested: format!(
                    "{} (hash {:016x})",
                    self.identity.executable().display(),
                    self.identity.exec_hash()
                ),
            });
        }

        let engine_pid = record.engine_pid();
        if !is_running(engine_pid) {
            return Err(Error::EngineGone {
                pid: engine_pid,
                segment: self.objects.segment.clone(),
            });
        }

        let pid = std::process::id();
        let (client_id, handles) = match &self.config.attach_mode {
            AttachMode::OpenByName => {
                let handles = ChannelHandles::open(&self.objects, self.config.timeouts.channel_open)?;
                (segment.record_mut().register_client(pid)?, handles)
            }
            AttachMode::HandleExchange(transfer) => {
                let id = segment.record_mut().register_client(pid)?;
                let requester = ClientSlot { id, pid };
                match request_handles(
                    segment,
                    transfer.as_ref(),
                    requester,
                    &self.objects,
                    self.config.timeouts.handshake,
                ) {
                    Ok(handles) => (id, handles),
                    Err(e) => {
                        segment.record_mut().deregister_client(id);
                        return Err(e);
                    }
                }
            }
        };

        Ok(Attachment {
            client_id,
            engine_pid,
            launched: false,
            handles,
        })
    }

    fn serve(&self, transfer: &Arc<dyn ChannelTransfer>, attachment: &Attachment) -> Result<()> {
        registry::serve_handles(
            &self.objects.segment,
            Arc::clone(transfer),
            attachment.client_id,
            attachment.handles.try_clone()?,
        )
    }

    /// Leave the engine. The last client stops it and removes every named
    /// object of the identity.
    pub fn release_engine(&self, client_id: u32, handles: ChannelHandles) -> Result<()> {
        registry::withdraw_handles(&self.objects.segment, client_id);

        let _guard = self.session_lock().acquire(self.config.timeouts.session_lock)?;
        let mut segment = SharedSession::open(&self.objects.segment)?;
        if !segment.record_mut().deregister_client(client_id) {
            log::warn!("client {} was no longer registered", client_id);
        }

        let remaining = segment.record().client_count();
        if remaining > 0 {
            segment.flush()?;
            log::info!("client {} left, {} clients remain", client_id, remaining);
            return Ok(());
        }

        let pid = segment.record().engine_pid();
        segment.record_mut().mark_tearing_down();
        segment.flush()?;
        log::info!("last client {} left, stopping engine {}", client_id, pid);

        let mut handles = handles;
        if let Err(e) = self.codec.send(&mut handles, CommandKind::Quit, "") {
            log::warn!("failed to send quit to engine {}: {}", pid, e);
        }
        drop(handles);

        let exited = if pid == 0 {
            Ok(())
        } else {
            self.stop_engine(pid)
        };

        segment.record_mut().clear_engine();
        segment.destroy()?;
        for path in [&self.objects.input, &self.objects.output, &self.objects.query_lock] {
            remove_if_present(path)?;
        }
        // Removed while still held; waiters notice the unlinked inode
        remove_if_present(&self.objects.session_lock)?;
        exited
    }

    // The flag outlives a teardown that failed half way. Its engine was
    // told to quit and its clients are gone, so nobody may attach to it.
    fn finish_teardown(&self, segment: &mut SharedSession) -> Result<()> {
        let pid = segment.record().engine_pid();
        log::warn!(
            "finishing interrupted teardown of engine {} in {}",
            pid,
            self.identity.working_dir().display()
        );
        if is_running(pid) {
            kill(pid);
            match registry::wait_child(pid, KILL_GRACE)? {
                Some(true) => {}
                _ => wait_for_exit(pid, KILL_GRACE)?,
            }
        }
        segment.record_mut().reset();
        self.remove_channels();
        remove_if_present(&self.objects.query_lock)?;
        segment.flush()
    }

    fn stop_engine(&self, pid: u32) -> Result<()> {
        let timeout = self.config.timeouts.engine_exit;
        // Our own child is reaped; anyone else's engine is polled
        let exited = match registry::wait_child(pid, timeout)? {
            Some(exited) => exited,
            None => wait_for_exit(pid, timeout).is_ok(),
        };
        if exited {
            return Ok(());
        }
        log::warn!("engine {} ignored quit for {:?}, killing it", pid, timeout);
        kill(pid);
        match registry::wait_child(pid, KILL_GRACE)? {
            Some(true) => Ok(()),
            _ => wait_for_exit(pid, KILL_GRACE),
        }
    }

    fn remove_channels(&self) {
        for path in [&self.objects.input, &self.objects.output] {
            if let Err(e) = remove_if_present(path) {
                log::warn!("{}", e);
            }
        }
    }
}

/// Whether `pid` names a live, non-zombie process
pub fn is_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for existence and permission.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc != 0 && io::Error::last_os_error().raw_os_error() != Some(libc::EPERM) {
        return false;
    }
    !is_zombie(pid)
}

// An exited child its parent has not reaped yet still answers kill(0)
fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

fn kill(pid: u32) {
    // SAFETY: plain signal delivery to a pid recorded at spawn time.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        log::debug!("kill({}) failed: {}", pid, io::Error::last_os_error());
    }
}

fn wait_for_exit(pid: u32, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    while is_running(pid) {
        if start.elapsed() >= timeout {
            return Err(Error::Timeout {
                object: SyncObject::EngineExit,
                path: format!("/proc/{}", pid).into(),
                waited: start.elapsed(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn config(dir: &TempDir, executable: &std::path::Path) -> DriverConfig {
        DriverConfig::new(dir.path(), executable).with_runtime_dir(dir.path())
    }

    #[test]
    fn own_process_is_running() {
        assert!(is_running(std::process::id()));
        assert!(!is_running(0));
    }

    #[test]
    fn missing_executable_is_rejected_up_front() {
        let dir = TempDir::new().unwrap();
        let err = ProcessSupervisor::new(config(&dir, &dir.path().join("nope"))).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn spawn_failure_leaves_session_unlaunched() {
        let dir = TempDir::new().unwrap();
        // Exists but is not executable
        let exe = dir.path().join("engine");
        fs::write(&exe, b"not a program").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o644)).unwrap();

        let supervisor = ProcessSupervisor::new(config(&dir, &exe)).unwrap();
        let err = supervisor.ensure_engine().unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));

        let segment = SharedSession::open(&supervisor.objects().segment).unwrap();
        assert!(!segment.record().is_launched());
        assert_eq!(segment.record().client_count(), 0);
        assert!(!supervisor.objects().input.exists());
    }

    #[test]
    fn dead_engine_is_reported() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("engine");
        fs::write(&exe, b"#!/bin/sh\n").unwrap();
        let supervisor = ProcessSupervisor::new(config(&dir, &exe)).unwrap();

        {
            let mut segment = SharedSession::open(&supervisor.objects().segment).unwrap();
            let hash = supervisor.identity().exec_hash();
            // pid_max bounds real pids well below this
            segment.record_mut().set_engine(i32::MAX as u32, hash);
            segment.record_mut().mark_launched();
        }

        let err = supervisor.ensure_engine().unwrap_err();
        assert!(matches!(err, Error::EngineGone { .. }));
        assert_eq!(supervisor.client_count().unwrap(), 0);
    }
}
