#![cfg(unix)]

mod common;

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use common::{connect, engine_log, setup_test_engine};
use tapi_bridge::registry;
use tapi_bridge::shared::SharedSession;
use tapi_bridge::supervisor::is_running;
use tapi_bridge::sync::NamedMutex;
use tapi_bridge::{EngineIdentity, SyncObject};

// Kept in their own binary and run one at a time: shutdown disconnects
// every session of the process.
static SHUTDOWN_LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SHUTDOWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[test]
fn test_shutdown_disconnects_live_sessions() {
    let _serial = serial();
    let (_dir, config) = setup_test_engine();
    let objects = EngineIdentity::new(&config.working_dir, &config.executable)
        .unwrap()
        .objects(&config.runtime_dir);

    let first = connect(&config).unwrap();
    let second = connect(&config).unwrap();
    let pid = first.engine_pid().unwrap();
    assert_eq!(registry::live_sessions(), 2);

    registry::shutdown().unwrap();

    assert!(!first.is_connected());
    assert!(!second.is_connected());
    assert!(!is_running(pid));
    assert!(registry::engine_children().is_empty());
    assert!(!objects.segment.exists());
}

#[test]
fn test_shutdown_leaves_engine_used_elsewhere() {
    let _serial = serial();
    let (dir, config) = setup_test_engine();
    let objects = EngineIdentity::new(&config.working_dir, &config.executable)
        .unwrap()
        .objects(&config.runtime_dir);
    let session_lock = NamedMutex::new(&objects.session_lock, SyncObject::SessionLock);

    let session = connect(&config).unwrap();
    let pid = session.engine_pid().unwrap();

    // A client hosted by another process
    let foreign = {
        let _guard = session_lock.acquire(Duration::from_secs(5)).unwrap();
        let mut segment = SharedSession::open(&objects.segment).unwrap();
        let id = segment.record_mut().register_client(999_999).unwrap();
        segment.flush().unwrap();
        id
    };

    registry::shutdown().unwrap();

    assert!(!session.is_connected());
    assert!(is_running(pid));
    assert!(registry::engine_children().is_empty());
    assert_eq!(session.supervisor().client_count().unwrap(), 1);
    assert!(!engine_log(&dir).contains(&"/q".to_string()));

    // The remaining client still reaches the engine and stops it last
    let again = connect(&config).unwrap();
    assert!(!again.launched_engine().unwrap());
    assert_eq!(again.engine_pid().unwrap(), pid);
    {
        let _guard = session_lock.acquire(Duration::from_secs(5)).unwrap();
        let mut segment = SharedSession::open(&objects.segment).unwrap();
        assert!(segment.record_mut().deregister_client(foreign));
        segment.flush().unwrap();
    }
    again.disconnect().unwrap();

    assert_eq!(engine_log(&dir).last().map(String::as_str), Some("/q"));
    assert!(!is_running(pid));
    assert!(!objects.segment.exists());
}
