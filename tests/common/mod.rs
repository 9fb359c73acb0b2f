#![allow(dead_code)]

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tapi_bridge::{DriverConfig, Result, Session};
use tempfile::TempDir;

/// Engine stand-in: prints a banner, logs every command it reads to
/// `engine.log` in its working directory and answers a few of them.
pub const MOCK_ENGINE: &str = r#"#!/bin/sh
printf 'Mock engine 1.0\nDES> '
while IFS= read -r line; do
  printf '%s\n' "$line" >> engine.log
  case "$line" in
    /q) exit 0 ;;
    "/tapi select pid")
      printf 'answer\nt.pid\ninteger\n$\n%s\n$\n$eot\n' "$$" ;;
    "/tapi echo "*)
      printf 'answer\nt.v\nvarchar(40)\n$\n%s\n$\n$eot\n' "${line#/tapi echo }" ;;
    /tapi*)
      printf 'success\n$eot\n' ;;
    /show_dbs)
      printf '$des\nsales\n' ;;
    /current_db)
      printf 'sales\n' ;;
    *)
      printf 'Info: ok\n' ;;
  esac
done
"#;

// A script still open for writing when another thread forks cannot be
// executed (ETXTBSY), so writing scripts and spawning engines take turns.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

fn spawn_guard() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Engine that never prints its banner
pub const SILENT_ENGINE: &str = "#!/bin/sh\nexec sleep 30\n";

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let _guard = spawn_guard();
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn write_engine(dir: &Path, name: &str) -> PathBuf {
    write_script(dir, name, MOCK_ENGINE)
}

// Common test setup: a fresh working directory that doubles as runtime
// directory, with the mock engine inside
pub fn setup_test_engine() -> (TempDir, DriverConfig) {
    let dir = TempDir::new().unwrap();
    let exe = write_engine(dir.path(), "engine.sh");
    let config = DriverConfig::new(dir.path(), exe).with_runtime_dir(dir.path());
    (dir, config)
}

pub fn connect(config: &DriverConfig) -> Result<Session> {
    let _guard = spawn_guard();
    Session::connect(config.clone())
}

pub fn engine_log(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("engine.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
