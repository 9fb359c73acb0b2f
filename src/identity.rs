//! Stable identities for an engine target.
//!
//! Every OS-level object shared between clients is named after the hash of
//! the engine's working directory, so two clients pointed at the same
//! directory meet at the same segment, locks and channels. The executable
//! path is hashed separately and recorded in the shared segment to catch
//! clients that disagree on which engine binary runs there.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::constants::{
    INPUT_CHANNEL_SUFFIX, OBJECT_PREFIX, OUTPUT_CHANNEL_SUFFIX, QUERY_LOCK_SUFFIX,
    SEGMENT_SUFFIX, SESSION_LOCK_SUFFIX,
};
use crate::error::{Error, Result};

/// Stable 64-bit digest of a path
pub fn path_hash(path: &Path) -> u64 {
    let digest = Sha256::digest(path.as_os_str().as_encoded_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Identity of one engine target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineIdentity {
    working_dir: PathBuf,
    executable: PathBuf,
    dir_hash: u64,
    exec_hash: u64,
}

impl EngineIdentity {
    /// Resolve both paths to absolute form and hash them
    pub fn new(working_dir: &Path, executable: &Path) -> Result<Self> {
        let working_dir = working_dir.canonicalize().map_err(|e| {
            Error::InvalidConfig(format!(
                "working directory {}: {}",
                working_dir.display(),
                e
            ))
        })?;
        let executable = executable.canonicalize().map_err(|e| {
            Error::InvalidConfig(format!("executable {}: {}", executable.display(), e))
        })?;

        Ok(Self {
            dir_hash: path_hash(&working_dir),
            exec_hash: path_hash(&executable),
            working_dir,
            executable,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn exec_hash(&self) -> u64 {
        self.exec_hash
    }

    /// `<prefix>_<hash-of-working-directory>`
    pub fn object_name(&self) -> String {
        format!("{}_{:016x}", OBJECT_PREFIX, self.dir_hash)
    }

    /// Path of a named object with the given suffix inside `runtime_dir`
    pub fn object_path(&self, runtime_dir: &Path, suffix: &str) -> PathBuf {
        runtime_dir.join(format!("{}.{}", self.object_name(), suffix))
    }

    pub fn objects(&self, runtime_dir: &Path) -> NamedObjects {
        NamedObjects {
            segment: self.object_path(runtime_dir, SEGMENT_SUFFIX),
            session_lock: self.object_path(runtime_dir, SESSION_LOCK_SUFFIX),
            query_lock: self.object_path(runtime_dir, QUERY_LOCK_SUFFIX),
            input: self.object_path(runtime_dir, INPUT_CHANNEL_SUFFIX),
            output: self.object_path(runtime_dir, OUTPUT_CHANNEL_SUFFIX),
        }
    }
}

/// Filesystem paths of every shared object for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedObjects {
    pub segment: PathBuf,
    pub session_lock: PathBuf,
    pub query_lock: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl NamedObjects {
    pub fn all(&self) -> [&Path; 5] {
        [
            &self.input,
            &self.output,
            &self.segment,
            &self.query_lock,
            &self.session_lock,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn object_name_is_stable_and_per_directory() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let exe = std::env::current_exe().unwrap();

        let first = EngineIdentity::new(a.path(), &exe).unwrap();
        let again = EngineIdentity::new(a.path(), &exe).unwrap();
        let other = EngineIdentity::new(b.path(), &exe).unwrap();

        assert_eq!(first.object_name(), again.object_name());
        assert_ne!(first.object_name(), other.object_name());
        assert!(first.object_name().starts_with("tapibridge_"));
    }

    #[test]
    fn relative_and_absolute_paths_agree() {
        let dir = TempDir::new().unwrap();
        let exe = std::env::current_exe().unwrap();
        let nested = dir.path().join("x");
        std::fs::create_dir(&nested).unwrap();
        let dotted = nested.join("..");

        let plain = EngineIdentity::new(dir.path(), &exe).unwrap();
        let via_parent = EngineIdentity::new(&dotted, &exe).unwrap();
        assert_eq!(plain.object_name(), via_parent.object_name());
    }

    #[test]
    fn missing_working_dir_is_a_config_error() {
        let exe = std::env::current_exe().unwrap();
        let err = EngineIdentity::new(Path::new("/definitely/not/here"), &exe).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
