//! One controller per base topic.
//!
//! Two controllers on the same topic namespace would fight over the retained
//! fan state. The lock is a Unix socket, which the OS releases when the
//! process dies, so a crashed controller never leaves a stale lock behind.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceLockError {
    #[error("another controller is already running for {0}")]
    AlreadyRunning(String),

    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Held for as long as the controller runs; the socket file is removed on drop.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock the controller slot for `base_topic`.
    pub fn acquire(base_topic: &str) -> Result<Self, InstanceLockError> {
        let path = Self::socket_path(base_topic);

        if path.exists() {
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning(base_topic.to_string()));
            }
            // Left behind by a SIGKILL'd process
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(base_topic.to_string()))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Socket path for `base_topic` under the user's runtime dir (or `/tmp`).
    pub fn socket_path(base_topic: &str) -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(format!("fan-thermostat-{}.sock", socket_name(base_topic)))
    }
}

/// Topic reduced to characters safe in a file name.
fn socket_name(base_topic: &str) -> String {
    let name: String = base_topic
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
