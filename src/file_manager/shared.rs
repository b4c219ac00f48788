//! State shared between a connection's read side and write side (§4.7).
//!
//! One lock guards both the local and remote file maps so a publish on
//! one side and a lookup on the other never race.

use std::sync::{Arc, Mutex};

use crate::file_map::FileMap;

struct Inner {
    /// Files this side has published (local node data/definitions).
    local: FileMap,
    /// Files the peer has published to us.
    remote: FileMap,
    connected: bool,
}

/// Shared, lock-guarded file maps for one connection.
pub struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    /// Create a new, empty, disconnected share.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Shared {
            inner: Mutex::new(Inner {
                local: FileMap::new(),
                remote: FileMap::new(),
                connected: false,
            }),
        })
    }

    /// Run `f` with exclusive access to the local file map.
    pub fn with_local<R>(&self, f: impl FnOnce(&mut FileMap) -> R) -> R {
        let mut guard = self.inner.lock().expect("shared lock poisoned");
        f(&mut guard.local)
    }

    /// Run `f` with exclusive access to the remote file map.
    pub fn with_remote<R>(&self, f: impl FnOnce(&mut FileMap) -> R) -> R {
        let mut guard = self.inner.lock().expect("shared lock poisoned");
        f(&mut guard.remote)
    }

    /// Run `f` with exclusive access to both maps at once (for moves that
    /// must appear atomic, e.g. disconnect teardown).
    pub fn with_both<R>(&self, f: impl FnOnce(&mut FileMap, &mut FileMap) -> R) -> R {
        let mut guard = self.inner.lock().expect("shared lock poisoned");
        f(&mut guard.local, &mut guard.remote)
    }

    /// Mark the connection up or down.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().expect("shared lock poisoned").connected = connected;
    }

    /// True once the greeting handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().expect("shared lock poisoned").connected
    }

    /// Drop all tracked files on both sides, e.g. on disconnect, returning
    /// what was dropped for any caller that wants to notify listeners.
    pub fn clear_all(&self) -> (Vec<crate::file_info::FileInfo>, Vec<crate::file_info::FileInfo>) {
        self.with_both(|local, remote| (local.clear_weak(), remote.clear_weak()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_info::{FileInfo, FileType};

    #[test]
    fn local_and_remote_are_independent() {
        let shared = Shared::new();
        shared
            .with_local(|m| m.insert(FileInfo::new_local("a.out", 0, 4, FileType::Fixed)))
            .unwrap();
        assert_eq!(shared.with_local(|m| m.len()), 1);
        assert_eq!(shared.with_remote(|m| m.len()), 0);
    }

    #[test]
    fn connected_flag_round_trips() {
        let shared = Shared::new();
        assert!(!shared.is_connected());
        shared.set_connected(true);
        assert!(shared.is_connected());
    }
}
