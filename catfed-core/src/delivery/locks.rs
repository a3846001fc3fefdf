//! Per-filename async locks that disappear once nobody holds or awaits them

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct FilenameLocks {
    slots: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held while a filename is being worked on; dropping it releases the lock
/// and forgets the slot if it is idle
pub(crate) struct FilenameGuard<'a> {
    locks: &'a FilenameLocks,
    filename: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FilenameLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn slot(&self, filename: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock `filename`, or `None` if someone already holds it
    pub(crate) fn try_acquire(&self, filename: &str) -> Option<FilenameGuard<'_>> {
        match self.slot(filename).try_lock_owned() {
            Ok(guard) => Some(FilenameGuard {
                locks: self,
                filename: filename.to_string(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.prune(filename);
                None
            }
        }
    }

    /// Lock `filename`, waiting for the current holder
    pub(crate) async fn acquire(&self, filename: &str) -> FilenameGuard<'_> {
        let guard = self.slot(filename).lock_owned().await;
        FilenameGuard {
            locks: self,
            filename: filename.to_string(),
            guard: Some(guard),
        }
    }

    // Every clone of a slot is taken under the map lock, so a count of one
    // here means only the map refers to it.
    fn prune(&self, filename: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots
            .get(filename)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(filename);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for FilenameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.prune(&self.filename);
    }
}
