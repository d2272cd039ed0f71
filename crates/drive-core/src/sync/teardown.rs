//! Scoped handle release

use std::sync::Mutex;

use tracing::debug;

use crate::drive::{Drive, DriveOps};

/// Handles a session opened, released in reverse order of acquisition.
///
/// Released on [`release`](Teardown::release) or on drop, whichever comes
/// first; releasing twice is a no-op.
#[derive(Debug, Default)]
pub struct Teardown {
    handles: Mutex<Vec<Drive>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opened handle.
    pub fn push(&self, drive: Drive) {
        self.lock().push(drive);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every registered handle, newest first.
    pub fn release(&self) {
        let handles = std::mem::take(&mut *self.lock());
        for drive in handles.into_iter().rev() {
            debug!(drive = %drive.label(), "Releasing handle");
            drive.release();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Drive>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}
