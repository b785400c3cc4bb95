use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::power::Checkpoint;

use super::table::PowerTable;

/// Rewrites a CSV file with the partial table after every cell.
///
/// Writes happen on a background thread; a failed write is logged and the
/// sweep carries on. A write that has been overtaken by a newer table is
/// skipped. Pending writes are joined by [`CsvCheckpoint::flush`] and when
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct CsvCheckpoint {
    path: PathBuf,
    latest: Arc<AtomicUsize>,
    lock: Arc<Mutex<()>>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// A poisoned lock only means an earlier writer panicked; the guarded state
/// is still usable.
fn acquire<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("checkpoint lock was poisoned by a failed writer");
            poisoned.into_inner()
        }
    }
}

impl CsvCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            latest: Arc::new(AtomicUsize::new(0)),
            lock: Arc::new(Mutex::new(())),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for every write started so far.
    pub fn flush(&self) {
        let handles: Vec<_> = acquire(&self.pending).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                log::warn!("checkpoint writer for {} panicked", self.path.display());
            }
        }
    }
}

impl Checkpoint for CsvCheckpoint {
    fn save(&self, table: &PowerTable) {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let table = table.clone();
        let path = self.path.clone();
        let latest = Arc::clone(&self.latest);
        let lock = Arc::clone(&self.lock);
        let handle = std::thread::spawn(move || {
            let _guard = acquire(&lock);
            if latest.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Err(e) = table.to_csv(&path) {
                log::warn!("could not write checkpoint {}: {}", path.display(), e);
            }
        });

        let mut pending = acquire(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

impl Drop for CsvCheckpoint {
    fn drop(&mut self) {
        if Arc::strong_count(&self.pending) == 1 {
            self.flush();
        }
    }
}
