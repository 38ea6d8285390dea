//! Build slot pool: a fixed set of working directories for builds.
//!
//! Instrumented builds mutate their source tree (the descriptor file, object
//! files, the produced binary), so concurrent builds need separate copies.
//! The pool seeds N directories from the template tree once, then hands them
//! out round-robin.  Two builds that land on the same slot serialize on the
//! slot's own mutex; builds on different slots proceed in parallel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::CampaignError;

/// One working directory plus the mutex that serializes builds in it.
#[derive(Debug)]
pub struct BuildSlot {
    id: usize,
    dir: PathBuf,
    lock: Mutex<()>,
}

impl BuildSlot {
    /// The slot's working directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Take exclusive use of the slot for the duration of the guard.
    ///
    /// A worker that panicked mid-build leaves the directory dirty but the
    /// slot usable; the poison flag is cleared rather than propagated.
    pub fn acquire_dir(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed-size pool of [`BuildSlot`]s seeded from a template tree.
#[derive(Debug)]
pub struct BuildSlotPool {
    slots: Vec<Arc<BuildSlot>>,
    counter: Mutex<u64>,
}

impl BuildSlotPool {
    /// Create `count` slots under `root`, each a deep copy of `template`.
    ///
    /// A slot directory that already exists is reused as-is, so a restarted
    /// campaign skips the expensive re-copy.
    pub fn new(template: &Path, root: &Path, count: usize) -> Result<Self, CampaignError> {
        let count = count.max(1);
        std::fs::create_dir_all(root)?;

        info!("seeding {count} build slots from {}", template.display());
        let mut slots = Vec::with_capacity(count);
        for id in 0..count {
            let dir = root.join(format!("build_{id}"));
            if dir.exists() {
                debug!("slot {id} already seeded, reusing {}", dir.display());
            } else {
                copy_tree(template, &dir)?;
            }
            slots.push(Arc::new(BuildSlot {
                id,
                dir,
                lock: Mutex::new(()),
            }));
        }

        Ok(Self {
            slots,
            counter: Mutex::new(0),
        })
    }

    /// Round-robin pick of the next slot.
    ///
    /// The caller must hold [`BuildSlot::acquire_dir`] for the whole build
    /// step; the pool itself only distributes.
    pub fn acquire(&self) -> Arc<BuildSlot> {
        let mut counter = self
            .counter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idx = (*counter as usize) % self.slots.len();
        *counter += 1;
        Arc::clone(&self.slots[idx])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Recursively copy `src` into `dst` (created fresh).
///
/// Symlinks are followed; the instrumented source trees we copy only link
/// within themselves or to headers that are stable for the campaign.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn template() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("build.sh"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.cpp"), "int main(){}\n").unwrap();
        dir
    }

    #[test]
    fn pool_seeds_independent_copies() {
        let template = template();
        let root = tempfile::tempdir().unwrap();
        let pool = BuildSlotPool::new(template.path(), root.path(), 3).unwrap();

        assert_eq!(pool.len(), 3);
        let dirs: BTreeSet<PathBuf> = (0..3).map(|_| pool.acquire().dir.clone()).collect();
        assert_eq!(dirs.len(), 3);
        for dir in &dirs {
            assert!(dir.join("build.sh").exists());
            assert!(dir.join("src/main.cpp").exists());
        }
    }

    #[test]
    fn acquire_round_robins() {
        let template = template();
        let root = tempfile::tempdir().unwrap();
        let pool = BuildSlotPool::new(template.path(), root.path(), 2).unwrap();

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), c.id());
    }

    #[test]
    fn existing_slot_dirs_are_reused() {
        let template = template();
        let root = tempfile::tempdir().unwrap();

        let _ = BuildSlotPool::new(template.path(), root.path(), 1).unwrap();
        // A file written into the slot must survive pool re-creation.
        std::fs::write(root.path().join("build_0/artifact"), "keep").unwrap();
        let pool = BuildSlotPool::new(template.path(), root.path(), 1).unwrap();
        assert!(pool.acquire().dir().join("artifact").exists());
    }

    #[test]
    fn slot_mutex_serializes_same_slot() {
        let template = template();
        let root = tempfile::tempdir().unwrap();
        let pool = Arc::new(BuildSlotPool::new(template.path(), root.path(), 1).unwrap());

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(std::thread::spawn(move || {
                let slot = pool.acquire();
                let _guard = slot.acquire_dir();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // One slot means at most one build inside the guard at any time.
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
