use tokio::sync::{Mutex, MutexGuard};

/// Run-lock keeping a periodic job from overlapping itself
///
/// Acquisition never waits: a run that finds the lock held is skipped.
#[derive(Debug)]
pub struct JobLock {
    name: &'static str,
    lock: Mutex<()>,
}

impl JobLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the lock for one run, or `None` if a run is already in progress
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.try_lock().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let lock = JobLock::new("archive");
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(lock.try_acquire().is_some());
    }
}
