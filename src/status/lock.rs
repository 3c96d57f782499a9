//! Execution and Resource Locks
//!
//! - [`ExecLock`]: the coarse "system is busy" lock taken by scripts and
//!   auto-analyses. Re-acquisition by the owning thread nests, while any
//!   other thread blocks until the lock is free.
//! - [`ResourceLock`]: a reentrant guard around the data store, scoped by
//!   an RAII guard.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};

use super::observer::Observer;
use crate::error::{RelaxError, RelaxResult};

/// The kind of code holding the execution lock.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "auto-analysis")]
    AutoAnalysis,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Script => f.write_str("script"),
            LockMode::AutoAnalysis => f.write_str("auto-analysis"),
        }
    }
}

#[derive(Default)]
struct ExecState {
    /// Stack of (holder, mode), most recent last
    holders: Vec<(String, LockMode)>,
    owner: Option<ThreadId>,
    nest: usize,
}

/// The execution lock.
///
/// Every [`ExecLock::acquire`] must be matched by one
/// [`ExecLock::release`], including on failure paths. [`ExecLock::lock`]
/// returns a guard which does this automatically.
pub struct ExecLock {
    state: Mutex<ExecState>,
    freed: Condvar,
    observer: Arc<Observer>,
    debug: bool,
}

impl ExecLock {
    /// Creates the lock, notifying `observer` on every real acquisition
    /// and release.
    pub fn new(observer: Arc<Observer>, debug: bool) -> Self {
        Self {
            state: Mutex::new(ExecState::default()),
            freed: Condvar::new(),
            observer,
            debug,
        }
    }

    fn state(&self) -> MutexGuard<'_, ExecState> {
        self.state.lock()
    }

    /// Records the holder, blocking while another thread owns the lock.
    ///
    /// Returns true if the real lock was taken (false for a nested
    /// acquisition by the owning thread).
    fn take(&self, name: &str, mode: LockMode) -> bool {
        if self.debug {
            debug!("Execution lock:  Acquisition by '{}' ('{}' mode).", name, mode);
        }

        let current = thread::current().id();
        let mut state = self.state();

        if state.owner == Some(current) {
            state.holders.push((name.to_string(), mode));
            state.nest += 1;
            if self.debug {
                debug!("Execution lock:  Nested by '{}' (to level {}).", name, state.nest);
            }
            return false;
        }

        while state.owner.is_some() {
            self.freed.wait(&mut state);
        }

        state.owner = Some(current);
        state.holders.push((name.to_string(), mode));
        true
    }

    /// Acquires the lock for a named holder.
    ///
    /// The `exec_lock` observers are notified after a real acquisition.
    ///
    /// If an observer fails the acquisition is undone before the error is
    /// returned, so an `Err` never leaves the lock held.
    pub fn acquire(&self, name: &str, mode: LockMode) -> RelaxResult<()> {
        if self.take(name, mode) {
            if let Err(e) = self.observer.notify() {
                self.untake();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reverts a real acquisition made by [`ExecLock::take`].
    fn untake(&self) {
        let mut state = self.state();
        if let Some((name, _)) = state.holders.pop() {
            warn!("Execution lock:  Acquisition by '{}' undone.", name);
        }
        state.owner = None;
        state.nest = 0;
        drop(state);
        self.freed.notify_one();
    }

    /// Acquires the lock and returns a guard releasing it on drop.
    pub fn lock(&self, name: &str, mode: LockMode) -> RelaxResult<ExecLockGuard<'_>> {
        let real = self.take(name, mode);
        let guard = ExecLockGuard { lock: self };
        if real {
            self.observer.notify()?;
        }
        Ok(guard)
    }

    /// Releases the most recent acquisition.
    ///
    /// Nested acquisitions only pop their holder record; the real lock is
    /// released, and observers notified, when the outermost holder leaves.
    pub fn release(&self) -> RelaxResult<()> {
        let current = thread::current().id();
        let mut state = self.state();

        let Some((name, mode)) = state.holders.last().cloned() else {
            return Err(RelaxError::LockNotHeld("execution".to_string()));
        };

        if state.owner != Some(current) {
            return Err(RelaxError::LockNotOwned {
                lock: "execution".to_string(),
                holder: name,
            });
        }

        if self.debug {
            debug!("Execution lock:  Release by '{}' ('{}' mode).", name, mode);
        }
        state.holders.pop();

        if state.nest > 0 {
            if self.debug {
                debug!(
                    "Execution lock:  Nested locking decrement ({} -> {}).",
                    state.nest,
                    state.nest - 1
                );
            }
            state.nest -= 1;
            return Ok(());
        }

        state.owner = None;
        drop(state);
        self.freed.notify_one();

        self.observer.notify()
    }

    /// Releases one level of the lock if the calling thread owns it.
    ///
    /// Returns true if something was released.
    pub fn release_if_owned(&self) -> RelaxResult<bool> {
        if !self.is_owned_by_current_thread() {
            return Ok(false);
        }
        self.release()?;
        Ok(true)
    }

    /// Returns true while any holder is recorded.
    pub fn locked(&self) -> bool {
        !self.state().holders.is_empty()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.state().owner == Some(thread::current().id())
    }

    /// The most recent holder and its mode.
    pub fn holder(&self) -> Option<(String, LockMode)> {
        self.state().holders.last().cloned()
    }

    /// The number of recorded holders.
    pub fn depth(&self) -> usize {
        self.state().holders.len()
    }
}

impl fmt::Debug for ExecLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ExecLock")
            .field("holders", &state.holders)
            .field("nest", &state.nest)
            .finish()
    }
}

/// Releases one level of the execution lock when dropped.
pub struct ExecLockGuard<'a> {
    lock: &'a ExecLock,
}

impl Drop for ExecLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!("Failed to release the execution lock: {}", e);
        }
    }
}

/// A named reentrant lock.
///
/// The same thread may acquire it any number of times; other threads
/// block until every guard has been dropped.
pub struct ResourceLock {
    name: String,
    mutex: ReentrantMutex<()>,
    debug: bool,
}

impl ResourceLock {
    pub fn new(name: impl Into<String>, debug: bool) -> Self {
        Self {
            name: name.into(),
            mutex: ReentrantMutex::new(()),
            debug,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the lock on behalf of `acquirer`.
    pub fn acquire(&self, acquirer: &str) -> ResourceGuard<'_> {
        if self.debug {
            debug!("Lock '{}':  Acquisition by '{}'.", self.name, acquirer);
        }

        ResourceGuard {
            _guard: self.mutex.lock(),
            lock: self,
            acquirer: acquirer.to_string(),
        }
    }

    /// Returns true if any thread holds the lock.
    pub fn locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

impl fmt::Debug for ResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("name", &self.name)
            .field("locked", &self.locked())
            .finish()
    }
}

/// Holds a [`ResourceLock`] until dropped.
pub struct ResourceGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
    lock: &'a ResourceLock,
    acquirer: String,
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if self.lock.debug {
            debug!("Lock '{}':  Release by '{}'.", self.lock.name, self.acquirer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn exec_lock() -> (ExecLock, Arc<AtomicUsize>) {
        let observer = Arc::new(Observer::new("exec_lock", false));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        observer
            .register("counter", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }, None)
            .unwrap();
        (ExecLock::new(observer, true), count)
    }

    #[test]
    fn test_acquire_release() {
        let (lock, notified) = exec_lock();
        assert!(!lock.locked());

        lock.acquire("script.py", LockMode::Script).unwrap();
        assert!(lock.locked());
        assert_eq!(lock.holder(), Some(("script.py".to_string(), LockMode::Script)));
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        lock.release().unwrap();
        assert!(!lock.locked());
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nested_acquisition_balance() {
        let (lock, notified) = exec_lock();

        lock.acquire("script", LockMode::Script).unwrap();
        lock.acquire("noe", LockMode::AutoAnalysis).unwrap();
        lock.acquire("inner", LockMode::Script).unwrap();
        assert_eq!(lock.depth(), 3);
        assert_eq!(lock.holder().unwrap().1, LockMode::Script);

        lock.release().unwrap();
        assert!(lock.locked());
        assert_eq!(lock.holder().unwrap().0, "noe");

        lock.release().unwrap();
        assert!(lock.locked());

        lock.release().unwrap();
        assert!(!lock.locked());
        assert_eq!(lock.depth(), 0);

        // Only the outermost acquire/release pair reaches the observers
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_acquire_leaves_lock_free() {
        let observer = Arc::new(Observer::new("exec_lock", false));
        observer
            .register("failing", || Err(RelaxError::analysis("observer down")), None)
            .unwrap();
        let lock = Arc::new(ExecLock::new(observer, false));

        let err = lock.acquire("script", LockMode::Script).unwrap_err();
        assert!(matches!(err, RelaxError::ObserverCallback { .. }));
        assert!(!lock.locked());
        assert!(!lock.is_owned_by_current_thread());
        assert_eq!(lock.depth(), 0);

        // Another thread is not blocked by the undone acquisition
        let other = Arc::clone(&lock);
        let result = thread::spawn(move || other.acquire("worker", LockMode::AutoAnalysis))
            .join()
            .unwrap();
        assert!(result.is_err());
        assert!(!lock.locked());
    }

    #[test]
    fn test_failed_lock_guard_releases() {
        let observer = Arc::new(Observer::new("exec_lock", false));
        observer
            .register("failing", || Err(RelaxError::analysis("observer down")), None)
            .unwrap();
        let lock = ExecLock::new(observer, false);

        assert!(lock.lock("bundle", LockMode::AutoAnalysis).is_err());
        assert!(!lock.locked());
    }

    #[test]
    fn test_release_unlocked_fails() {
        let (lock, _) = exec_lock();
        assert!(matches!(lock.release(), Err(RelaxError::LockNotHeld(_))));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (lock, _) = exec_lock();
        {
            let _guard = lock.lock("bundle", LockMode::AutoAnalysis).unwrap();
            assert!(lock.locked());
        }
        assert!(!lock.locked());
    }

    #[test]
    fn test_release_if_owned() {
        let (lock, _) = exec_lock();
        assert!(!lock.release_if_owned().unwrap());

        lock.acquire("bundle", LockMode::AutoAnalysis).unwrap();
        assert!(lock.release_if_owned().unwrap());
        assert!(!lock.locked());
    }

    #[test]
    fn test_other_thread_blocks_instead_of_nesting() {
        let (lock, _) = exec_lock();
        let lock = Arc::new(lock);

        lock.acquire("foreground", LockMode::Script).unwrap();

        let (tx, rx) = mpsc::channel();
        let worker_lock = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            worker_lock.acquire("worker", LockMode::AutoAnalysis).unwrap();
            tx.send(worker_lock.depth()).unwrap();
            worker_lock.release().unwrap();
        });

        // The worker must still be waiting
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(lock.depth(), 1);

        lock.release().unwrap();
        let depth = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(depth, 1);

        handle.join().unwrap();
        assert!(!lock.locked());
    }

    #[test]
    fn test_release_from_other_thread_rejected() {
        let (lock, _) = exec_lock();
        let lock = Arc::new(lock);
        lock.acquire("foreground", LockMode::Script).unwrap();

        let other = Arc::clone(&lock);
        let result = thread::spawn(move || other.release()).join().unwrap();
        assert!(matches!(result, Err(RelaxError::LockNotOwned { .. })));
        assert!(lock.locked());

        lock.release().unwrap();
    }

    #[test]
    fn test_resource_lock_is_reentrant() {
        let lock = ResourceLock::new("pipe_lock", true);
        assert!(!lock.locked());

        let outer = lock.acquire("copy");
        let inner = lock.acquire("bundle");
        assert!(lock.locked());

        drop(inner);
        assert!(lock.locked());
        drop(outer);
        assert!(!lock.locked());
    }

    #[test]
    fn test_resource_lock_excludes_other_threads() {
        let lock = Arc::new(ResourceLock::new("pipe_lock", false));
        let guard = lock.acquire("foreground");

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _guard = worker.acquire("worker");
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
