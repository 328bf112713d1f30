//! # One-Shot Shared Rendezvous
//!
//! A rendezvous is an event that is signaled exactly once and then stays
//! signaled for the rest of its lifetime. Waiters before the signal block
//! on a condition variable; waiters after the signal return immediately.
//! There is no reset.
//!
//! ## Usage
//!
//! ```ignore
//! let ready = Arc::new(SharedRendezvous::new());
//! // worker: ready.signal() once setup is done
//! // coordinator: ready.wait()
//! ```
//!
//! ## Orderings
//!
//! `is_signaled` is a seq-cst query for decisions that must agree across
//! threads; `is_signaled_weak` is a relaxed peek for opportunistic checks
//! where a stale `false` only costs an extra loop iteration.
//!
//! Spurious condvar wakeups are absorbed by the wait loop. Destroying the
//! rendezvous before every waiter has observed the signal is the caller's
//! responsibility (in practice: keep it behind an `Arc`).

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SharedRendezvous {
    signaled: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SharedRendezvous {
    pub fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until the rendezvous is signaled. Returns immediately if it
    /// already is.
    pub fn wait(&self) {
        if self.is_signaled() {
            return;
        }
        let mut guard = self.mutex.lock();
        while !self.is_signaled() {
            self.condvar.wait(&mut guard);
        }
    }

    /// Signals the rendezvous and wakes every waiter. Idempotent.
    pub fn signal(&self) {
        // The store must happen while holding the mutex so a waiter cannot
        // check the flag, lose the race, and then sleep past the notify.
        let _guard = self.mutex.lock();
        self.signaled.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Relaxed peek; may lag behind a concurrent `signal`.
    #[inline]
    pub fn is_signaled_weak(&self) -> bool {
        self.signaled.load(Ordering::Relaxed)
    }
}

impl Default for SharedRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_unsignaled() {
        let rendezvous = SharedRendezvous::new();
        assert!(!rendezvous.is_signaled());
        assert!(!rendezvous.is_signaled_weak());
    }

    #[test]
    fn signal_is_sticky() {
        let rendezvous = SharedRendezvous::new();
        rendezvous.signal();
        assert!(rendezvous.is_signaled());
        assert!(rendezvous.is_signaled_weak());
        rendezvous.signal();
        assert!(rendezvous.is_signaled());
    }

    #[test]
    fn wait_after_signal_returns_immediately() {
        let rendezvous = SharedRendezvous::new();
        rendezvous.signal();
        rendezvous.wait();
    }

    #[test]
    fn wait_blocks_until_signal() {
        let rendezvous = Arc::new(SharedRendezvous::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let rendezvous = Arc::clone(&rendezvous);
            let woken = Arc::clone(&woken);
            handles.push(thread::spawn(move || {
                rendezvous.wait();
                woken.fetch_add(1, Ordering::SeqCst);
            }));
        }

        thread::sleep(Duration::from_millis(10));
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        rendezvous.signal();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 4);
    }
}
