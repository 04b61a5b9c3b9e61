//! One-shot start gate
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Condvar, Mutex, PoisonError,
};

/// A latch that starts closed and, once opened, stays open forever.
///
/// A worker thread opens its task's gate when it finishes start-up. Threads
/// that need the worker to be ready wait on the gate; after the gate is open
/// waiting costs a single atomic load.
#[derive(Debug, Default)]
pub(crate) struct StartGate {
    open: AtomicBool,
    lock: Mutex<bool>,
    cond: Condvar,
}

impl StartGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open the gate, releasing all current and future waiters.
    pub(crate) fn open(&self) {
        // The flag is only written under `lock`, so nothing else can poison it
        let mut open = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *open = true;
        self.open.store(true, Ordering::Release);
        drop(open);
        self.cond.notify_all();
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Block until the gate is open.
    pub(crate) fn wait(&self) {
        if self.is_open() {
            return;
        }

        let open = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = self
            .cond
            .wait_while(open, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{atomic::AtomicUsize, Arc},
        thread,
        time::Duration,
    };

    #[test]
    fn open_gate_does_not_block() {
        let gate = StartGate::new();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
        gate.wait();
        gate.wait();
    }

    #[test]
    fn waiters_are_released() {
        let gate = Arc::new(StartGate::new());
        let passed = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let passed = Arc::clone(&passed);
                thread::spawn(move || {
                    gate.wait();
                    passed.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(passed.load(Ordering::Relaxed), 0);

        gate.open();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::Relaxed), 4);
    }
}
