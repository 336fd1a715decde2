//! Locking primitives.
//!
//! `SpinLock` is the short-term kernel lock: interrupts stay off on the
//! owning CPU for as long as it is held, and acquire/release are explicit
//! operations because the process-table lock is handed across context
//! switches rather than scoped to one stack frame.

pub mod reentrant;
pub mod sleeplock;

pub use reentrant::ReentrantLock;
pub use sleeplock::SleepLock;

use core::cell::UnsafeCell;
use core::mem;
use core::sync::atomic::{AtomicI32, Ordering};

use spin::mutex::SpinMutex;

use crate::cpu::{self, pop_off, push_off};

pub struct SpinLock<T> {
    name: &'static str,
    /// Index of the CPU holding the lock, -1 when free.
    cpu: AtomicI32,
    lock: SpinMutex<()>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        SpinLock {
            name,
            cpu: AtomicI32::new(-1),
            lock: SpinMutex::new(()),
            data: UnsafeCell::new(data),
        }
    }

    /// Spin until the lock is held, interrupts off. Re-acquiring on the same
    /// CPU is a programming error and panics.
    pub fn acquire(&self) -> &mut T {
        push_off();
        if self.holding() {
            panic!("acquire {}", self.name);
        }
        mem::forget(self.lock.lock());
        self.cpu.store(cpu::mycpu().index as i32, Ordering::Relaxed);
        unsafe { &mut *self.data.get() }
    }

    /// Release a lock this CPU holds. The matching acquire may have happened
    /// on a different kernel stack (scheduler handoff).
    pub fn release(&self) {
        if !self.holding() {
            panic!("release {}", self.name);
        }
        self.cpu.store(-1, Ordering::Relaxed);
        unsafe { self.lock.force_unlock() };
        pop_off();
    }

    /// Whether this CPU holds the lock. Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.lock.is_locked() && self.cpu.load(Ordering::Relaxed) == cpu::mycpu().index as i32
    }

    /// Access the protected data without going through acquire.
    ///
    /// # Safety
    /// Caller must either hold the lock or be in a context where mutual
    /// exclusion is irrelevant (panic dump).
    pub unsafe fn get_unchecked(&self) -> &mut T {
        &mut *self.data.get()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{intr_get, intr_on};

    #[test]
    fn acquire_release_pairs_interrupt_state() {
        intr_on();
        let lk = SpinLock::new("t", 7u32);
        let v = lk.acquire();
        assert!(!intr_get());
        assert_eq!(*v, 7);
        *v = 8;
        lk.release();
        assert!(intr_get());
        assert_eq!(*lk.acquire(), 8);
        lk.release();
    }

    #[test]
    fn holding_tracks_owner() {
        let lk = SpinLock::new("t", ());
        crate::cpu::push_off();
        assert!(!lk.holding());
        crate::cpu::pop_off();
        lk.acquire();
        assert!(lk.holding());
        lk.release();
    }

    #[test]
    #[should_panic(expected = "release")]
    fn release_without_acquire_panics() {
        let lk = SpinLock::new("t", ());
        lk.release();
    }
}
