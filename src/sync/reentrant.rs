//! Nestable mutual exclusion. The owning process may re-acquire freely; the
//! inner sleep lock is taken once per ownership span, not once per nesting
//! level. Cross-process contention queues on the sleep lock.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::SleepLock;
use crate::cpu;

pub struct ReentrantLock {
    inner: SleepLock,
    locked: AtomicBool,
    /// Pid of the owner, 0 when free. Stable between the first acquire and
    /// the final release.
    owner: AtomicU32,
    depth: AtomicU32,
    name: &'static str,
}

impl ReentrantLock {
    pub const fn new(name: &'static str) -> Self {
        ReentrantLock {
            inner: SleepLock::new("reentrant lock"),
            locked: AtomicBool::new(false),
            owner: AtomicU32::new(0),
            depth: AtomicU32::new(0),
            name,
        }
    }

    pub fn acquire(&self) {
        if !self.held() {
            self.inner.acquire();
            self.locked.store(true, Ordering::Relaxed);
            self.owner.store(cpu::current_pid(), Ordering::Release);
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Releasing a lock the caller does not hold is a silent no-op, so
    /// unbalanced callers cannot drive the depth negative.
    pub fn release(&self) {
        if !self.held() {
            return;
        }
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(0, Ordering::Relaxed);
            self.locked.store(false, Ordering::Release);
            self.inner.release();
        }
    }

    /// Whether the calling process owns the lock. The held flag is read
    /// before the owner id so a concurrent final release cannot produce a
    /// stale match.
    pub fn held(&self) -> bool {
        let pid = cpu::current_pid();
        pid != 0 && self.locked.load(Ordering::Acquire) && self.owner.load(Ordering::Acquire) == pid
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu;

    fn nested_acquires(lk: &ReentrantLock, n: u32) {
        if n == 0 {
            return;
        }
        lk.acquire();
        nested_acquires(lk, n - 1);
    }

    #[test]
    fn triple_nesting_releases_to_free() {
        cpu::mycpu().proc_pid = 21;
        let lk = ReentrantLock::new("nest");
        nested_acquires(&lk, 3);
        assert!(lk.held());
        assert_eq!(lk.depth.load(Ordering::Relaxed), 3);
        lk.release();
        lk.release();
        assert!(lk.held());
        lk.release();
        assert!(!lk.held());
        assert_eq!(lk.owner.load(Ordering::Relaxed), 0);
        assert_eq!(lk.depth.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn release_by_stranger_is_ignored() {
        cpu::mycpu().proc_pid = 5;
        let lk = ReentrantLock::new("nest");
        lk.acquire();
        cpu::mycpu().proc_pid = 6;
        lk.release();
        cpu::mycpu().proc_pid = 5;
        assert!(lk.held());
        assert_eq!(lk.depth.load(Ordering::Relaxed), 1);
        lk.release();
        assert!(!lk.held());
    }

    #[test]
    fn inner_lock_spans_the_whole_ownership() {
        cpu::mycpu().proc_pid = 9;
        let lk = ReentrantLock::new("nest");
        lk.acquire();
        lk.acquire();
        // One sleep-lock acquisition backs both levels.
        assert!(lk.inner.holding());
        lk.release();
        assert!(lk.inner.holding());
        lk.release();
        assert!(!lk.inner.holding());
    }

    #[test]
    fn held_is_false_without_a_process() {
        cpu::mycpu().proc_pid = 0;
        let lk = ReentrantLock::new("nest");
        assert!(!lk.held());
    }
}
