//! Long-term blocking lock. Contenders sleep instead of spinning, so a
//! holder may keep the lock across blocking operations.

use super::SpinLock;
use crate::cpu;
use crate::sched::{self, Chan};

struct SleepState {
    locked: bool,
    /// Pid of the holder, 0 when free.
    pid: u32,
}

pub struct SleepLock {
    state: SpinLock<SleepState>,
    name: &'static str,
}

impl SleepLock {
    pub const fn new(name: &'static str) -> Self {
        SleepLock {
            state: SpinLock::new("sleep lock", SleepState { locked: false, pid: 0 }),
            name,
        }
    }

    fn chan(&self) -> Chan {
        Chan::Lock(self as *const SleepLock as usize)
    }

    pub fn acquire(&self) {
        let st = self.state.acquire();
        while st.locked {
            sched::sleep(self.chan(), &self.state);
        }
        st.locked = true;
        st.pid = cpu::current_pid();
        self.state.release();
    }

    pub fn release(&self) {
        let st = self.state.acquire();
        st.locked = false;
        st.pid = 0;
        sched::wakeup(self.chan());
        self.state.release();
    }

    pub fn holding(&self) -> bool {
        let st = self.state.acquire();
        let held = st.locked && st.pid == cpu::current_pid();
        self.state.release();
        held
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu;

    #[test]
    fn uncontended_acquire_records_holder() {
        cpu::mycpu().proc_pid = 12;
        let lk = SleepLock::new("file");
        assert!(!lk.holding());
        lk.acquire();
        assert!(lk.holding());
        lk.release();
        assert!(!lk.holding());
    }

    #[test]
    fn holder_identity_matters() {
        cpu::mycpu().proc_pid = 3;
        let lk = SleepLock::new("file");
        lk.acquire();
        cpu::mycpu().proc_pid = 4;
        assert!(!lk.holding());
        cpu::mycpu().proc_pid = 3;
        lk.release();
    }
}
