//! Tick clock. The timer interrupt is the only writer; the scheduler reads
//! it for arrival stamps and aging.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sched::{self, Chan};

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Ticks since boot.
pub fn now() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Advance the clock by one timer interrupt and wake tick sleepers.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    sched::wakeup(Chan::Ticks);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_monotonic() {
        let before = now();
        tick();
        tick();
        assert!(now() >= before + 2);
    }
}
