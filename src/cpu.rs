//! Per-CPU state and the interrupt-disable nesting discipline.
//!
//! Every CPU registers itself by APIC id at boot. `mycpu` resolves the
//! caller's entry; interrupts must be off so the caller cannot migrate
//! between reading the id and using the entry.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::param::{NCPU, NQUEUE};
use crate::sched::context::Context;

pub struct Cpu {
    /// Slot index in the CPU arena.
    pub index: usize,
    /// Local APIC id reported by this CPU at registration.
    pub apic_id: u8,
    pub started: bool,
    /// swtch() here to re-enter this CPU's scheduler loop.
    pub scheduler: Context,
    /// Slot of the process running on this CPU, if any.
    pub proc: Option<usize>,
    /// Pid of that process; readable without the table lock. 0 when idle.
    pub proc_pid: u32,
    /// Depth of push_off nesting.
    pub ncli: i32,
    /// Whether interrupts were enabled before the outermost push_off.
    pub intena: bool,
    /// Last pid dispatched at each queue level (affinity hint).
    pub last_dispatched: [Option<u32>; NQUEUE],
    /// Quanta consumed at the queue level currently being served.
    pub consecutive_runs_queue: u32,
}

impl Cpu {
    pub const fn new() -> Self {
        Cpu {
            index: 0,
            apic_id: 0,
            started: false,
            scheduler: Context::zero(),
            proc: None,
            proc_pid: 0,
            ncli: 0,
            intena: false,
            last_dispatched: [None; NQUEUE],
            consecutive_runs_queue: 0,
        }
    }
}

struct CpuTable {
    cpus: UnsafeCell<[Cpu; NCPU]>,
    ncpu: AtomicUsize,
}

// Entries are only mutated by their owning CPU with interrupts off.
unsafe impl Sync for CpuTable {}

static CPUS: CpuTable = CpuTable {
    cpus: UnsafeCell::new([const { Cpu::new() }; NCPU]),
    ncpu: AtomicUsize::new(0),
};

/// Record the calling CPU's APIC id. Must run once per CPU, before that CPU
/// enables interrupts or touches any lock.
pub fn register(apic_id: u8) -> usize {
    let n = CPUS.ncpu.fetch_add(1, Ordering::SeqCst);
    if n >= NCPU {
        panic!("too many cpus");
    }
    let cpus = unsafe { &mut *CPUS.cpus.get() };
    cpus[n].index = n;
    cpus[n].apic_id = apic_id;
    cpus[n].started = true;
    n
}

/// Initial APIC id of the calling CPU, from CPUID leaf 1.
#[cfg(not(test))]
pub fn cpu_id() -> u8 {
    let leaf = unsafe { core::arch::x86_64::__cpuid(1) };
    (leaf.ebx >> 24) as u8
}

#[cfg(not(test))]
pub fn intr_get() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

#[cfg(not(test))]
pub fn intr_on() {
    x86_64::instructions::interrupts::enable();
}

#[cfg(not(test))]
pub fn intr_off() {
    x86_64::instructions::interrupts::disable();
}

/// This CPU's arena entry. Interrupts must be off.
#[cfg(not(test))]
pub fn mycpu() -> &'static mut Cpu {
    if intr_get() {
        panic!("mycpu interruptible");
    }
    let id = cpu_id();
    let n = CPUS.ncpu.load(Ordering::SeqCst);
    let cpus = unsafe { &mut *CPUS.cpus.get() };
    match (0..n).find(|&i| cpus[i].apic_id == id) {
        Some(i) => &mut cpus[i],
        None => panic!("unknown apicid"),
    }
}

/// Pid of the process running on this CPU, 0 if none. Safe to call without
/// the process-table lock.
pub fn current_pid() -> u32 {
    push_off();
    let pid = mycpu().proc_pid;
    pop_off();
    pid
}

/// Matched interrupt disabling: two push_off()s take two pop_off()s to undo,
/// and interrupts stay off if they were off to begin with.
pub fn push_off() {
    let old = intr_get();
    intr_off();
    let c = mycpu();
    if c.ncli == 0 {
        c.intena = old;
    }
    c.ncli += 1;
}

pub fn pop_off() {
    if intr_get() {
        panic!("pop_off interruptible");
    }
    let c = mycpu();
    if c.ncli < 1 {
        panic!("pop_off");
    }
    c.ncli -= 1;
    if c.ncli == 0 && c.intena {
        intr_on();
    }
}


#[cfg(test)]
pub use testshim::{intr_get, intr_off, intr_on, mycpu};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_restores_interrupts() {
        intr_on();
        push_off();
        assert!(!intr_get());
        push_off();
        pop_off();
        assert!(!intr_get());
        pop_off();
        assert!(intr_get());
    }

    #[test]
    fn push_off_remembers_disabled_state() {
        intr_off();
        push_off();
        pop_off();
        assert!(!intr_get());
        intr_on();
    }
}
