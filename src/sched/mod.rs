//! Scheduler core.
//!
//! One scheduler loop per CPU over the shared process table. Each loop
//! iteration rotates through the three queue levels, asks the level's policy
//! for a candidate and context-switches into it; processes come back via
//! sched() from yield, sleep or exit. All state transitions happen under
//! ptable.lock, which is handed across swtch between a process's kernel
//! stack and the CPU's scheduler stack.

pub mod context;
pub mod table;

pub use table::{Chan, Proc, ProcState, ProcTable, TrapFrame};

use core::cell::UnsafeCell;

use crate::clock;
use crate::cpu::{self, mycpu};
use crate::error::{KError, KResult};
use crate::file;
use crate::param::{KSTACK_SIZE, NPROC, NQUEUE, QUEUE_WEIGHTS, RR_MAX_RUNS, TIME_SLICE};
use crate::sync::SpinLock;
use crate::vm;
use context::{swtch, Context};

pub static PTABLE: SpinLock<ProcTable> = SpinLock::new("ptable", ProcTable::new());

#[repr(C, align(16))]
struct KStack([u8; KSTACK_SIZE]);

struct KStacks(UnsafeCell<[KStack; NPROC]>);

// A stack is only touched by the slot's owner (and by forge before the slot
// first runs, under the EMBRYO state).
unsafe impl Sync for KStacks {}

static KSTACKS: KStacks = KStacks(UnsafeCell::new([const { KStack([0; KSTACK_SIZE]) }; NPROC]));

fn kstack_top(slot: usize) -> u64 {
    unsafe { (*KSTACKS.0.get())[slot].0.as_ptr() as u64 + KSTACK_SIZE as u64 }
}

/// Claim a slot and forge its first context so the scheduler can switch
/// into forkret.
fn allocproc(name: &str, entry: Option<fn()>) -> KResult<usize> {
    let t = PTABLE.acquire();
    let r = t.alloc(name, entry, clock::now());
    if let Ok(slot) = r {
        t.procs[slot].page_table = vm::kernel_root();
        t.procs[slot].context =
            unsafe { Context::forge(kstack_top(slot), forkret as usize as u64) };
    }
    PTABLE.release();
    r
}

/// First landing point of every new process: drop the table lock the
/// scheduler handed over, run the thread body, then exit.
extern "C" fn forkret() {
    PTABLE.release();
    let entry = {
        let t = PTABLE.acquire();
        let slot = mycpu().proc.expect("forkret");
        let entry = t.procs[slot].entry;
        PTABLE.release();
        entry
    };
    if let Some(body) = entry {
        body();
    }
    exit();
}

/// Create the first process. Called once at boot, before the scheduler
/// starts.
pub fn userinit() {
    let slot = match allocproc("init", Some(crate::kthreads::init_main)) {
        Ok(slot) => slot,
        Err(_) => panic!("userinit: out of process slots"),
    };
    let t = PTABLE.acquire();
    t.init_slot = Some(slot);
    t.procs[slot].cwd = 1;
    t.procs[slot].state = ProcState::Runnable;
    PTABLE.release();
}

/// Start a kernel thread as a child of the current process. Applies the
/// fork queue rule: everything after the first two pids lands in FCFS.
pub fn spawn(name: &str, entry: fn()) -> KResult<u32> {
    let slot = allocproc(name, Some(entry))?;
    let t = PTABLE.acquire();
    t.procs[slot].parent = mycpu().proc;
    if let Some(parent) = mycpu().proc {
        // Kernel threads inherit the spawner's open files, like a fork would.
        let ofile = t.procs[parent].ofile;
        for (fd, h) in ofile.iter().enumerate() {
            if let Some(h) = h {
                file::dup(*h);
                t.procs[slot].ofile[fd] = Some(*h);
            }
        }
        t.procs[slot].cwd = t.procs[parent].cwd;
    }
    let pid = t.procs[slot].pid;
    if pid > 2 {
        t.procs[slot].queue = 2;
    }
    t.procs[slot].arrival = clock::now();
    t.procs[slot].state = ProcState::Runnable;
    PTABLE.release();
    Ok(pid)
}

/// Duplicate the current process. The child shares the thread body, gets a
/// copy of the register frame with rax forced to 0, and dups the parent's
/// open files.
pub fn fork() -> KResult<u32> {
    let (parent_slot, parent) = {
        let t = PTABLE.acquire();
        let slot = match mycpu().proc {
            Some(s) => s,
            None => {
                PTABLE.release();
                return Err(KError::NotFound);
            }
        };
        let snapshot = t.procs[slot];
        PTABLE.release();
        (slot, snapshot)
    };

    // The child re-enters the same thread body; its register frame records
    // the 0 return a real trap path would deliver.
    let child_slot = allocproc(parent.name_str(), parent.entry)?;

    // The child address space comes from the vm collaborator; roll the slot
    // back if that fails.
    let child_root = match vm::duplicate(parent.page_table) {
        Ok(root) => root,
        Err(e) => {
            let t = PTABLE.acquire();
            t.free_slot(child_slot, clock::now());
            PTABLE.release();
            return Err(e);
        }
    };

    let mut ofile = [None; crate::param::NOFILE];
    for (fd, slot) in parent.ofile.iter().enumerate() {
        if let Some(h) = slot {
            file::dup(*h);
            ofile[fd] = Some(*h);
        }
    }

    let t = PTABLE.acquire();
    let child = &mut t.procs[child_slot];
    child.parent = Some(parent_slot);
    child.sz = parent.sz;
    child.page_table = child_root;
    child.ofile = ofile;
    child.cwd = parent.cwd;
    child.tf = parent.tf;
    child.tf.rax = 0;
    let pid = child.pid;
    if pid > 2 {
        child.queue = 2;
    }
    child.arrival = clock::now();
    child.state = ProcState::Runnable;
    PTABLE.release();
    Ok(pid)
}

/// Terminate the current process: release its files, hand its children to
/// init, wake the parent and become a ZOMBIE. Never returns.
pub fn exit() -> ! {
    let (slot, ofile) = {
        let t = PTABLE.acquire();
        let slot = mycpu().proc.expect("exit");
        if Some(slot) == t.init_slot {
            panic!("init exiting");
        }
        let ofile = t.procs[slot].ofile;
        t.procs[slot].ofile = [None; crate::param::NOFILE];
        PTABLE.release();
        (slot, ofile)
    };

    for h in ofile.iter().flatten() {
        file::close(*h);
    }

    let t = PTABLE.acquire();
    t.procs[slot].cwd = 0;

    if let Some(parent) = t.procs[slot].parent {
        let parent_pid = t.procs[parent].pid;
        t.wakeup1(Chan::Proc(parent_pid));
    }

    // Abandoned children go to init; wake init if any is already dead.
    if let Some(init_slot) = t.init_slot {
        let init_pid = t.procs[init_slot].pid;
        for i in 0..NPROC {
            if t.procs[i].parent == Some(slot) {
                t.procs[i].parent = Some(init_slot);
                if t.procs[i].state == ProcState::Zombie {
                    t.wakeup1(Chan::Proc(init_pid));
                }
            }
        }
    }

    t.procs[slot].state = ProcState::Zombie;
    sched();
    panic!("zombie exit");
}

/// Reap one dead child, blocking until one exists. Fails when the caller
/// has no children or has itself been killed.
pub fn wait() -> KResult<u32> {
    let t = PTABLE.acquire();
    let slot = match mycpu().proc {
        Some(s) => s,
        None => {
            PTABLE.release();
            return Err(KError::NotFound);
        }
    };
    loop {
        let mut have_kids = false;
        let mut zombie = None;
        for i in 0..NPROC {
            if t.procs[i].parent != Some(slot) {
                continue;
            }
            have_kids = true;
            if t.procs[i].state == ProcState::Zombie {
                zombie = Some(i);
                break;
            }
        }

        if let Some(i) = zombie {
            let pid = t.procs[i].pid;
            vm::release(t.procs[i].page_table);
            t.free_slot(i, clock::now());
            PTABLE.release();
            return Ok(pid);
        }

        if !have_kids {
            PTABLE.release();
            return Err(KError::NoChildren);
        }
        if t.procs[slot].killed {
            PTABLE.release();
            return Err(KError::Killed);
        }

        let own_pid = t.procs[slot].pid;
        sleep(Chan::Proc(own_pid), &PTABLE);
    }
}

/// Enter the scheduler. The caller must hold ptable.lock exactly once and
/// must already have moved the process out of RUNNING.
fn sched() {
    let c = mycpu();
    if !PTABLE.holding() {
        panic!("sched ptable.lock");
    }
    if c.ncli != 1 {
        panic!("sched locks");
    }
    let slot = c.proc.expect("sched");
    let t = unsafe { PTABLE.get_unchecked() };
    if t.procs[slot].state == ProcState::Running {
        panic!("sched running");
    }
    if cpu::intr_get() {
        panic!("sched interruptible");
    }
    let intena = c.intena;
    unsafe {
        swtch(&mut t.procs[slot].context, &c.scheduler);
    }
    mycpu().intena = intena;
}

/// The quantum decision, as a pure function of the counters it reads:
/// returns whether the process must yield plus the CPU's new queue-level
/// quantum count.
pub fn quantum_expired(queue: u32, consecutive_runs: u32, runs_queue: u32) -> (bool, u32) {
    let queue_slice = TIME_SLICE * QUEUE_WEIGHTS[queue as usize % NQUEUE];
    let runs_queue = runs_queue + 1;
    if runs_queue == queue_slice {
        return (true, 0);
    }
    match queue {
        0 => (consecutive_runs == RR_MAX_RUNS, runs_queue),
        _ => (false, runs_queue),
    }
}

/// Timer-path yield: apply the quantum decision to the running process.
pub fn yield_now() {
    let t = PTABLE.acquire();
    let c = mycpu();
    if let Some(slot) = c.proc {
        let (must_yield, runs_queue) = quantum_expired(
            t.procs[slot].queue,
            t.procs[slot].consecutive_runs,
            c.consecutive_runs_queue,
        );
        c.consecutive_runs_queue = runs_queue;
        if must_yield {
            t.procs[slot].state = ProcState::Runnable;
            sched();
        } else {
            t.procs[slot].consecutive_runs += 1;
        }
    }
    PTABLE.release();
}

/// Atomically release `lk` and block on `chan`; reacquires `lk` before
/// returning. Taking ptable.lock before dropping `lk` is what makes a
/// concurrent wakeup impossible to miss.
pub fn sleep<T>(chan: Chan, lk: &SpinLock<T>) {
    let c = mycpu();
    let slot = match c.proc {
        Some(s) => s,
        None => panic!("sleep"),
    };

    let on_ptable = core::ptr::eq(
        lk as *const SpinLock<T> as *const u8,
        &PTABLE as *const SpinLock<ProcTable> as *const u8,
    );
    if !on_ptable {
        PTABLE.acquire();
        lk.release();
    }

    let t = unsafe { PTABLE.get_unchecked() };
    t.procs[slot].chan = Some(chan);
    t.procs[slot].state = ProcState::Sleeping;
    sched();
    t.procs[slot].chan = None;

    if !on_ptable {
        PTABLE.release();
        lk.acquire();
    }
}

/// Wake every process sleeping on `chan`.
pub fn wakeup(chan: Chan) {
    let t = PTABLE.acquire();
    t.wakeup1(chan);
    PTABLE.release();
}

/// Flag `pid` for termination.
pub fn kill(pid: u32) -> KResult<()> {
    let t = PTABLE.acquire();
    let r = t.kill(pid);
    PTABLE.release();
    r
}

/// Whether the current process has been killed.
pub fn current_killed() -> bool {
    let t = PTABLE.acquire();
    let killed = mycpu().proc.map(|slot| t.procs[slot].killed).unwrap_or(false);
    PTABLE.release();
    killed
}

/// Grow or shrink the current process's memory image by `n` bytes through
/// the vm seam. Returns the old size.
pub fn growproc(n: i64) -> KResult<u64> {
    let t = PTABLE.acquire();
    let r = (|| {
        let slot = mycpu().proc.ok_or(KError::NotFound)?;
        let old = t.procs[slot].sz;
        let new = old.checked_add_signed(n).ok_or(KError::NoMemory)?;
        t.procs[slot].sz = vm::resize(t.procs[slot].page_table, old, new)?;
        Ok(old)
    })();
    PTABLE.release();
    r
}

/// Timer-driven aging pass over the table.
pub fn age() {
    let t = PTABLE.acquire();
    t.age_runnable(clock::now());
    PTABLE.release();
}

/// Per-CPU scheduler loop; never returns. Serves one queue level at a time,
/// rotating when the level's quantum budget drains or it has no candidates.
pub fn scheduler() -> ! {
    let c = mycpu();
    c.proc = None;
    let mut queue = NQUEUE - 1;
    loop {
        cpu::intr_on();
        let t = PTABLE.acquire();
        loop {
            if c.consecutive_runs_queue == 0 {
                queue = (queue + 1) % NQUEUE;
            }
            let choice = match queue {
                0 => t.select_rr(c.last_dispatched[0]),
                1 => t.select_sjf(c.last_dispatched[1], clock::now()),
                _ => t.select_fcfs(c.last_dispatched[2]),
            };
            let slot = match choice {
                None => {
                    c.last_dispatched[queue] = None;
                    c.consecutive_runs_queue = 0;
                    if queue == NQUEUE - 1 {
                        break;
                    }
                    continue;
                }
                Some(slot) => slot,
            };

            c.last_dispatched[queue] = Some(t.procs[slot].pid);
            t.procs[slot].wait_time = 0;
            t.procs[slot].consecutive_runs = 1;
            c.proc = Some(slot);
            c.proc_pid = t.procs[slot].pid;
            vm::switch_to(t.procs[slot].page_table);
            t.procs[slot].state = ProcState::Running;
            unsafe {
                swtch(&mut c.scheduler, &t.procs[slot].context);
            }
            vm::switch_to(vm::kernel_root());

            // The process changed its own state before switching back.
            c.proc = None;
            c.proc_pid = 0;

            if c.consecutive_runs_queue == 0 && queue == NQUEUE - 1 {
                break;
            }
        }
        PTABLE.release();
    }
}

/// Console ^P listing. Lockless on purpose: a wedged machine should still
/// be able to dump its table.
pub fn procdump() {
    let t = unsafe { PTABLE.get_unchecked() };
    for p in t.procs.iter() {
        if p.state == ProcState::Unused {
            continue;
        }
        crate::println!("{} {} {}", p.pid, p.state.label(), p.name_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_expires_at_the_weighted_slice() {
        // Queue 0: 10 * 3 quanta before the level rotates.
        let mut runs_queue = 0;
        for _ in 0..29 {
            let (y, rq) = quantum_expired(0, 1, runs_queue);
            assert!(!y);
            runs_queue = rq;
        }
        let (y, rq) = quantum_expired(0, 1, runs_queue);
        assert!(y);
        assert_eq!(rq, 0);
    }

    #[test]
    fn rr_cap_forces_a_yield_inside_the_slice() {
        let (y, _) = quantum_expired(0, RR_MAX_RUNS, 0);
        assert!(y);
        let (y, _) = quantum_expired(0, RR_MAX_RUNS - 1, 0);
        assert!(!y);
    }

    #[test]
    fn sjf_and_fcfs_never_preempt_within_their_slice() {
        for queue in [1u32, 2] {
            let slice = TIME_SLICE * QUEUE_WEIGHTS[queue as usize];
            let mut runs_queue = 0;
            for step in 1..=slice {
                let (y, rq) = quantum_expired(queue, 99, runs_queue);
                runs_queue = rq;
                assert_eq!(y, step == slice);
            }
        }
    }
}
