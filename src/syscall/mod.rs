//! Syscall facade: argument unpacking from the saved trap frame and thin
//! wrappers over the scheduler-facing kernel services. Unimplemented table
//! entries (the file-system family) fall through to the error return; their
//! numbers stay reserved so the per-process counters line up.

use crate::clock;
use crate::cpu::mycpu;
use crate::error::{KError, KResult};
use crate::file;
use crate::param::{NOFILE, NQUEUE};
use crate::sched::{self, Chan, Proc, TrapFrame, PTABLE};
use crate::sync::ReentrantLock;

pub const SYSCALL_NAMES: [&str; 28] = [
    "fork",
    "exit",
    "wait",
    "pipe",
    "read",
    "kill",
    "exec",
    "fstat",
    "chdir",
    "dup",
    "getpid",
    "sbrk",
    "sleep",
    "uptime",
    "open",
    "write",
    "mknod",
    "unlink",
    "link",
    "mkdir",
    "close",
    "sort_syscalls",
    "get_most_invoked",
    "list_all_processes",
    "set_sjf_info",
    "set_queue",
    "report_all_processes",
    "fibonacci",
];

pub const NSYSCALL: usize = SYSCALL_NAMES.len();

pub const SYS_FORK: usize = 1;
pub const SYS_EXIT: usize = 2;
pub const SYS_WAIT: usize = 3;
pub const SYS_READ: usize = 5;
pub const SYS_KILL: usize = 6;
pub const SYS_DUP: usize = 10;
pub const SYS_GETPID: usize = 11;
pub const SYS_SBRK: usize = 12;
pub const SYS_SLEEP: usize = 13;
pub const SYS_UPTIME: usize = 14;
pub const SYS_WRITE: usize = 16;
pub const SYS_CLOSE: usize = 21;
pub const SYS_SORT_SYSCALLS: usize = 22;
pub const SYS_GET_MOST_INVOKED: usize = 23;
pub const SYS_LIST_ALL_PROCESSES: usize = 24;
pub const SYS_SET_SJF_INFO: usize = 25;
pub const SYS_SET_QUEUE: usize = 26;
pub const SYS_REPORT_ALL_PROCESSES: usize = 27;
pub const SYS_FIBONACCI: usize = 28;

/// The error status handed back to userland for any failure.
const ERR: u64 = u64::MAX;

/// Integer argument `n` of the current syscall, by position.
pub fn argint(tf: &TrapFrame, n: usize) -> KResult<i64> {
    let v = match n {
        0 => tf.rdi,
        1 => tf.rsi,
        2 => tf.rdx,
        3 => tf.r10,
        4 => tf.r8,
        5 => tf.r9,
        _ => return Err(KError::BadArg),
    };
    Ok(v as i64)
}

/// Run `f` against the current process's PCB under the table lock.
fn with_current<R>(f: impl FnOnce(&mut Proc) -> KResult<R>) -> KResult<R> {
    let t = PTABLE.acquire();
    let r = match mycpu().proc {
        Some(slot) => f(&mut t.procs[slot]),
        None => Err(KError::NotFound),
    };
    PTABLE.release();
    r
}

fn count_syscall(num: usize) {
    let t = PTABLE.acquire();
    if let Some(slot) = mycpu().proc {
        t.procs[slot].sc[num - 1] += 1;
    }
    PTABLE.release();
}

/// Central dispatcher, called from the trap path with the saved frame.
/// rax carries the syscall number in and the result out.
pub fn dispatch(tf: &mut TrapFrame) -> u64 {
    let num = tf.rax as usize;
    if num == 0 || num > NSYSCALL {
        crate::log_warn!("syscall: unknown number {}", num);
        return ERR;
    }
    count_syscall(num);

    let result = match num {
        SYS_FORK => sched::fork().map(u64::from),
        SYS_EXIT => sched::exit(),
        SYS_WAIT => sched::wait().map(u64::from),
        SYS_READ => sys_read(tf),
        SYS_KILL => sys_kill(tf),
        SYS_DUP => sys_dup(tf),
        SYS_GETPID => with_current(|p| Ok(u64::from(p.pid))),
        SYS_SBRK => sys_sbrk(tf),
        SYS_SLEEP => sys_sleep(tf),
        SYS_UPTIME => Ok(u64::from(clock::now())),
        SYS_WRITE => sys_write(tf),
        SYS_CLOSE => sys_close(tf),
        SYS_SORT_SYSCALLS => sys_sort_syscalls(tf),
        SYS_GET_MOST_INVOKED => sys_get_most_invoked(tf),
        SYS_LIST_ALL_PROCESSES => sys_list_all_processes(),
        SYS_SET_SJF_INFO => sys_set_sjf_info(tf),
        SYS_SET_QUEUE => sys_set_queue(tf),
        SYS_REPORT_ALL_PROCESSES => sys_report_all_processes(),
        SYS_FIBONACCI => sys_fibonacci(tf),
        _ => {
            crate::log_warn!("syscall: {} not wired", SYSCALL_NAMES[num - 1]);
            Err(KError::BadArg)
        }
    };
    match result {
        Ok(v) => v,
        Err(_) => ERR,
    }
}

fn fd_handle(p: &mut Proc, fd: usize) -> KResult<usize> {
    if fd >= NOFILE {
        return Err(KError::BadArg);
    }
    p.ofile[fd].ok_or(KError::BadArg)
}

fn sys_read(tf: &TrapFrame) -> KResult<u64> {
    let fd = argint(tf, 0)? as usize;
    let ptr = argint(tf, 1)? as usize;
    let len = argint(tf, 2)? as usize;
    let handle = with_current(|p| fd_handle(p, fd))?;
    // The buffer lives in the shared kernel address space (vm seam).
    let dst = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) };
    file::read(handle, dst).map(|n| n as u64)
}

fn sys_write(tf: &TrapFrame) -> KResult<u64> {
    let fd = argint(tf, 0)? as usize;
    let ptr = argint(tf, 1)? as usize;
    let len = argint(tf, 2)? as usize;
    let handle = with_current(|p| fd_handle(p, fd))?;
    let src = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    file::write(handle, src).map(|n| n as u64)
}

fn sys_dup(tf: &TrapFrame) -> KResult<u64> {
    let fd = argint(tf, 0)? as usize;
    with_current(|p| {
        let handle = fd_handle(p, fd)?;
        let free = p.ofile.iter().position(|s| s.is_none()).ok_or(KError::NoSlots)?;
        file::dup(handle);
        p.ofile[free] = Some(handle);
        Ok(free as u64)
    })
}

fn sys_close(tf: &TrapFrame) -> KResult<u64> {
    let fd = argint(tf, 0)? as usize;
    let handle = with_current(|p| {
        let handle = fd_handle(p, fd)?;
        p.ofile[fd] = None;
        Ok(handle)
    })?;
    file::close(handle);
    Ok(0)
}

fn sys_kill(tf: &TrapFrame) -> KResult<u64> {
    let pid = argint(tf, 0)?;
    if pid <= 0 {
        return Err(KError::BadArg);
    }
    sched::kill(pid as u32).map(|_| 0)
}

fn sys_sbrk(tf: &TrapFrame) -> KResult<u64> {
    let n = argint(tf, 0)?;
    sched::growproc(n)
}

/// Block for `n` ticks; a kill during the wait fails the call.
fn sys_sleep(tf: &TrapFrame) -> KResult<u64> {
    let n = argint(tf, 0)?;
    if n < 0 {
        return Err(KError::BadArg);
    }
    let n = n as u32;
    let t = PTABLE.acquire();
    let slot = match mycpu().proc {
        Some(s) => s,
        None => {
            PTABLE.release();
            return Err(KError::NotFound);
        }
    };
    let start = clock::now();
    while clock::now().wrapping_sub(start) < n {
        if t.procs[slot].killed {
            PTABLE.release();
            return Err(KError::Killed);
        }
        sched::sleep(Chan::Ticks, &PTABLE);
    }
    PTABLE.release();
    Ok(0)
}

fn sys_sort_syscalls(tf: &TrapFrame) -> KResult<u64> {
    let pid = argint(tf, 0)? as u32;
    let counts = {
        let t = PTABLE.acquire();
        let r = t.syscall_counts(pid);
        PTABLE.release();
        r
    };
    match counts {
        Ok(counts) => {
            for (i, &n) in counts.iter().enumerate() {
                if n > 0 {
                    crate::println!("{} {}: {} times", i + 1, SYSCALL_NAMES[i], n);
                }
            }
            Ok(0)
        }
        Err(e) => {
            crate::println!("No process with id = {}!", pid);
            Err(e)
        }
    }
}

fn sys_get_most_invoked(tf: &TrapFrame) -> KResult<u64> {
    let pid = argint(tf, 0)? as u32;
    let most = {
        let t = PTABLE.acquire();
        let r = t.most_invoked(pid);
        PTABLE.release();
        r
    };
    match most {
        Ok(Some((i, n))) => {
            crate::println!(
                "Most invoked system call in process {} {}: {} times",
                pid,
                SYSCALL_NAMES[i],
                n
            );
            Ok(0)
        }
        Ok(None) => {
            crate::println!("No system call in process {}!", pid);
            Ok(0)
        }
        Err(e) => {
            crate::println!("No process with id = {}!", pid);
            Err(e)
        }
    }
}

fn sys_list_all_processes() -> KResult<u64> {
    let t = PTABLE.acquire();
    let mut row = 1;
    for p in t.procs.iter() {
        if p.pid == 0 {
            continue;
        }
        let total: u32 = p.sc.iter().sum();
        crate::println!("{}. {} (id = {}): {} syscalls called", row, p.name_str(), p.pid, total);
        row += 1;
    }
    PTABLE.release();
    if row == 1 {
        crate::println!("No processes to show");
        return Err(KError::NotFound);
    }
    Ok(0)
}

fn sys_set_sjf_info(tf: &TrapFrame) -> KResult<u64> {
    let pid = argint(tf, 0)? as u32;
    let burst = argint(tf, 1)? as u32;
    let confidence = argint(tf, 2)? as u32;
    let t = PTABLE.acquire();
    let r = t.set_sjf_info(pid, burst, confidence);
    PTABLE.release();
    r.map(|_| 0)
}

fn sys_set_queue(tf: &TrapFrame) -> KResult<u64> {
    let pid = argint(tf, 0)?;
    let queue = argint(tf, 1)?;
    if pid <= 0 {
        crate::println!("Invalid pid");
        return Err(KError::BadArg);
    }
    if queue < 0 || queue >= NQUEUE as i64 {
        crate::println!("Invalid queue");
        return Err(KError::BadArg);
    }
    let t = PTABLE.acquire();
    let r = t.set_queue(pid as u32, queue as u32, clock::now());
    PTABLE.release();
    if r == Err(KError::Unchanged) {
        crate::println!("The process with pid {} is already in queue {}", pid, queue);
    }
    r.map(|_| 0)
}

fn sys_report_all_processes() -> KResult<u64> {
    let t = PTABLE.acquire();
    crate::println!(
        "Name\tPid\tState\tQueue\tWait time\tConfidence\tBurst time\tConsecutive runs\tArrival"
    );
    for p in t.procs.iter() {
        if p.pid == 0 {
            continue;
        }
        crate::println!(
            "{}\t{}\t{}\t{}\t{}\t\t{}\t\t{}\t\t{}\t\t\t{}",
            p.name_str(),
            p.pid,
            p.state.label(),
            p.queue,
            p.wait_time,
            p.confidence,
            p.burst_time,
            p.consecutive_runs,
            p.arrival
        );
    }
    PTABLE.release();
    Ok(0)
}

/// Global lock for the recursive Fibonacci exerciser.
static FIB_LOCK: ReentrantLock = ReentrantLock::new("fibonacci");

/// Recursive on purpose: every level re-enters FIB_LOCK, which is how the
/// reentrant lock gets a workout from userland.
pub fn fibonacci(n: u32) -> u64 {
    FIB_LOCK.acquire();
    let r = if n < 2 {
        u64::from(n)
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    };
    FIB_LOCK.release();
    r
}

fn sys_fibonacci(tf: &TrapFrame) -> KResult<u64> {
    let n = argint(tf, 0)?;
    if n < 0 {
        return Err(KError::BadArg);
    }
    Ok(fibonacci(n as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu;

    #[test]
    fn argint_is_positional() {
        let tf = TrapFrame {
            rdi: 1,
            rsi: 2,
            rdx: 3,
            r10: 4,
            r8: 5,
            r9: 6,
            ..Default::default()
        };
        for n in 0..6 {
            assert_eq!(argint(&tf, n).unwrap(), n as i64 + 1);
        }
        assert_eq!(argint(&tf, 6), Err(KError::BadArg));
    }

    #[test]
    fn argint_sign_extends() {
        let tf = TrapFrame {
            rdi: (-5i64) as u64,
            ..Default::default()
        };
        assert_eq!(argint(&tf, 0).unwrap(), -5);
    }

    #[test]
    fn fibonacci_releases_all_nesting() {
        cpu::mycpu().proc_pid = 77;
        assert_eq!(fibonacci(10), 55);
        assert!(!FIB_LOCK.held());
        assert_eq!(fibonacci(1), 1);
    }
}
