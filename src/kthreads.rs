//! Kernel threads standing in for the first two user programs: `init`
//! (pid 1) owns the console file handles and reaps orphans; `sh` (pid 2)
//! reads console lines. Both stay in the round-robin queue by the fork
//! rule's pid cutoff.

use crate::cpu::mycpu;
use crate::error::KError;
use crate::file;
use crate::sched::{self, PTABLE};
use crate::{clock, print, println};

/// Open stdin/stdout/stderr on the console for the current process.
fn open_std_fds() {
    for fd in 0..3usize {
        let readable = fd == 0;
        let writable = fd != 0;
        if let Ok(handle) = file::open_device(file::CONSOLE, readable, writable) {
            let t = PTABLE.acquire();
            if let Some(slot) = mycpu().proc {
                t.procs[slot].ofile[fd] = Some(handle);
            }
            PTABLE.release();
        }
    }
}

pub fn init_main() {
    open_std_fds();
    println!("init: starting sh");
    let _ = sched::spawn("sh", sh_main);
    loop {
        match sched::wait() {
            Ok(_) => {}
            Err(KError::NoChildren) => {
                // The shell died; put a fresh one on the console.
                let _ = sched::spawn("sh", sh_main);
            }
            Err(_) => {}
        }
    }
}

/// Blocking line read on fd 0. Returns the number of bytes, 0 at EOF.
fn read_line(buf: &mut [u8]) -> usize {
    let handle = {
        let t = PTABLE.acquire();
        let h = mycpu().proc.and_then(|slot| t.procs[slot].ofile[0]);
        PTABLE.release();
        h
    };
    match handle {
        Some(h) => file::read(h, buf).unwrap_or(0),
        None => 0,
    }
}

pub fn sh_main() {
    let mut buf = [0u8; 128];
    loop {
        print!("$ ");
        let n = read_line(&mut buf);
        if n == 0 {
            continue;
        }
        let line = core::str::from_utf8(&buf[..n]).unwrap_or("").trim_end_matches('\n');
        match line {
            "" => {}
            "ps" => sched::procdump(),
            "uptime" => println!("{} ticks", clock::now()),
            "help" => println!("built-ins: ps, uptime, help"),
            _ => println!("sh: unknown command: {}", line),
        }
    }
}
