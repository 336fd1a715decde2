//! System-wide tunables.

/// Maximum number of process slots.
pub const NPROC: usize = 64;
/// Maximum number of CPUs.
pub const NCPU: usize = 8;
/// Open files per process.
pub const NOFILE: usize = 16;
/// Open files across the whole system.
pub const NFILE: usize = 64;
/// Device switch entries.
pub const NDEV: usize = 4;
/// Per-process kernel stack (16 KiB).
pub const KSTACK_SIZE: usize = 4096 * 4;

/// Scheduling queue levels: 0 = round-robin, 1 = stochastic SJF, 2 = FCFS.
pub const NQUEUE: usize = 3;
/// Base quanta granted at one queue level before rotating.
pub const TIME_SLICE: u32 = 10;
/// Per-level multiplier on TIME_SLICE; higher-priority queues keep the CPU
/// longer before the scheduler rotates away from them.
pub const QUEUE_WEIGHTS: [u32; NQUEUE] = [3, 2, 1];
/// Consecutive quanta a round-robin process may hold before being forced off.
pub const RR_MAX_RUNS: u32 = 5;
/// Ticks a RUNNABLE process may starve before promotion to the next queue.
pub const AGING_THRESHOLD: u32 = 800;

/// Console input buffer capacity.
pub const INPUT_BUF: usize = 128;
/// Saved lines in the console history ring.
pub const N_HISTORY: usize = 11;
