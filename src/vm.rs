//! Address-space seam. Real paging lives outside the core; the scheduler
//! only needs an opaque root-table handle it can install on dispatch.
//! Kernel threads all share the boot address space, so duplication and
//! release are bookkeeping-only here.

use crate::error::KResult;

/// Root table of the boot address space.
pub fn kernel_root() -> u64 {
    use x86_64::registers::control::Cr3;
    let (frame, _) = Cr3::read();
    frame.start_address().as_u64()
}

/// Install `root` on this CPU if it is not already active.
pub fn switch_to(root: u64) {
    use x86_64::registers::control::Cr3;
    use x86_64::structures::paging::PhysFrame;
    use x86_64::PhysAddr;

    let (current, flags) = Cr3::read();
    if current.start_address().as_u64() != root {
        let frame = PhysFrame::containing_address(PhysAddr::new(root));
        unsafe { Cr3::write(frame, flags) };
    }
}

/// Hand out a root for a new process cloned from `parent`.
pub fn duplicate(parent: u64) -> KResult<u64> {
    Ok(parent)
}

/// Tear down a dead process's address space.
pub fn release(_root: u64) {}

/// Resize a process image. Returns the new size.
pub fn resize(_root: u64, _old: u64, new: u64) -> KResult<u64> {
    Ok(new)
}
