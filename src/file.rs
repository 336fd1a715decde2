//! Minimal file layer: a reference-counted global file arena and the device
//! switch the console binds its read/write into. The real file system is an
//! external collaborator; only device files exist here.

use crate::error::{KError, KResult};
use crate::param::{NDEV, NFILE};
use crate::sync::SpinLock;

/// Device switch slot for the console.
pub const CONSOLE: usize = 1;

#[derive(Clone, Copy)]
pub struct Dev {
    pub read: fn(&mut [u8]) -> KResult<usize>,
    pub write: fn(&[u8]) -> KResult<usize>,
}

static DEVSW: SpinLock<[Option<Dev>; NDEV]> = SpinLock::new("devsw", [None; NDEV]);

/// Bind a device driver into the switch. Called once per device at boot.
pub fn register_dev(major: usize, dev: Dev) {
    let devs = DEVSW.acquire();
    devs[major] = Some(dev);
    DEVSW.release();
}

fn lookup_dev(major: usize) -> KResult<Dev> {
    let devs = DEVSW.acquire();
    let dev = devs.get(major).copied().flatten();
    DEVSW.release();
    dev.ok_or(KError::NotFound)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Free,
    Device(usize),
}

#[derive(Clone, Copy)]
struct File {
    kind: FileKind,
    refcnt: u32,
    readable: bool,
    writable: bool,
}

const FREE: File = File {
    kind: FileKind::Free,
    refcnt: 0,
    readable: false,
    writable: false,
};

static FTABLE: SpinLock<[File; NFILE]> = SpinLock::new("ftable", [FREE; NFILE]);

/// Open a device file; returns an arena handle.
pub fn open_device(major: usize, readable: bool, writable: bool) -> KResult<usize> {
    let files = FTABLE.acquire();
    let r = match files.iter().position(|f| f.refcnt == 0) {
        Some(h) => {
            files[h] = File {
                kind: FileKind::Device(major),
                refcnt: 1,
                readable,
                writable,
            };
            Ok(h)
        }
        None => Err(KError::NoSlots),
    };
    FTABLE.release();
    r
}

/// Take another reference to an open file (fork, dup).
pub fn dup(handle: usize) {
    let files = FTABLE.acquire();
    if files[handle].refcnt == 0 {
        FTABLE.release();
        panic!("file dup");
    }
    files[handle].refcnt += 1;
    FTABLE.release();
}

/// Drop one reference; the slot frees when the count reaches zero.
pub fn close(handle: usize) {
    let files = FTABLE.acquire();
    if files[handle].refcnt == 0 {
        FTABLE.release();
        panic!("file close");
    }
    files[handle].refcnt -= 1;
    if files[handle].refcnt == 0 {
        files[handle] = FREE;
    }
    FTABLE.release();
}

/// Read through the device switch. The device call runs without the file
/// table locked; a console read may sleep.
pub fn read(handle: usize, dst: &mut [u8]) -> KResult<usize> {
    let major = readable_device(handle)?;
    let dev = lookup_dev(major)?;
    (dev.read)(dst)
}

/// Write through the device switch.
pub fn write(handle: usize, src: &[u8]) -> KResult<usize> {
    let major = writable_device(handle)?;
    let dev = lookup_dev(major)?;
    (dev.write)(src)
}

fn readable_device(handle: usize) -> KResult<usize> {
    let files = FTABLE.acquire();
    let r = match files.get(handle) {
        Some(f) if f.refcnt > 0 && f.readable => match f.kind {
            FileKind::Device(major) => Ok(major),
            FileKind::Free => Err(KError::NotFound),
        },
        _ => Err(KError::BadArg),
    };
    FTABLE.release();
    r
}

fn writable_device(handle: usize) -> KResult<usize> {
    let files = FTABLE.acquire();
    let r = match files.get(handle) {
        Some(f) if f.refcnt > 0 && f.writable => match f.kind {
            FileKind::Device(major) => Ok(major),
            FileKind::Free => Err(KError::NotFound),
        },
        _ => Err(KError::BadArg),
    };
    FTABLE.release();
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test body: the arena is a process-wide singleton and handle reuse
    // across parallel tests would race the assertions.
    #[test]
    fn refcounts_and_permissions() {
        let h = open_device(3, true, false).unwrap();
        dup(h);
        close(h);
        // Still open through the dup'd reference.
        assert_eq!(readable_device(h), Ok(3));
        assert_eq!(writable_device(h), Err(KError::BadArg));
        close(h);

        let h2 = open_device(2, false, true).unwrap();
        assert_eq!(readable_device(h2), Err(KError::BadArg));
        assert_eq!(writable_device(h2), Ok(2));
        close(h2);
    }
}
