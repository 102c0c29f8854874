//! C4 third enumeration idiom: one-shot `inotify_add_watch`/`read` burst
//! synthesis (§4.3). A watch on `/dev/input` fires exactly once per inotify
//! instance: the `events_delivered` latch never re-arms, even across a
//! second `inotify_add_watch` on the same fd (§9 open question, resolved in
//! DESIGN.md).

use std::collections::HashMap;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;

use parking_lot::Mutex;

use crate::registry::FAKE;

struct Watch {
    wd: i32,
    events_delivered: bool,
}

lazy_static::lazy_static! {
    static ref WATCHES: Mutex<HashMap<RawFd, Watch>> = Mutex::new(HashMap::new());
}

/// `wd(4) + mask(4) + cookie(4) + len(4)`, per `struct inotify_event`.
const EVENT_HEADER_LEN: usize = 16;

/// Register a successful `inotify_add_watch(ifd, "/dev/input", mask)`.
pub fn register_watch(ifd: RawFd, wd: i32) {
    WATCHES.lock().entry(ifd).or_insert(Watch {
        wd,
        events_delivered: false,
    });
}

pub fn deregister(ifd: RawFd) {
    WATCHES.lock().remove(&ifd);
}

/// `Some(n)` (byte count) if `fd` is a registered, not-yet-fired inotify
/// instance; `None` if it isn't ours, or its latch has already fired. Either
/// way, the caller should forward to the trampoline.
///
/// # Safety
/// `buf` must point to at least `count` writable bytes.
pub unsafe fn read_synthetic(fd: RawFd, buf: *mut c_void, count: usize) -> Option<isize> {
    let mut watches = WATCHES.lock();
    let watch = watches.get_mut(&fd)?;
    if watch.events_delivered {
        return None;
    }
    watch.events_delivered = true;
    let wd = watch.wd;
    drop(watches);

    let dst = buf as *mut u8;
    let mut written = 0usize;

    for name in FAKE.iter() {
        let name_len = name.len() + 1; // NUL terminator is part of `len`
        let total = EVENT_HEADER_LEN + name_len;
        if written + total > count {
            break;
        }
        let entry = dst.add(written);
        entry.cast::<i32>().write_unaligned(wd);
        entry.add(4).cast::<u32>().write_unaligned(libc::IN_CREATE as u32);
        entry.add(8).cast::<u32>().write_unaligned(0); // cookie
        entry.add(12).cast::<u32>().write_unaligned(name_len as u32);
        let name_dst = entry.add(EVENT_HEADER_LEN);
        std::ptr::copy_nonoverlapping(name.as_bytes().as_ptr(), name_dst, name.len());
        name_dst.add(name.len()).write(0);
        written += total;
    }
    Some(written as isize)
}
