//! C4 directory-illusion engine (opendir/readdir/closedir and
//! open(O_DIRECTORY)+getdents64 halves; see `inotify_shim` for the third
//! idiom).
//! Real entries already present in `/dev/input` are suppressed once a
//! session is registered (§4.3).

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::raw::{c_long, c_void};
use std::os::unix::io::RawFd;

use parking_lot::Mutex;

use crate::registry::FAKE;

lazy_static::lazy_static! {
    static ref DIR_SESSIONS: Mutex<HashMap<usize, usize>> = Mutex::new(HashMap::new());
    static ref DIRFD_SESSIONS: Mutex<HashMap<RawFd, usize>> = Mutex::new(HashMap::new());
}

thread_local! {
    static DIRENT_BUF: RefCell<libc::dirent> = RefCell::new(unsafe { std::mem::zeroed() });
}

/// `offsetof(linux_dirent64, d_name)`: ino(8) + off(8) + reclen(2) + type(1).
const D_NAME_OFFSET: usize = 19;

fn round8(n: usize) -> usize {
    (n + 7) & !7
}

/// Register a freshly-`opendir`'d handle on `/dev/input` with cursor 0.
pub fn register_dir_handle(handle: *mut libc::DIR) {
    DIR_SESSIONS.lock().insert(handle as usize, 0);
}

pub fn deregister_dir_handle(handle: *mut libc::DIR) {
    DIR_SESSIONS.lock().remove(&(handle as usize));
}

/// `Some(ptr)` (possibly null for end-of-stream) if `handle` is a registered
/// synthetic session; `None` means "not ours, forward to the trampoline".
///
/// # Safety
/// `handle` must be a value either previously registered via
/// `register_dir_handle` or never registered at all.
pub unsafe fn readdir_synthetic(handle: *mut libc::DIR) -> Option<*mut libc::dirent> {
    let mut sessions = DIR_SESSIONS.lock();
    let cursor = sessions.get_mut(&(handle as usize))?;
    if *cursor >= FAKE.len() {
        return Some(std::ptr::null_mut());
    }
    let name = FAKE[*cursor];
    *cursor += 1;
    drop(sessions);

    DIRENT_BUF.with(|cell| {
        let mut entry = cell.borrow_mut();
        *entry = std::mem::zeroed();
        entry.d_type = libc::DT_UNKNOWN;
        write_name(&mut entry.d_name, name);
        Some(&mut *entry as *mut libc::dirent)
    })
}

fn write_name(dst: &mut [std::os::raw::c_char], name: &str) {
    for (i, b) in name.as_bytes().iter().enumerate() {
        dst[i] = *b as std::os::raw::c_char;
    }
    dst[name.len()] = 0;
}

pub fn register_dirfd(fd: RawFd) {
    DIRFD_SESSIONS.lock().insert(fd, 0);
}

pub fn deregister_dirfd(fd: RawFd) {
    DIRFD_SESSIONS.lock().remove(&fd);
}

/// `Some(n)` if `fd` is a registered synthetic dir-fd (`n` bytes written,
/// possibly 0 at end-of-stream); `None` means "not ours".
///
/// A record that does not fit in `count` is deferred whole to the next call
/// (§4.3 boundary rule).
///
/// # Safety
/// `buf` must point to at least `count` writable bytes.
pub unsafe fn getdents64_synthetic(fd: RawFd, buf: *mut c_void, count: usize) -> Option<c_long> {
    let mut sessions = DIRFD_SESSIONS.lock();
    let cursor = sessions.get_mut(&fd)?;
    let dst = buf as *mut u8;
    let mut written = 0usize;
    let mut off = *cursor;

    while off < FAKE.len() {
        let name = FAKE[off];
        let reclen = round8(D_NAME_OFFSET + name.len() + 1);
        if written + reclen > count {
            break;
        }
        let entry = dst.add(written);
        entry.cast::<u64>().write_unaligned(0); // d_ino: unused by callers (§4.3)
        entry
            .add(8)
            .cast::<i64>()
            .write_unaligned((off + 1) as i64); // d_off: next cursor
        entry.add(16).cast::<u16>().write_unaligned(reclen as u16);
        entry.add(18).write(libc::DT_UNKNOWN);
        let name_dst = entry.add(D_NAME_OFFSET);
        std::ptr::copy_nonoverlapping(name.as_bytes().as_ptr(), name_dst, name.len());
        name_dst.add(name.len()).write(0);

        written += reclen;
        off += 1;
    }
    *cursor = off;
    Some(written as c_long)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readdir_synthetic_walks_fake_then_ends() {
        let handle = 0x1 as *mut libc::DIR;
        register_dir_handle(handle);

        let mut seen = Vec::new();
        loop {
            let entry = unsafe { readdir_synthetic(handle) }.unwrap();
            if entry.is_null() {
                break;
            }
            let name = unsafe {
                std::ffi::CStr::from_ptr((*entry).d_name.as_ptr())
                    .to_str()
                    .unwrap()
                    .to_string()
            };
            seen.push(name);
        }
        assert_eq!(seen, FAKE.to_vec());
        deregister_dir_handle(handle);
    }

    #[test]
    fn readdir_synthetic_is_none_for_unregistered_handle() {
        let handle = 0xdead as *mut libc::DIR;
        assert!(unsafe { readdir_synthetic(handle) }.is_none());
    }

    #[test]
    fn getdents64_synthetic_covers_all_fake_names_with_8_byte_records() {
        let fd: RawFd = 999;
        register_dirfd(fd);

        let mut buf = [0u8; 4096];
        let n = unsafe { getdents64_synthetic(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) }
            .unwrap();
        assert!(n > 0);

        let mut names = Vec::new();
        let mut off = 0usize;
        while off < n as usize {
            let reclen = u16::from_ne_bytes([buf[off + 16], buf[off + 17]]) as usize;
            assert_eq!(reclen % 8, 0);
            let name_start = off + D_NAME_OFFSET;
            let name_end = buf[name_start..].iter().position(|&b| b == 0).unwrap() + name_start;
            names.push(String::from_utf8(buf[name_start..name_end].to_vec()).unwrap());
            off += reclen;
        }
        assert_eq!(names, FAKE.to_vec());

        // Cursor is now exhausted; a further call returns 0.
        let n2 = unsafe { getdents64_synthetic(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) }
            .unwrap();
        assert_eq!(n2, 0);

        deregister_dirfd(fd);
    }

    #[test]
    fn getdents64_synthetic_defers_a_record_that_does_not_fit() {
        let fd: RawFd = 1000;
        register_dirfd(fd);

        let mut buf = [0u8; 4096];
        // Room for exactly one "event1000" record (reclen 32) and nothing more.
        let n = unsafe { getdents64_synthetic(fd, buf.as_mut_ptr() as *mut c_void, 32) }.unwrap();
        assert_eq!(n, 32);

        let n2 = unsafe { getdents64_synthetic(fd, buf.as_mut_ptr() as *mut c_void, 4096) }
            .unwrap();
        assert!(n2 > 0);

        deregister_dirfd(fd);
    }
}
