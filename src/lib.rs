//! LD_PRELOAD shim that makes a process believe fake joystick and evdev
//! devices exist under `/dev/input/`, backed by an external supervisor over
//! per-device AF_UNIX sockets (see the crate's design notes).
//!
//! Every exported symbol here re-declares a libc entry point with the exact
//! ABI the dynamic loader expects; unmatched calls are forwarded to the
//! trampoline untouched (§4.1, §8 invariant 1: "transparency for unrelated
//! paths").

#![feature(c_variadic)]

pub mod config;
pub mod diag;
pub mod direntry;
pub mod evdev_abi;
pub mod inotify_shim;
pub mod ioctl_num;
pub mod joystick_abi;
pub mod lifecycle;
pub mod registry;
pub mod socket_attach;
pub mod trampoline;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_long, c_void};
use std::os::unix::io::RawFd;

use registry::{is_input_dir, slot_by_fd, slot_by_path};

fn set_errno(errno: c_int) {
    unsafe {
        *libc::__errno_location() = errno;
    }
}

/// Best-effort `&str` view of a caller-supplied path pointer. `None` for a
/// null pointer or non-UTF8 bytes, in which case the caller should treat the
/// path as unmatched and forward.
unsafe fn path_str<'a>(path: *const c_char) -> Option<&'a str> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok()
}

fn log_resolve_failure(symbol: &str, err: &trampoline::ResolveError) {
    diag::ensure_installed();
    log::error!("cannot resolve real {}: {}", symbol, err);
    set_errno(libc::ENOSYS);
}

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mut args: ...) -> c_int {
    diag::ensure_installed();
    // The third argument must always be forwarded verbatim on the miss path
    // (§4.4, §9): reading it here unconditionally, even when O_CREAT isn't
    // set, matches what the caller's own stack/register layout already has
    // and avoids corrupting it for the one case that does need it.
    let mode: libc::mode_t = args.arg();

    if let Some(path) = path_str(path) {
        if let Some(slot) = slot_by_path(path) {
            return match socket_attach::attach(slot, true) {
                Ok(fd) => fd,
                Err(e) => {
                    log::error!("open({}): {}", path, e);
                    set_errno(libc::EIO);
                    -1
                }
            };
        }
    }

    match trampoline::real_open() {
        Ok(real) => {
            let fd = real(path, flags, mode);
            if fd >= 0 {
                if let Some(p) = path_str(path) {
                    if is_input_dir(p) {
                        direntry::register_dirfd(fd);
                    }
                }
            }
            fd
        }
        Err(e) => {
            log_resolve_failure("open", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mut args: ...) -> c_int {
    diag::ensure_installed();
    let mode: libc::mode_t = args.arg();

    if let Some(path) = path_str(path) {
        if let Some(slot) = slot_by_path(path) {
            // Non-blocking is deferred to the next epoll_ctl registration
            // for open64 callers (§4.4 step 5).
            return match socket_attach::attach(slot, false) {
                Ok(fd) => fd,
                Err(e) => {
                    log::error!("open64({}): {}", path, e);
                    set_errno(libc::EIO);
                    -1
                }
            };
        }
    }

    match trampoline::real_open64() {
        Ok(real) => {
            let fd = real(path, flags, mode);
            if fd >= 0 {
                if let Some(p) = path_str(path) {
                    if is_input_dir(p) {
                        direntry::register_dirfd(fd);
                    }
                }
            }
            fd
        }
        Err(e) => {
            log_resolve_failure("open64", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    diag::ensure_installed();
    lifecycle::on_close(fd);
    match trampoline::real_close() {
        Ok(real) => real(fd),
        Err(e) => {
            log_resolve_failure("close", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: libc::size_t) -> isize {
    diag::ensure_installed();
    if let Some(n) = inotify_shim::read_synthetic(fd, buf, count as usize) {
        return n;
    }
    match trampoline::real_read() {
        Ok(real) => real(fd, buf, count),
        Err(e) => {
            log_resolve_failure("read", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn ioctl(fd: c_int, request: libc::c_ulong, mut args: ...) -> c_int {
    diag::ensure_installed();
    let arg: *mut c_void = args.arg();

    if let Some(slot) = slot_by_fd(fd as RawFd) {
        let request = request as u64;
        // Always re-derive the dialect from the request word's type byte,
        // never from the slot's advertised kind (§9).
        if joystick_abi::is_joystick_request(request) {
            return joystick_abi::dispatch(fd, slot, request, arg);
        }
        if evdev_abi::is_evdev_request(request) {
            return evdev_abi::dispatch(fd, slot, request, arg);
        }
        log::warn!(
            "ioctl 0x{:08x} on registered fd {} matches neither 'j' nor 'E'",
            request,
            fd
        );
    }

    match trampoline::real_ioctl() {
        Ok(real) => real(fd, request, arg),
        Err(e) => {
            log_resolve_failure("ioctl", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut libc::DIR {
    diag::ensure_installed();
    match trampoline::real_opendir() {
        Ok(real) => {
            let handle = real(path);
            if !handle.is_null() {
                if let Some(p) = path_str(path) {
                    if is_input_dir(p) {
                        direntry::register_dir_handle(handle);
                    }
                }
            }
            handle
        }
        Err(e) => {
            log_resolve_failure("opendir", &e);
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn closedir(dirp: *mut libc::DIR) -> c_int {
    diag::ensure_installed();
    direntry::deregister_dir_handle(dirp);
    match trampoline::real_closedir() {
        Ok(real) => real(dirp),
        Err(e) => {
            log_resolve_failure("closedir", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn readdir(dirp: *mut libc::DIR) -> *mut libc::dirent {
    diag::ensure_installed();
    if let Some(entry) = direntry::readdir_synthetic(dirp) {
        return entry;
    }
    match trampoline::real_readdir() {
        Ok(real) => real(dirp),
        Err(e) => {
            log_resolve_failure("readdir", &e);
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn getdents64(fd: c_int, buf: *mut c_void, count: libc::size_t) -> c_long {
    diag::ensure_installed();
    if let Some(n) = direntry::getdents64_synthetic(fd, buf, count as usize) {
        return n;
    }
    match trampoline::real_getdents64() {
        Ok(real) => real(fd, buf, count),
        Err(e) => {
            log_resolve_failure("getdents64", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn inotify_add_watch(fd: c_int, path: *const c_char, mask: u32) -> c_int {
    diag::ensure_installed();
    match trampoline::real_inotify_add_watch() {
        Ok(real) => {
            let wd = real(fd, path, mask);
            if wd >= 0 {
                if let Some(p) = path_str(path) {
                    if is_input_dir(p) {
                        inotify_shim::register_watch(fd, wd);
                    }
                }
            }
            wd
        }
        Err(e) => {
            log_resolve_failure("inotify_add_watch", &e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn epoll_ctl(
    epfd: c_int,
    op: c_int,
    fd: c_int,
    event: *mut libc::epoll_event,
) -> c_int {
    diag::ensure_installed();
    if op == libc::EPOLL_CTL_ADD {
        lifecycle::on_epoll_ctl_add(fd);
    }
    match trampoline::real_epoll_ctl() {
        Ok(real) => real(epfd, op, fd, event),
        Err(e) => {
            log_resolve_failure("epoll_ctl", &e);
            -1
        }
    }
}
