//! C1: lazily-resolved addresses of the "real" (next-in-chain) libc symbols.
//!
//! Each symbol is resolved on first use via `dlsym(RTLD_NEXT, ...)` and
//! cached; resolving eagerly at library-constructor time can race the
//! loader's own initialisation (§9 "Loader re-entrancy"), so there is no
//! constructor here at all, just lazy `OnceCell`s.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_long, c_ulong, c_void};

use once_cell::sync::OnceCell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("dlsym(RTLD_NEXT, \"{0}\") returned NULL")]
    NotFound(&'static str),
}

pub type OpenFn = unsafe extern "C" fn(*const c_char, c_int, libc::mode_t) -> c_int;
pub type IoctlFn = unsafe extern "C" fn(c_int, c_ulong, *mut c_void) -> c_int;
pub type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
pub type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, libc::size_t) -> isize;
pub type OpendirFn = unsafe extern "C" fn(*const c_char) -> *mut libc::DIR;
pub type ClosedirFn = unsafe extern "C" fn(*mut libc::DIR) -> c_int;
pub type ReaddirFn = unsafe extern "C" fn(*mut libc::DIR) -> *mut libc::dirent;
pub type GetdentsFn = unsafe extern "C" fn(c_int, *mut c_void, libc::size_t) -> c_long;
pub type InotifyAddWatchFn = unsafe extern "C" fn(c_int, *const c_char, u32) -> c_int;
pub type EpollCtlFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut libc::epoll_event) -> c_int;

/// Resolve `name` via `dlsym(RTLD_NEXT, name)` and transmute it to `F`.
///
/// # Safety
/// The caller must supply `F` matching the real symbol's actual ABI
/// signature; a mismatch is undefined behaviour at the call site, same as
/// any other `dlsym`-based interposer.
unsafe fn resolve<F: Copy>(name: &'static CStr) -> Result<F, ResolveError> {
    let addr = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
    if addr.is_null() {
        return Err(ResolveError::NotFound(
            name.to_str().unwrap_or("<non-utf8 symbol>"),
        ));
    }
    // `F` is always one of the `unsafe extern "C" fn` aliases above, all of
    // which are pointer-sized, so this transmute is a plain reinterpret of
    // one function-pointer representation as another.
    Ok(std::mem::transmute_copy::<*mut c_void, F>(&addr))
}

macro_rules! trampoline {
    ($fn_name:ident, $cache_name:ident, $ty:ty, $symbol:literal) => {
        static $cache_name: OnceCell<$ty> = OnceCell::new();

        pub fn $fn_name() -> Result<$ty, ResolveError> {
            $cache_name
                .get_or_try_init(|| {
                    static NAME: &str = concat!($symbol, "\0");
                    let cstr = CStr::from_bytes_with_nul(NAME.as_bytes()).unwrap();
                    unsafe { resolve::<$ty>(cstr) }
                })
                .map(|v| *v)
        }
    };
}

trampoline!(real_open, OPEN, OpenFn, "open");
trampoline!(real_open64, OPEN64, OpenFn, "open64");
trampoline!(real_ioctl, IOCTL, IoctlFn, "ioctl");
trampoline!(real_close, CLOSE, CloseFn, "close");
trampoline!(real_read, READ, ReadFn, "read");
trampoline!(real_opendir, OPENDIR, OpendirFn, "opendir");
trampoline!(real_closedir, CLOSEDIR, ClosedirFn, "closedir");
trampoline!(real_readdir, READDIR, ReaddirFn, "readdir");
trampoline!(real_getdents64, GETDENTS64, GetdentsFn, "getdents64");
trampoline!(
    real_inotify_add_watch,
    INOTIFY_ADD_WATCH,
    InotifyAddWatchFn,
    "inotify_add_watch"
);
trampoline!(real_epoll_ctl, EPOLL_CTL, EpollCtlFn, "epoll_ctl");
