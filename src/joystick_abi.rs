//! C6 joystick-ABI emulator: services the legacy `'j'` ioctl family
//! (`linux/joystick.h`) from a slot's cached configuration (§4.5).

use std::os::raw::{c_int, c_void};
use std::os::unix::io::RawFd;

use crate::ioctl_num::{ioc_nr, ioc_size, ioc_type, JOYSTICK_TYPE};
use crate::registry::Slot;
use crate::trampoline;

/// `JS_VERSION` from `linux/joystick.h` (version 2.1.0).
pub const JS_VERSION: u32 = 0x02_0100;

const JSIOCGVERSION: u8 = 0x01;
const JSIOCGAXES: u8 = 0x11;
const JSIOCGBUTTONS: u8 = 0x12;
const JSIOCGNAME: u8 = 0x13;
const JSIOCSCORR: u8 = 0x21;
const JSIOCGCORR: u8 = 0x22;
const JSIOCSAXMAP: u8 = 0x31;
const JSIOCGAXMAP: u8 = 0x32;
const JSIOCSBTNMAP: u8 = 0x33;
const JSIOCGBTNMAP: u8 = 0x34;

/// True if `request`'s type byte is `'j'`, regardless of the slot's
/// advertised `kind` (§9: always re-derive from the request word).
pub fn is_joystick_request(request: u64) -> bool {
    ioc_type(request) == JOYSTICK_TYPE
}

/// Dispatch a `'j'`-type ioctl on `fd`/`slot`. `arg` is the single
/// pointer-sized variadic argument extracted by the caller. Unhandled
/// request numbers are forwarded to the trampoline (§4.5 table, "other").
///
/// # Safety
/// `arg` must point to a buffer large enough for the request being
/// serviced, as the kernel ABI for that request promises; this is the same
/// contract any ioctl caller already has with the kernel.
pub unsafe fn dispatch(fd: RawFd, slot: &'static Slot, request: u64, arg: *mut c_void) -> c_int {
    let nr = ioc_nr(request);
    let config = slot.config.lock();

    match nr {
        JSIOCGVERSION => {
            log::info!("ioctl JSIOCGVERSION(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                (arg as *mut u32).write(JS_VERSION);
            }
            0
        }
        JSIOCGAXES => {
            log::info!("ioctl JSIOCGAXES(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                (arg as *mut u8).write(config.num_axes as u8);
            }
            0
        }
        JSIOCGBUTTONS => {
            log::info!("ioctl JSIOCGBUTTONS(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                (arg as *mut u8).write(config.num_btns as u8);
            }
            0
        }
        JSIOCGNAME => {
            let len = ioc_size(request);
            log::info!(
                "ioctl JSIOCGNAME(0x{:08x}, len={}) on {}",
                request,
                len,
                slot.socket_path
            );
            if !arg.is_null() && len > 0 {
                let name = config.name_str().as_bytes();
                let copy_len = name.len().min(len - 1);
                let dst = arg as *mut u8;
                std::ptr::copy_nonoverlapping(name.as_ptr(), dst, copy_len);
                dst.add(copy_len).write(0);
            }
            0
        }
        JSIOCSCORR => {
            log::info!("ioctl JSIOCSCORR(0x{:08x}) on {}: accepted, no-op", request, slot.socket_path);
            0
        }
        JSIOCGCORR => {
            log::info!("ioctl JSIOCGCORR(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                (arg as *mut crate::config::JsCorr).write(slot.corr);
            }
            0
        }
        JSIOCSAXMAP => {
            log::info!("ioctl JSIOCSAXMAP(0x{:08x}) on {}: accepted, no-op", request, slot.socket_path);
            0
        }
        JSIOCGAXMAP => {
            log::info!("ioctl JSIOCGAXMAP(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                let n = config.num_axes as usize;
                std::ptr::copy_nonoverlapping(config.axes_map.as_ptr(), arg as *mut u8, n);
            }
            0
        }
        JSIOCSBTNMAP => {
            log::info!("ioctl JSIOCSBTNMAP(0x{:08x}) on {}: accepted, no-op", request, slot.socket_path);
            0
        }
        JSIOCGBTNMAP => {
            log::info!("ioctl JSIOCGBTNMAP(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                let n = config.num_btns as usize;
                std::ptr::copy_nonoverlapping(config.btn_map.as_ptr(), arg as *mut u16, n);
            }
            0
        }
        other => {
            log::warn!(
                "unhandled joystick ioctl request 0x{:08x} (nr=0x{:02x}) on {}",
                request,
                other,
                slot.socket_path
            );
            drop(config);
            match trampoline::real_ioctl() {
                Ok(real) => real(fd, request as std::os::raw::c_ulong, arg),
                Err(e) => {
                    log::error!("cannot forward unhandled ioctl: {}", e);
                    -1
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBlob, MAX_AXES, MAX_BUTTONS, NAME_LEN};
    use crate::registry::SLOTS;

    fn sample_config() -> ConfigBlob {
        let mut name = [0u8; NAME_LEN];
        name[..3].copy_from_slice(b"Pad");
        let mut btn_map = [0u16; MAX_BUTTONS];
        btn_map[0] = 0x130;
        let mut axes_map = [0u8; MAX_AXES];
        axes_map[0] = 0x00;
        axes_map[1] = 0x01;
        ConfigBlob {
            name,
            vendor: 1,
            product: 2,
            version: 3,
            num_btns: 1,
            num_axes: 2,
            btn_map,
            axes_map,
        }
    }

    #[test]
    fn jsiocgname_null_terminates_without_pre_truncating() {
        let slot = &SLOTS[0];
        *slot.config.lock() = sample_config();

        let mut buf = [0xFFu8; 16];
        let request: u64 = 0x8010_6a13; // JSIOCGNAME(16)
        let ret = unsafe { dispatch(-1, slot, request, buf.as_mut_ptr() as *mut c_void) };
        assert_eq!(ret, 0);
        assert_eq!(&buf[0..4], b"Pad\0");
    }

    #[test]
    fn jsiocgaxes_and_buttons_round_trip() {
        let slot = &SLOTS[0];
        *slot.config.lock() = sample_config();

        let mut axes: u8 = 0;
        unsafe { dispatch(-1, slot, 0x8001_6a11, &mut axes as *mut u8 as *mut c_void) };
        assert_eq!(axes, 2);

        let mut buttons: u8 = 0;
        unsafe { dispatch(-1, slot, 0x8001_6a12, &mut buttons as *mut u8 as *mut c_void) };
        assert_eq!(buttons, 1);
    }

    #[test]
    fn jsiocgaxmap_and_btnmap_are_byte_equal_to_config() {
        let slot = &SLOTS[0];
        let cfg = sample_config();
        *slot.config.lock() = cfg.clone();

        let mut axmap = [0xFFu8; MAX_AXES];
        unsafe { dispatch(-1, slot, 0x8040_6a32, axmap.as_mut_ptr() as *mut c_void) };
        assert_eq!(&axmap[0..2], &cfg.axes_map[0..2]);

        let mut btnmap = [0u16; MAX_BUTTONS];
        unsafe { dispatch(-1, slot, 0x8040_6a34, btnmap.as_mut_ptr() as *mut c_void) };
        assert_eq!(btnmap[0], cfg.btn_map[0]);
    }

    #[test]
    fn jsiocgcorr_is_zeroed() {
        let slot = &SLOTS[1];
        let mut corr = crate::config::JsCorr {
            coef: [9; 8],
            prec: 9,
            corr_type: 9,
        };
        unsafe { dispatch(-1, slot, 0x8024_6a22, &mut corr as *mut _ as *mut c_void) };
        assert_eq!(corr.coef, [0; 8]);
        assert_eq!(corr.prec, 0);
    }
}
