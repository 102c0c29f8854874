//! C7 evdev-ABI emulator: services the `'E'` ioctl family (`linux/input.h`)
//! from a slot's cached configuration, including the parametric
//! `EVIOCGABS(k)` and `EVIOCGBIT(type, len)` ranges (§4.6).

use std::os::raw::{c_int, c_void};
use std::os::unix::io::RawFd;

use crate::ioctl_num::{ioc_nr, ioc_size, ioc_type, EVDEV_TYPE};
use crate::registry::Slot;
use crate::trampoline;

/// Evdev protocol version reported by `EVIOCGVERSION`.
pub const EVDEV_VERSION: i32 = 0x01_0100;
/// `BUS_VIRTUAL` from `linux/input.h`.
pub const BUS_VIRTUAL: u16 = 0x06;

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_REL: u16 = 0x02;
const EV_ABS: u16 = 0x03;
const EV_FF: u16 = 0x15;

const ABS_Z: u32 = 0x02;
const ABS_RZ: u32 = 0x05;
const ABS_BRAKE: u32 = 0x0a;
const ABS_HAT0X: u32 = 0x10;
const ABS_HAT3Y: u32 = 0x17;

const EVIOCGVERSION: u8 = 0x01;
const EVIOCGID: u8 = 0x02;
const EVIOCGNAME: u8 = 0x06;
const EVIOCGPHYS: u8 = 0x07;
const EVIOCGUNIQ: u8 = 0x08;
const EVIOCGPROP: u8 = 0x09;
const EVIOCGKEY: u8 = 0x18;
const EVIOCGBIT_BASE: u8 = 0x20;
const EVIOCGBIT_END: u8 = 0x40;
const EVIOCGABS_BASE: u8 = 0x40;
const EVIOCGABS_END: u8 = 0x80; // exclusive upper bound of the EVIOCGABS(k) range
const EVIOCRMFF: u8 = 0x81;
const EVIOCGRAB: u8 = 0x90;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct InputAbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// True if `request`'s type byte is `'E'`.
pub fn is_evdev_request(request: u64) -> bool {
    ioc_type(request) == EVDEV_TYPE
}

/// Fill in the range fields of an `input_absinfo` for axis code `k`, per the
/// table in §4.6. `value` is always zeroed first.
fn abs_info_for(k: u32) -> InputAbsInfo {
    let mut info = InputAbsInfo::default();
    if k == ABS_Z || k == ABS_RZ {
        info.minimum = 0;
        info.maximum = 255;
    } else if k <= ABS_BRAKE {
        info.minimum = -32767;
        info.maximum = 32767;
        info.fuzz = 16;
        info.flat = 128;
    } else if (ABS_HAT0X..=ABS_HAT3Y).contains(&k) {
        info.minimum = -1;
        info.maximum = 1;
    } else {
        // Not named by §4.6's table; fall back to the same generic range
        // used for the analog-stick axes rather than leaving it all-zero.
        info.minimum = -32768;
        info.maximum = 32767;
        info.fuzz = 16;
        info.flat = 128;
    }
    info
}

unsafe fn zero_fill(ptr: *mut c_void, len: usize) {
    if !ptr.is_null() && len > 0 {
        std::ptr::write_bytes(ptr as *mut u8, 0, len);
    }
}

unsafe fn set_bit(buf: *mut u8, len: usize, code: u16) {
    let byte = code as usize / 8;
    let bit = code as usize % 8;
    if byte < len {
        *buf.add(byte) |= 1 << bit;
    }
}

/// Dispatch an `'E'`-type ioctl on `fd`/`slot`.
///
/// # Safety
/// `arg` must point to a buffer large enough for the request being
/// serviced, per the kernel evdev ABI for that request.
pub unsafe fn dispatch(fd: RawFd, slot: &'static Slot, request: u64, arg: *mut c_void) -> c_int {
    let nr = ioc_nr(request);

    // EVIOCGABS(k) is a parametric range, not a single opcode.
    if (EVIOCGABS_BASE..EVIOCGABS_END).contains(&nr) {
        let axis_code = (nr - EVIOCGABS_BASE) as u32;
        let info = abs_info_for(axis_code);
        log::info!(
            "ioctl EVIOCGABS({}) (0x{:08x}) on {}",
            axis_code,
            request,
            slot.socket_path
        );
        if !arg.is_null() {
            (arg as *mut InputAbsInfo).write(info);
        }
        return 1;
    }

    if (EVIOCGBIT_BASE..EVIOCGBIT_END).contains(&nr) {
        let ev_type = (nr - EVIOCGBIT_BASE) as u16;
        let len = ioc_size(request);
        return handle_eviocgbit(slot, request, ev_type, arg, len);
    }

    let config = slot.config.lock();
    match nr {
        EVIOCGVERSION => {
            log::info!("ioctl EVIOCGVERSION(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                (arg as *mut i32).write(EVDEV_VERSION);
            }
            0
        }
        EVIOCGID => {
            log::info!("ioctl EVIOCGID(0x{:08x}) on {}", request, slot.socket_path);
            if !arg.is_null() {
                (arg as *mut InputId).write(InputId {
                    bustype: BUS_VIRTUAL,
                    vendor: config.vendor,
                    product: config.product,
                    version: config.version,
                });
            }
            0
        }
        EVIOCGNAME => {
            let len = ioc_size(request);
            log::info!("ioctl EVIOCGNAME(len={}) on {}", len, slot.socket_path);
            if arg.is_null() || len == 0 {
                return -1;
            }
            let name = config.name_str().as_bytes();
            let copy_len = name.len().min(len - 1);
            let dst = arg as *mut u8;
            std::ptr::copy_nonoverlapping(name.as_ptr(), dst, copy_len);
            dst.add(copy_len).write(0);
            copy_len as c_int
        }
        EVIOCGPHYS => {
            let len = ioc_size(request);
            log::info!("ioctl EVIOCGPHYS(len={}) on {}: no physical topology", len, slot.socket_path);
            if !arg.is_null() && len > 0 {
                (arg as *mut u8).write(0);
            }
            0
        }
        EVIOCGUNIQ => {
            log::info!("ioctl EVIOCGUNIQ on {}: unsupported", slot.socket_path);
            -1
        }
        EVIOCGPROP => {
            let len = ioc_size(request);
            zero_fill(arg, len);
            0
        }
        EVIOCGKEY => {
            let len = ioc_size(request);
            zero_fill(arg, len);
            config.num_btns as c_int
        }
        EVIOCRMFF => {
            log::info!("ioctl EVIOCRMFF(0x{:08x}) on {}: accepted, no-op", request, slot.socket_path);
            0
        }
        EVIOCGRAB => {
            log::info!("ioctl EVIOCGRAB(0x{:08x}) on {}: accepted, no-op", request, slot.socket_path);
            0
        }
        other => {
            log::warn!(
                "unhandled evdev ioctl request 0x{:08x} (nr=0x{:02x}) on {}",
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

unsafe fn handle_eviocgbit(
    slot: &'static Slot,
    request: u64,
    ev_type: u16,
    arg: *mut c_void,
    len: usize,
) -> c_int {
    log::info!(
        "ioctl EVIOCGBIT(type={}, len={}) (0x{:08x}) on {}",
        ev_type,
        len,
        request,
        slot.socket_path
    );
    zero_fill(arg, len);
    if arg.is_null() {
        return 0;
    }
    let buf = arg as *mut u8;
    let config = slot.config.lock();

    match ev_type {
        EV_SYN => {
            // "Which event types does the device emit?" reuses the same
            // bitmap routine and codepoint numerics as EVIOCGBIT(type, ...)
            // itself (§4.6).
            for code in [EV_SYN, EV_KEY, EV_ABS] {
                set_bit(buf, len, code);
            }
            0
        }
        EV_ABS => {
            for i in 0..config.num_axes as usize {
                set_bit(buf, len, config.axes_map[i] as u16);
            }
            config.num_axes as c_int
        }
        EV_KEY => {
            for i in 0..config.num_btns as usize {
                set_bit(buf, len, config.btn_map[i]);
            }
            config.num_btns as c_int
        }
        EV_REL => 0,
        EV_FF => -1,
        _ => {
            log::warn!("ioctl EVIOCGBIT({}): unknown type", ev_type);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBlob, MAX_AXES, MAX_BUTTONS, NAME_LEN};
    use crate::registry::SLOTS;

    fn config_with(num_axes: u16, axes_map: [u8; MAX_AXES], num_btns: u16, btn_map: [u16; MAX_BUTTONS]) -> ConfigBlob {
        ConfigBlob {
            name: [0u8; NAME_LEN],
            vendor: 0x1234,
            product: 0x5678,
            version: 1,
            num_btns,
            num_axes,
            btn_map,
            axes_map,
        }
    }

    #[test]
    fn eviocgbit_ev_abs_sets_exactly_the_configured_axis_bits() {
        let slot = &SLOTS[4];
        let mut axes_map = [0u8; MAX_AXES];
        axes_map[0] = 0x00; // ABS_X
        *slot.config.lock() = config_with(1, axes_map, 0, [0u16; MAX_BUTTONS]);

        let mut buf = [0u8; 8];
        // EVIOCGBIT(EV_ABS=3, 8) -> nr = 0x20+3 = 0x23.
        let request: u64 = 0x8008_4523;
        let ret = unsafe { dispatch(-1, slot, request, buf.as_mut_ptr() as *mut c_void) };
        assert_eq!(ret, 1);
        assert_eq!(buf[0] & 0x01, 0x01);
    }

    #[test]
    fn eviocgbit_ev_key_matches_button_map() {
        let slot = &SLOTS[5];
        let mut btn_map = [0u16; MAX_BUTTONS];
        btn_map[0] = 0x130; // BTN_SOUTH
        *slot.config.lock() = config_with(0, [0u8; MAX_AXES], 1, btn_map);

        let mut buf = [0u8; 64];
        // EVIOCGBIT(EV_KEY=1, 64) -> nr = 0x20+1 = 0x21.
        let request: u64 = 0x8040_4521;
        let ret = unsafe { dispatch(-1, slot, request, buf.as_mut_ptr() as *mut c_void) };
        assert_eq!(ret, 1);
        let code = 0x130usize;
        assert_eq!(buf[code / 8] & (1 << (code % 8)), 1 << (code % 8));
    }

    #[test]
    fn eviocgabs_z_is_0_to_255() {
        let slot = &SLOTS[6];
        let mut info = InputAbsInfo::default();
        // EVIOCGABS(ABS_Z=2) -> nr = 0x40+2 = 0x42.
        let request: u64 = 0x8018_4542;
        let ret = unsafe { dispatch(-1, slot, request, &mut info as *mut _ as *mut c_void) };
        assert_eq!(ret, 1);
        assert_eq!(info.minimum, 0);
        assert_eq!(info.maximum, 255);
    }

    #[test]
    fn eviocgabs_hat_is_minus_one_to_one() {
        let slot = &SLOTS[6];
        let mut info = InputAbsInfo::default();
        // EVIOCGABS(ABS_HAT0X=0x10) -> nr = 0x40+0x10 = 0x50.
        let request: u64 = 0x8018_4550;
        let ret = unsafe { dispatch(-1, slot, request, &mut info as *mut _ as *mut c_void) };
        assert_eq!(ret, 1);
        assert_eq!(info.minimum, -1);
        assert_eq!(info.maximum, 1);
    }

    #[test]
    fn eviocgid_reports_bus_virtual_and_config_identity() {
        let slot = &SLOTS[7];
        *slot.config.lock() = config_with(0, [0u8; MAX_AXES], 0, [0u16; MAX_BUTTONS]);
        let mut id = InputId::default();
        let request: u64 = 0x8008_4502;
        unsafe { dispatch(-1, slot, request, &mut id as *mut _ as *mut c_void) };
        assert_eq!(id.bustype, BUS_VIRTUAL);
        assert_eq!(id.vendor, 0x1234);
        assert_eq!(id.product, 0x5678);
    }
}
