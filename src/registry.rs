//! C2 device registry and C3 path matcher.
//!
//! The registry is a statically-initialised, fixed-size table of the eight
//! virtual device slots (§3). Lookup is linear (N is 8, a scan beats any
//! indexing scheme here).

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

use crate::config::{ConfigBlob, JsCorr};

pub const NUM_SLOTS: usize = 8;
pub const NUM_JS_SLOTS: usize = 4;
pub const NUM_EV_SLOTS: usize = 4;

/// Sentinel for "no descriptor bound to this slot" (§3 fd invariant).
pub const UNBOUND: RawFd = -1;

pub const INPUT_DIR: &str = "/dev/input";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotKind {
    Js,
    Ev,
}

/// One virtual device slot. `fd` is the only field mutated outside of the
/// initial bind: `open`/`open64` transition it `unbound -> bound`, `close`
/// transitions it back (§3 invariants).
pub struct Slot {
    pub kind: SlotKind,
    pub device_path: &'static str,
    pub socket_path: &'static str,
    fd: AtomicI32,
    pub config: Mutex<ConfigBlob>,
    pub corr: JsCorr,
}

impl Slot {
    const fn new(kind: SlotKind, device_path: &'static str, socket_path: &'static str) -> Slot {
        Slot {
            kind,
            device_path,
            socket_path,
            fd: AtomicI32::new(UNBOUND),
            config: Mutex::new(ConfigBlob {
                name: [0u8; crate::config::NAME_LEN],
                vendor: 0,
                product: 0,
                version: 0,
                num_btns: 0,
                num_axes: 0,
                btn_map: [0u16; crate::config::MAX_BUTTONS],
                axes_map: [0u8; crate::config::MAX_AXES],
            }),
            corr: JsCorr {
                coef: [0i32; 8],
                prec: 0,
                corr_type: 0,
            },
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// Atomically bind `fd` to this slot if it is currently unbound.
    /// Returns `false` if the slot was already bound (programming error
    /// under §5's single-threaded-per-fd assumption, but the CAS keeps the
    /// invariant true even if a host spawns concurrent opens of the same
    /// slot from distinct threads).
    pub fn bind(&self, new_fd: RawFd) -> bool {
        self.fd
            .compare_exchange(UNBOUND, new_fd, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally clear the binding (§5: close is a plain store).
    pub fn unbind(&self) {
        self.fd.store(UNBOUND, Ordering::Release);
    }

    /// Force a rebind regardless of current state. A slot is rebindable
    /// (§3): a well-behaved host always `close`s before re-`open`ing, which
    /// makes `bind` succeed on its own; this is the fallback for a host
    /// that opens the same slot twice without closing it first, logging
    /// instead of silently overwriting.
    pub fn force_bind(&self, new_fd: RawFd) {
        let prev = self.fd.swap(new_fd, Ordering::AcqRel);
        if prev != UNBOUND {
            log::warn!(
                "slot {} was rebound while still bound to fd {} (host did not close before reopening)",
                self.device_path,
                prev
            );
        }
    }
}

lazy_static::lazy_static! {
    pub static ref SLOTS: [Slot; NUM_SLOTS] = [
        Slot::new(SlotKind::Js, "/dev/input/js0", "/tmp/selkies_js0.sock"),
        Slot::new(SlotKind::Js, "/dev/input/js1", "/tmp/selkies_js1.sock"),
        Slot::new(SlotKind::Js, "/dev/input/js2", "/tmp/selkies_js2.sock"),
        Slot::new(SlotKind::Js, "/dev/input/js3", "/tmp/selkies_js3.sock"),
        Slot::new(SlotKind::Ev, "/dev/input/event1000", "/tmp/selkies_event1000.sock"),
        Slot::new(SlotKind::Ev, "/dev/input/event1001", "/tmp/selkies_event1001.sock"),
        Slot::new(SlotKind::Ev, "/dev/input/event1002", "/tmp/selkies_event1002.sock"),
        Slot::new(SlotKind::Ev, "/dev/input/event1003", "/tmp/selkies_event1003.sock"),
    ];
}

/// The canonical ordered list of synthetic leaf names advertised under
/// `/dev/input` (§3, §6, GLOSSARY "FAKE list"). Event nodes come first so
/// that a one-shot inotify burst (§4.3, §8 S4) delivers `event1000` then
/// `event1001` as its first two records, matching the literal end-to-end
/// scenario in §8.
pub const FAKE: [&str; NUM_SLOTS] = [
    "event1000",
    "event1001",
    "event1002",
    "event1003",
    "js0",
    "js1",
    "js2",
    "js3",
];

/// Find the slot whose `device_path` matches `path` exactly.
pub fn slot_by_path(path: &str) -> Option<&'static Slot> {
    SLOTS.iter().find(|s| s.device_path == path)
}

/// Find the slot currently bound to `fd`.
pub fn slot_by_fd(fd: RawFd) -> Option<&'static Slot> {
    if fd == UNBOUND {
        return None;
    }
    SLOTS.iter().find(|s| s.fd() == fd)
}

/// True only for the exact string `/dev/input` (§4.2).
pub fn is_input_dir(path: &str) -> bool {
    path == INPUT_DIR
}
