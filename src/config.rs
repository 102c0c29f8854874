//! Wire format for the configuration blob sent once by the supervisor over
//! each slot's socket (§3 "Configuration blob"), plus the kernel
//! `struct js_corr`-shaped correction record returned unmodified by
//! `JSIOCGCORR` (§4.5).

use std::io::{self, Read};

use thiserror::Error;

pub const NAME_LEN: usize = 255;
pub const MAX_BUTTONS: usize = 512;
pub const MAX_AXES: usize = 64;

/// `sizeof(js_config_t)` on the wire: name + 5 u16 fields + btn_map + axes_map.
pub const CONFIG_BLOB_LEN: usize =
    NAME_LEN + 2 * 5 + MAX_BUTTONS * 2 + MAX_AXES;

#[derive(Debug, Error)]
pub enum ConfigReadError {
    #[error("short read of config blob: got {got} of {want} bytes")]
    ShortRead { got: usize, want: usize },
    #[error("socket EOF before config blob was received")]
    Eof,
    #[error("i/o error reading config blob: {0}")]
    Io(#[from] io::Error),
}

/// Cached configuration for one slot, populated once per bind (§3).
#[derive(Clone)]
pub struct ConfigBlob {
    pub name: [u8; NAME_LEN],
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    pub num_btns: u16,
    pub num_axes: u16,
    pub btn_map: [u16; MAX_BUTTONS],
    pub axes_map: [u8; MAX_AXES],
}

impl Default for ConfigBlob {
    fn default() -> Self {
        ConfigBlob {
            name: [0u8; NAME_LEN],
            vendor: 0,
            product: 0,
            version: 0,
            num_btns: 0,
            num_axes: 0,
            btn_map: [0u16; MAX_BUTTONS],
            axes_map: [0u8; MAX_AXES],
        }
    }
}

impl ConfigBlob {
    /// Read exactly `CONFIG_BLOB_LEN` bytes from `r` and decode them. A short
    /// read (0 or partial) is an error per §4.4 step 3.
    pub fn read_from<R: Read>(r: &mut R) -> Result<ConfigBlob, ConfigReadError> {
        let mut buf = [0u8; CONFIG_BLOB_LEN];
        let mut total = 0usize;
        while total < buf.len() {
            let n = r.read(&mut buf[total..])?;
            if n == 0 {
                if total == 0 {
                    return Err(ConfigReadError::Eof);
                }
                return Err(ConfigReadError::ShortRead {
                    got: total,
                    want: buf.len(),
                });
            }
            total += n;
        }
        Ok(ConfigBlob::decode(&buf))
    }

    fn decode(buf: &[u8; CONFIG_BLOB_LEN]) -> ConfigBlob {
        let mut off = 0;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[off..off + NAME_LEN]);
        off += NAME_LEN;

        let vendor = le_u16(buf, &mut off);
        let product = le_u16(buf, &mut off);
        let version = le_u16(buf, &mut off);
        let num_btns = le_u16(buf, &mut off);
        let num_axes = le_u16(buf, &mut off);

        let mut btn_map = [0u16; MAX_BUTTONS];
        for slot in btn_map.iter_mut() {
            *slot = le_u16(buf, &mut off);
        }

        let mut axes_map = [0u8; MAX_AXES];
        axes_map.copy_from_slice(&buf[off..off + MAX_AXES]);
        off += MAX_AXES;
        debug_assert_eq!(off, CONFIG_BLOB_LEN);

        ConfigBlob {
            name,
            vendor,
            product,
            version,
            num_btns,
            num_axes,
            btn_map,
            axes_map,
        }
    }

    /// NUL-terminated name, truncated at the first NUL (or the full 255
    /// bytes if the supervisor didn't NUL-terminate it).
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

fn le_u16(buf: &[u8], off: &mut usize) -> u16 {
    let v = u16::from_le_bytes([buf[*off], buf[*off + 1]]);
    *off += 2;
    v
}

/// Kernel `struct js_corr`-shaped payload: 8 `i32` coefficients, a `u16`
/// precision and a `u16` type. Zero-initialised and returned unmodified by
/// `JSIOCGCORR` (§3, §4.5).
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct JsCorr {
    pub coef: [i32; 8],
    pub prec: u16,
    pub corr_type: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; CONFIG_BLOB_LEN];
        buf[0..3].copy_from_slice(b"Pad");
        let mut off = NAME_LEN;
        buf[off..off + 2].copy_from_slice(&1234u16.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&5678u16.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&1u16.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&1u16.to_le_bytes()); // num_btns
        off += 2;
        buf[off..off + 2].copy_from_slice(&2u16.to_le_bytes()); // num_axes
        off += 2;
        // first button map entry: BTN_TRIGGER-ish code.
        buf[off..off + 2].copy_from_slice(&0x130u16.to_le_bytes());
        off += MAX_BUTTONS * 2;
        buf[off] = 0x00; // ABS_X
        buf[off + 1] = 0x01; // ABS_Y
        buf
    }

    #[test]
    fn round_trips_known_fields() {
        let bytes = sample_bytes();
        let mut cursor = Cursor::new(bytes);
        let cfg = ConfigBlob::read_from(&mut cursor).unwrap();
        assert_eq!(cfg.name_str(), "Pad");
        assert_eq!(cfg.vendor, 1234);
        assert_eq!(cfg.product, 5678);
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.num_btns, 1);
        assert_eq!(cfg.num_axes, 2);
        assert_eq!(cfg.btn_map[0], 0x130);
        assert_eq!(cfg.axes_map[0], 0x00);
        assert_eq!(cfg.axes_map[1], 0x01);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        let err = ConfigBlob::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, ConfigReadError::ShortRead { .. }));
    }

    #[test]
    fn empty_read_is_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = ConfigBlob::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, ConfigReadError::Eof));
    }
}
