//! Vendor register library binding
//!
//! The board vendor ships a shared library exporting two calls:
//!
//! - `RawWrite(register, value, device) -> status`
//! - `RawRead(register, *value, device) -> status`
//!
//! The library is loaded at runtime with `libloading`, so the same binary
//! runs with or without the vendor package installed.

use std::path::Path;

use libloading::Library;
use tracing::{debug, info};

use crate::error::{RegError, RegResult};
use crate::traits::RawRegisters;
use crate::types::DeviceId;

type RawWriteFn = unsafe extern "C" fn(u32, u32, u32) -> i32;
type RawReadFn = unsafe extern "C" fn(u32, *mut u32, u32) -> i32;

/// Library names to try on different platforms.
#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["QWorks.dll"];

#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["libqworks.so.1", "libqworks.so"];

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
const LIB_NAMES: &[&str] = &["libqworks.dylib"];

/// Raw register primitive backed by the vendor library
pub struct VendorRegisters {
    // Keeps the function pointers below valid
    _lib: Library,
    raw_write: RawWriteFn,
    raw_read: RawReadFn,
    name: String,
}

impl VendorRegisters {
    /// Load the vendor library from `path`, or from the platform search path
    pub fn open(path: Option<&Path>) -> RegResult<Self> {
        match path {
            Some(path) => Self::load(&path.to_string_lossy()),
            None => {
                for name in LIB_NAMES {
                    match Self::load(name) {
                        Ok(lib) => return Ok(lib),
                        Err(e) => debug!("{}: {}", name, e),
                    }
                }
                Err(RegError::LibraryNotFound(LIB_NAMES.join(", ")))
            }
        }
    }

    /// Check if the vendor library can be found
    pub fn is_available() -> bool {
        Self::open(None).is_ok()
    }

    fn load(name: &str) -> RegResult<Self> {
        // SAFETY: loading runs the library's initialisers; the vendor library
        // is trusted to have none with side effects on this process.
        let lib = unsafe { Library::new(name) }
            .map_err(|e| RegError::LibraryNotFound(format!("{}: {}", name, e)))?;

        // SAFETY: the signatures match the vendor header. The pointers stay
        // valid while `_lib` is alive, and both live in the same struct.
        let raw_write = unsafe { lib.get::<RawWriteFn>(b"RawWrite\0").map(|sym| *sym) }
            .map_err(|e| RegError::SymbolMissing(format!("RawWrite: {}", e)))?;
        let raw_read = unsafe { lib.get::<RawReadFn>(b"RawRead\0").map(|sym| *sym) }
            .map_err(|e| RegError::SymbolMissing(format!("RawRead: {}", e)))?;

        info!("Loaded vendor register library: {}", name);
        Ok(Self {
            _lib: lib,
            raw_write,
            raw_read,
            name: name.to_string(),
        })
    }

    /// File name the library was loaded from
    pub fn library_name(&self) -> &str {
        &self.name
    }
}

impl RawRegisters for VendorRegisters {
    fn raw_write(&mut self, register: u32, value: u32, device: DeviceId) -> i32 {
        // SAFETY: plain values in, status out.
        unsafe { (self.raw_write)(register, value, device.0) }
    }

    fn raw_read(&mut self, register: u32, device: DeviceId) -> (u32, i32) {
        let mut value = 0u32;
        // SAFETY: `value` outlives the call and is a valid u32 out-pointer.
        let status = unsafe { (self.raw_read)(register, &mut value, device.0) };
        (value, status)
    }

    fn backend_name(&self) -> &str {
        "vendor"
    }
}
