//! Register primitive and driver trait definitions

use std::time::Duration;

use crate::error::{RegError, RegResult};
use crate::types::{AddressSpace, DeviceId, DriverInfo};

/// Raw register primitive of one board family
///
/// Each call is atomic, synchronous and fallible. A status `> 0` means
/// success; any other status is an opaque vendor failure code.
pub trait RawRegisters: Send {
    /// Write `value` into raw register `register` of `device`
    fn raw_write(&mut self, register: u32, value: u32, device: DeviceId) -> i32;

    /// Read raw register `register` of `device`, returning `(value, status)`
    fn raw_read(&mut self, register: u32, device: DeviceId) -> (u32, i32);

    /// Backend name for diagnostics
    fn backend_name(&self) -> &str {
        "raw"
    }

    /// Set the per-call timeout of the underlying session
    fn set_session_timeout(&mut self, _timeout: Duration) -> RegResult<()> {
        Err(RegError::NotSupported(format!(
            "timeouts not supported by {}",
            self.backend_name()
        )))
    }

    /// Get the per-call timeout of the underlying session
    fn session_timeout(&self) -> RegResult<Duration> {
        Err(RegError::NotSupported(format!(
            "timeouts not supported by {}",
            self.backend_name()
        )))
    }

    /// Release a device handle
    fn release(&mut self, _device: DeviceId) -> RegResult<()> {
        Ok(())
    }
}

impl<R: RawRegisters + ?Sized> RawRegisters for &mut R {
    fn raw_write(&mut self, register: u32, value: u32, device: DeviceId) -> i32 {
        (**self).raw_write(register, value, device)
    }

    fn raw_read(&mut self, register: u32, device: DeviceId) -> (u32, i32) {
        (**self).raw_read(register, device)
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }

    fn set_session_timeout(&mut self, timeout: Duration) -> RegResult<()> {
        (**self).set_session_timeout(timeout)
    }

    fn session_timeout(&self) -> RegResult<Duration> {
        (**self).session_timeout()
    }

    fn release(&mut self, device: DeviceId) -> RegResult<()> {
        (**self).release(device)
    }
}

impl<R: RawRegisters + ?Sized> RawRegisters for Box<R> {
    fn raw_write(&mut self, register: u32, value: u32, device: DeviceId) -> i32 {
        (**self).raw_write(register, value, device)
    }

    fn raw_read(&mut self, register: u32, device: DeviceId) -> (u32, i32) {
        (**self).raw_read(register, device)
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }

    fn set_session_timeout(&mut self, timeout: Duration) -> RegResult<()> {
        (**self).set_session_timeout(timeout)
    }

    fn session_timeout(&self) -> RegResult<Duration> {
        (**self).session_timeout()
    }

    fn release(&mut self, device: DeviceId) -> RegResult<()> {
        (**self).release(device)
    }
}

/// Uniform register-driver capability set
///
/// Callers (instrument logic, UI) use this without knowing whether real
/// hardware or the simulated store sits behind it. A driver is not safe for
/// concurrent use; wrap it in [`SharedDriver`](crate::shared::SharedDriver)
/// when more than one thread needs it.
///
/// # Example
///
/// ```rust
/// use smon_regs::{MockDriver, RegDriver};
///
/// let mut driver = MockDriver::new();
/// driver.reg_write(0x40, 7).unwrap();
/// assert_eq!(driver.reg_read(0x40).unwrap(), 7);
/// ```
pub trait RegDriver: Send {
    // =========================================================================
    // Session
    // =========================================================================

    /// Get information about the driver
    fn info(&self) -> DriverInfo;

    /// Currently selected address space
    fn address_space(&self) -> AddressSpace;

    /// Select the address space targeted by subsequent scalar calls
    fn set_address_space(&mut self, space: AddressSpace) -> RegResult<()>;

    /// Set the session timeout
    fn set_timeout(&mut self, _timeout: Duration) -> RegResult<()> {
        Err(RegError::NotSupported("set_timeout".to_string()))
    }

    /// Get the session timeout
    fn timeout(&self) -> RegResult<Duration> {
        Err(RegError::NotSupported("timeout".to_string()))
    }

    /// Release the device handle
    fn close(&mut self) -> RegResult<()>;

    // =========================================================================
    // Scalar Registers
    // =========================================================================

    /// Read a 32-bit register
    fn reg_read(&mut self, offset: u32) -> RegResult<i32>;

    /// Read a 64-bit register
    fn reg_read64(&mut self, offset: u32) -> RegResult<i64>;

    /// Write a 32-bit register
    fn reg_write(&mut self, offset: u32, value: i32) -> RegResult<()>;

    /// Write a 64-bit register
    fn reg_write64(&mut self, offset: u32, value: i64) -> RegResult<()>;

    // =========================================================================
    // Arrays
    // =========================================================================

    /// Read `count` bytes from the array at `offset` into `dest[start..start + count]`
    fn array_read8(
        &mut self,
        offset: u32,
        dest: &mut [u8],
        start: usize,
        count: usize,
    ) -> RegResult<()>;

    /// Read `count` words from the array at `offset` into `dest[start..start + count]`
    fn array_read32(
        &mut self,
        offset: u32,
        dest: &mut [i32],
        start: usize,
        count: usize,
    ) -> RegResult<()>;

    /// Write `data[start..start + count]` to the array at `offset`
    fn array_write8(
        &mut self,
        offset: u32,
        data: &[u8],
        start: usize,
        count: usize,
    ) -> RegResult<()>;

    /// Write `data[start..start + count]` to the array at `offset`
    fn array_write32(
        &mut self,
        offset: u32,
        data: &[i32],
        start: usize,
        count: usize,
    ) -> RegResult<()>;

    /// Read a word array from an explicit address space
    fn array_read32_in(
        &mut self,
        space: AddressSpace,
        _offset: u32,
        _dest: &mut [i32],
        _start: usize,
        _count: usize,
    ) -> RegResult<()> {
        Err(RegError::NotSupported(format!("array read in {}", space)))
    }

    /// Write a word array into an explicit address space
    fn array_write32_in(
        &mut self,
        space: AddressSpace,
        _offset: u32,
        _data: &[i32],
        _start: usize,
        _count: usize,
    ) -> RegResult<()> {
        Err(RegError::NotSupported(format!("array write in {}", space)))
    }

    // =========================================================================
    // FIFO
    // =========================================================================

    /// Push words into the FIFO at `offset`
    fn fifo_write(&mut self, _offset: u32, _data: &[i32]) -> RegResult<()> {
        Err(RegError::NotSupported("FIFO write".to_string()))
    }

    /// Pop words from the FIFO at `offset`, returning how many were read
    fn fifo_read(&mut self, _offset: u32, _dest: &mut [i32]) -> RegResult<usize> {
        Err(RegError::NotSupported("FIFO read".to_string()))
    }
}

/// An object that can re-cache its value from hardware
pub trait Refresh {
    /// Re-read this register through `driver`
    fn refresh(&mut self, driver: &mut dyn RegDriver) -> RegResult<()>;
}

/// Refresh `registers[start..=end]` in ascending index order
///
/// The whole range is checked before any register is touched. The first
/// failing refresh aborts the loop; earlier registers keep their new values.
pub fn reg_refresh<R: Refresh>(
    driver: &mut dyn RegDriver,
    registers: &mut [R],
    start: usize,
    end: usize,
) -> RegResult<()> {
    if start > end || end >= registers.len() {
        return Err(RegError::IndexOutOfRange {
            start,
            end,
            len: registers.len(),
        });
    }

    tracing::trace!(start, end, "refreshing registers");
    for register in &mut registers[start..=end] {
        register.refresh(driver)?;
    }
    Ok(())
}

/// Check that `start..start + count` lies within a buffer of `len` elements
pub(crate) fn check_span(len: usize, start: usize, count: usize) -> RegResult<()> {
    match start.checked_add(count) {
        Some(stop) if stop <= len => Ok(()),
        _ => Err(RegError::InvalidArgument(format!(
            "range {}..{}+{} exceeds buffer of {} elements",
            start, start, count, len
        ))),
    }
}
