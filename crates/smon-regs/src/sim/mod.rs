//! Simulated register backend for development and testing
//!
//! [`MockDriver`] implements the full [`RegDriver`] contract on top of
//! in-memory maps, so instrument logic can run without a board or the vendor
//! library. It also implements [`RawRegisters`], which lets the indirect
//! protocol run against it; [`Backplane`] adds the FPGA side of that
//! protocol.

pub mod backplane;

pub use backplane::{Backplane, Commit};

use std::collections::HashMap;

use tracing::debug;

use crate::error::{RegError, RegResult};
use crate::traits::{check_span, RawRegisters, RegDriver};
use crate::types::{AddressSpace, DeviceId, DriverInfo, DriverKind};

/// Offset of the board-type register read during instrument start-up
pub const BOARD_TYPE_OFFSET: u32 = 0x0010;

/// Value the board-type register holds after construction and reset
pub const BOARD_TYPE_SEED: i64 = 0x5A01;

/// Callback run synchronously inside every scalar write
///
/// Receives the driver, the offset and the written value. Writes the hook
/// itself performs do not re-enter it.
pub type WriteHook = Box<dyn FnMut(&mut MockDriver, u32, i64) + Send>;

#[derive(Debug, Clone, Copy)]
struct RawFault {
    /// Raw calls that still succeed before the fault starts
    remaining: u64,
    status: i32,
}

impl RawFault {
    /// Returns the failure status once the budget is spent
    fn check(&mut self) -> Option<i32> {
        if self.remaining == 0 {
            Some(self.status)
        } else {
            self.remaining -= 1;
            None
        }
    }
}

/// In-memory register driver
///
/// Scalars live in one map keyed by address space and offset; 8-bit and
/// 32-bit arrays live in two further maps keyed by offset only. The three
/// namespaces never alias.
pub struct MockDriver {
    /// Scalar registers
    hardware: HashMap<(AddressSpace, u32), i64>,

    /// Byte arrays
    hardware_array8: HashMap<u32, Vec<u8>>,

    /// Word arrays
    hardware_array32: HashMap<u32, Vec<i32>>,

    address_space: AddressSpace,
    device: DeviceId,
    seed: (u32, i64),

    read_count: u64,
    write_count: u64,

    on_write: Option<WriteHook>,

    raw_write_fault: Option<RawFault>,
    raw_read_fault: Option<RawFault>,

    closed: bool,
}

impl MockDriver {
    /// Create a mock driver holding only the board-type seed
    pub fn new() -> Self {
        let mut driver = Self {
            hardware: HashMap::new(),
            hardware_array8: HashMap::new(),
            hardware_array32: HashMap::new(),
            address_space: AddressSpace::default(),
            device: DeviceId::default(),
            seed: (BOARD_TYPE_OFFSET, BOARD_TYPE_SEED),
            read_count: 0,
            write_count: 0,
            on_write: None,
            raw_write_fault: None,
            raw_read_fault: None,
            closed: false,
        };
        driver.reseed();
        driver
    }

    /// Builder: report a different device handle
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    /// Builder: seed a different diagnostic register
    pub fn with_seed(mut self, offset: u32, value: i64) -> Self {
        self.hardware.remove(&(AddressSpace::default(), self.seed.0));
        self.seed = (offset, value);
        self.reseed();
        self
    }

    /// Builder: install a write hook
    pub fn with_write_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut MockDriver, u32, i64) + Send + 'static,
    {
        self.set_write_hook(hook);
        self
    }

    /// Install a write hook, replacing any previous one
    pub fn set_write_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut MockDriver, u32, i64) + Send + 'static,
    {
        self.on_write = Some(Box::new(hook));
    }

    /// Remove the write hook
    pub fn clear_write_hook(&mut self) {
        self.on_write = None;
    }

    /// Clear scalar registers and counters, then reseed the diagnostic register
    ///
    /// Array contents survive.
    pub fn reset(&mut self) {
        debug!(device = %self.device, "resetting simulated registers");
        self.hardware.clear();
        self.read_count = 0;
        self.write_count = 0;
        self.reseed();
    }

    fn reseed(&mut self) {
        let (offset, value) = self.seed;
        self.hardware.insert((AddressSpace::default(), offset), value);
    }

    /// Number of scalar reads since construction or reset
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// Number of scalar writes since construction or reset
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// Set a scalar in the active address space without counting or hooks
    pub fn store(&mut self, offset: u32, value: i64) {
        self.hardware.insert((self.address_space, offset), value);
    }

    /// Get a scalar from the active address space without counting
    pub fn peek(&self, offset: u32) -> i64 {
        self.peek_in(self.address_space, offset)
    }

    /// Get a scalar from any address space without counting
    pub fn peek_in(&self, space: AddressSpace, offset: u32) -> i64 {
        self.hardware.get(&(space, offset)).copied().unwrap_or(0)
    }

    /// Stored byte array at `offset`
    pub fn array8(&self, offset: u32) -> Option<&[u8]> {
        self.hardware_array8.get(&offset).map(Vec::as_slice)
    }

    /// Stored word array at `offset`
    pub fn array32(&self, offset: u32) -> Option<&[i32]> {
        self.hardware_array32.get(&offset).map(Vec::as_slice)
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Make raw writes fail with `status` after `successes` more of them succeed
    pub fn fail_raw_writes_after(&mut self, successes: u64, status: i32) {
        self.raw_write_fault = Some(RawFault {
            remaining: successes,
            status,
        });
    }

    /// Make raw reads fail with `status` after `successes` more of them succeed
    pub fn fail_raw_reads_after(&mut self, successes: u64, status: i32) {
        self.raw_read_fault = Some(RawFault {
            remaining: successes,
            status,
        });
    }

    /// Remove injected raw faults
    pub fn clear_raw_faults(&mut self) {
        self.raw_write_fault = None;
        self.raw_read_fault = None;
    }

    fn write_scalar(&mut self, offset: u32, value: i64) {
        self.hardware.insert((self.address_space, offset), value);
        self.write_count += 1;

        if let Some(mut hook) = self.on_write.take() {
            hook(self, offset, value);
            // A hook installed from inside the callback wins
            if self.on_write.is_none() {
                self.on_write = Some(hook);
            }
        }
    }

    fn read_scalar(&mut self, offset: u32) -> i64 {
        self.read_count += 1;
        self.peek(offset)
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `count` elements of `cached` into `dest[start..]`, zero-filling past its end
fn copy_zero_filled<T: Copy + Default>(
    cached: Option<&Vec<T>>,
    dest: &mut [T],
    start: usize,
    count: usize,
) {
    let target = &mut dest[start..start + count];
    let available = cached.map_or(0, |data| data.len().min(count));
    if let Some(data) = cached {
        target[..available].copy_from_slice(&data[..available]);
    }
    target[available..].fill(T::default());
}

fn check_read(len: usize, start: usize, count: usize) -> RegResult<()> {
    if count == 0 {
        return Err(RegError::InvalidArgument(
            "array read count must be positive".to_string(),
        ));
    }
    check_span(len, start, count)
}

impl RegDriver for MockDriver {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            kind: DriverKind::Simulated,
            device: self.device,
            address_space: self.address_space,
            driver_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    fn address_space(&self) -> AddressSpace {
        self.address_space
    }

    fn set_address_space(&mut self, space: AddressSpace) -> RegResult<()> {
        self.address_space = space;
        Ok(())
    }

    fn close(&mut self) -> RegResult<()> {
        debug!(device = %self.device, "closing simulated driver");
        self.closed = true;
        Ok(())
    }

    fn reg_read(&mut self, offset: u32) -> RegResult<i32> {
        Ok(self.read_scalar(offset) as i32)
    }

    fn reg_read64(&mut self, offset: u32) -> RegResult<i64> {
        Ok(self.read_scalar(offset))
    }

    fn reg_write(&mut self, offset: u32, value: i32) -> RegResult<()> {
        self.write_scalar(offset, value as i64);
        Ok(())
    }

    fn reg_write64(&mut self, offset: u32, value: i64) -> RegResult<()> {
        self.write_scalar(offset, value);
        Ok(())
    }

    fn array_read8(
        &mut self,
        offset: u32,
        dest: &mut [u8],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_read(dest.len(), start, count)?;
        copy_zero_filled(self.hardware_array8.get(&offset), dest, start, count);
        Ok(())
    }

    fn array_read32(
        &mut self,
        offset: u32,
        dest: &mut [i32],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_read(dest.len(), start, count)?;
        copy_zero_filled(self.hardware_array32.get(&offset), dest, start, count);
        Ok(())
    }

    fn array_write8(
        &mut self,
        offset: u32,
        data: &[u8],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_span(data.len(), start, count)?;
        self.hardware_array8.insert(offset, data[start..start + count].to_vec());
        Ok(())
    }

    fn array_write32(
        &mut self,
        offset: u32,
        data: &[i32],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_span(data.len(), start, count)?;
        self.hardware_array32.insert(offset, data[start..start + count].to_vec());
        Ok(())
    }
}

/// Raw register N is scalar offset N of the active address space
///
/// The device handle is ignored; one mock stands for one board.
impl RawRegisters for MockDriver {
    fn raw_write(&mut self, register: u32, value: u32, _device: DeviceId) -> i32 {
        if let Some(status) = self.raw_write_fault.as_mut().and_then(RawFault::check) {
            return status;
        }
        self.write_scalar(register, value as i32 as i64);
        1
    }

    fn raw_read(&mut self, register: u32, _device: DeviceId) -> (u32, i32) {
        if let Some(status) = self.raw_read_fault.as_mut().and_then(RawFault::check) {
            return (0, status);
        }
        (self.read_scalar(register) as u32, 1)
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IndirectAccess;

    #[test]
    fn test_scalar_write_read() {
        let mut driver = MockDriver::new();

        driver.reg_write(0x1000, 0x1234_5678).unwrap();
        assert_eq!(driver.reg_read(0x1000).unwrap(), 0x1234_5678);

        // Unwritten register should be 0
        assert_eq!(driver.reg_read(0x2000).unwrap(), 0);

        assert_eq!(driver.write_count(), 1);
        assert_eq!(driver.read_count(), 2);
    }

    #[test]
    fn test_64bit_shares_scalar_map() {
        let mut driver = MockDriver::new();
        driver.reg_write64(0x20, 0x1_0000_0002).unwrap();
        assert_eq!(driver.reg_read64(0x20).unwrap(), 0x1_0000_0002);
        assert_eq!(driver.reg_read(0x20).unwrap(), 2);
    }

    #[test]
    fn test_board_type_seed() {
        let mut driver = MockDriver::new();
        assert_eq!(driver.reg_read64(BOARD_TYPE_OFFSET).unwrap(), BOARD_TYPE_SEED);

        let mut driver = MockDriver::new().with_seed(0x4, 77);
        assert_eq!(driver.reg_read(0x4).unwrap(), 77);
        assert_eq!(driver.reg_read64(BOARD_TYPE_OFFSET).unwrap(), 0);
    }

    #[test]
    fn test_array_roundtrip_and_zero_fill() {
        let mut driver = MockDriver::new();
        driver.array_write32(10, &[1, 2, 3], 0, 3).unwrap();

        let mut three = [9i32; 3];
        driver.array_read32(10, &mut three, 0, 3).unwrap();
        assert_eq!(three, [1, 2, 3]);

        let mut five = [9i32; 5];
        driver.array_read32(10, &mut five, 0, 5).unwrap();
        assert_eq!(five, [1, 2, 3, 0, 0]);

        let mut missing = [9i32; 4];
        driver.array_read32(11, &mut missing, 1, 3).unwrap();
        assert_eq!(missing, [9, 0, 0, 0]);
    }

    #[test]
    fn test_byte_array_matches_word_array_policy() {
        let mut driver = MockDriver::new();
        driver.array_write8(10, &[0xAA, 1, 2, 3, 0xBB], 1, 3).unwrap();
        assert_eq!(driver.array8(10), Some(&[1u8, 2, 3][..]));

        let mut five = [9u8; 5];
        driver.array_read8(10, &mut five, 0, 5).unwrap();
        assert_eq!(five, [1, 2, 3, 0, 0]);

        let mut missing = [9u8; 2];
        driver.array_read8(99, &mut missing, 0, 2).unwrap();
        assert_eq!(missing, [0, 0]);
    }

    #[test]
    fn test_array_write_replaces() {
        let mut driver = MockDriver::new();
        driver.array_write32(4, &[1, 2, 3, 4], 0, 4).unwrap();
        driver.array_write32(4, &[7], 0, 1).unwrap();
        assert_eq!(driver.array32(4), Some(&[7][..]));
    }

    #[test]
    fn test_arrays_and_scalars_do_not_alias() {
        let mut driver = MockDriver::new();
        driver.reg_write(10, 42).unwrap();
        driver.array_write32(10, &[5], 0, 1).unwrap();

        assert_eq!(driver.reg_read(10).unwrap(), 42);
        let mut word = [0i32; 1];
        driver.array_read32(10, &mut word, 0, 1).unwrap();
        assert_eq!(word, [5]);
    }

    #[test]
    fn test_array_argument_checks() {
        let mut driver = MockDriver::new();
        let mut dest = [0i32; 4];
        assert!(matches!(
            driver.array_read32(0, &mut dest, 0, 0),
            Err(RegError::InvalidArgument(_))
        ));
        assert!(matches!(
            driver.array_read32(0, &mut dest, 2, 3),
            Err(RegError::InvalidArgument(_))
        ));
        assert!(driver.array_write32(0, &[1, 2], 1, 2).is_err());
    }

    #[test]
    fn test_reset_semantics() {
        let mut driver = MockDriver::new();
        driver.reg_write(0x30, 5).unwrap();
        driver.reg_write(BOARD_TYPE_OFFSET, 1).unwrap();
        driver.array_write32(10, &[1, 2, 3], 0, 3).unwrap();
        driver.reg_read(0x30).unwrap();

        driver.reset();

        assert_eq!(driver.read_count(), 0);
        assert_eq!(driver.write_count(), 0);
        assert_eq!(driver.reg_read(0x30).unwrap(), 0);
        assert_eq!(driver.reg_read64(BOARD_TYPE_OFFSET).unwrap(), BOARD_TYPE_SEED);
        assert_eq!(driver.array32(10), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_address_spaces_are_separate() {
        let mut driver = MockDriver::new();
        driver.reg_write(0x8, 1).unwrap();
        driver.set_address_space(AddressSpace::Bar2).unwrap();
        assert_eq!(driver.address_space(), AddressSpace::Bar2);
        assert_eq!(driver.info().address_space, AddressSpace::Bar2);
        assert_eq!(driver.reg_read(0x8).unwrap(), 0);

        driver.reg_write(0x8, 2).unwrap();
        assert_eq!(driver.peek_in(AddressSpace::Bar0, 0x8), 1);
        assert_eq!(driver.peek_in(AddressSpace::Bar2, 0x8), 2);
    }

    #[test]
    fn test_write_hook_scripts_side_effects() {
        // Writing the arm register latches its value into a status register
        let mut driver = MockDriver::new().with_write_hook(|drv, offset, value| {
            if offset == 0x100 {
                drv.reg_write64(0x104, value * 2).unwrap();
            }
        });

        driver.reg_write(0x100, 21).unwrap();
        assert_eq!(driver.reg_read(0x104).unwrap(), 42);
        // The nested write is counted but does not re-enter the hook
        assert_eq!(driver.write_count(), 2);

        driver.clear_write_hook();
        driver.reg_write(0x100, 1).unwrap();
        assert_eq!(driver.reg_read(0x104).unwrap(), 42);
    }

    #[test]
    fn test_unsupported_operations() {
        let mut driver = MockDriver::new();
        let mut buf = [0i32; 4];

        assert!(driver
            .fifo_write(0, &[1, 2])
            .unwrap_err()
            .is_not_supported());
        assert!(driver
            .fifo_read(0, &mut buf)
            .unwrap_err()
            .is_not_supported());
        assert!(driver
            .array_read32_in(AddressSpace::Bar1, 0, &mut buf, 0, 4)
            .unwrap_err()
            .is_not_supported());
        assert!(driver
            .array_write32_in(AddressSpace::Bar1, 0, &buf, 0, 4)
            .unwrap_err()
            .is_not_supported());
        assert!(RegDriver::set_timeout(&mut driver, std::time::Duration::from_millis(5))
            .unwrap_err()
            .is_not_supported());
        assert!(RegDriver::timeout(&driver).unwrap_err().is_not_supported());
    }

    #[test]
    fn test_close() {
        let mut driver = MockDriver::new();
        RegDriver::close(&mut driver).unwrap();
        assert!(driver.is_closed());
    }

    #[test]
    fn test_raw_primitive_maps_to_scalars() {
        let mut driver = MockDriver::new();
        assert_eq!(driver.raw_write(3, 0xDEAD_BEEF, DeviceId(0)), 1);
        assert_eq!(driver.raw_read(3, DeviceId(0)), (0xDEAD_BEEF, 1));
        assert_eq!(driver.write_count(), 1);
        assert_eq!(driver.read_count(), 1);
    }

    #[test]
    fn test_raw_fault_injection() {
        let mut driver = MockDriver::new();
        driver.fail_raw_writes_after(1, -7);
        assert_eq!(driver.raw_write(1, 1, DeviceId(0)), 1);
        assert_eq!(driver.raw_write(1, 2, DeviceId(0)), -7);
        assert_eq!(driver.raw_write(1, 3, DeviceId(0)), -7);
        assert_eq!(driver.peek(1), 1);

        driver.fail_raw_reads_after(0, 0);
        assert_eq!(driver.raw_read(1, DeviceId(0)), (0, 0));

        driver.clear_raw_faults();
        assert_eq!(driver.raw_write(1, 4, DeviceId(0)), 1);
    }

    #[test]
    fn test_invalid_read_length_does_no_io() {
        let mut driver = MockDriver::new();
        let mut access = IndirectAccess::new(&mut driver, DeviceId(0));
        assert!(matches!(
            access.read_array(10, 0),
            Err(RegError::InvalidArgument(_))
        ));
        assert_eq!(driver.read_count(), 0);
        assert_eq!(driver.write_count(), 0);
    }
}
