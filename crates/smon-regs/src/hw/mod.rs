//! Hardware register driver
//!
//! [`IndirectDriver`] implements [`RegDriver`] on top of the indirect access
//! protocol and any [`RawRegisters`] primitive: the vendor library in
//! production, or a [`MockDriver`](crate::sim::MockDriver) with a
//! [`Backplane`](crate::sim::Backplane) in tests.
//!
//! # Mapping
//!
//! ```text
//! reg_read / reg_write       one-word transfer
//! reg_read64 / reg_write64   two-word transfer, low word first
//! array_*32                  chunked transfer, one word per element
//! array_*8                   chunked transfer, four bytes per word (LE)
//! ```
//!
//! Each address space is served by its own device handle (session).
//! Selecting an address space retargets the protocol engine at that handle.

#[cfg(feature = "vendor")]
pub mod vendor;

#[cfg(feature = "vendor")]
pub use vendor::VendorRegisters;

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{RegError, RegResult};
use crate::protocol::IndirectAccess;
use crate::traits::{check_span, RawRegisters, RegDriver};
use crate::types::{AddressSpace, DeviceId, DriverInfo, DriverKind};

/// Register driver that reaches the board through the indirect protocol
pub struct IndirectDriver<R: RawRegisters> {
    /// Protocol engine, targeted at the active session
    access: IndirectAccess<R>,

    /// Device handle per address space
    sessions: BTreeMap<AddressSpace, DeviceId>,

    /// Currently selected address space
    address_space: AddressSpace,

    closed: bool,
}

impl<R: RawRegisters> IndirectDriver<R> {
    /// Create a driver whose default address space is served by `device`
    pub fn new(raw: R, device: DeviceId) -> Self {
        Self::from_access(IndirectAccess::new(raw, device))
    }

    /// Wrap an already configured protocol engine
    pub fn from_access(access: IndirectAccess<R>) -> Self {
        let address_space = AddressSpace::default();
        let mut sessions = BTreeMap::new();
        sessions.insert(address_space, access.device());

        Self {
            access,
            sessions,
            address_space,
            closed: false,
        }
    }

    /// Builder: serve `space` through `device`
    pub fn with_session(mut self, space: AddressSpace, device: DeviceId) -> Self {
        self.sessions.insert(space, device);
        if space == self.address_space {
            self.access.set_device(device);
        }
        self
    }

    /// Builder: use smaller burst limits
    pub fn with_burst_limits(mut self, write: usize, read: usize) -> RegResult<Self> {
        self.access = self.access.with_burst_limits(write, read)?;
        Ok(self)
    }

    /// Configured sessions in BAR order
    pub fn sessions(&self) -> impl Iterator<Item = (AddressSpace, DeviceId)> + '_ {
        self.sessions.iter().map(|(space, device)| (*space, *device))
    }

    /// Borrow the protocol engine
    pub fn access(&self) -> &IndirectAccess<R> {
        &self.access
    }

    /// Mutably borrow the protocol engine
    pub fn access_mut(&mut self) -> &mut IndirectAccess<R> {
        &mut self.access
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> RegResult<()> {
        if self.closed {
            Err(RegError::DeviceClosed)
        } else {
            Ok(())
        }
    }

    fn read_words(&mut self, offset: u32, count: usize) -> RegResult<Vec<u32>> {
        self.ensure_open()?;
        self.access.read_array(offset, count)
    }

    fn write_words(&mut self, offset: u32, words: &[u32]) -> RegResult<()> {
        self.ensure_open()?;
        self.access.write_array(offset, words)
    }
}

fn check_read(len: usize, start: usize, count: usize) -> RegResult<()> {
    if count == 0 {
        return Err(RegError::InvalidArgument(
            "array read count must be positive".to_string(),
        ));
    }
    check_span(len, start, count)
}

/// Pack bytes little-endian into words, taking the bytes past a short tail
/// from `tail_word`
fn pack_bytes(bytes: &[u8], tail_word: u32) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = tail_word.to_le_bytes();
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

impl<R: RawRegisters> RegDriver for IndirectDriver<R> {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            kind: DriverKind::Indirect {
                backend: self.access.raw().backend_name().to_string(),
            },
            device: self.access.device(),
            address_space: self.address_space,
            driver_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    fn address_space(&self) -> AddressSpace {
        self.address_space
    }

    fn set_address_space(&mut self, space: AddressSpace) -> RegResult<()> {
        self.ensure_open()?;
        let device = *self
            .sessions
            .get(&space)
            .ok_or(RegError::NoSession(space))?;

        debug!(%space, %device, "selecting address space");
        self.access.set_device(device);
        self.address_space = space;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> RegResult<()> {
        self.ensure_open()?;
        self.access.raw_mut().set_session_timeout(timeout)
    }

    fn timeout(&self) -> RegResult<Duration> {
        self.ensure_open()?;
        self.access.raw().session_timeout()
    }

    fn close(&mut self) -> RegResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut devices: Vec<DeviceId> = self.sessions.values().copied().collect();
        devices.sort_by_key(|d| d.0);
        devices.dedup();

        // Every handle gets a release attempt; the first failure is reported
        let mut first_error = None;
        for device in devices {
            info!(%device, "releasing device handle");
            if let Err(e) = self.access.raw_mut().release(device) {
                warn!(%device, error = %e, "failed to release device handle");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn reg_read(&mut self, offset: u32) -> RegResult<i32> {
        self.ensure_open()?;
        Ok(self.access.read_single(offset)? as i32)
    }

    fn reg_read64(&mut self, offset: u32) -> RegResult<i64> {
        let words = self.read_words(offset, 2)?;
        Ok(((words[1] as u64) << 32 | words[0] as u64) as i64)
    }

    fn reg_write(&mut self, offset: u32, value: i32) -> RegResult<()> {
        self.ensure_open()?;
        self.access.write_single(offset, value as u32)
    }

    fn reg_write64(&mut self, offset: u32, value: i64) -> RegResult<()> {
        let value = value as u64;
        self.write_words(offset, &[value as u32, (value >> 32) as u32])
    }

    fn array_read8(
        &mut self,
        offset: u32,
        dest: &mut [u8],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_read(dest.len(), start, count)?;
        let words = self.read_words(offset, count.div_ceil(4))?;
        let bytes = words.iter().flat_map(|w| w.to_le_bytes());
        for (slot, byte) in dest[start..start + count].iter_mut().zip(bytes) {
            *slot = byte;
        }
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
        let words = self.read_words(offset, count)?;
        for (slot, word) in dest[start..start + count].iter_mut().zip(words) {
            *slot = word as i32;
        }
        Ok(())
    }

    /// A trailing partial word is read back first so the bytes past
    /// `count` keep their value
    fn array_write8(
        &mut self,
        offset: u32,
        data: &[u8],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_span(data.len(), start, count)?;
        self.ensure_open()?;

        let tail_word = if count % 4 != 0 {
            let last = offset.checked_add((count / 4) as u32).ok_or_else(|| {
                RegError::InvalidArgument("byte array overflows the register space".to_string())
            })?;
            self.access.read_single(last)?
        } else {
            0
        };

        let words = pack_bytes(&data[start..start + count], tail_word);
        self.write_words(offset, &words)
    }

    fn array_write32(
        &mut self,
        offset: u32,
        data: &[i32],
        start: usize,
        count: usize,
    ) -> RegResult<()> {
        check_span(data.len(), start, count)?;
        let words: Vec<u32> = data[start..start + count]
            .iter()
            .map(|&w| w as u32)
            .collect();
        self.write_words(offset, &words)
    }
}
