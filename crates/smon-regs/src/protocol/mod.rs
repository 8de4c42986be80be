//! Indirect register access protocol
//!
//! The board exposes only a handful of raw registers. A logical register
//! space of arbitrary width is reached through them:
//!
//! ```text
//!  raw reg   purpose
//!  ───────   ───────────────────────────────────────────────
//!   0        CONTROL       length << 9 | mode << 8 | refresh << 7
//!   1        STATUS
//!   2        START_OFFSET  first logical offset of the transaction
//!   4..34    write window  staged words for a write burst
//!  34..64    read window   words returned by a read burst
//! ```
//!
//! Every transaction writes START_OFFSET, stages data, and pulses the
//! refresh bit (set, then clear). Transfers longer than one burst are split
//! into chunks that are processed strictly in order. A failed raw call aborts
//! the operation at once; chunks already committed stay committed.
//!
//! The sequence is stateful, so one [`IndirectAccess`] must never be driven
//! from two threads at once. Use [`SharedDriver`](crate::shared::SharedDriver)
//! to serialize access per device.

pub mod registers;

pub use registers::{
    compose_control_word, ControlWord, CONTROL, LENGTH_SHIFT, MAX_BURST_READ, MAX_BURST_WRITE,
    MODE_BIT, MODE_READ, MODE_WRITE, READ_BASE, REFRESH_BIT, START_OFFSET, STATUS, WINDOW_WORDS,
    WRITE_BASE,
};

use std::ops::Range;

use tracing::{debug, trace, warn};

use crate::error::{RegError, RegResult};
use crate::traits::RawRegisters;
use crate::types::{AccessMode, DeviceId};

/// One burst of a chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the first word in the caller's buffer
    pub index: usize,
    /// Logical offset of the first word
    pub offset: u32,
    /// Number of words
    pub len: usize,
}

impl Chunk {
    /// Buffer range covered by this chunk
    pub fn range(&self) -> Range<usize> {
        self.index..self.index + self.len
    }
}

/// Split `len` words starting at `start` into bursts of at most `burst` words
///
/// Offsets wrap at `u32::MAX`; callers validate the extent first.
pub fn plan_chunks(start: u32, len: usize, burst: usize) -> impl Iterator<Item = Chunk> {
    let burst = burst.max(1);
    (0..len).step_by(burst).map(move |index| Chunk {
        index,
        offset: start.wrapping_add(index as u32),
        len: burst.min(len - index),
    })
}

/// Indirect access engine bound to one raw primitive and one device handle
pub struct IndirectAccess<R> {
    raw: R,
    device: DeviceId,
    max_write_burst: usize,
    max_read_burst: usize,
}

impl<R: RawRegisters> IndirectAccess<R> {
    /// Create an engine with the standard burst limits
    pub fn new(raw: R, device: DeviceId) -> Self {
        Self {
            raw,
            device,
            max_write_burst: MAX_BURST_WRITE,
            max_read_burst: MAX_BURST_READ,
        }
    }

    /// Builder: use smaller burst limits
    ///
    /// Limits must lie in `1..=WINDOW_WORDS`; a larger burst would overrun
    /// the data windows.
    pub fn with_burst_limits(mut self, write: usize, read: usize) -> RegResult<Self> {
        for (name, limit) in [("write", write), ("read", read)] {
            if !(1..=WINDOW_WORDS).contains(&limit) {
                return Err(RegError::InvalidArgument(format!(
                    "{} burst limit {} outside 1..={}",
                    name, limit, WINDOW_WORDS
                )));
            }
        }
        self.max_write_burst = write;
        self.max_read_burst = read;
        Ok(self)
    }

    /// Device handle used for raw calls
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Retarget subsequent transactions at another device handle
    pub fn set_device(&mut self, device: DeviceId) {
        self.device = device;
    }

    pub fn max_write_burst(&self) -> usize {
        self.max_write_burst
    }

    pub fn max_read_burst(&self) -> usize {
        self.max_read_burst
    }

    /// Borrow the raw primitive
    pub fn raw(&self) -> &R {
        &self.raw
    }

    /// Mutably borrow the raw primitive
    pub fn raw_mut(&mut self) -> &mut R {
        &mut self.raw
    }

    /// Give back the raw primitive
    pub fn into_inner(self) -> R {
        self.raw
    }

    // =========================================================================
    // Single Words
    // =========================================================================

    /// Write one logical word
    pub fn write_single(&mut self, offset: u32, value: u32) -> RegResult<()> {
        trace!(device = %self.device, offset, value, "indirect write");
        self.write_raw(START_OFFSET, offset)?;
        self.write_raw(WRITE_BASE, value)?;
        self.access_refresh(AccessMode::Write, 1)
    }

    /// Read one logical word
    pub fn read_single(&mut self, offset: u32) -> RegResult<u32> {
        self.write_raw(START_OFFSET, offset)?;
        self.access_refresh(AccessMode::Read, 1)?;
        let value = self.read_raw(READ_BASE)?;
        trace!(device = %self.device, offset, value, "indirect read");
        Ok(value)
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    /// Write `values` to consecutive logical offsets starting at `start`
    pub fn write_array(&mut self, start: u32, values: &[u32]) -> RegResult<()> {
        check_extent(start, values.len())?;
        debug!(
            device = %self.device,
            start,
            len = values.len(),
            burst = self.max_write_burst,
            "indirect array write"
        );

        for chunk in plan_chunks(start, values.len(), self.max_write_burst) {
            trace!(offset = chunk.offset, len = chunk.len, "write chunk");
            self.write_raw(START_OFFSET, chunk.offset)?;
            for (i, &word) in values[chunk.range()].iter().enumerate() {
                self.write_raw(WRITE_BASE + i as u32, word)?;
            }
            self.access_refresh(AccessMode::Write, chunk.len)?;
        }

        Ok(())
    }

    /// Read `length` logical words starting at `start`
    pub fn read_array(&mut self, start: u32, length: usize) -> RegResult<Vec<u32>> {
        if length == 0 {
            return Err(RegError::InvalidArgument(
                "read length must be positive".to_string(),
            ));
        }

        let mut values = vec![0u32; length];
        self.read_array_into(start, &mut values)?;
        Ok(values)
    }

    /// Fill `dest` from consecutive logical offsets starting at `start`
    pub fn read_array_into(&mut self, start: u32, dest: &mut [u32]) -> RegResult<()> {
        if dest.is_empty() {
            return Err(RegError::InvalidArgument(
                "read length must be positive".to_string(),
            ));
        }
        check_extent(start, dest.len())?;
        debug!(
            device = %self.device,
            start,
            len = dest.len(),
            burst = self.max_read_burst,
            "indirect array read"
        );

        for chunk in plan_chunks(start, dest.len(), self.max_read_burst) {
            trace!(offset = chunk.offset, len = chunk.len, "read chunk");
            self.write_raw(START_OFFSET, chunk.offset)?;
            self.access_refresh(AccessMode::Read, chunk.len)?;
            for (i, slot) in dest[chunk.range()].iter_mut().enumerate() {
                *slot = self.read_raw(READ_BASE + i as u32)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// Commit the staged transaction by pulsing the refresh bit
    pub fn access_refresh(&mut self, mode: AccessMode, length: usize) -> RegResult<()> {
        let word = compose_control_word(mode, length, true);
        self.write_raw(CONTROL, word)?;
        self.write_raw(CONTROL, word & !registers::CTRL_REFRESH)
    }

    fn write_raw(&mut self, register: u32, value: u32) -> RegResult<()> {
        let status = self.raw.raw_write(register, value, self.device);
        if status <= 0 {
            warn!(device = %self.device, register, status, "raw register write failed");
            return Err(RegError::RawWrite { register, status });
        }
        Ok(())
    }

    fn read_raw(&mut self, register: u32) -> RegResult<u32> {
        let (value, status) = self.raw.raw_read(register, self.device);
        if status <= 0 {
            warn!(device = %self.device, register, status, "raw register read failed");
            return Err(RegError::RawRead { register, status });
        }
        Ok(value)
    }
}

/// Reject transfers whose last word would lie past `u32::MAX`
fn check_extent(start: u32, len: usize) -> RegResult<()> {
    if len == 0 {
        return Ok(());
    }
    let last = start as u64 + len as u64 - 1;
    if last > u32::MAX as u64 {
        return Err(RegError::InvalidArgument(format!(
            "transfer of {} words at offset 0x{:08x} overflows the register space",
            len, start
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Write(u32, u32),
        Read(u32),
    }

    /// Journals every raw call; optionally fails the n-th write
    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
        writes: usize,
        fail_write_at: Option<(usize, i32)>,
        read_value: u32,
    }

    impl Recorder {
        fn writes_to(&self, register: u32) -> Vec<u32> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Write(r, v) if *r == register => Some(*v),
                    _ => None,
                })
                .collect()
        }
    }

    impl RawRegisters for Recorder {
        fn raw_write(&mut self, register: u32, value: u32, _device: DeviceId) -> i32 {
            self.writes += 1;
            if let Some((at, status)) = self.fail_write_at {
                if self.writes == at {
                    return status;
                }
            }
            self.ops.push(Op::Write(register, value));
            1
        }

        fn raw_read(&mut self, register: u32, _device: DeviceId) -> (u32, i32) {
            self.ops.push(Op::Read(register));
            (self.read_value + register, 1)
        }
    }

    #[test]
    fn test_write_single_sequence() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        access.write_single(0x120, 0xABCD).unwrap();

        let pulse = compose_control_word(AccessMode::Write, 1, true);
        assert_eq!(
            access.raw().ops,
            vec![
                Op::Write(START_OFFSET, 0x120),
                Op::Write(WRITE_BASE, 0xABCD),
                Op::Write(CONTROL, pulse),
                Op::Write(CONTROL, pulse & !(1 << REFRESH_BIT)),
            ]
        );
    }

    #[test]
    fn test_read_single_sequence() {
        let recorder = Recorder {
            read_value: 100,
            ..Default::default()
        };
        let mut access = IndirectAccess::new(recorder, DeviceId(0));
        let value = access.read_single(0x44).unwrap();
        assert_eq!(value, 100 + READ_BASE);

        let pulse = compose_control_word(AccessMode::Read, 1, true);
        assert_eq!(
            access.raw().ops,
            vec![
                Op::Write(START_OFFSET, 0x44),
                Op::Write(CONTROL, pulse),
                Op::Write(CONTROL, pulse & !(1 << REFRESH_BIT)),
                Op::Read(READ_BASE),
            ]
        );
    }

    #[test]
    fn test_write_array_chunks_65_words() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        let values: Vec<u32> = (0..65).collect();
        access.write_array(1000, &values).unwrap();

        let rec = access.raw();
        assert_eq!(rec.writes_to(START_OFFSET), vec![1000, 1030, 1060]);

        let lengths: Vec<usize> = rec
            .writes_to(CONTROL)
            .into_iter()
            .filter(|w| w & (1 << REFRESH_BIT) != 0)
            .map(|w| ControlWord::decode(w).length)
            .collect();
        assert_eq!(lengths, vec![30, 30, 5]);

        // Last chunk stages words 60..65 at the bottom of the window
        assert_eq!(rec.writes_to(WRITE_BASE + 4), vec![4, 34, 64]);
    }

    #[test]
    fn test_control_word_pulse_clears_only_refresh() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        access.write_array(0, &[9; 5]).unwrap();

        let control = access.raw().writes_to(CONTROL);
        assert_eq!(control.len(), 2);
        assert_eq!(control[0], (5 << 9) | (1 << 8) | (1 << 7));
        assert_eq!(control[0] ^ control[1], 1 << 7);
    }

    #[test]
    fn test_read_array_places_words() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        let values = access.read_array(0, 33).unwrap();

        // Recorder echoes the window register number back
        assert_eq!(values[0], READ_BASE);
        assert_eq!(values[29], READ_BASE + 29);
        assert_eq!(values[30], READ_BASE);
        assert_eq!(values[32], READ_BASE + 2);
        assert_eq!(access.raw().writes_to(START_OFFSET), vec![0, 30]);
    }

    #[test]
    fn test_read_array_rejects_zero_length() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        let err = access.read_array(10, 0).unwrap_err();
        assert!(matches!(err, RegError::InvalidArgument(_)));
        assert!(access.raw().ops.is_empty());

        let err = access.read_array_into(10, &mut []).unwrap_err();
        assert!(matches!(err, RegError::InvalidArgument(_)));
        assert!(access.raw().ops.is_empty());
    }

    #[test]
    fn test_write_failure_aborts_remaining_chunks() {
        // Chunk 1 is 1 offset + 30 data + 2 control = 33 writes.
        // Fail the first write of chunk 2.
        let recorder = Recorder {
            fail_write_at: Some((34, -3)),
            ..Default::default()
        };
        let mut access = IndirectAccess::new(recorder, DeviceId(0));
        let values = vec![7u32; 75];
        let err = access.write_array(0, &values).unwrap_err();

        assert_eq!(
            err,
            RegError::RawWrite {
                register: START_OFFSET,
                status: -3
            }
        );
        let rec = access.into_inner();
        assert_eq!(rec.writes_to(START_OFFSET), vec![0]);
        assert_eq!(rec.writes, 34);
    }

    #[test]
    fn test_zero_status_is_failure() {
        let recorder = Recorder {
            fail_write_at: Some((1, 0)),
            ..Default::default()
        };
        let mut access = IndirectAccess::new(recorder, DeviceId(0));
        let err = access.read_single(5).unwrap_err();
        assert_eq!(err.status(), Some(0));
        assert!(access.raw().ops.is_empty());
    }

    #[test]
    fn test_extent_overflow_rejected() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        let err = access.write_array(u32::MAX, &[1, 2]).unwrap_err();
        assert!(matches!(err, RegError::InvalidArgument(_)));
        assert!(access.raw().ops.is_empty());

        access.write_array(u32::MAX, &[1]).unwrap();
    }

    #[test]
    fn test_burst_limits_validated() {
        let access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        assert!(access.with_burst_limits(0, 10).is_err());

        let access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        assert!(access.with_burst_limits(10, 31).is_err());

        let access = IndirectAccess::new(Recorder::default(), DeviceId(0))
            .with_burst_limits(8, 4)
            .unwrap();
        assert_eq!(access.max_write_burst(), 8);
        assert_eq!(access.max_read_burst(), 4);
    }

    #[test]
    fn test_empty_write_is_noop() {
        let mut access = IndirectAccess::new(Recorder::default(), DeviceId(0));
        access.write_array(3, &[]).unwrap();
        assert!(access.raw().ops.is_empty());
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_transfer(start in 0u32..1_000_000, len in 1usize..500, burst in 1usize..=30) {
            let chunks: Vec<Chunk> = plan_chunks(start, len, burst).collect();

            prop_assert_eq!(chunks.len(), (len + burst - 1) / burst);
            prop_assert_eq!(chunks[0].offset, start);
            prop_assert_eq!(chunks.iter().map(|c| c.len).sum::<usize>(), len);

            let mut remaining = len;
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[1].offset, pair[0].offset + pair[0].len as u32);
                prop_assert_eq!(pair[1].index, pair[0].index + pair[0].len);
            }
            for chunk in &chunks {
                prop_assert_eq!(chunk.len, burst.min(remaining));
                remaining -= chunk.len;
            }
        }

        #[test]
        fn prop_handshakes_per_write(len in 1usize..200, burst in 1usize..=30) {
            let mut access = IndirectAccess::new(Recorder::default(), DeviceId(1))
                .with_burst_limits(burst, burst)
                .unwrap();
            let values: Vec<u32> = (0..len as u32).collect();
            access.write_array(0, &values).unwrap();

            let pulses = access
                .raw()
                .writes_to(CONTROL)
                .into_iter()
                .filter(|w| w & (1 << REFRESH_BIT) != 0)
                .count();
            prop_assert_eq!(pulses, (len + burst - 1) / burst);
        }
    }
}
