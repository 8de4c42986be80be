//! Cached register objects
//!
//! Instrument settings keep a [`Register`] per hardware register and refresh
//! them in bulk with [`reg_refresh`](crate::traits::reg_refresh).

use crate::error::{RegError, RegResult};
use crate::traits::{Refresh, RegDriver};

/// A named 32-bit register with a cached value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    name: String,
    offset: u32,
    value: i32,
    valid: bool,
}

impl Register {
    pub fn new(name: impl Into<String>, offset: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            value: 0,
            valid: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Cached value (0 until first refresh or write)
    pub fn value(&self) -> i32 {
        self.value
    }

    /// True once the cache holds a value read from or written to hardware
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the cached value stale
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Write through to hardware, then cache
    pub fn write(&mut self, driver: &mut dyn RegDriver, value: i32) -> RegResult<()> {
        driver.reg_write(self.offset, value)?;
        self.value = value;
        self.valid = true;
        Ok(())
    }

    /// Extract `width` bits starting at bit `lsb` of the cached value
    pub fn field(&self, lsb: u32, width: u32) -> RegResult<u32> {
        let mask = field_mask(lsb, width)?;
        Ok((self.value as u32 & mask) >> lsb)
    }

    /// Replace a bit field and write the register back
    pub fn set_field(
        &mut self,
        driver: &mut dyn RegDriver,
        lsb: u32,
        width: u32,
        field: u32,
    ) -> RegResult<()> {
        let mask = field_mask(lsb, width)?;
        if field > mask >> lsb {
            return Err(RegError::InvalidArgument(format!(
                "value {} does not fit {}-bit field of {}",
                field, width, self.name
            )));
        }
        let value = (self.value as u32 & !mask) | (field << lsb);
        self.write(driver, value as i32)
    }
}

impl Refresh for Register {
    fn refresh(&mut self, driver: &mut dyn RegDriver) -> RegResult<()> {
        self.value = driver.reg_read(self.offset)?;
        self.valid = true;
        Ok(())
    }
}

fn field_mask(lsb: u32, width: u32) -> RegResult<u32> {
    if width == 0 || lsb + width > 32 {
        return Err(RegError::InvalidArgument(format!(
            "bit field {}+{} outside a 32-bit register",
            lsb, width
        )));
    }
    Ok((u32::MAX >> (32 - width)) << lsb)
}
