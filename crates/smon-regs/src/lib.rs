//! Register access for PCIe spectrum-monitor boards
//!
//! The board exposes a small indirection block instead of its full register
//! space. This crate provides:
//!
//! - **Indirect protocol**: chunked reads and writes through the offset,
//!   control and data-window registers with a refresh handshake
//!   ([`IndirectAccess`])
//! - **Driver abstraction**: scalar, 64-bit and array register I/O per
//!   address space ([`RegDriver`])
//! - **Backends**: the protocol over the vendor library ([`IndirectDriver`])
//!   and an in-memory mock for development and tests ([`MockDriver`])
//! - **Sharing**: one exclusive lock per device and a background poller
//!
//! # Feature Flags
//!
//! - `sim` (default): simulated backing store and FPGA backplane model
//! - `vendor`: dynamically loaded vendor register library
//! - `full`: everything
//!
//! # Example
//!
//! ```rust
//! use smon_regs::{reg_refresh, MockDriver, RegDriver, Register};
//!
//! let mut driver = MockDriver::new();
//! driver.reg_write(0x40, 0x15).unwrap();
//!
//! let mut regs = vec![Register::new("gain", 0x40), Register::new("atten", 0x44)];
//! reg_refresh(&mut driver, &mut regs, 0, 1).unwrap();
//! assert_eq!(regs[0].value(), 0x15);
//! ```

pub mod config;
pub mod error;
pub mod hw;
pub mod logging;
pub mod protocol;
pub mod register;
pub mod shared;
pub mod traits;
pub mod types;

#[cfg(feature = "sim")]
pub mod sim;

pub use config::{open_driver, DriverConfig, DriverMode, SessionConfig};
pub use error::{RegError, RegResult};
pub use hw::IndirectDriver;
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use protocol::{compose_control_word, IndirectAccess};
pub use register::Register;
pub use shared::{RegisterPoller, SharedDriver};
pub use traits::{reg_refresh, RawRegisters, RegDriver, Refresh};
pub use types::{AccessMode, AddressSpace, DeviceId, DriverInfo, DriverKind};

#[cfg(feature = "sim")]
pub use sim::{Backplane, MockDriver};

#[cfg(feature = "vendor")]
pub use hw::VendorRegisters;

/// Check if the vendor register library can be loaded
pub fn hardware_available() -> bool {
    #[cfg(feature = "vendor")]
    {
        VendorRegisters::is_available()
    }

    #[cfg(not(feature = "vendor"))]
    {
        false
    }
}
