//! Driver configuration
//!
//! [`DriverConfig`] describes which backend to open and how to set it up.
//! It can be built in code from a preset or loaded from JSON:
//!
//! ```json
//! {
//!   "mode": "hardware",
//!   "device_id": 1,
//!   "sessions": [{ "space": "bar2", "device_id": 3 }],
//!   "timeout_ms": 500
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RegError, RegResult};
use crate::hw::IndirectDriver;
use crate::logging::{init_logging, LogConfig};
use crate::protocol::{MAX_BURST_READ, MAX_BURST_WRITE};
use crate::traits::{RawRegisters, RegDriver};
use crate::types::{AddressSpace, DeviceId};

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// In-memory mock driver
    #[default]
    Simulate,
    /// Indirect protocol over the vendor library
    Hardware,
}

/// Device handle serving one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub space: AddressSpace,
    pub device_id: u32,
}

/// Configuration for opening a register driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Backend to open
    pub mode: DriverMode,

    /// Device handle for the initially selected address space
    pub device_id: u32,

    /// Address space selected after opening
    pub address_space: AddressSpace,

    /// Additional per-space device handles (hardware mode)
    pub sessions: Vec<SessionConfig>,

    /// Vendor library override; the platform search path is used otherwise
    pub library_path: Option<PathBuf>,

    /// Session timeout applied on open, when the backend supports one
    pub timeout_ms: Option<u64>,

    /// Words per indirect write chunk (1..=30)
    pub max_write_burst: usize,

    /// Words per indirect read chunk (1..=30)
    pub max_read_burst: usize,

    pub log: LogConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mode: DriverMode::Simulate,
            device_id: 0,
            address_space: AddressSpace::Bar0,
            sessions: Vec::new(),
            library_path: None,
            timeout_ms: None,
            max_write_burst: MAX_BURST_WRITE,
            max_read_burst: MAX_BURST_READ,
            log: LogConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Simulated driver with default settings
    pub fn simulate() -> Self {
        Self::default()
    }

    /// Hardware driver on device handle `device_id`
    pub fn hardware(device_id: u32) -> Self {
        Self {
            mode: DriverMode::Hardware,
            device_id,
            log: LogConfig::production(),
            ..Default::default()
        }
    }

    /// Builder: select the initial address space
    pub fn address_space(mut self, space: AddressSpace) -> Self {
        self.address_space = space;
        self
    }

    /// Builder: serve `space` through another device handle
    pub fn session(mut self, space: AddressSpace, device_id: u32) -> Self {
        self.sessions.retain(|s| s.space != space);
        self.sessions.push(SessionConfig { space, device_id });
        self
    }

    /// Builder: load the vendor library from a fixed path
    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Builder: set the session timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Builder: set chunk sizes
    pub fn burst_limits(mut self, write: usize, read: usize) -> Self {
        self.max_write_burst = write;
        self.max_read_burst = read;
        self
    }

    /// Builder: set logging
    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> RegResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> RegResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RegError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> RegResult<String> {
        serde_json::to_string_pretty(self).map_err(config_error)
    }

    pub fn validate(&self) -> RegResult<()> {
        check_burst("max_write_burst", self.max_write_burst, MAX_BURST_WRITE)?;
        check_burst("max_read_burst", self.max_read_burst, MAX_BURST_READ)?;

        for (i, session) in self.sessions.iter().enumerate() {
            if self.sessions[..i].iter().any(|s| s.space == session.space) {
                return Err(RegError::Config(format!(
                    "duplicate session for {}",
                    session.space
                )));
            }
        }

        if self.timeout_ms == Some(0) {
            return Err(RegError::Config("timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Build an [`IndirectDriver`] over `raw` with this configuration's
    /// sessions and burst limits
    ///
    /// `device_id` serves both BAR0 and the configured address space unless
    /// a session entry overrides them.
    pub fn indirect_driver<R: RawRegisters>(&self, raw: R) -> RegResult<IndirectDriver<R>> {
        let device = DeviceId(self.device_id);
        let mut driver = IndirectDriver::new(raw, device)
            .with_session(self.address_space, device)
            .with_burst_limits(self.max_write_burst, self.max_read_burst)?;

        for session in &self.sessions {
            driver = driver.with_session(session.space, DeviceId(session.device_id));
        }
        Ok(driver)
    }
}

fn config_error(e: serde_json::Error) -> RegError {
    RegError::Config(e.to_string())
}

fn check_burst(name: &str, value: usize, max: usize) -> RegResult<()> {
    if value == 0 || value > max {
        return Err(RegError::Config(format!(
            "{} must be in 1..={}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

/// Open the driver described by `config`
///
/// Installs the configured log subscriber unless one is already set. The
/// address space and timeout are applied after the backend is built; a
/// backend without timeout support is not an error here.
pub fn open_driver(config: &DriverConfig) -> RegResult<Box<dyn RegDriver>> {
    config.validate()?;
    if init_logging(&config.log) {
        debug!(level = %config.log.level, "installed log subscriber from driver config");
    }
    info!(mode = ?config.mode, device = config.device_id, "opening register driver");

    let mut driver = match config.mode {
        DriverMode::Simulate => open_simulated(config)?,
        DriverMode::Hardware => open_hardware(config)?,
    };

    if let Some(ms) = config.timeout_ms {
        match driver.set_timeout(Duration::from_millis(ms)) {
            Err(e) if e.is_not_supported() => debug!("backend has no session timeout"),
            other => other?,
        }
    }

    driver.set_address_space(config.address_space)?;
    Ok(driver)
}

#[cfg(feature = "sim")]
fn open_simulated(config: &DriverConfig) -> RegResult<Box<dyn RegDriver>> {
    use crate::sim::MockDriver;
    Ok(Box::new(
        MockDriver::new().with_device(DeviceId(config.device_id)),
    ))
}

#[cfg(not(feature = "sim"))]
fn open_simulated(_config: &DriverConfig) -> RegResult<Box<dyn RegDriver>> {
    Err(RegError::NotSupported(
        "simulation requires the 'sim' feature".to_string(),
    ))
}

#[cfg(feature = "vendor")]
fn open_hardware(config: &DriverConfig) -> RegResult<Box<dyn RegDriver>> {
    use crate::hw::VendorRegisters;
    let raw = VendorRegisters::open(config.library_path.as_deref())?;
    Ok(Box::new(config.indirect_driver(raw)?))
}

#[cfg(not(feature = "vendor"))]
fn open_hardware(_config: &DriverConfig) -> RegResult<Box<dyn RegDriver>> {
    Err(RegError::NotSupported(
        "hardware access requires the 'vendor' feature".to_string(),
    ))
}
