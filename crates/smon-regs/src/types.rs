//! Register access types and data structures

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one physical or simulated board instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Logical bus region a register offset lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    #[default]
    Bar0,
    Bar1,
    Bar2,
    Bar3,
    Bar4,
    Bar5,
}

impl AddressSpace {
    /// All address spaces in BAR order
    pub const ALL: [AddressSpace; 6] = [
        AddressSpace::Bar0,
        AddressSpace::Bar1,
        AddressSpace::Bar2,
        AddressSpace::Bar3,
        AddressSpace::Bar4,
        AddressSpace::Bar5,
    ];

    /// BAR index (0..=5)
    pub fn index(&self) -> u8 {
        match self {
            AddressSpace::Bar0 => 0,
            AddressSpace::Bar1 => 1,
            AddressSpace::Bar2 => 2,
            AddressSpace::Bar3 => 3,
            AddressSpace::Bar4 => 4,
            AddressSpace::Bar5 => 5,
        }
    }

    /// Look up an address space by BAR index
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BAR{}", self.index())
    }
}

/// Direction of an indirect transaction, as encoded in the control word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    /// Value of the mode bit
    pub fn bit(&self) -> u32 {
        match self {
            AccessMode::Read => crate::protocol::MODE_READ,
            AccessMode::Write => crate::protocol::MODE_WRITE,
        }
    }

    /// Decode the mode bit
    pub fn from_bit(bit: u32) -> Self {
        if bit & 1 == crate::protocol::MODE_WRITE {
            AccessMode::Write
        } else {
            AccessMode::Read
        }
    }
}

/// Which kind of backend sits behind a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverKind {
    /// Indirect protocol over a vendor or device-specific raw primitive
    Indirect { backend: String },

    /// In-memory simulated backing store
    Simulated,
}

impl DriverKind {
    /// Get a human-readable name
    pub fn name(&self) -> &str {
        match self {
            DriverKind::Indirect { backend } => backend,
            DriverKind::Simulated => "Simulated",
        }
    }

    /// True when no real hardware is involved
    pub fn is_simulated(&self) -> bool {
        matches!(self, DriverKind::Simulated)
    }
}

/// Information about an open driver
#[derive(Debug, Clone)]
pub struct DriverInfo {
    /// Backend kind
    pub kind: DriverKind,

    /// Device handle of the active session
    pub device: DeviceId,

    /// Currently selected address space
    pub address_space: AddressSpace,

    /// Driver version
    pub driver_version: Option<String>,
}
