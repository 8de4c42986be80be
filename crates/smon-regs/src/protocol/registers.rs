//! Raw register map and control word layout of the indirect access block

use crate::types::AccessMode;

/// Control register (mode, length, refresh)
pub const CONTROL: u32 = 0;
/// Status register
pub const STATUS: u32 = 1;
/// Start offset of the next indirect transaction
pub const START_OFFSET: u32 = 2;
/// First word of the write-data window
pub const WRITE_BASE: u32 = 4;
/// First word of the read-data window
pub const READ_BASE: u32 = 34;

/// Words in each data window
pub const WINDOW_WORDS: usize = (READ_BASE - WRITE_BASE) as usize;

/// Maximum words per write handshake
pub const MAX_BURST_WRITE: usize = 30;
/// Maximum words per read handshake
pub const MAX_BURST_READ: usize = 30;

// Control bits
pub const REFRESH_BIT: u32 = 7;
pub const MODE_BIT: u32 = 8;
pub const LENGTH_SHIFT: u32 = 9;

pub const MODE_WRITE: u32 = 1;
pub const MODE_READ: u32 = 0;

pub const CTRL_REFRESH: u32 = 1 << REFRESH_BIT;

/// Compose a control word
pub fn compose_control_word(mode: AccessMode, length: usize, refresh: bool) -> u32 {
    ((length as u32) << LENGTH_SHIFT)
        | (mode.bit() << MODE_BIT)
        | ((refresh as u32) << REFRESH_BIT)
}

/// Decoded control word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub mode: AccessMode,
    pub length: usize,
    pub refresh: bool,
}

impl ControlWord {
    /// Split a raw control value into its fields
    pub fn decode(word: u32) -> Self {
        Self {
            mode: AccessMode::from_bit(word >> MODE_BIT),
            length: (word >> LENGTH_SHIFT) as usize,
            refresh: word & CTRL_REFRESH != 0,
        }
    }

    /// Re-encode
    pub fn encode(&self) -> u32 {
        compose_control_word(self.mode, self.length, self.refresh)
    }
}
