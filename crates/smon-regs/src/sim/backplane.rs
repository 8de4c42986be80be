//! FPGA-side model of the indirect access block
//!
//! Attached to a [`MockDriver`] through its write hook. A rising edge of the
//! refresh bit on CONTROL commits the staged transaction against a logical
//! word memory:
//!
//! - write mode copies `WRITE_BASE + i` into `memory[START_OFFSET + i]`
//! - read mode copies `memory[START_OFFSET + i]` into `READ_BASE + i`
//!
//! Holding or clearing the refresh bit commits nothing. STATUS counts
//! commits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::MockDriver;
use crate::protocol::{
    registers::CTRL_REFRESH, ControlWord, CONTROL, READ_BASE, START_OFFSET, STATUS, WINDOW_WORDS,
    WRITE_BASE,
};
use crate::types::AccessMode;

/// One committed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub mode: AccessMode,
    pub offset: u32,
    pub length: usize,
}

#[derive(Default)]
struct BackplaneState {
    memory: HashMap<u32, u32>,
    commits: Vec<Commit>,
    last_control: u32,
}

/// Handle onto the logical memory behind a mock board
#[derive(Clone)]
pub struct Backplane {
    state: Arc<Mutex<BackplaneState>>,
}

impl Backplane {
    /// Install the model on `driver`, replacing any write hook it had
    pub fn attach(driver: &mut MockDriver) -> Self {
        let state = Arc::new(Mutex::new(BackplaneState::default()));
        let hook_state = Arc::clone(&state);

        driver.set_write_hook(move |drv, offset, value| {
            if offset != CONTROL {
                return;
            }
            let mut state = hook_state.lock().unwrap_or_else(PoisonError::into_inner);
            let word = value as u32;
            let rising = word & CTRL_REFRESH != 0 && state.last_control & CTRL_REFRESH == 0;
            state.last_control = word;
            if rising {
                commit(&mut state, drv, ControlWord::decode(word));
            }
        });

        Self { state }
    }

    fn lock(&self) -> MutexGuard<'_, BackplaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logical word at `offset` (0 when never written)
    pub fn word(&self, offset: u32) -> u32 {
        self.lock().memory.get(&offset).copied().unwrap_or(0)
    }

    /// `len` logical words starting at `start`
    pub fn words(&self, start: u32, len: usize) -> Vec<u32> {
        let state = self.lock();
        (0..len as u32)
            .map(|i| {
                let offset = start.wrapping_add(i);
                state.memory.get(&offset).copied().unwrap_or(0)
            })
            .collect()
    }

    /// Preload logical memory, bypassing the protocol
    pub fn load(&self, start: u32, words: &[u32]) {
        let mut state = self.lock();
        for (i, &word) in words.iter().enumerate() {
            state.memory.insert(start.wrapping_add(i as u32), word);
        }
    }

    /// Committed transactions in order
    pub fn commits(&self) -> Vec<Commit> {
        self.lock().commits.clone()
    }

    /// Number of committed transactions
    pub fn commit_count(&self) -> usize {
        self.lock().commits.len()
    }
}

fn commit(state: &mut BackplaneState, drv: &mut MockDriver, control: ControlWord) {
    let offset = drv.peek(START_OFFSET) as u32;
    let length = control.length.min(WINDOW_WORDS);
    trace!(mode = ?control.mode, offset, length, "backplane commit");

    for i in 0..length as u32 {
        let logical = offset.wrapping_add(i);
        match control.mode {
            AccessMode::Write => {
                let word = drv.peek(WRITE_BASE + i) as u32;
                state.memory.insert(logical, word);
            }
            AccessMode::Read => {
                let word = state.memory.get(&logical).copied().unwrap_or(0);
                drv.store(READ_BASE + i, word as i32 as i64);
            }
        }
    }

    state.commits.push(Commit {
        mode: control.mode,
        offset,
        length,
    });
    drv.store(STATUS, state.commits.len() as i64);
}
