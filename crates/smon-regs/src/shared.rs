//! Driver sharing across threads
//!
//! A [`RegDriver`] is not internally synchronized, and the indirect protocol
//! must not interleave two transactions on one device. [`SharedDriver`] puts
//! the driver behind a single mutex so that every operation, including a
//! whole multi-chunk array transfer, runs under the device's exclusive lock.
//!
//! [`RegisterPoller`] reads a set of registers periodically on a worker
//! thread through a `SharedDriver`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{RegError, RegResult};
use crate::traits::{reg_refresh, Refresh, RegDriver};
use crate::types::{AddressSpace, DriverInfo};

/// Cloneable handle to one driver; clones share the lock
#[derive(Clone)]
pub struct SharedDriver {
    inner: Arc<Mutex<Box<dyn RegDriver>>>,
}

impl SharedDriver {
    pub fn new<D: RegDriver + 'static>(driver: D) -> Self {
        Self::from_boxed(Box::new(driver))
    }

    pub fn from_boxed(driver: Box<dyn RegDriver>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(driver)),
        }
    }

    fn lock(&self) -> RegResult<MutexGuard<'_, Box<dyn RegDriver>>> {
        self.inner.lock().map_err(|_| RegError::LockPoisoned)
    }

    /// Run `f` with exclusive access to the driver
    ///
    /// Use this to group several operations into one critical section,
    /// e.g. an address-space switch followed by the accesses it targets.
    pub fn with<T, F>(&self, f: F) -> RegResult<T>
    where
        F: FnOnce(&mut dyn RegDriver) -> RegResult<T>,
    {
        let mut driver = self.lock()?;
        f(&mut **driver)
    }

    pub fn info(&self) -> RegResult<DriverInfo> {
        Ok(self.lock()?.info())
    }

    pub fn set_address_space(&self, space: AddressSpace) -> RegResult<()> {
        self.with(|d| d.set_address_space(space))
    }

    pub fn reg_read(&self, offset: u32) -> RegResult<i32> {
        self.with(|d| d.reg_read(offset))
    }

    pub fn reg_read64(&self, offset: u32) -> RegResult<i64> {
        self.with(|d| d.reg_read64(offset))
    }

    pub fn reg_write(&self, offset: u32, value: i32) -> RegResult<()> {
        self.with(|d| d.reg_write(offset, value))
    }

    pub fn reg_write64(&self, offset: u32, value: i64) -> RegResult<()> {
        self.with(|d| d.reg_write64(offset, value))
    }

    /// Read `count` words into a new vector
    pub fn array_read32(&self, offset: u32, count: usize) -> RegResult<Vec<i32>> {
        let mut words = vec![0i32; count];
        self.with(|d| d.array_read32(offset, &mut words, 0, count))?;
        Ok(words)
    }

    pub fn array_write32(&self, offset: u32, data: &[i32]) -> RegResult<()> {
        self.with(|d| d.array_write32(offset, data, 0, data.len()))
    }

    /// [`reg_refresh`] under one lock
    pub fn refresh<R: Refresh>(
        &self,
        registers: &mut [R],
        start: usize,
        end: usize,
    ) -> RegResult<()> {
        self.with(|d| reg_refresh(d, registers, start, end))
    }

    pub fn close(&self) -> RegResult<()> {
        self.with(|d| d.close())
    }
}

/// Background reader for a fixed set of registers
///
/// Each round reads every offset in order and hands the result to the
/// callback, then waits for the interval. Stopping wakes the worker and
/// joins it; dropping the poller stops it.
pub struct RegisterPoller {
    running: Arc<AtomicBool>,
    rounds: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl RegisterPoller {
    pub fn start<F>(
        driver: SharedDriver,
        offsets: Vec<u32>,
        interval: Duration,
        mut callback: F,
    ) -> Self
    where
        F: FnMut(u32, RegResult<i32>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let rounds = Arc::new(AtomicU64::new(0));

        let worker_running = Arc::clone(&running);
        let worker_rounds = Arc::clone(&rounds);

        debug!(registers = offsets.len(), ?interval, "starting register poller");
        let handle = thread::spawn(move || {
            while worker_running.load(Ordering::SeqCst) {
                for &offset in &offsets {
                    if !worker_running.load(Ordering::SeqCst) {
                        return;
                    }
                    callback(offset, driver.reg_read(offset));
                }
                worker_rounds.fetch_add(1, Ordering::SeqCst);

                let deadline = Instant::now() + interval;
                while worker_running.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        });

        Self {
            running,
            rounds,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completed polling rounds
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("register poller callback panicked");
            }
            debug!("register poller stopped");
        }
    }
}

impl Drop for RegisterPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
