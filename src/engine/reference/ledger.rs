//! Allocation accounting against the device memory monitor.

use crate::engine::{EngineError, MemoryFn};

fn signed(bytes: usize) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Tracks bytes one operation has reported as allocated so they can be
/// released with matching negative deltas.
pub(super) struct Ledger {
    monitor: Option<MemoryFn>,
    held: i64,
}

impl Ledger {
    pub fn new(monitor: Option<MemoryFn>) -> Self {
        Self { monitor, held: 0 }
    }

    /// Asks before allocating. A denied request is not held.
    pub fn allocate(&mut self, bytes: usize) -> Result<(), EngineError> {
        if bytes == 0 {
            return Ok(());
        }
        if let Some(monitor) = &self.monitor {
            if !monitor(signed(bytes), false) {
                return Err(EngineError::OutOfMemory);
            }
        }
        self.held += signed(bytes);
        Ok(())
    }

    /// Reports an allocation that already happened. A denied report is still
    /// held because the memory exists until released.
    pub fn grow(&mut self, bytes: usize) -> Result<(), EngineError> {
        if bytes == 0 {
            return Ok(());
        }
        self.held += signed(bytes);
        if let Some(monitor) = &self.monitor {
            if !monitor(signed(bytes), true) {
                return Err(EngineError::OutOfMemory);
            }
        }
        Ok(())
    }

    pub const fn held(&self) -> i64 {
        self.held
    }

    /// Gives up ownership of the held bytes without reporting them.
    pub fn into_held(self) -> i64 {
        self.held
    }

    /// Releases everything this ledger holds.
    pub fn release_all(self) {
        release(self.monitor.as_ref(), self.held);
    }
}

/// Reports `bytes` as freed.
pub(super) fn release(monitor: Option<&MemoryFn>, bytes: i64) {
    if bytes == 0 {
        return;
    }
    if let Some(monitor) = monitor {
        // Deallocations cannot be denied.
        let _ = monitor(-bytes, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording(deny_at: usize) -> (MemoryFn, Arc<Mutex<Vec<(i64, bool)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let monitor: MemoryFn = Arc::new(move |bytes, post| {
            let mut log = sink.lock();
            log.push((bytes, post));
            !(bytes > 0 && log.len() == deny_at)
        });
        (monitor, log)
    }

    #[test]
    fn pre_denial_is_not_held() {
        let (monitor, log) = recording(2);
        let mut ledger = Ledger::new(Some(Arc::clone(&monitor)));
        ledger.allocate(100).expect("first allocation allowed");
        assert_eq!(ledger.allocate(50), Err(EngineError::OutOfMemory));
        assert_eq!(ledger.held(), 100);
        ledger.release_all();
        assert_eq!(log.lock().last(), Some(&(-100, true)));
    }

    #[test]
    fn post_denial_is_held_and_released() {
        let (monitor, log) = recording(1);
        let mut ledger = Ledger::new(Some(monitor));
        assert_eq!(ledger.grow(64), Err(EngineError::OutOfMemory));
        assert_eq!(ledger.held(), 64);
        ledger.release_all();
        let sum: i64 = log.lock().iter().map(|(b, _)| b).sum();
        assert_eq!(sum, 0);
    }
}
