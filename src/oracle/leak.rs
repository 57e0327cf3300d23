use crate::fault::MemoryMonitor;

use super::OracleViolation;

/// Checks that the memory hook's byte accumulator is balanced.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryLeakOracle;

impl MemoryLeakOracle {
    /// Fails if `monitor` reports outstanding bytes.
    pub fn check(monitor: &MemoryMonitor) -> Result<(), OracleViolation> {
        Self::check_bytes(monitor.bytes_used())
    }

    /// Fails unless `bytes` is zero.
    pub fn check_bytes(bytes: i64) -> Result<(), OracleViolation> {
        if bytes == 0 {
            Ok(())
        } else {
            tracing::warn!(bytes_used = bytes, "memory accounting is not balanced");
            Err(OracleViolation::MemoryLeak { bytes })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_monitor_passes() {
        let monitor = MemoryMonitor::new();
        monitor.on_event(64, false);
        monitor.on_event(-64, true);
        assert!(MemoryLeakOracle::check(&monitor).is_ok());
    }

    #[test]
    fn outstanding_bytes_fail() {
        let err = MemoryLeakOracle::check_bytes(-8).unwrap_err();
        assert_eq!(err, OracleViolation::MemoryLeak { bytes: -8 });
        let err: crate::Error = err.into();
        assert_eq!(err.kind(), crate::ErrorKind::MemoryLeak);
    }
}
