//! Post-condition oracles.
//!
//! [`RayOracle`] is a liveness check: it fires random ray batches through
//! every query mode the device supports and only requires that each call
//! completes with a clean status. [`MemoryLeakOracle`] checks that the bytes
//! reported to the memory hook balance out to zero.

mod leak;
mod rays;

pub use leak::MemoryLeakOracle;
pub use rays::{BatchReport, OracleReport, RayOracle, RayOracleConfig};

use crate::engine::{QueryKind, QueryMode};
use crate::error::{Error, ErrorKind};

/// A post-condition that did not hold.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleViolation {
    /// The memory hook accumulator did not return to zero.
    #[error("memory accounting left {bytes} bytes outstanding")]
    MemoryLeak {
        /// Outstanding bytes.
        bytes: i64,
    },
    /// A query reported hits where none may exist.
    #[error("{kind:?} in {mode} mode reported {hits} hits, expected none")]
    UnexpectedHits {
        /// Query mode.
        mode: QueryMode,
        /// Query kind.
        kind: QueryKind,
        /// Hits observed.
        hits: usize,
    },
    /// A deterministic ray set produced the wrong number of hits.
    #[error("expected {expected} hits, observed {observed}")]
    HitCount {
        /// Expected hits.
        expected: usize,
        /// Observed hits.
        observed: usize,
    },
}

impl From<OracleViolation> for Error {
    fn from(v: OracleViolation) -> Self {
        let kind = match v {
            OracleViolation::MemoryLeak { .. } => ErrorKind::MemoryLeak,
            OracleViolation::UnexpectedHits { .. } | OracleViolation::HitCount { .. } => {
                ErrorKind::UnexpectedHit
            }
        };
        Self::new(kind).with_message(v.to_string()).with_source(v)
    }
}
