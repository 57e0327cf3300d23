//! Generation-counted cyclic barrier for worker rendezvous.
//!
//! The barrier trips when `parties` callers have arrived. Exactly one
//! caller observes `is_leader = true` per generation. Each waiter remembers
//! the generation it arrived in, so a fast thread re-entering for the next
//! round can never be confused with a late waiter of the previous round.
//!
//! A barrier can be broken. Breaking releases every current waiter with
//! [`BarrierWaitError::Broken`] and makes every later `wait` fail
//! immediately. Workers hold a [`BreakOnUnwind`] guard so a thread that dies
//! mid-iteration cannot strand its peers.

use parking_lot::{Condvar, Mutex};

/// Error returned when waiting on a barrier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BarrierWaitError {
    /// A party died or gave up; the rendezvous can never complete.
    #[error("barrier broken")]
    Broken,
}

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Barrier for N-way rendezvous.
#[derive(Debug)]
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl Barrier {
    /// Creates a new barrier that trips when `parties` have arrived.
    ///
    /// # Panics
    /// Panics if `parties == 0`.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "barrier requires at least 1 party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Returns the number of parties required to trip the barrier.
    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Returns how many times the barrier has tripped.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Returns true once the barrier has been broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Waits for the barrier to trip.
    pub fn wait(&self) -> Result<BarrierWaitResult, BarrierWaitError> {
        let mut state = self.state.lock();
        if state.broken {
            return Err(BarrierWaitError::Broken);
        }

        let local_gen = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            tracing::trace!(generation = local_gen, "barrier tripped");
            return Ok(BarrierWaitResult { is_leader: true });
        }

        loop {
            if state.generation != local_gen {
                return Ok(BarrierWaitResult { is_leader: false });
            }
            if state.broken {
                return Err(BarrierWaitError::Broken);
            }
            self.cvar.wait(&mut state);
        }
    }

    /// Breaks the barrier, releasing all current and future waiters.
    pub fn break_barrier(&self) {
        let mut state = self.state.lock();
        if !state.broken {
            state.broken = true;
            tracing::warn!(
                generation = state.generation,
                arrived = state.arrived,
                parties = self.parties,
                "barrier broken"
            );
        }
        self.cvar.notify_all();
    }

    /// Returns a guard that breaks this barrier if dropped during a panic.
    #[must_use]
    pub fn break_on_unwind(&self) -> BreakOnUnwind<'_> {
        BreakOnUnwind { barrier: self }
    }
}

/// Result of a barrier wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_leader: bool,
}

impl BarrierWaitResult {
    /// Returns true for exactly one party (the leader) each generation.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }
}

/// Breaks the barrier when dropped while the owning thread is panicking.
#[derive(Debug)]
pub struct BreakOnUnwind<'a> {
    barrier: &'a Barrier,
}

impl Drop for BreakOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.barrier.break_barrier();
        }
    }
}
