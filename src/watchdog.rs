//! This module contains the hooks that let a caller bound how long the
//! optimization pass may spend on a contract.
//!
//! The interpreter polls its watchdog between instructions, every
//! [`Watchdog::poll_every`] of them. Stopping is therefore cooperative: an
//! expensive instruction runs to completion, and a method stopped this way is
//! reported as aborted and keeps its entry offset.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`], shared by every method analysis of a
/// pass, including those running on worker threads.
pub type DynWatchdog = Arc<dyn Watchdog>;

/// Something the interpreter asks whether it should give up on the current
/// method.
pub trait Watchdog
where
    Self: Debug + Send + Sync,
{
    /// Checks if the interpreter should abandon the method it is running.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of instructions to execute between polls.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A watchdog that never stops the interpreter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        usize::MAX
    }
}

/// A watchdog that stops the interpreter once an externally owned flag is
/// raised, such as when the build driving the compiler is cancelled.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    flag: Arc<AtomicBool>,

    /// Instructions executed between polls of the flag.
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Creates a watchdog that watches `flag`, polled every
    /// [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] instructions.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            poll_loop_iterations: DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS,
        }
    }

    /// Polls the flag every `iterations` instructions, at least one.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations.max(1);
        self
    }

    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A watchdog that gives the whole pass a time budget.
///
/// Methods still running when the budget runs out are aborted, while methods
/// analyzed before then keep their results.
#[derive(Clone, Debug)]
pub struct DeadlineWatchdog {
    /// No deadline means the budget is too large to represent.
    deadline: Option<Instant>,
    poll_loop_iterations: usize,
}

impl DeadlineWatchdog {
    /// Creates a watchdog whose budget of `budget` starts now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            deadline:             Instant::now().checked_add(budget),
            poll_loop_iterations: DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS,
        }
    }

    #[must_use]
    pub fn at(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            poll_loop_iterations: DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS,
        }
    }

    /// Checks the clock every `iterations` instructions, at least one.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations.max(1);
        self
    }

    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for DeadlineWatchdog {
    fn should_stop(&self) -> bool {
        self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}
