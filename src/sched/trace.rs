//! Scheduler Trace Lines
//!
//! The downstream test harness scrapes these lines verbatim; the bracket
//! markers and wording are load-bearing. Keeping the formats on one enum
//! with a `Display` impl makes them checkable in one place.

use std::fmt;

use tracing::debug;

use super::queue::Band;
use super::thread::ThreadId;

/// One scrapeable scheduler event
#[derive(Debug, Clone, Copy)]
pub enum SchedTrace {
    /// `[A]`: thread entered a ready queue
    Inserted {
        /// Tick of the event
        tick: u64,
        /// Thread inserted
        thread: ThreadId,
        /// Queue it landed in
        band: Band,
    },
    /// `[B]`: thread left a ready queue
    Removed {
        /// Tick of the event
        tick: u64,
        /// Thread removed
        thread: ThreadId,
        /// Queue it left
        band: Band,
    },
    /// `[C]`: aging changed a thread's priority
    PriorityChanged {
        /// Tick of the event
        tick: u64,
        /// Thread promoted
        thread: ThreadId,
        /// Priority before
        from: u32,
        /// Priority after
        to: u32,
    },
    /// `[D]`: a completed burst updated the estimate
    BurstUpdated {
        /// Tick of the event
        tick: u64,
        /// Thread whose estimate moved
        thread: ThreadId,
        /// Estimate before
        old: f64,
        /// Measured burst folded in
        add: f64,
        /// Estimate after
        new: f64,
    },
    /// `[E]`: dispatcher switched threads
    Selected {
        /// Tick of the event
        tick: u64,
        /// Thread taking the CPU
        thread: ThreadId,
        /// Thread giving it up
        previous: ThreadId,
        /// Ticks the previous thread executed
        executed: u64,
    },
}

impl fmt::Display for SchedTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SchedTrace::Inserted { tick, thread, band } => write!(
                f,
                "[A] Tick [{}]: Thread [{}] is inserted into queue {}",
                tick, thread, band
            ),
            SchedTrace::Removed { tick, thread, band } => write!(
                f,
                "[B] Tick [{}]: Thread [{}] is removed from queue {}",
                tick, thread, band
            ),
            SchedTrace::PriorityChanged {
                tick,
                thread,
                from,
                to,
            } => write!(
                f,
                "[C] Tick [{}]: Thread [{}] changes its priority from [{}] to [{}]",
                tick, thread, from, to
            ),
            SchedTrace::BurstUpdated {
                tick,
                thread,
                old,
                add,
                new,
            } => write!(
                f,
                "[D] Tick [{}]: Thread [{}] update approximate burst time, from [{}], add [{}], to [{}]",
                tick, thread, old, add, new
            ),
            SchedTrace::Selected {
                tick,
                thread,
                previous,
                executed,
            } => write!(
                f,
                "[E] Tick [{}]: Thread [{}] is now selected for execution, thread [{}] is replaced, and it has executed [{}] ticks",
                tick, thread, previous, executed
            ),
        }
    }
}

/// Emit one trace line under the scheduler target
pub(super) fn emit(event: SchedTrace) {
    debug!(target: "nucleon::sched", "{}", event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_format() {
        let line = SchedTrace::Inserted {
            tick: 30,
            thread: ThreadId(2),
            band: Band::L1,
        };
        assert_eq!(
            line.to_string(),
            "[A] Tick [30]: Thread [2] is inserted into queue L1"
        );
    }

    #[test]
    fn test_removed_format() {
        let line = SchedTrace::Removed {
            tick: 40,
            thread: ThreadId(7),
            band: Band::L3,
        };
        assert_eq!(
            line.to_string(),
            "[B] Tick [40]: Thread [7] is removed from queue L3"
        );
    }

    #[test]
    fn test_priority_format() {
        let line = SchedTrace::PriorityChanged {
            tick: 1600,
            thread: ThreadId(4),
            from: 45,
            to: 55,
        };
        assert_eq!(
            line.to_string(),
            "[C] Tick [1600]: Thread [4] changes its priority from [45] to [55]"
        );
    }

    #[test]
    fn test_burst_format() {
        let line = SchedTrace::BurstUpdated {
            tick: 220,
            thread: ThreadId(1),
            old: 10.0,
            add: 30.0,
            new: 20.0,
        };
        assert_eq!(
            line.to_string(),
            "[D] Tick [220]: Thread [1] update approximate burst time, from [10], add [30], to [20]"
        );
    }

    #[test]
    fn test_selected_format() {
        let line = SchedTrace::Selected {
            tick: 100,
            thread: ThreadId(2),
            previous: ThreadId(1),
            executed: 80,
        };
        assert_eq!(
            line.to_string(),
            "[E] Tick [100]: Thread [2] is now selected for execution, thread [1] is replaced, and it has executed [80] ticks"
        );
    }
}
