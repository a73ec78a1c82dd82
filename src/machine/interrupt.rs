//! Interrupt-Level Primitive
//!
//! On a uniprocessor, masking interrupts is the kernel's only mutual
//! exclusion mechanism: scheduler state is touched exclusively between
//! `set_level(Off)` and the matching restore.

use tracing::debug;

/// Interrupt enable state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    /// Interrupts disabled
    Off,
    /// Interrupts enabled
    On,
}

/// Interrupt controller state for the simulated machine
#[derive(Debug)]
pub struct Interrupt {
    level: IntLevel,
    yield_on_return: bool,
    halted: bool,
}

impl Interrupt {
    /// Create the controller with interrupts enabled
    pub fn new() -> Self {
        Self {
            level: IntLevel::On,
            yield_on_return: false,
            halted: false,
        }
    }

    /// Change the interrupt level, returning the previous level so
    /// callers can restore it
    pub fn set_level(&mut self, level: IntLevel) -> IntLevel {
        let old = self.level;
        self.level = level;
        old
    }

    /// Current interrupt level
    pub fn level(&self) -> IntLevel {
        self.level
    }

    /// True when interrupts are masked
    pub fn is_off(&self) -> bool {
        self.level == IntLevel::Off
    }

    /// Ask for a reschedule when the current interrupt returns
    pub fn request_yield(&mut self) {
        self.yield_on_return = true;
    }

    /// Consume a pending reschedule request
    pub fn take_yield_request(&mut self) -> bool {
        std::mem::take(&mut self.yield_on_return)
    }

    /// Stop the machine
    pub fn halt(&mut self) {
        debug!(target: "nucleon::thread", "machine halting");
        self.halted = true;
    }

    /// True once `halt` has been called
    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_level_returns_previous() {
        let mut int = Interrupt::new();
        assert_eq!(int.set_level(IntLevel::Off), IntLevel::On);
        assert!(int.is_off());
        assert_eq!(int.set_level(IntLevel::On), IntLevel::Off);
        assert!(!int.is_off());
    }

    #[test]
    fn test_yield_request_is_one_shot() {
        let mut int = Interrupt::new();
        assert!(!int.take_yield_request());
        int.request_yield();
        assert!(int.take_yield_request());
        assert!(!int.take_yield_request());
    }

    #[test]
    fn test_halt() {
        let mut int = Interrupt::new();
        assert!(!int.is_halted());
        int.halt();
        assert!(int.is_halted());
    }
}
