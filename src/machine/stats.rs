//! Tick Accounting
//!
//! The monotonic tick counter every scheduling decision is stamped with,
//! plus coarse buckets for where the time went.

/// Machine time statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    /// Total ticks since boot
    pub total_ticks: u64,
    /// Ticks spent in kernel code
    pub system_ticks: u64,
    /// Ticks spent running user code
    pub user_ticks: u64,
    /// Ticks with no runnable thread
    pub idle_ticks: u64,
}

impl Stats {
    /// Fresh counter at tick zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `ticks` of user time
    pub fn advance(&mut self, ticks: u64) {
        self.total_ticks += ticks;
        self.user_ticks += ticks;
    }

    /// Advance the clock by `ticks` of kernel time
    pub fn advance_system(&mut self, ticks: u64) {
        self.total_ticks += ticks;
        self.system_ticks += ticks;
    }

    /// Advance the clock by one idle tick
    pub fn advance_idle(&mut self) {
        self.total_ticks += 1;
        self.idle_ticks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_buckets() {
        let mut stats = Stats::new();
        stats.advance(10);
        stats.advance_system(5);
        stats.advance_idle();
        assert_eq!(stats.total_ticks, 16);
        assert_eq!(stats.user_ticks, 10);
        assert_eq!(stats.system_ticks, 5);
        assert_eq!(stats.idle_ticks, 1);
    }
}
