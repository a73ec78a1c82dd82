//! Thread Control Block
//!
//! A thread is the unit of scheduling:
//! - Priority 0..=149, mapped onto one of three ready bands
//! - Exponentially smoothed estimate of its next CPU burst
//! - Ready-time bookkeeping for the aging engine
//! - A simulated stack guarded by an overflow sentinel
//! - Optional user state (register snapshot + address space)

use std::fmt;

use crate::machine::{AddressSpace, Machine, RegisterFile};

/// Highest valid thread priority
pub const MAX_PRIORITY: u32 = 149;

/// Simulated stack size, in bytes
pub const STACK_SIZE: usize = 8 * 1024;

/// Sentinel word written at the low end of every stack; a scribbled
/// sentinel means the thread ran off the end of its stack.
const STACK_SENTINEL: u32 = 0xdeadbeef;

/// Thread ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Allocated but never made ready
    JustCreated,
    /// On a ready queue
    Ready,
    /// Owns the CPU
    Running,
    /// Waiting on I/O or an event
    Blocked,
    /// Exited; storage reclaimed one switch later
    Finished,
}

/// User-mode context a thread restores when it is switched in
#[derive(Debug, Clone)]
pub struct UserState {
    /// Saved register file
    pub registers: RegisterFile,
    /// The thread's address space
    pub space: AddressSpace,
}

/// Thread control block
#[derive(Debug)]
pub struct Thread {
    /// Thread ID
    pub id: ThreadId,
    /// Debug name
    pub name: String,
    /// Scheduling priority, 0..=149
    pub priority: u32,
    /// Smoothed estimate of the next CPU burst, in ticks
    pub burst_estimate: f64,
    /// Tick of the last transition to READY
    pub enter_ready_time: u64,
    /// Ticks accumulated in READY since the last promotion
    pub total_ready_time: u64,
    /// Tick at which the thread last began running
    pub start_cpu_time: u64,
    /// Current state
    pub status: ThreadStatus,
    /// Saved user-mode context, if this thread runs a user program
    pub user: Option<UserState>,
    stack: Vec<u8>,
}

impl Thread {
    /// Create a thread; it is not ready until handed to the scheduler
    pub fn new(id: ThreadId, name: &str, priority: u32) -> Self {
        assert!(priority <= MAX_PRIORITY, "priority {} out of range", priority);

        let mut stack = vec![0u8; STACK_SIZE];
        stack[..4].copy_from_slice(&STACK_SENTINEL.to_le_bytes());

        Self {
            id,
            name: name.to_string(),
            priority,
            burst_estimate: 0.0,
            enter_ready_time: 0,
            total_ready_time: 0,
            start_cpu_time: 0,
            status: ThreadStatus::JustCreated,
            user: None,
            stack,
        }
    }

    /// Attach user state so switches save and restore it
    pub fn set_user_state(&mut self, space: AddressSpace) {
        self.user = Some(UserState {
            registers: RegisterFile::default(),
            space,
        });
    }

    /// Panic if the stack sentinel has been overwritten
    pub fn check_overflow(&self) {
        let word = u32::from_le_bytes(self.stack[..4].try_into().unwrap());
        assert!(
            word == STACK_SENTINEL,
            "thread {} ({}) overflowed its stack",
            self.id,
            self.name
        );
    }

    /// Capture the machine's user-visible state on switch-out
    pub fn save_user_state(&mut self, machine: &Machine) {
        if let Some(user) = &mut self.user {
            user.registers = machine.registers.clone();
            user.space.save_state(machine);
        }
    }

    /// Reload this thread's user-visible state on switch-in
    pub fn restore_user_state(&self, machine: &mut Machine) {
        if let Some(user) = &self.user {
            machine.registers = user.registers.clone();
            user.space.restore_state(machine);
        }
    }
}
