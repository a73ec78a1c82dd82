//! Scheduler
//!
//! Three-band feedback scheduler with:
//! - L1 (priority 100..=149): shortest-estimated-burst-first, preemptive
//! - L2 (priority 50..=99): priority-ordered, non-preemptive
//! - L3 (priority 0..=49): round-robin with a fixed time quantum
//! - Aging: long-waiting threads are periodically promoted across bands
//!
//! All entry points assume interrupts are disabled. Masking interrupts is
//! the only mutual exclusion used here: waiting on a lock would re-enter
//! scheduling and deadlock.

pub mod queue;
pub mod thread;
pub mod trace;

use std::collections::HashMap;

use tracing::debug;

use crate::machine::Machine;
use queue::{Band, ReadyQueues};
use thread::{Thread, ThreadId, ThreadStatus};
use trace::{emit, SchedTrace};

/// Weight of the measured burst in the exponential average
const BURST_ALPHA: f64 = 0.5;

/// Accumulated ready time that triggers a promotion, in ticks
const AGING_THRESHOLD: u64 = 1500;

/// Priority gained per promotion
const AGING_STEP: u32 = 10;

/// Scheduler
pub struct Scheduler {
    threads: HashMap<ThreadId, Thread>,
    queues: ReadyQueues,
    current: Option<ThreadId>,
    /// One-shot flag: an L1 arrival demands a reschedule
    preempt: bool,
    /// Set while aging re-inserts drained threads, to suppress insert logs
    aging: bool,
    /// Thread staged for destruction after the next switch
    graveyard: Option<ThreadId>,
    next_id: u32,
}

impl Scheduler {
    /// Create a scheduler with no threads
    pub fn new() -> Self {
        Self {
            threads: HashMap::new(),
            queues: ReadyQueues::new(),
            current: None,
            preempt: false,
            aging: false,
            graveyard: None,
            next_id: 1,
        }
    }

    /// Allocate a thread; it stays JUST_CREATED until `ready_to_run`
    pub fn spawn(&mut self, name: &str, priority: u32) -> ThreadId {
        let tid = ThreadId(self.next_id);
        self.next_id += 1;
        self.threads.insert(tid, Thread::new(tid, name, priority));
        debug!(target: "nucleon::thread", "created thread {} ({})", tid, name);
        tid
    }

    /// Allocate the boot thread and install it as the running thread
    pub fn bootstrap(&mut self, name: &str, priority: u32) -> ThreadId {
        let tid = self.spawn(name, priority);
        let t = self.threads.get_mut(&tid).expect("just spawned");
        t.status = ThreadStatus::Running;
        self.current = Some(tid);
        tid
    }

    /// Thread by id
    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    /// Mutable thread by id
    pub fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&tid)
    }

    /// Id of the running thread
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// The running thread
    pub fn current_thread(&self) -> Option<&Thread> {
        self.current.and_then(|tid| self.threads.get(&tid))
    }

    /// True when an L1 arrival has demanded a reschedule
    pub fn preempt_requested(&self) -> bool {
        self.preempt
    }

    /// Mark a thread ready and queue it in the band its priority maps to
    ///
    /// Sets the preemption flag when the arrival lands in L1 and either
    /// the running thread sits in a lower band or its burst estimate
    /// strictly exceeds the arrival's.
    pub fn ready_to_run(&mut self, tid: ThreadId, machine: &Machine) {
        assert!(machine.interrupt.is_off(), "ready_to_run with interrupts on");

        let now = machine.now();
        let (band, burst, priority) = {
            let t = self.threads.get_mut(&tid).expect("unknown thread");
            t.status = ThreadStatus::Ready;
            t.enter_ready_time = now;
            (Band::of_priority(t.priority), t.burst_estimate, t.priority)
        };

        if !self.aging {
            emit(SchedTrace::Inserted {
                tick: now,
                thread: tid,
                band,
            });
        }
        self.queues.insert(band, tid, burst, priority);

        if band == Band::L1 {
            let demands_cpu = self
                .current_thread()
                .map(|cur| cur.priority < 100 || burst < cur.burst_estimate)
                .unwrap_or(false);
            if demands_cpu {
                self.preempt = true;
                debug!(target: "nucleon::sched", "preemption flag set by thread {}", tid);
            }
        }
    }

    /// Pick and dequeue the next thread to run: L1, then L2, then L3
    ///
    /// Taking the head of L1 consumes any pending preemption request.
    pub fn find_next_to_run(&mut self, machine: &Machine) -> Option<ThreadId> {
        assert!(machine.interrupt.is_off(), "find_next_to_run with interrupts on");

        let now = machine.now();
        for band in [Band::L1, Band::L2, Band::L3] {
            if let Some(tid) = self.queues.pop(band) {
                emit(SchedTrace::Removed {
                    tick: now,
                    thread: tid,
                    band,
                });
                if band == Band::L1 {
                    self.preempt = false;
                }
                return Some(tid);
            }
        }
        None
    }

    /// Dispatch the CPU to `next`
    ///
    /// The caller has already moved the outgoing thread to READY, BLOCKED
    /// or FINISHED. With `finishing` set, the outgoing thread is staged in
    /// the graveyard and reclaimed after the switch; a thread cannot free
    /// its own stack while still running on it.
    pub fn run(&mut self, next: ThreadId, finishing: bool, machine: &mut Machine) {
        assert!(machine.interrupt.is_off(), "run with interrupts on");
        let old = self.current.expect("run without a current thread");
        assert!(old != next, "switching a thread to itself");

        let now = machine.now();

        if finishing {
            assert!(self.graveyard.is_none(), "graveyard already staged");
            self.graveyard = Some(old);
        }

        let executed = {
            let t = self.threads.get_mut(&old).expect("unknown outgoing thread");
            t.save_user_state(machine);
            t.check_overflow();
            now - t.start_cpu_time
        };

        {
            let t = self.threads.get_mut(&next).expect("unknown next thread");
            t.status = ThreadStatus::Running;
            t.start_cpu_time = now;
        }
        self.current = Some(next);

        debug!(
            target: "nucleon::thread",
            "switching from thread {} to thread {}",
            old, next
        );
        emit(SchedTrace::Selected {
            tick: now,
            thread: next,
            previous: old,
            executed,
        });

        // The simulated context switch: the incoming thread's snapshot
        // becomes the machine state. The phase below is what the original
        // hardware switch runs on the resumed thread's stack.
        self.reap_graveyard();
        if let Some(t) = self.threads.get(&next) {
            t.restore_user_state(machine);
        }
    }

    /// Drain the staged finished thread, exactly once per switch
    fn reap_graveyard(&mut self) {
        if let Some(tid) = self.graveyard.take() {
            let t = self.threads.remove(&tid).expect("staged thread vanished");
            assert!(t.status == ThreadStatus::Finished, "reaping a live thread");
            debug!(target: "nucleon::thread", "reclaimed thread {} ({})", tid, t.name);
        }
    }

    /// Fold a completed burst into the thread's estimate
    ///
    /// `estimate' = α · measured + (1 − α) · estimate`, α = 1/2. Call only
    /// when the thread gives up the CPU at the end of a burst.
    pub fn update_burst(&mut self, tid: ThreadId, machine: &Machine) {
        let now = machine.now();
        let t = self.threads.get_mut(&tid).expect("unknown thread");
        let measured = (now - t.start_cpu_time) as f64;
        let old = t.burst_estimate;
        let new = BURST_ALPHA * measured + (1.0 - BURST_ALPHA) * old;
        t.burst_estimate = new;

        emit(SchedTrace::BurstUpdated {
            tick: now,
            thread: tid,
            old,
            add: measured,
            new,
        });
    }

    /// Promote threads that have waited too long
    ///
    /// Atomic with respect to other scheduler decisions: interrupts are
    /// masked for the whole pass, and the queues are drained before any
    /// thread is re-inserted. Accumulated ready time above the threshold
    /// buys one promotion of ten priority points (clamped to 149); the
    /// threshold is subtracted, not zeroed, so leftover credit carries
    /// forward. Re-insertion goes through `ready_to_run` so each thread
    /// lands in the queue matching its new priority.
    pub fn age(&mut self, machine: &mut Machine) {
        let old_level = machine.interrupt.set_level(crate::machine::IntLevel::Off);
        self.aging = true;

        let now = machine.now();
        for tid in self.queues.drain_all() {
            let (promoted, old_priority, new_priority) = {
                let t = self.threads.get_mut(&tid).expect("queued thread vanished");
                t.total_ready_time += now - t.enter_ready_time;
                if t.total_ready_time > AGING_THRESHOLD {
                    let old_priority = t.priority;
                    t.priority = if old_priority <= 139 {
                        (old_priority + AGING_STEP).min(thread::MAX_PRIORITY)
                    } else {
                        thread::MAX_PRIORITY
                    };
                    t.total_ready_time -= AGING_THRESHOLD;
                    (true, old_priority, t.priority)
                } else {
                    (false, 0, 0)
                }
            };

            if promoted {
                // A band crossing surfaces in the logs as a queue migration.
                match old_priority {
                    40..=49 => {
                        emit(SchedTrace::Removed { tick: now, thread: tid, band: Band::L3 });
                        emit(SchedTrace::Inserted { tick: now, thread: tid, band: Band::L2 });
                    }
                    90..=99 => {
                        emit(SchedTrace::Removed { tick: now, thread: tid, band: Band::L2 });
                        emit(SchedTrace::Inserted { tick: now, thread: tid, band: Band::L1 });
                    }
                    _ => {}
                }
                if old_priority != new_priority {
                    emit(SchedTrace::PriorityChanged {
                        tick: now,
                        thread: tid,
                        from: old_priority,
                        to: new_priority,
                    });
                }
            }

            self.ready_to_run(tid, machine);
        }

        self.aging = false;
        machine.interrupt.set_level(old_level);
    }

    /// Queued thread ids for one band, head first
    pub fn queue_contents(&self, band: Band) -> Vec<ThreadId> {
        self.queues.contents(band)
    }

    /// Dump the ready-queue contents for debugging
    pub fn print(&self) {
        for band in [Band::L1, Band::L2, Band::L3] {
            let ids: Vec<String> = self
                .queues
                .contents(band)
                .iter()
                .map(|tid| tid.to_string())
                .collect();
            debug!(target: "nucleon::sched", "{} contents: [{}]", band, ids.join(", "));
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::IntLevel;

    fn masked_machine() -> Machine {
        let mut machine = Machine::new();
        machine.interrupt.set_level(IntLevel::Off);
        machine
    }

    #[test]
    fn test_dispatch_order_across_bands() {
        let machine = masked_machine();
        let mut sched = Scheduler::new();
        sched.bootstrap("main", 0);

        let t1 = sched.spawn("t1", 40);
        let t2 = sched.spawn("t2", 80);
        let t3 = sched.spawn("t3", 120);
        let t4 = sched.spawn("t4", 120);
        sched.thread_mut(t3).unwrap().burst_estimate = 30.0;
        sched.thread_mut(t4).unwrap().burst_estimate = 20.0;

        for tid in [t1, t2, t3, t4] {
            sched.ready_to_run(tid, &machine);
        }

        assert_eq!(sched.find_next_to_run(&machine), Some(t4));
        assert_eq!(sched.find_next_to_run(&machine), Some(t3));
        assert_eq!(sched.find_next_to_run(&machine), Some(t2));
        assert_eq!(sched.find_next_to_run(&machine), Some(t1));
        assert_eq!(sched.find_next_to_run(&machine), None);
    }

    #[test]
    fn test_preemption_on_shorter_l1_arrival() {
        let machine = masked_machine();
        let mut sched = Scheduler::new();
        let main = sched.bootstrap("main", 100);
        sched.thread_mut(main).unwrap().burst_estimate = 80.0;

        let t = sched.spawn("arrival", 100);
        sched.thread_mut(t).unwrap().burst_estimate = 40.0;
        sched.ready_to_run(t, &machine);

        assert!(sched.preempt_requested());
        // Selecting from L1 consumes the request.
        assert_eq!(sched.find_next_to_run(&machine), Some(t));
        assert!(!sched.preempt_requested());
    }

    #[test]
    fn test_no_preemption_on_longer_l1_arrival() {
        let machine = masked_machine();
        let mut sched = Scheduler::new();
        let main = sched.bootstrap("main", 120);
        sched.thread_mut(main).unwrap().burst_estimate = 10.0;

        let t = sched.spawn("arrival", 120);
        sched.thread_mut(t).unwrap().burst_estimate = 50.0;
        sched.ready_to_run(t, &machine);

        assert!(!sched.preempt_requested());
    }

    #[test]
    fn test_preemption_when_running_thread_is_low_band() {
        let machine = masked_machine();
        let mut sched = Scheduler::new();
        sched.bootstrap("main", 30);

        let t = sched.spawn("arrival", 110);
        sched.ready_to_run(t, &machine);
        assert!(sched.preempt_requested());
    }

    #[test]
    fn test_l2_arrival_never_preempts() {
        let machine = masked_machine();
        let mut sched = Scheduler::new();
        sched.bootstrap("main", 30);

        let t = sched.spawn("arrival", 99);
        sched.ready_to_run(t, &machine);
        assert!(!sched.preempt_requested());
    }

    #[test]
    fn test_aging_promotes_across_band() {
        let mut machine = masked_machine();
        let mut sched = Scheduler::new();
        sched.bootstrap("main", 0);

        let t = sched.spawn("waiter", 45);
        sched.ready_to_run(t, &machine);

        machine.stats.advance(1600);
        sched.age(&mut machine);

        let waiter = sched.thread(t).unwrap();
        assert_eq!(waiter.priority, 55);
        assert_eq!(waiter.total_ready_time, 100);
        assert_eq!(sched.find_next_to_run(&machine), Some(t));
    }

    #[test]
    fn test_aging_clamps_at_max_priority() {
        let mut machine = masked_machine();
        let mut sched = Scheduler::new();
        sched.bootstrap("main", 0);

        let t = sched.spawn("hot", 145);
        sched.ready_to_run(t, &machine);

        machine.stats.advance(1600);
        sched.age(&mut machine);
        assert_eq!(sched.thread(t).unwrap().priority, 149);

        machine.stats.advance(1600);
        sched.age(&mut machine);
        assert_eq!(sched.thread(t).unwrap().priority, 149);
    }

    #[test]
    fn test_aging_credit_carries_forward() {
        let mut machine = masked_machine();
        let mut sched = Scheduler::new();
        sched.bootstrap("main", 0);

        let t = sched.spawn("waiter", 10);
        sched.ready_to_run(t, &machine);

        // Two aging passes of 800 ticks each: the first accumulates
        // without promoting, the second crosses the threshold.
        machine.stats.advance(800);
        sched.age(&mut machine);
        assert_eq!(sched.thread(t).unwrap().priority, 10);
        assert_eq!(sched.thread(t).unwrap().total_ready_time, 800);

        machine.stats.advance(800);
        sched.age(&mut machine);
        assert_eq!(sched.thread(t).unwrap().priority, 20);
        assert_eq!(sched.thread(t).unwrap().total_ready_time, 100);
    }

    #[test]
    fn test_burst_update_exponential_average() {
        let mut machine = masked_machine();
        let mut sched = Scheduler::new();
        let main = sched.bootstrap("main", 100);
        sched.thread_mut(main).unwrap().burst_estimate = 10.0;
        sched.thread_mut(main).unwrap().start_cpu_time = 0;

        machine.stats.advance(30);
        sched.update_burst(main, &machine);
        assert_eq!(sched.thread(main).unwrap().burst_estimate, 20.0);
    }

    #[test]
    fn test_run_reclaims_finished_thread() {
        let mut machine = masked_machine();
        let mut sched = Scheduler::new();
        let main = sched.bootstrap("main", 0);

        let t = sched.spawn("other", 0);
        sched.ready_to_run(t, &machine);
        let next = sched.find_next_to_run(&machine).unwrap();

        sched.thread_mut(main).unwrap().status = ThreadStatus::Finished;
        sched.run(next, true, &mut machine);

        assert_eq!(sched.current(), Some(t));
        assert!(sched.thread(main).is_none(), "finished thread not reclaimed");
        assert_eq!(sched.thread(t).unwrap().status, ThreadStatus::Running);
    }

    #[test]
    fn test_run_records_start_time() {
        let mut machine = masked_machine();
        let mut sched = Scheduler::new();
        let main = sched.bootstrap("main", 0);

        let t = sched.spawn("other", 0);
        sched.ready_to_run(t, &machine);
        machine.stats.advance(250);

        let next = sched.find_next_to_run(&machine).unwrap();
        sched.thread_mut(main).unwrap().status = ThreadStatus::Blocked;
        sched.run(next, false, &mut machine);

        assert_eq!(sched.thread(t).unwrap().start_cpu_time, 250);
    }

    #[test]
    #[should_panic(expected = "interrupts on")]
    fn test_ready_to_run_requires_masked_interrupts() {
        let machine = Machine::new();
        let mut sched = Scheduler::new();
        let t = sched.spawn("t", 10);
        sched.ready_to_run(t, &machine);
    }
}
