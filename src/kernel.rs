//! Kernel Context
//!
//! The explicit root object tying the cores to the simulated machine:
//! no process-wide singletons, every operation reaches its state through
//! this context. Also home of the integer syscall surface user programs
//! enter through.
//!
//! Suspension points: a thread loses the CPU only on voluntary yield,
//! blocking, exit, or preemption on interrupt return (L1 arrival flag or
//! an exhausted L3 quantum).

use tracing::{debug, info, warn};

use crate::config::MachineConfig;
use crate::error::OsResult;
use crate::fs::FileSystem;
use crate::machine::{FileDisk, IntLevel, Machine, RamDisk, SectorDevice, SynchDisk};
use crate::sched::queue::Band;
use crate::sched::thread::{ThreadId, ThreadStatus};
use crate::sched::Scheduler;
use crate::{NAME, VERSION};

/// Handle id returned by `sys_open`
pub type OpenFileId = i32;

/// The kernel
pub struct Kernel {
    /// The simulated machine
    pub machine: Machine,
    /// Scheduler core
    pub scheduler: Scheduler,
    /// File system core
    pub file_system: FileSystem,
    timer_interval: u64,
    time_quantum: u64,
}

impl Kernel {
    /// Boot a kernel: build the disk, mount the file system, and install
    /// the boot thread as the running thread
    pub fn new(config: &MachineConfig, format: bool) -> OsResult<Self> {
        config.validate()?;

        let dev: Box<dyn SectorDevice> = match &config.disk_image {
            Some(path) => Box::new(FileDisk::open(path, config.num_sectors)?),
            None => Box::new(RamDisk::new(config.num_sectors)),
        };
        let disk = SynchDisk::new(dev);
        let file_system = FileSystem::new(disk, format)?;

        let machine = Machine::new();
        let mut scheduler = Scheduler::new();
        scheduler.bootstrap("main", 0);

        info!(
            "{} v{} up: {} sectors, timer every {} ticks",
            NAME, VERSION, config.num_sectors, config.timer_interval
        );

        Ok(Self {
            machine,
            scheduler,
            file_system,
            timer_interval: config.timer_interval,
            time_quantum: config.time_quantum,
        })
    }

    // ========== Thread Management ==========

    /// Create a thread and make it ready
    pub fn spawn_thread(&mut self, name: &str, priority: u32) -> ThreadId {
        let tid = self.scheduler.spawn(name, priority);
        let old = self.machine.interrupt.set_level(IntLevel::Off);
        self.scheduler.ready_to_run(tid, &self.machine);
        self.machine.interrupt.set_level(old);
        tid
    }

    /// Voluntarily give up the CPU; the yielding thread's completed
    /// burst feeds its estimate and it goes back on its ready queue
    ///
    /// With no other thread ready, the yield does not happen and the
    /// burst keeps running.
    pub fn yield_thread(&mut self) {
        let old = self.machine.interrupt.set_level(IntLevel::Off);
        if let Some(next) = self.scheduler.find_next_to_run(&self.machine) {
            let current = self.scheduler.current().expect("yield without a current thread");
            self.scheduler.update_burst(current, &self.machine);
            self.scheduler.ready_to_run(current, &self.machine);
            self.scheduler.run(next, false, &mut self.machine);
        }
        self.machine.interrupt.set_level(old);
    }

    /// Block the running thread until `wake_thread`; its completed burst
    /// feeds the estimate
    pub fn block_thread(&mut self) {
        self.sleep_thread(false);
    }

    /// Exit the running thread; its storage is reclaimed one switch later
    pub fn finish_thread(&mut self) {
        debug!(target: "nucleon::thread", "current thread finishing");
        self.sleep_thread(true);
    }

    /// Make a blocked thread ready again
    pub fn wake_thread(&mut self, tid: ThreadId) {
        let old = self.machine.interrupt.set_level(IntLevel::Off);
        self.scheduler.ready_to_run(tid, &self.machine);
        self.machine.interrupt.set_level(old);
    }

    fn sleep_thread(&mut self, finishing: bool) {
        let old = self.machine.interrupt.set_level(IntLevel::Off);
        let current = self.scheduler.current().expect("sleep without a current thread");

        if !finishing {
            self.scheduler.update_burst(current, &self.machine);
        }
        self.scheduler
            .thread_mut(current)
            .expect("current thread vanished")
            .status = if finishing {
            ThreadStatus::Finished
        } else {
            ThreadStatus::Blocked
        };

        let next = self
            .scheduler
            .find_next_to_run(&self.machine)
            .expect("no runnable thread to switch to");
        self.scheduler.run(next, finishing, &mut self.machine);
        self.machine.interrupt.set_level(old);
    }

    // ========== Timer ==========

    /// Advance the clock, driving the aging hook and preemption
    ///
    /// Every `timer_interval` ticks the aging engine runs. On each tick's
    /// interrupt return, a reschedule fires when the preemption flag is
    /// set or the running lowest-band thread has exhausted its quantum.
    pub fn tick(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.machine.stats.advance(1);
            let now = self.machine.now();

            if now % self.timer_interval == 0 {
                self.scheduler.age(&mut self.machine);
                self.scheduler.print();
            }

            let quantum_expired = self
                .scheduler
                .current_thread()
                .map(|t| {
                    Band::of_priority(t.priority) == Band::L3
                        && now - t.start_cpu_time >= self.time_quantum
                })
                .unwrap_or(false);
            if self.scheduler.preempt_requested() || quantum_expired {
                self.machine.interrupt.request_yield();
            }

            if self.machine.interrupt.take_yield_request() {
                self.yield_thread();
            }
        }
    }

    // ========== Syscall Surface ==========

    /// Stop the machine
    pub fn sys_halt(&mut self) {
        info!("halting");
        self.machine.interrupt.halt();
    }

    /// Create a file; returns 1 on success, 0 on failure
    pub fn sys_create(&mut self, path: &str, initial_size: u32) -> i32 {
        match self.file_system.create(path, initial_size) {
            Ok(()) => 1,
            Err(e) => {
                warn!("create {} failed: {}", path, e);
                0
            }
        }
    }

    /// Open a file; returns its handle id, or -1
    pub fn sys_open(&mut self, path: &str) -> OpenFileId {
        match self.file_system.open(path) {
            Ok(fid) => fid,
            Err(e) => {
                warn!("open {} failed: {}", path, e);
                -1
            }
        }
    }

    /// Read into `buf` from an open file; returns bytes read, or -1
    pub fn sys_read(&mut self, buf: &mut [u8], id: OpenFileId) -> i32 {
        match self.file_system.read(buf, id) {
            Ok(n) => n as i32,
            Err(e) => {
                warn!("read on id {} failed: {}", id, e);
                -1
            }
        }
    }

    /// Write `buf` to an open file; returns bytes written, or -1
    pub fn sys_write(&mut self, buf: &[u8], id: OpenFileId) -> i32 {
        match self.file_system.write(buf, id) {
            Ok(n) => n as i32,
            Err(e) => {
                warn!("write on id {} failed: {}", id, e);
                -1
            }
        }
    }

    /// Drop an open-file handle; returns 1 on success, -1 on a bad id
    pub fn sys_close(&mut self, id: OpenFileId) -> i32 {
        match self.file_system.close(id) {
            Ok(()) => 1,
            Err(e) => {
                warn!("close on id {} failed: {}", id, e);
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot() -> Kernel {
        Kernel::new(&MachineConfig::test(), true).unwrap()
    }

    #[test]
    fn test_boot_thread_is_running() {
        let kernel = boot();
        let current = kernel.scheduler.current_thread().unwrap();
        assert_eq!(current.status, ThreadStatus::Running);
        assert_eq!(current.name, "main");
    }

    #[test]
    fn test_yield_round_trip() {
        let mut kernel = boot();
        let main = kernel.scheduler.current().unwrap();
        let other = kernel.spawn_thread("other", 0);

        kernel.yield_thread();
        assert_eq!(kernel.scheduler.current(), Some(other));

        kernel.yield_thread();
        assert_eq!(kernel.scheduler.current(), Some(main));
    }

    #[test]
    fn test_finish_reclaims_thread() {
        let mut kernel = boot();
        let main = kernel.scheduler.current().unwrap();
        kernel.spawn_thread("other", 0);

        kernel.yield_thread(); // now running "other"
        kernel.finish_thread();

        assert_eq!(kernel.scheduler.current(), Some(main));
        assert_eq!(kernel.scheduler.thread(main).unwrap().status, ThreadStatus::Running);
        // The finished thread's storage is gone.
        assert!(kernel
            .scheduler
            .thread(crate::sched::thread::ThreadId(2))
            .is_none());
    }

    #[test]
    fn test_block_updates_burst_and_wake_requeues() {
        let mut kernel = boot();
        let worker = kernel.spawn_thread("worker", 0);

        kernel.yield_thread(); // run worker
        assert_eq!(kernel.scheduler.current(), Some(worker));

        kernel.machine.stats.advance(40);
        kernel.block_thread(); // burst of 40 completes
        assert_eq!(kernel.scheduler.thread(worker).unwrap().burst_estimate, 20.0);
        assert_eq!(kernel.scheduler.thread(worker).unwrap().status, ThreadStatus::Blocked);

        kernel.wake_thread(worker);
        assert_eq!(kernel.scheduler.thread(worker).unwrap().status, ThreadStatus::Ready);
    }

    #[test]
    fn test_yield_updates_burst_estimate() {
        let mut kernel = boot();
        let main = kernel.scheduler.current().unwrap();
        let peer = kernel.spawn_thread("peer", 0);

        kernel.machine.stats.advance(40);
        kernel.yield_thread();

        assert_eq!(kernel.scheduler.current(), Some(peer));
        // Burst of 40 folded into a fresh estimate: 0.5 * 40 + 0.5 * 0.
        assert_eq!(kernel.scheduler.thread(main).unwrap().burst_estimate, 20.0);
    }

    #[test]
    fn test_yield_without_ready_peer_keeps_burst_running() {
        let mut kernel = boot();
        let main = kernel.scheduler.current().unwrap();

        kernel.machine.stats.advance(40);
        kernel.yield_thread();

        assert_eq!(kernel.scheduler.current(), Some(main));
        assert_eq!(kernel.scheduler.thread(main).unwrap().burst_estimate, 0.0);
    }

    #[test]
    fn test_preemption_updates_burst_estimate() {
        let mut kernel = boot();
        let main = kernel.scheduler.current().unwrap();

        kernel.tick(30);
        let fast = kernel.spawn_thread("fast", 120);
        kernel.tick(1);

        assert_eq!(kernel.scheduler.current(), Some(fast));
        // Preempted at tick 31 after running since tick 0.
        assert_eq!(kernel.scheduler.thread(main).unwrap().burst_estimate, 15.5);
    }

    #[test]
    fn test_l1_arrival_preempts_on_next_tick() {
        let mut kernel = boot();
        let fast = kernel.spawn_thread("fast", 120);
        assert!(kernel.scheduler.preempt_requested());

        kernel.tick(1);
        assert_eq!(kernel.scheduler.current(), Some(fast));
        assert!(!kernel.scheduler.preempt_requested());
    }

    #[test]
    fn test_l3_quantum_round_robin() {
        let mut kernel = boot();
        let main = kernel.scheduler.current().unwrap();
        let peer = kernel.spawn_thread("peer", 0);

        // Main keeps the CPU until its quantum expires...
        kernel.tick(99);
        assert_eq!(kernel.scheduler.current(), Some(main));

        // ...then the ready L3 peer takes over.
        kernel.tick(1);
        assert_eq!(kernel.scheduler.current(), Some(peer));
    }

    #[test]
    fn test_file_syscalls_round_trip() {
        let mut kernel = boot();
        assert_eq!(kernel.sys_create("/a", 100), 1);

        let fid = kernel.sys_open("/a");
        assert!(fid >= 0);
        let data: Vec<u8> = (0..100).collect();
        assert_eq!(kernel.sys_write(&data, fid), 100);
        assert_eq!(kernel.sys_close(fid), 1);

        let fid = kernel.sys_open("/a");
        let mut out = vec![0u8; 100];
        assert_eq!(kernel.sys_read(&mut out, fid), 100);
        assert_eq!(out, data);
        assert_eq!(kernel.sys_close(fid), 1);
    }

    #[test]
    fn test_failed_syscalls_return_sentinels() {
        let mut kernel = boot();
        assert_eq!(kernel.sys_open("/ghost"), -1);
        assert_eq!(kernel.sys_close(42), -1);
        assert_eq!(kernel.sys_create("/a", 10), 1);
        assert_eq!(kernel.sys_create("/a", 10), 0);
    }

    #[test]
    fn test_halt() {
        let mut kernel = boot();
        assert!(!kernel.machine.interrupt.is_halted());
        kernel.sys_halt();
        assert!(kernel.machine.interrupt.is_halted());
    }
}
