//! Cooperative callback scheduler.
//!
//! A small fixed set of priority-task workers (one OS thread each)
//! multiplexes all flight-control callbacks. Each worker walks up to three
//! priority bands of callback records in circular order: the first ready
//! record runs exactly once, then the walk resumes after it, so no ready
//! callback in a band can be starved by another at the same priority.
//!
//! Scheduling state per record is a `waiting` flag (an atomic word — the
//! only value touched from outside the worker) and a `schedule_time`
//! mutated under the scheduler's short mutex. When nothing is ready the
//! worker sleeps on its signal up to the nearest deadline, capped at
//! [`SCHEDULER_MAX_SLEEP_MS`].

mod rt;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use skylark_common::consts::SCHEDULER_MAX_SLEEP_MS;
use thiserror::Error;
use tracing::{debug, info};

pub use rt::rt_worker_setup;

/// Number of priority bands within one worker.
const BANDS: usize = 3;

/// Worker contexts, highest first. One OS thread per priority task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Regular = 2,
    Low = 3,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Regular,
        TaskPriority::Low,
    ];

    fn short_name(self) -> &'static str {
        match self {
            TaskPriority::Critical => "sky-crit",
            TaskPriority::High => "sky-high",
            TaskPriority::Regular => "sky-reg",
            TaskPriority::Low => "sky-low",
        }
    }
}

/// Priority band of a callback within its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPriority {
    Critical = 0,
    Regular = 1,
    Low = 2,
}

/// How `schedule` treats an existing deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Never change an existing schedule.
    None,
    /// Reschedule only if the new deadline is earlier.
    Sooner,
    /// Reschedule only if the new deadline is later.
    Later,
    /// Always reschedule.
    Override,
}

/// What `schedule` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// An existing schedule took precedence.
    Unchanged,
    /// The callback had no schedule and got one.
    Scheduled,
    /// An existing schedule was moved.
    Rescheduled,
}

/// Errors from scheduler lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error("RT setup failed: {0}")]
    RtSetup(String),
    #[error("worker spawn failed: {0}")]
    Spawn(String),
}

// ─── Callback records ───────────────────────────────────────────────

struct CallbackRecord {
    name: &'static str,
    task: TaskPriority,
    cb: Mutex<Box<dyn FnMut() + Send>>,
    /// Ready flag. Writable from any thread (the dispatch path); cleared
    /// by the owning worker just before execution.
    waiting: AtomicBool,
    /// Deadline in scheduler ticks [ms]; 0 = unscheduled. Read-modify-write
    /// only under the scheduler mutex.
    schedule_time: AtomicU64,
    run_count: AtomicU64,
    max_runtime_us: AtomicU64,
}

/// Handle to a registered callback. Created once at init, never destroyed.
#[derive(Clone)]
pub struct CallbackHandle {
    rec: Arc<CallbackRecord>,
}

impl CallbackHandle {
    pub fn name(&self) -> &'static str {
        self.rec.name
    }

    pub fn run_count(&self) -> u64 {
        self.rec.run_count.load(Ordering::Relaxed)
    }

    /// Longest single execution observed [µs].
    pub fn max_runtime_us(&self) -> u64 {
        self.rec.max_runtime_us.load(Ordering::Relaxed)
    }
}

// ─── Worker state ───────────────────────────────────────────────────

struct WorkerState {
    bands: [Vec<Arc<CallbackRecord>>; BANDS],
    cursors: [usize; BANDS],
}

impl WorkerState {
    fn new() -> Self {
        Self {
            bands: [Vec::new(), Vec::new(), Vec::new()],
            cursors: [0; BANDS],
        }
    }
}

struct WorkerSlot {
    state: Mutex<WorkerState>,
    signal: Mutex<bool>,
    wakeup: Condvar,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::new()),
            signal: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    fn notify(&self) {
        *self.signal.lock().unwrap() = true;
        self.wakeup.notify_one();
    }
}

struct Inner {
    epoch: Instant,
    /// Synthetic clock offset, used by deterministic tests.
    clock_offset_ms: AtomicU64,
    /// Short mutex guarding schedule_time decisions.
    lock: Mutex<()>,
    workers: [WorkerSlot; 4],
    shutdown: AtomicBool,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + self.clock_offset_ms.load(Ordering::Relaxed)
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

/// The callback scheduler: registration, scheduling, dispatch, workers.
pub struct Scheduler {
    inner: Arc<Inner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                epoch: Instant::now(),
                clock_offset_ms: AtomicU64::new(0),
                lock: Mutex::new(()),
                workers: [
                    WorkerSlot::new(),
                    WorkerSlot::new(),
                    WorkerSlot::new(),
                    WorkerSlot::new(),
                ],
                shutdown: AtomicBool::new(false),
            }),
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Milliseconds since scheduler creation.
    pub fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    /// Register a callback. Records live for the life of the scheduler.
    pub fn create(
        &self,
        name: &'static str,
        band: CallbackPriority,
        task: TaskPriority,
        cb: impl FnMut() + Send + 'static,
    ) -> CallbackHandle {
        let rec = Arc::new(CallbackRecord {
            name,
            task,
            cb: Mutex::new(Box::new(cb)),
            waiting: AtomicBool::new(false),
            schedule_time: AtomicU64::new(0),
            run_count: AtomicU64::new(0),
            max_runtime_us: AtomicU64::new(0),
        });
        let slot = &self.inner.workers[task as usize];
        slot.state.lock().unwrap().bands[band as usize].push(Arc::clone(&rec));
        debug!(name, ?task, "callback registered");
        CallbackHandle { rec }
    }

    /// Schedule `handle` to run in `ms` milliseconds.
    ///
    /// Requests of 0 ms become one tick; scheduling "at time zero" is the
    /// reserved unscheduled state and cannot be requested.
    pub fn schedule(
        &self,
        handle: &CallbackHandle,
        ms: u32,
        mode: UpdateMode,
    ) -> ScheduleOutcome {
        let ms = ms.max(1) as u64;
        let guard = self.inner.lock.lock().unwrap();
        let new = self.inner.now_ms() + ms;
        let cur = handle.rec.schedule_time.load(Ordering::Relaxed);
        let update = cur == 0
            || match mode {
                UpdateMode::None => false,
                UpdateMode::Sooner => new < cur,
                UpdateMode::Later => new > cur,
                UpdateMode::Override => true,
            };
        if !update {
            return ScheduleOutcome::Unchanged;
        }
        handle.rec.schedule_time.store(new, Ordering::Relaxed);
        drop(guard);

        // The worker may be asleep past the new deadline.
        self.inner.workers[handle.rec.task as usize].notify();
        if cur == 0 {
            ScheduleOutcome::Scheduled
        } else {
            ScheduleOutcome::Rescheduled
        }
    }

    /// Mark `handle` ready immediately and wake its worker.
    pub fn dispatch(&self, handle: &CallbackHandle) {
        handle.rec.waiting.store(true, Ordering::Release);
        self.inner.workers[handle.rec.task as usize].notify();
    }

    /// Interrupt-context-safe dispatch. On the host every context may
    /// signal a condvar, so this is the same operation under the name the
    /// call sites carry.
    pub fn dispatch_from_handler(&self, handle: &CallbackHandle) {
        self.dispatch(handle);
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        rt::rt_process_setup()?;
        let mut threads = self.threads.lock().unwrap();
        for task in TaskPriority::ALL {
            let inner = Arc::clone(&self.inner);
            let handle = std::thread::Builder::new()
                .name(task.short_name().to_string())
                .spawn(move || {
                    if let Err(e) = rt_worker_setup(task) {
                        tracing::warn!(?task, error = %e, "RT worker setup failed, continuing");
                    }
                    worker_loop(&inner, task);
                })
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            threads.push(handle);
        }
        info!("scheduler started ({} workers)", TaskPriority::ALL.len());
        Ok(())
    }

    /// Stop the workers and join them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for slot in &self.inner.workers {
            slot.notify();
        }
        let mut threads = self.threads.lock().unwrap();
        for t in threads.drain(..) {
            let _ = t.join();
        }
    }

    /// Run one dispatch iteration of `task`'s worker on the calling
    /// thread. Returns the idle time the worker would sleep [ms], 0 when a
    /// callback ran. Deterministic-test entry point; the spawned workers
    /// use the same path.
    pub fn step_worker(&self, task: TaskPriority) -> u64 {
        let slot = &self.inner.workers[task as usize];
        let mut state = slot.state.lock().unwrap();
        let now = self.inner.now_ms();
        run_next_callback(&self.inner, &mut state, 0, now)
    }

    /// Advance the synthetic clock. Test support.
    #[doc(hidden)]
    pub fn advance_clock_ms(&self, ms: u64) {
        self.inner.clock_offset_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for slot in &self.inner.workers {
            slot.notify();
        }
    }
}

// ─── Dispatch algorithm ─────────────────────────────────────────────

/// One worker iteration over `band` and everything below it.
///
/// Returns 0 when a callback ran, otherwise the smallest remaining
/// deadline [ms] capped at the maximum sleep. Every full traversal of a
/// band descends once into the next lower band, so lower priorities make
/// progress whenever the band above has no ready work.
fn run_next_callback(inner: &Inner, state: &mut WorkerState, band: usize, now: u64) -> u64 {
    if band >= BANDS {
        return SCHEDULER_MAX_SLEEP_MS;
    }
    if state.bands[band].is_empty() {
        return run_next_callback(inner, state, band + 1, now);
    }

    let len = state.bands[band].len();
    let start = state.cursors[band].min(len);
    let mut sleep = SCHEDULER_MAX_SLEEP_MS;
    let mut idx = start;
    let mut wrapped = false;

    loop {
        if idx >= len {
            // End of the band list: lower priorities get their turn.
            let lower = run_next_callback(inner, state, band + 1, now);
            if lower == 0 {
                return 0;
            }
            sleep = sleep.min(lower);
            idx = 0;
            wrapped = true;
            if start == 0 {
                break;
            }
            continue;
        }

        let rec = Arc::clone(&state.bands[band][idx]);
        let mut due = false;
        {
            let _guard = inner.lock.lock().unwrap();
            let st = rec.schedule_time.load(Ordering::Relaxed);
            if st != 0 {
                if st <= now {
                    rec.waiting.store(true, Ordering::Release);
                } else {
                    sleep = sleep.min(st - now);
                }
            }
            if rec.waiting.load(Ordering::Acquire) {
                // Any pending schedule is consumed; the flag drops just
                // before execution.
                rec.schedule_time.store(0, Ordering::Relaxed);
                rec.waiting.store(false, Ordering::Release);
                state.cursors[band] = idx + 1;
                due = true;
            }
        }
        if due {
            let t0 = Instant::now();
            {
                let mut cb = rec.cb.lock().unwrap();
                (*cb)();
            }
            let elapsed_us = t0.elapsed().as_micros() as u64;
            rec.run_count.fetch_add(1, Ordering::Relaxed);
            rec.max_runtime_us.fetch_max(elapsed_us, Ordering::Relaxed);
            return 0;
        }

        idx += 1;
        if wrapped && idx >= start {
            break;
        }
    }
    sleep
}

fn worker_loop(inner: &Inner, task: TaskPriority) {
    let slot = &inner.workers[task as usize];
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let sleep_ms = {
            let mut state = slot.state.lock().unwrap();
            let now = inner.now_ms();
            run_next_callback(inner, &mut state, 0, now)
        };
        if sleep_ms > 0 {
            let timeout = std::time::Duration::from_millis(sleep_ms.min(SCHEDULER_MAX_SLEEP_MS));
            let mut signaled = slot.signal.lock().unwrap();
            if !*signaled {
                let (guard, _) = slot.wakeup.wait_timeout(signaled, timeout).unwrap();
                signaled = guard;
            }
            *signaled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_cb(counter: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_runs_exactly_once() {
        let sched = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = sched.create(
            "once",
            CallbackPriority::Regular,
            TaskPriority::Regular,
            counter_cb(&count),
        );
        sched.dispatch(&cb);
        assert_eq!(sched.step_worker(TaskPriority::Regular), 0);
        assert!(sched.step_worker(TaskPriority::Regular) > 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cb.run_count(), 1);
    }

    #[test]
    fn schedule_elapses_with_the_clock() {
        let sched = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = sched.create(
            "timed",
            CallbackPriority::Regular,
            TaskPriority::Regular,
            counter_cb(&count),
        );
        assert_eq!(
            sched.schedule(&cb, 50, UpdateMode::Sooner),
            ScheduleOutcome::Scheduled
        );
        // Not due yet: worker reports the remaining deadline.
        let sleep = sched.step_worker(TaskPriority::Regular);
        assert!(sleep > 0 && sleep <= 50);
        sched.advance_clock_ms(60);
        assert_eq!(sched.step_worker(TaskPriority::Regular), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_mode_contract() {
        let sched = Scheduler::new();
        let cb = sched.create(
            "modes",
            CallbackPriority::Regular,
            TaskPriority::Regular,
            || {},
        );
        assert_eq!(
            sched.schedule(&cb, 100, UpdateMode::None),
            ScheduleOutcome::Scheduled
        );
        // None never changes an existing schedule.
        assert_eq!(
            sched.schedule(&cb, 10, UpdateMode::None),
            ScheduleOutcome::Unchanged
        );
        // Sooner only moves the deadline earlier.
        assert_eq!(
            sched.schedule(&cb, 200, UpdateMode::Sooner),
            ScheduleOutcome::Unchanged
        );
        assert_eq!(
            sched.schedule(&cb, 10, UpdateMode::Sooner),
            ScheduleOutcome::Rescheduled
        );
        // Later is the mirror.
        assert_eq!(
            sched.schedule(&cb, 5, UpdateMode::Later),
            ScheduleOutcome::Unchanged
        );
        assert_eq!(
            sched.schedule(&cb, 500, UpdateMode::Later),
            ScheduleOutcome::Rescheduled
        );
        // Override always wins.
        assert_eq!(
            sched.schedule(&cb, 50, UpdateMode::Override),
            ScheduleOutcome::Rescheduled
        );
    }

    #[test]
    fn same_band_callbacks_alternate() {
        // Two always-ready callbacks in one band: neither may be skipped
        // twice in a row.
        let sched = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let order = Arc::clone(&order);
            sched.create(
                name,
                CallbackPriority::Regular,
                TaskPriority::Regular,
                move || order.lock().unwrap().push(name),
            );
        }
        // Re-dispatch both before every step.
        for _ in 0..6 {
            let state = &sched.inner.workers[TaskPriority::Regular as usize];
            for band_rec in &state.state.lock().unwrap().bands[1] {
                band_rec.waiting.store(true, Ordering::Release);
            }
            assert_eq!(sched.step_worker(TaskPriority::Regular), 0);
        }
        let order = order.lock().unwrap();
        for pair in order.windows(2) {
            assert_ne!(pair[0], pair[1], "a callback ran twice in a row: {order:?}");
        }
    }

    #[test]
    fn lower_band_progresses_when_higher_is_idle() {
        let sched = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _crit = sched.create(
            "crit-idle",
            CallbackPriority::Critical,
            TaskPriority::Regular,
            || {},
        );
        let low = sched.create(
            "low-busy",
            CallbackPriority::Low,
            TaskPriority::Regular,
            counter_cb(&count),
        );
        sched.dispatch(&low);
        assert_eq!(sched.step_worker(TaskPriority::Regular), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn threaded_workers_run_scheduled_callbacks() {
        let sched = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = sched.create(
            "threaded",
            CallbackPriority::Regular,
            TaskPriority::High,
            counter_cb(&count),
        );
        sched.start().unwrap();
        sched.schedule(&cb, 1, UpdateMode::Sooner);
        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        while count.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        sched.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
