//! Task liveness flags.
//!
//! Each periodic task registers one flag and clears it every cycle. The
//! supervisor sweeps the registry: if any registered flag was not cleared
//! within the sweep window, the watchdog trips. On flight hardware that
//! resets the processor; the host binary logs and exits.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// One bit per supervised periodic task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WatchdogFlags: u32 {
        const SENSORS       = 0x0001;
        const ATTITUDE      = 0x0002;
        const STABILIZATION = 0x0004;
        const PATHFOLLOWER  = 0x0008;
        const MANUALCONTROL = 0x0010;
        const ACTUATOR      = 0x0020;
    }
}

/// Lock-free flag registry shared between tasks and the supervisor.
#[derive(Debug, Default)]
pub struct WatchdogRegistry {
    registered: AtomicU32,
    cleared: AtomicU32,
    tripped: AtomicU32,
}

/// Outcome of one supervisor sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Every registered flag was cleared since the previous sweep.
    Healthy,
    /// These registered flags were not cleared — the owning tasks stalled.
    Stalled(WatchdogFlags),
}

impl WatchdogRegistry {
    pub const fn new() -> Self {
        Self {
            registered: AtomicU32::new(0),
            cleared: AtomicU32::new(0),
            tripped: AtomicU32::new(0),
        }
    }

    /// Register a task flag. Called once at init per task.
    pub fn register(&self, flag: WatchdogFlags) {
        self.registered.fetch_or(flag.bits(), Ordering::AcqRel);
        // Grace period: count as cleared until the task's first cycle.
        self.cleared.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    /// Clear (feed) a task flag. Called from the task's periodic callback.
    #[inline]
    pub fn update(&self, flag: WatchdogFlags) {
        self.cleared.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    /// Sweep: compare cleared against registered and reset for the next
    /// window. A stall latches [`WatchdogRegistry::has_tripped`].
    pub fn sweep(&self) -> WatchdogVerdict {
        let registered = self.registered.load(Ordering::Acquire);
        let cleared = self.cleared.swap(0, Ordering::AcqRel);
        let missing = registered & !cleared;
        if missing == 0 {
            WatchdogVerdict::Healthy
        } else {
            self.tripped.fetch_or(missing, Ordering::AcqRel);
            WatchdogVerdict::Stalled(WatchdogFlags::from_bits_truncate(missing))
        }
    }

    /// Flags that have ever stalled since startup.
    pub fn has_tripped(&self) -> WatchdogFlags {
        WatchdogFlags::from_bits_truncate(self.tripped.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_when_all_flags_fed() {
        let wd = WatchdogRegistry::new();
        wd.register(WatchdogFlags::SENSORS);
        wd.register(WatchdogFlags::ATTITUDE);
        assert_eq!(wd.sweep(), WatchdogVerdict::Healthy); // grace period

        wd.update(WatchdogFlags::SENSORS);
        wd.update(WatchdogFlags::ATTITUDE);
        assert_eq!(wd.sweep(), WatchdogVerdict::Healthy);
    }

    #[test]
    fn stalled_task_is_latched() {
        let wd = WatchdogRegistry::new();
        wd.register(WatchdogFlags::SENSORS | WatchdogFlags::STABILIZATION);
        wd.sweep(); // consume the registration grace

        wd.update(WatchdogFlags::SENSORS);
        assert_eq!(
            wd.sweep(),
            WatchdogVerdict::Stalled(WatchdogFlags::STABILIZATION)
        );
        assert_eq!(wd.has_tripped(), WatchdogFlags::STABILIZATION);
    }
}
