//! Real-time setup for scheduler workers.
//!
//! With the `rt` feature the process locks its pages and each worker gets
//! a `SCHED_FIFO` priority mapped from its task priority. Without the
//! feature everything is a no-op so the same binary runs on a dev box.

use super::{SchedulerError, TaskPriority};

#[cfg(feature = "rt")]
fn fifo_priority(task: TaskPriority) -> i32 {
    match task {
        TaskPriority::Critical => 80,
        TaskPriority::High => 60,
        TaskPriority::Regular => 40,
        TaskPriority::Low => 20,
    }
}

/// Lock all current and future memory pages before the workers spawn.
#[cfg(feature = "rt")]
pub(super) fn rt_process_setup() -> Result<(), SchedulerError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| SchedulerError::RtSetup(format!("mlockall failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub(super) fn rt_process_setup() -> Result<(), SchedulerError> {
    Ok(())
}

/// Give the calling worker thread its `SCHED_FIFO` priority.
#[cfg(feature = "rt")]
pub fn rt_worker_setup(task: TaskPriority) -> Result<(), SchedulerError> {
    let param = libc::sched_param {
        sched_priority: fifo_priority(task),
    };
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::from_raw_os_error(ret);
        return Err(SchedulerError::RtSetup(format!(
            "pthread_setschedparam(SCHED_FIFO) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn rt_worker_setup(_task: TaskPriority) -> Result<(), SchedulerError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_without_rt_feature_is_noop() {
        #[cfg(not(feature = "rt"))]
        {
            rt_process_setup().unwrap();
            rt_worker_setup(TaskPriority::Critical).unwrap();
        }
    }
}
